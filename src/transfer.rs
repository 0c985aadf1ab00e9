//! Copies every record of one configured archive into another, possibly on a
//! different backend engine.

use std::fmt::Display;

use crate::{config::Config, error::MaintenanceError, manager::Manager, prompt::Confirm, registry::DriverRegistry};

#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    NothingToTransfer { source: String },
    DryRun { count: i64, source: String, destination: String },
    Declined,
    Transferred { count: i64, source: String, destination: String },
}

impl Display for TransferOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferOutcome::NothingToTransfer { source } => write!(f, "No records found in {}. Nothing done.", source),
            TransferOutcome::DryRun { count, source, destination } => write!(
                f,
                "Dry run: {} records would be transferred from {} to {}.",
                count, source, destination
            ),
            TransferOutcome::Declined => f.write_str("Nothing done."),
            TransferOutcome::Transferred { count, source, destination } => {
                write!(f, "Transferred {} records from {} to {}.", count, source, destination)
            }
        }
    }
}

pub fn transfer(
    config: &Config,
    registry: &DriverRegistry,
    source_binding: &str,
    dest_binding: Option<&str>,
    dry_run: bool,
    confirm: &mut dyn Confirm,
) -> Result<TransferOutcome, MaintenanceError> {
    let dest_binding = match dest_binding.map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => return Err(MaintenanceError::Usage("--transfer requires --dest-binding".to_string())),
    };

    // Resolve everything before touching either database.
    let source = config.resolve(source_binding)?;
    let dest = config.resolve(dest_binding)?;
    let source_driver = registry.driver_for(&source.descriptor)?;
    let dest_driver = registry.driver_for(&dest.descriptor)?;
    let source_name = source.descriptor.to_string();
    let dest_name = dest.descriptor.to_string();

    let from = Manager::open_read_only(source_driver.as_ref(), &source.descriptor, &source.table)?;
    if from.span()?.is_none() {
        tracing::warn!(source = %source_name, "no records to transfer");
        from.close()?;
        return Ok(TransferOutcome::NothingToTransfer { source: source_name });
    }
    let count = from.count()?;

    if dry_run {
        from.close()?;
        return Ok(TransferOutcome::DryRun {
            count,
            source: source_name,
            destination: dest_name,
        });
    }

    if !confirm.confirm(&format!(
        "Transfer {} records from {} to {}",
        count, source_name, dest_name
    )) {
        return Ok(TransferOutcome::Declined);
    }

    let to = Manager::open_with_create(dest_driver.as_ref(), &dest.descriptor, &dest.table, &dest.schema)?;
    let before = to.count()?;
    tracing::info!(source = %source_name, destination = %dest_name, count, before, "transferring records");
    to.add_records(from.records())?;
    let after = to.count()?;

    let transferred = after - before;
    if transferred != count {
        tracing::warn!(expected = count, transferred, "transfer count mismatch");
        return Err(MaintenanceError::TransferMismatch {
            expected: count,
            transferred,
        });
    }

    to.close()?;
    from.close()?;
    tracing::info!(source = %source_name, destination = %dest_name, count, "transfer complete");
    Ok(TransferOutcome::Transferred {
        count,
        source: source_name,
        destination: dest_name,
    })
}
