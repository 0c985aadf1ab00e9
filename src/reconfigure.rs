//! Copies an archive into a fresh database, converting it to another unit
//! system on the way. The source archive is only read.

use std::fmt::Display;

use wxarchive_core::{BackendDescriptor, StorageDriver, StorageError, UnitSystem};

use crate::{
    config::{Config, ResolvedBinding},
    daily,
    error::MaintenanceError,
    manager::Manager,
    prompt::Confirm,
    registry::DriverRegistry,
    units::{self, ConversionError},
};

#[derive(Debug, Clone, PartialEq)]
pub enum ReconfigureOutcome {
    Declined,
    Reconfigured {
        database: String,
        records: u64,
        from: UnitSystem,
        to: UnitSystem,
    },
}

impl Display for ReconfigureOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconfigureOutcome::Declined => f.write_str("Nothing done."),
            ReconfigureOutcome::Reconfigured { database, records, from, to } => write!(
                f,
                "Copied {} records from {} to {} units into {}.",
                records, from, to, database
            ),
        }
    }
}

/// Name of the database a reconfigure writes into.
pub fn new_database_name(database_name: &str) -> String {
    format!("{}_new", database_name)
}

pub fn reconfigure(
    config: &Config,
    registry: &DriverRegistry,
    binding: &str,
    confirm: &mut dyn Confirm,
) -> Result<ReconfigureOutcome, MaintenanceError> {
    let resolved = config.resolve(binding)?;
    let target = config.target_unit()?;
    let driver = registry.driver_for(&resolved.descriptor)?;
    let new_descriptor = resolved
        .descriptor
        .with_database_name(&new_database_name(&resolved.descriptor.database_name));

    match driver.create(&new_descriptor) {
        Ok(()) => {}
        Err(StorageError::DatabaseExists(_)) => {
            if !confirm.confirm(&format!("New database {} already exists. Delete it first", new_descriptor)) {
                return Ok(ReconfigureOutcome::Declined);
            }
            driver
                .drop_database(&new_descriptor)
                .map_err(|e| MaintenanceError::on(&new_descriptor, e))?;
            driver
                .create(&new_descriptor)
                .map_err(|e| MaintenanceError::on(&new_descriptor, e))?;
        }
        Err(e) => return Err(MaintenanceError::on(&new_descriptor, e)),
    }
    tracing::info!(database = %new_descriptor, "created database for the reconfigured archive");

    let result = copy_converted(driver.as_ref(), &resolved, &new_descriptor, target, confirm);
    if !matches!(result, Ok(ReconfigureOutcome::Reconfigured { .. })) {
        match driver.drop_database(&new_descriptor) {
            Ok(()) => tracing::info!(database = %new_descriptor, "removed unfinished database"),
            Err(e) => tracing::warn!(database = %new_descriptor, error = %e, "cannot remove unfinished database"),
        }
    }
    result
}

fn copy_converted(
    driver: &dyn StorageDriver,
    resolved: &ResolvedBinding,
    new_descriptor: &BackendDescriptor,
    target: Option<UnitSystem>,
    confirm: &mut dyn Confirm,
) -> Result<ReconfigureOutcome, MaintenanceError> {
    let old = Manager::open_read_only(driver, &resolved.descriptor, &resolved.table)?;
    let from = old
        .unit_system()?
        .ok_or_else(|| MaintenanceError::NotInitialized(resolved.descriptor.to_string()))?;
    let to = target.unwrap_or(from);

    if !confirm.confirm(&format!(
        "Copy archive from {} to {}, converting units from {} to {}",
        resolved.descriptor, new_descriptor, from, to
    )) {
        return Ok(ReconfigureOutcome::Declined);
    }

    let new = Manager::open_with_create(driver, new_descriptor, old.table(), old.schema())?;

    let mut failed: Option<ConversionError> = None;
    let converted = old.records().map(|record| {
        record.and_then(|r| {
            units::convert_record(&r, to).map_err(|e| {
                let message = e.to_string();
                failed = Some(e);
                StorageError::Other(message)
            })
        })
    });
    let inserted = new.add_records(converted);
    let records = match (inserted, failed) {
        (Err(_), Some(e)) => return Err(MaintenanceError::Conversion(e.to_string())),
        (result, _) => result?,
    };

    daily::backfill(&new)?;
    new.close()?;
    old.close()?;

    tracing::info!(database = %new_descriptor, records, %from, %to, "archive reconfigured");
    Ok(ReconfigureOutcome::Reconfigured {
        database: new_descriptor.to_string(),
        records,
        from,
        to,
    })
}
