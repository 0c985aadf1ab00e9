//! Adding, renaming and dropping archive columns.

use std::{fmt::Display, sync::Arc};

use wxarchive_core::{
    models::{INTERVAL_COLUMN, TIME_COLUMN, UNITS_COLUMN},
    SchemaColumn, StorageType,
};

use crate::{config::Config, error::MaintenanceError, manager::Manager, prompt::Confirm, registry::DriverRegistry};

const PROTECTED: &[&str] = &[TIME_COLUMN, UNITS_COLUMN, INTERVAL_COLUMN];

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnOutcome {
    Declined,
    Added { column: String, storage_type: StorageType },
    Renamed { from: String, to: String },
    Dropped { columns: Vec<String>, unknown: Vec<String> },
    NothingToDrop { unknown: Vec<String> },
}

impl Display for ColumnOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnOutcome::Declined => f.write_str("Nothing done."),
            ColumnOutcome::Added { column, storage_type } => {
                write!(f, "Added column '{}' of type {}.", column, storage_type)
            }
            ColumnOutcome::Renamed { from, to } => write!(f, "Renamed column '{}' to '{}'.", from, to),
            ColumnOutcome::Dropped { columns, unknown } => {
                write!(f, "Dropped columns {}.", columns.join(", "))?;
                if !unknown.is_empty() {
                    write!(f, " Skipped unknown columns {}.", unknown.join(", "))?;
                }
                Ok(())
            }
            ColumnOutcome::NothingToDrop { unknown } => {
                write!(f, "None of the columns {} exist. Nothing done.", unknown.join(", "))
            }
        }
    }
}

fn check_name(name: &str) -> Result<(), MaintenanceError> {
    if name.trim().is_empty() {
        return Err(MaintenanceError::Usage("column name must not be empty".to_string()));
    }
    Ok(())
}

fn check_unprotected(name: &str) -> Result<(), MaintenanceError> {
    if PROTECTED.iter().any(|p| *p == name) {
        return Err(MaintenanceError::Usage(format!("column '{}' cannot be changed", name)));
    }
    Ok(())
}

fn open(config: &Config, registry: &DriverRegistry, binding: &str) -> Result<Manager, MaintenanceError> {
    let resolved = config.resolve(binding)?;
    let driver = registry.driver_for(&resolved.descriptor)?;
    Manager::open(driver.as_ref(), &resolved.descriptor, &resolved.table)
}

pub fn add_column(
    config: &Config,
    registry: &DriverRegistry,
    binding: &str,
    name: &str,
    storage_type: StorageType,
    confirm: &mut dyn Confirm,
) -> Result<ColumnOutcome, MaintenanceError> {
    check_name(name)?;
    let manager = open(config, registry, binding)?;
    if manager.schema().column(name).is_some() {
        return Err(MaintenanceError::Usage(format!("column '{}' already exists", name)));
    }
    if !confirm.confirm(&format!("Add column '{}' of type {} to {}", name, storage_type, manager.descriptor())) {
        return Ok(ColumnOutcome::Declined);
    }

    let column = SchemaColumn::new(name, storage_type);
    manager.store().add_column(manager.table(), &column)?;
    if column.is_summarizable() {
        manager
            .store()
            .init_summary_tables(manager.table(), &[column.name.clone()])?;
    }
    tracing::info!(database = %manager.descriptor(), column = name, %storage_type, "column added");
    manager.close()?;
    Ok(ColumnOutcome::Added {
        column: name.to_string(),
        storage_type,
    })
}

pub fn rename_column(
    config: &Config,
    registry: &DriverRegistry,
    binding: &str,
    from: &str,
    to: &str,
    confirm: &mut dyn Confirm,
) -> Result<ColumnOutcome, MaintenanceError> {
    check_name(to)?;
    check_unprotected(from)?;
    check_unprotected(to)?;
    let manager = open(config, registry, binding)?;
    if manager.schema().column(from).is_none() {
        return Err(MaintenanceError::Usage(format!("no column '{}' in {}", from, manager.descriptor())));
    }
    if manager.schema().column(to).is_some() {
        return Err(MaintenanceError::Usage(format!("column '{}' already exists", to)));
    }
    if !confirm.confirm(&format!("Rename column '{}' to '{}' in {}", from, to, manager.descriptor())) {
        return Ok(ColumnOutcome::Declined);
    }

    manager.store().rename_column(manager.table(), from, to)?;
    tracing::info!(database = %manager.descriptor(), from, to, "column renamed");
    manager.close()?;
    Ok(ColumnOutcome::Renamed {
        from: from.to_string(),
        to: to.to_string(),
    })
}

pub fn drop_columns(
    config: &Config,
    registry: &DriverRegistry,
    binding: &str,
    names: &[String],
    confirm: &mut dyn Confirm,
) -> Result<ColumnOutcome, MaintenanceError> {
    if names.is_empty() {
        return Err(MaintenanceError::Usage("no columns to drop".to_string()));
    }
    for name in names {
        check_unprotected(name)?;
    }
    let manager = open(config, registry, binding)?;

    let (present, unknown): (Vec<String>, Vec<String>) = names
        .iter()
        .cloned()
        .partition(|name| manager.schema().column(name).is_some());
    for name in &unknown {
        tracing::warn!(database = %manager.descriptor(), column = %name, "no such column, skipping");
    }
    if present.is_empty() {
        return Ok(ColumnOutcome::NothingToDrop { unknown });
    }

    if !confirm.confirm(&format!(
        "Drop columns {} and their data from {}",
        present.join(", "),
        manager.descriptor()
    )) {
        return Ok(ColumnOutcome::Declined);
    }

    let doomed: Vec<Arc<str>> = present.iter().map(|n| Arc::from(n.as_str())).collect();
    manager.store().drop_columns(manager.table(), &doomed)?;
    tracing::info!(database = %manager.descriptor(), columns = ?present, "columns dropped");
    manager.close()?;
    Ok(ColumnOutcome::Dropped { columns: present, unknown })
}
