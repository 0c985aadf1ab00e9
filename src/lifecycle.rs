use std::fmt::Display;

use crate::{config::Config, error::MaintenanceError, manager::Manager, registry::DriverRegistry};

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created { database: String, table: String, columns: usize },
    AlreadyExists { database: String, table: String },
}

impl Display for CreateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateOutcome::Created { database, table, columns } => {
                write!(f, "Created table '{}' with {} columns in {}", table, columns, database)
            }
            CreateOutcome::AlreadyExists { database, table } => {
                write!(f, "Table '{}' already exists in {}. Nothing done.", table, database)
            }
        }
    }
}

/// Creates the binding's archive unless it already exists.
pub fn create_archive(config: &Config, registry: &DriverRegistry, binding: &str) -> Result<CreateOutcome, MaintenanceError> {
    let resolved = config.resolve(binding)?;
    let driver = registry.driver_for(&resolved.descriptor)?;
    let database = resolved.descriptor.to_string();

    match Manager::open_read_only(driver.as_ref(), &resolved.descriptor, &resolved.table) {
        Ok(manager) => {
            manager.close()?;
            tracing::info!(%database, table = %resolved.table, "archive already exists");
            Ok(CreateOutcome::AlreadyExists {
                database,
                table: resolved.table.to_string(),
            })
        }
        Err(e) if e.is_missing_archive() => {
            let manager = Manager::open_with_create(driver.as_ref(), &resolved.descriptor, &resolved.table, &resolved.schema)?;
            let columns = manager.schema().columns().len();
            manager.close()?;
            Ok(CreateOutcome::Created {
                database,
                table: resolved.table.to_string(),
                columns,
            })
        }
        Err(e) => Err(e),
    }
}
