//! Finds, and optionally repairs, stored values whose type does not match
//! the column's declared type.

use std::{fmt::Display, sync::Arc};

use prettytable::{row, Table};
use wxarchive_core::{models::format_timestamp, StorageType, Value};

use crate::{config::Config, error::MaintenanceError, manager::Manager, registry::DriverRegistry};

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Reported,
    Coerced(Value),
    Nulled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub timestamp: i64,
    pub column: Arc<str>,
    pub declared: StorageType,
    pub value: Value,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityReport {
    pub database: String,
    pub scanned: u64,
    pub violations: Vec<Violation>,
    pub fixed: u64,
    pub nulled: u64,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.add_row(row!["Timestamp", "Column", "Declared", "Found", "Action"]);
        table.add_empty_row();

        for v in &self.violations {
            let action = match &v.resolution {
                Resolution::Reported => "reported".to_string(),
                Resolution::Coerced(value) => format!("set to {}", value),
                Resolution::Nulled => "set to null".to_string(),
            };
            table.add_row(row![format_timestamp(v.timestamp), v.column, v.declared, v.value, action]);
        }
        table
    }
}

impl Display for IntegrityReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_clean() {
            return write!(f, "Checked {} records in {}: no type mismatches.", self.scanned, self.database);
        }
        writeln!(f, "\n{}", self.table())?;
        write!(
            f,
            "Checked {} records in {}: {} type mismatches, {} fixed, {} set to null.",
            self.scanned,
            self.database,
            self.violations.len(),
            self.fixed,
            self.nulled
        )
    }
}

pub fn check_strings(config: &Config, registry: &DriverRegistry, binding: &str, fix: bool) -> Result<IntegrityReport, MaintenanceError> {
    let resolved = config.resolve(binding)?;
    let driver = registry.driver_for(&resolved.descriptor)?;
    let manager = if fix {
        Manager::open(driver.as_ref(), &resolved.descriptor, &resolved.table)?
    } else {
        Manager::open_read_only(driver.as_ref(), &resolved.descriptor, &resolved.table)?
    };
    let report = check(&manager, fix)?;
    manager.close()?;
    Ok(report)
}

/// Scans every record against the stored schema. With `fix`, a mismatching
/// cell is rewritten as its declared type, or null when it cannot be.
pub fn check(manager: &Manager, fix: bool) -> Result<IntegrityReport, MaintenanceError> {
    let store = manager.store();
    let table = manager.table();
    let mut report = IntegrityReport {
        database: manager.descriptor().to_string(),
        scanned: 0,
        violations: Vec::new(),
        fixed: 0,
        nulled: 0,
    };

    for record in manager.records() {
        let record = record?;
        report.scanned += 1;

        for column in manager.schema().value_columns() {
            let value = match record.get(&column.name) {
                Some(value) if !value.matches(column.storage_type) => value,
                _ => continue,
            };
            tracing::warn!(
                timestamp = record.timestamp,
                column = %column.name,
                declared = %column.storage_type,
                %value,
                "type mismatch"
            );

            let resolution = if fix {
                match value.coerce_to(column.storage_type) {
                    Ok(coerced) => {
                        store.update_cell(table, record.timestamp, &column.name, &coerced)?;
                        report.fixed += 1;
                        Resolution::Coerced(coerced)
                    }
                    Err(_) => {
                        store.update_cell(table, record.timestamp, &column.name, &Value::Null)?;
                        report.nulled += 1;
                        Resolution::Nulled
                    }
                }
            } else {
                Resolution::Reported
            };

            report.violations.push(Violation {
                timestamp: record.timestamp,
                column: column.name.clone(),
                declared: column.storage_type,
                value: value.clone(),
                resolution,
            });
        }
    }

    tracing::info!(
        database = %report.database,
        scanned = report.scanned,
        violations = report.violations.len(),
        fixed = report.fixed,
        nulled = report.nulled,
        "integrity check finished"
    );
    Ok(report)
}
