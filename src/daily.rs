//! Daily summary maintenance.

use std::fmt::Display;

use wxarchive_core::{
    models::{
        summary::{day_start, DaySummary},
        INTERVAL_COLUMN,
    },
    StorageError, Value,
};

use crate::{config::Config, error::MaintenanceError, manager::Manager, prompt::Confirm, registry::DriverRegistry};

#[derive(Debug, Clone, PartialEq)]
pub enum DropOutcome {
    NoArchive { database: String },
    Declined,
    DryRun { database: String },
    NoSummaries { database: String },
    Dropped { database: String, tables: usize },
}

impl Display for DropOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropOutcome::NoArchive { database } => write!(f, "No archive in {}. Nothing done.", database),
            DropOutcome::Declined => f.write_str("Nothing done."),
            DropOutcome::DryRun { database } => write!(f, "Dry run: daily summaries in {} left in place.", database),
            DropOutcome::NoSummaries { database } => write!(f, "No daily summaries found in {}. Nothing done.", database),
            DropOutcome::Dropped { database, tables } => {
                write!(f, "Dropped {} daily summary tables from {}.", tables, database)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackfillOutcome {
    UpToDate,
    Backfilled { records: u64, days: u64 },
}

impl Display for BackfillOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackfillOutcome::UpToDate => f.write_str("Daily summaries are up to date."),
            BackfillOutcome::Backfilled { records, days } => {
                write!(f, "Processed {} records to backfill {} day summaries.", records, days)
            }
        }
    }
}

pub fn drop_daily(
    config: &Config,
    registry: &DriverRegistry,
    binding: &str,
    dry_run: bool,
    confirm: &mut dyn Confirm,
) -> Result<DropOutcome, MaintenanceError> {
    let resolved = config.resolve(binding)?;
    let driver = registry.driver_for(&resolved.descriptor)?;
    let database = resolved.descriptor.to_string();

    let manager = match Manager::open(driver.as_ref(), &resolved.descriptor, &resolved.table) {
        Ok(manager) => manager,
        Err(e) if e.is_missing_archive() => {
            tracing::warn!(%database, "no archive to drop daily summaries from");
            return Ok(DropOutcome::NoArchive { database });
        }
        Err(e) => return Err(e),
    };

    if !confirm.confirm(&format!(
        "Proceeding will delete all your daily summaries from {}. Are you sure you want to proceed",
        database
    )) {
        return Ok(DropOutcome::Declined);
    }
    if dry_run {
        manager.close()?;
        return Ok(DropOutcome::DryRun { database });
    }

    let outcome = match manager.store().drop_summary_tables(manager.table()) {
        Ok(tables) => {
            tracing::info!(%database, tables, "dropped daily summaries");
            DropOutcome::Dropped { database, tables }
        }
        Err(StorageError::NoSuchSummaryTables(_)) => {
            tracing::warn!(%database, "no daily summaries to drop");
            DropOutcome::NoSummaries { database }
        }
        Err(e) => return Err(e.into()),
    };
    manager.close()?;
    Ok(outcome)
}

pub fn backfill_daily(config: &Config, registry: &DriverRegistry, binding: &str) -> Result<BackfillOutcome, MaintenanceError> {
    let resolved = config.resolve(binding)?;
    let driver = registry.driver_for(&resolved.descriptor)?;
    let manager = Manager::open_with_create(driver.as_ref(), &resolved.descriptor, &resolved.table, &resolved.schema)?;
    let outcome = backfill(&manager)?;
    manager.close()?;
    Ok(outcome)
}

/// Folds every record newer than the summaries' `lastUpdate` into the daily
/// summaries. Each day is stored together with its new watermark.
pub fn backfill(manager: &Manager) -> Result<BackfillOutcome, MaintenanceError> {
    let store = manager.store();
    let table = manager.table();
    let columns = manager.schema().summary_columns();
    store.init_summary_tables(table, &columns)?;

    let watermark = store.summary_last_update(table)?;
    tracing::info!(database = %manager.descriptor(), ?watermark, "backfilling daily summaries");

    let mut current: Option<(DaySummary, i64)> = None;
    let mut records = 0u64;
    let mut days = 0u64;

    for record in store.iterate_records_after(table, watermark) {
        let record = record?;
        let day = day_start(record.timestamp);

        if current.as_ref().map_or(true, |(summary, _)| summary.day_start != day) {
            if let Some((summary, last)) = current.take() {
                store.store_day_summary(table, &summary, last)?;
                days += 1;
            }
            let mut summary = DaySummary::new(day);
            // The watermark's day was partly summarised already.
            if watermark.map(day_start) == Some(day) {
                for column in &columns {
                    if let Some(existing) = store.day_summary(table, column, day)? {
                        summary.aggregates.insert(column.clone(), existing);
                    }
                }
            }
            current = Some((summary, record.timestamp));
        }

        if let Some((summary, last)) = current.as_mut() {
            let weight = match record.get(INTERVAL_COLUMN).and_then(Value::as_f64) {
                Some(minutes) => (minutes * 60.0) as i64,
                None => 0,
            };
            for column in &columns {
                if let Some(value) = record.get(column).and_then(Value::as_f64) {
                    summary
                        .aggregates
                        .entry(column.clone())
                        .or_default()
                        .add(record.timestamp, value, weight);
                }
            }
            *last = record.timestamp;
        }
        records += 1;
    }

    if let Some((summary, last)) = current {
        store.store_day_summary(table, &summary, last)?;
        days += 1;
    }

    if records == 0 {
        tracing::info!(database = %manager.descriptor(), "daily summaries already up to date");
        return Ok(BackfillOutcome::UpToDate);
    }
    tracing::info!(database = %manager.descriptor(), records, days, "daily summaries backfilled");
    Ok(BackfillOutcome::Backfilled { records, days })
}
