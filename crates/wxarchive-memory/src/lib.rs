//! In-memory storage backend for wxarchive.
//!
//! Databases live inside the `MemoryDriver` that created them, so every store
//! connected through the same driver (or a clone of it) sees the same data.

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Bound,
    sync::{Arc, Mutex, MutexGuard},
};

use wxarchive_core::{
    models::summary::{DayAggregate, DaySummary},
    AggregateFn, ArchiveRecord, ArchiveStore, BackendDescriptor, Schema, SchemaColumn,
    StorageDriver, StorageError, TimeSpan, Value,
};

type Row = BTreeMap<Arc<str>, Value>;

#[derive(Default)]
struct SummaryTables {
    columns: BTreeMap<Arc<str>, BTreeMap<i64, DayAggregate>>,
    last_update: Option<i64>,
}

struct MemoryTable {
    columns: Vec<SchemaColumn>,
    time_column: Arc<str>,
    rows: BTreeMap<i64, Row>,
    summaries: Option<SummaryTables>,
}

impl MemoryTable {
    fn column(&self, name: &str) -> Result<&SchemaColumn, StorageError> {
        self.columns
            .iter()
            .find(|c| c.name.as_ref() == name)
            .ok_or_else(|| StorageError::ColumnNotFound(name.to_string()))
    }

    fn normalize(&self, record: &ArchiveRecord) -> Row {
        self.columns
            .iter()
            .filter(|c| c.name != self.time_column)
            .map(|c| {
                let value = record.values.get(&c.name).cloned().unwrap_or(Value::Null);
                (c.name.clone(), value)
            })
            .collect()
    }
}

#[derive(Default)]
struct MemoryDatabase {
    tables: BTreeMap<String, MemoryTable>,
}

/// Driver whose databases are kept in process memory.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    databases: Arc<Mutex<BTreeMap<String, Arc<Mutex<MemoryDatabase>>>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_exists(&self, name: &str) -> bool {
        lock(&self.databases)
            .map(|dbs| dbs.contains_key(name))
            .unwrap_or(false)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|_| StorageError::Other("memory store lock poisoned".to_string()))
}

impl StorageDriver for MemoryDriver {
    fn connect(&self, descriptor: &BackendDescriptor) -> Result<Box<dyn ArchiveStore>, StorageError> {
        let dbs = lock(&self.databases)?;
        let database = dbs
            .get(descriptor.database_name.as_ref())
            .cloned()
            .ok_or_else(|| StorageError::DatabaseNotFound(descriptor.database_name.to_string()))?;
        tracing::debug!(database = %descriptor.database_name, "memory database opened");
        Ok(Box::new(MemoryStore { database }))
    }

    fn create(&self, descriptor: &BackendDescriptor) -> Result<(), StorageError> {
        let mut dbs = lock(&self.databases)?;
        let name = descriptor.database_name.to_string();
        if dbs.contains_key(&name) {
            return Err(StorageError::DatabaseExists(name));
        }
        dbs.insert(name, Arc::new(Mutex::new(MemoryDatabase::default())));
        tracing::debug!(database = %descriptor.database_name, "memory database created");
        Ok(())
    }

    fn drop_database(&self, descriptor: &BackendDescriptor) -> Result<(), StorageError> {
        let mut dbs = lock(&self.databases)?;
        dbs.remove(descriptor.database_name.as_ref())
            .map(|_| ())
            .ok_or_else(|| StorageError::DatabaseNotFound(descriptor.database_name.to_string()))
    }
}

pub struct MemoryStore {
    database: Arc<Mutex<MemoryDatabase>>,
}

impl MemoryStore {
    fn with_table<T>(&self, table: &str, f: impl FnOnce(&MemoryTable) -> Result<T, StorageError>) -> Result<T, StorageError> {
        let db = lock(&self.database)?;
        let t = db
            .tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        f(t)
    }

    fn with_table_mut<T>(&self, table: &str, f: impl FnOnce(&mut MemoryTable) -> Result<T, StorageError>) -> Result<T, StorageError> {
        let mut db = lock(&self.database)?;
        let t = db
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        f(t)
    }
}

impl ArchiveStore for MemoryStore {
    fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        Ok(lock(&self.database)?.tables.contains_key(table))
    }

    fn create_archive_table(&self, table: &str, schema: &Schema) -> Result<(), StorageError> {
        let mut db = lock(&self.database)?;
        if db.tables.contains_key(table) {
            return Err(StorageError::Other(format!("table already exists: {}", table)));
        }
        db.tables.insert(
            table.to_string(),
            MemoryTable {
                columns: schema.columns().to_vec(),
                time_column: Arc::from(schema.time_column()),
                rows: BTreeMap::new(),
                summaries: None,
            },
        );
        Ok(())
    }

    fn schema_of(&self, table: &str) -> Result<Vec<SchemaColumn>, StorageError> {
        self.with_table(table, |t| Ok(t.columns.clone()))
    }

    fn records_after(&self, table: &str, after: Option<i64>, limit: usize) -> Result<Vec<ArchiveRecord>, StorageError> {
        self.with_table(table, |t| {
            let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
            Ok(t.rows
                .range((lower, Bound::Unbounded))
                .take(limit)
                .map(|(ts, row)| ArchiveRecord {
                    timestamp: *ts,
                    values: row.clone(),
                })
                .collect())
        })
    }

    fn aggregate(&self, table: &str, span: TimeSpan, column: &str, func: AggregateFn) -> Result<Value, StorageError> {
        self.with_table(table, |t| {
            let is_time = column == t.time_column.as_ref();
            if !is_time {
                t.column(column)?;
            }
            if span.start > span.end {
                return Ok(match func {
                    AggregateFn::Count => Value::Integer(0),
                    _ => Value::Null,
                });
            }

            let cells = t.rows.range(span.start..=span.end).map(|(ts, row)| {
                if is_time {
                    Value::Integer(*ts)
                } else {
                    row.get(column).cloned().unwrap_or(Value::Null)
                }
            });

            let numbers = || cells.clone().filter_map(|v| v.as_f64());
            let real = |v: Option<f64>| v.map_or(Value::Null, Value::Real);

            Ok(match func {
                AggregateFn::Count => Value::Integer(cells.clone().filter(|v| !v.is_null()).count() as i64),
                AggregateFn::Min => real(numbers().reduce(f64::min)),
                AggregateFn::Max => real(numbers().reduce(f64::max)),
                AggregateFn::Sum => real(numbers().reduce(|a, b| a + b)),
                AggregateFn::Avg => {
                    let (sum, n) = numbers().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                    real((n > 0).then(|| sum / n as f64))
                }
            })
        })
    }

    fn first_timestamp(&self, table: &str) -> Result<Option<i64>, StorageError> {
        self.with_table(table, |t| Ok(t.rows.keys().next().copied()))
    }

    fn last_timestamp(&self, table: &str) -> Result<Option<i64>, StorageError> {
        self.with_table(table, |t| Ok(t.rows.keys().next_back().copied()))
    }

    fn update_cell(&self, table: &str, timestamp: i64, column: &str, value: &Value) -> Result<(), StorageError> {
        self.with_table_mut(table, |t| {
            if column == t.time_column.as_ref() {
                return Err(StorageError::Other("the time key cannot be updated".to_string()));
            }
            let name = t.column(column)?.name.clone();
            if let Some(row) = t.rows.get_mut(&timestamp) {
                row.insert(name, value.clone());
            }
            Ok(())
        })
    }

    fn bulk_insert(
        &self,
        table: &str,
        records: &mut dyn Iterator<Item = Result<ArchiveRecord, StorageError>>,
    ) -> Result<u64, StorageError> {
        // Stage without holding the lock: the source may be a store on this
        // same database.
        let mut staged = BTreeMap::new();
        for record in records {
            let record = record?;
            let ts = record.timestamp;
            if staged.insert(ts, record).is_some() {
                return Err(StorageError::DuplicateTimestamp(ts));
            }
        }

        self.with_table_mut(table, |t| {
            if let Some(ts) = staged.keys().find(|ts| t.rows.contains_key(ts)) {
                return Err(StorageError::DuplicateTimestamp(*ts));
            }
            let count = staged.len() as u64;
            for (ts, record) in staged {
                let row = t.normalize(&record);
                t.rows.insert(ts, row);
            }
            tracing::debug!(table, count, "memory bulk insert committed");
            Ok(count)
        })
    }

    fn init_summary_tables(&self, table: &str, columns: &[Arc<str>]) -> Result<(), StorageError> {
        self.with_table_mut(table, |t| {
            let summaries = t.summaries.get_or_insert_with(SummaryTables::default);
            for column in columns {
                summaries.columns.entry(column.clone()).or_default();
            }
            Ok(())
        })
    }

    fn drop_summary_tables(&self, table: &str) -> Result<usize, StorageError> {
        self.with_table_mut(table, |t| match t.summaries.take() {
            Some(summaries) => Ok(summaries.columns.len() + 1),
            None => Err(StorageError::NoSuchSummaryTables(table.to_string())),
        })
    }

    fn summary_last_update(&self, table: &str) -> Result<Option<i64>, StorageError> {
        self.with_table(table, |t| Ok(t.summaries.as_ref().and_then(|s| s.last_update)))
    }

    fn day_summary(&self, table: &str, column: &str, day_start: i64) -> Result<Option<DayAggregate>, StorageError> {
        self.with_table(table, |t| {
            Ok(t.summaries
                .as_ref()
                .and_then(|s| s.columns.get(column))
                .and_then(|days| days.get(&day_start))
                .copied())
        })
    }

    fn store_day_summary(&self, table: &str, summary: &DaySummary, last_update: i64) -> Result<(), StorageError> {
        self.with_table_mut(table, |t| {
            let summaries = t
                .summaries
                .as_mut()
                .ok_or_else(|| StorageError::NoSuchSummaryTables(table.to_string()))?;
            for (column, aggregate) in &summary.aggregates {
                summaries
                    .columns
                    .entry(column.clone())
                    .or_default()
                    .insert(summary.day_start, *aggregate);
            }
            summaries.last_update = Some(last_update);
            Ok(())
        })
    }

    fn add_column(&self, table: &str, column: &SchemaColumn) -> Result<(), StorageError> {
        self.with_table_mut(table, |t| {
            if t.column(&column.name).is_ok() {
                return Err(StorageError::Other(format!("column already exists: {}", column.name)));
            }
            t.columns.push(column.clone());
            for row in t.rows.values_mut() {
                row.insert(column.name.clone(), Value::Null);
            }
            Ok(())
        })
    }

    fn rename_column(&self, table: &str, from: &str, to: &str) -> Result<(), StorageError> {
        self.with_table_mut(table, |t| {
            if t.column(to).is_ok() {
                return Err(StorageError::Other(format!("column already exists: {}", to)));
            }
            let new_name: Arc<str> = Arc::from(to);
            let position = t
                .columns
                .iter()
                .position(|c| c.name.as_ref() == from)
                .ok_or_else(|| StorageError::ColumnNotFound(from.to_string()))?;
            t.columns[position].name = new_name.clone();
            for row in t.rows.values_mut() {
                if let Some(v) = row.remove(from) {
                    row.insert(new_name.clone(), v);
                }
            }
            if let Some(summaries) = t.summaries.as_mut() {
                if let Some(days) = summaries.columns.remove(from) {
                    summaries.columns.insert(new_name, days);
                }
            }
            Ok(())
        })
    }

    fn drop_columns(&self, table: &str, columns: &[Arc<str>]) -> Result<(), StorageError> {
        self.with_table_mut(table, |t| {
            for name in columns {
                t.column(name)?;
            }
            let doomed: BTreeSet<&Arc<str>> = columns.iter().collect();
            t.columns.retain(|c| !doomed.contains(&c.name));
            for row in t.rows.values_mut() {
                row.retain(|k, _| !doomed.contains(k));
            }
            if let Some(summaries) = t.summaries.as_mut() {
                summaries.columns.retain(|k, _| !doomed.contains(k));
            }
            Ok(())
        })
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}
