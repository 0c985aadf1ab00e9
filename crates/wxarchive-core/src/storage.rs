use std::sync::Arc;

use thiserror::Error;

use crate::{
    descriptor::BackendDescriptor,
    models::{
        summary::{DayAggregate, DaySummary},
        AggregateFn, ArchiveRecord, CoercionError, Schema, SchemaColumn, SchemaError, TimeSpan,
        UnitSystem, Value,
    },
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
    #[error("database not found: {0}")]
    DatabaseNotFound(String),
    #[error("database already exists: {0}")]
    DatabaseExists(String),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("no daily summary tables for {0}")]
    NoSuchSummaryTables(String),
    #[error("duplicate record at timestamp {0}")]
    DuplicateTimestamp(i64),
    #[error("record at {timestamp} uses unit system {found}, archive uses {expected}")]
    UnitSystemMismatch {
        timestamp: i64,
        expected: UnitSystem,
        found: String,
    },
    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("value rejected: {0}")]
    Coercion(#[from] CoercionError),
    #[error("backend operational error: {0}")]
    Operational(String),
}

/// Lazy, forward-only sequence of archive records in time order.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<ArchiveRecord, StorageError>> + 'a>;

/// Records fetched per round trip by the paged record streams.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Database level operations of one backend engine.
pub trait StorageDriver: Send + Sync {
    /// Opens an existing database. Fails with `DatabaseNotFound` when absent.
    fn connect(&self, descriptor: &BackendDescriptor) -> Result<Box<dyn ArchiveStore>, StorageError>;
    /// Opens an existing database that will only be read. The database is
    /// left exactly as it was found.
    fn connect_read_only(&self, descriptor: &BackendDescriptor) -> Result<Box<dyn ArchiveStore>, StorageError> {
        self.connect(descriptor)
    }
    /// Creates an empty database. Fails with `DatabaseExists` when present.
    fn create(&self, descriptor: &BackendDescriptor) -> Result<(), StorageError>;
    fn drop_database(&self, descriptor: &BackendDescriptor) -> Result<(), StorageError>;
}

/// One open connection to one database.
pub trait ArchiveStore: Send + Sync {
    fn table_exists(&self, table: &str) -> Result<bool, StorageError>;
    fn create_archive_table(&self, table: &str, schema: &Schema) -> Result<(), StorageError>;
    fn schema_of(&self, table: &str) -> Result<Vec<SchemaColumn>, StorageError>;

    /// Up to `limit` records with a timestamp strictly after `after`, oldest first.
    fn records_after(&self, table: &str, after: Option<i64>, limit: usize) -> Result<Vec<ArchiveRecord>, StorageError>;
    fn aggregate(&self, table: &str, span: TimeSpan, column: &str, func: AggregateFn) -> Result<Value, StorageError>;
    fn first_timestamp(&self, table: &str) -> Result<Option<i64>, StorageError>;
    fn last_timestamp(&self, table: &str) -> Result<Option<i64>, StorageError>;
    fn update_cell(&self, table: &str, timestamp: i64, column: &str, value: &Value) -> Result<(), StorageError>;

    /// Inserts every record in one transaction. Any error, including one
    /// yielded by `records`, leaves the table as it was.
    fn bulk_insert(
        &self,
        table: &str,
        records: &mut dyn Iterator<Item = Result<ArchiveRecord, StorageError>>,
    ) -> Result<u64, StorageError>;

    /// Creates missing summary tables for `columns` and the metadata table.
    fn init_summary_tables(&self, table: &str, columns: &[Arc<str>]) -> Result<(), StorageError>;
    /// Drops every summary table of `table`, returning how many went.
    fn drop_summary_tables(&self, table: &str) -> Result<usize, StorageError>;
    fn summary_last_update(&self, table: &str) -> Result<Option<i64>, StorageError>;
    fn day_summary(&self, table: &str, column: &str, day_start: i64) -> Result<Option<DayAggregate>, StorageError>;
    /// Replaces the day's aggregates and advances `lastUpdate` atomically.
    fn store_day_summary(&self, table: &str, summary: &DaySummary, last_update: i64) -> Result<(), StorageError>;

    fn add_column(&self, table: &str, column: &SchemaColumn) -> Result<(), StorageError>;
    fn rename_column(&self, table: &str, from: &str, to: &str) -> Result<(), StorageError>;
    fn drop_columns(&self, table: &str, columns: &[Arc<str>]) -> Result<(), StorageError>;

    fn close(self: Box<Self>) -> Result<(), StorageError>;

    fn iterate_records<'a>(&'a self, table: &'a str) -> RecordStream<'a> {
        self.iterate_records_after(table, None)
    }

    fn iterate_records_after<'a>(&'a self, table: &'a str, after: Option<i64>) -> RecordStream<'a> {
        Box::new(PagedRecords::new(after, DEFAULT_PAGE_SIZE, move |cursor, limit| {
            self.records_after(table, cursor, limit)
        }))
    }

    /// Unit system of the oldest record, `None` for an empty archive.
    fn current_unit_system(&self, table: &str) -> Result<Option<UnitSystem>, StorageError> {
        Ok(self
            .records_after(table, None, 1)?
            .first()
            .and_then(ArchiveRecord::unit_system))
    }
}

/// Keyset-paged record stream. Only one page is held in memory; the cursor
/// is the timestamp of the last record handed out.
pub struct PagedRecords<F> {
    fetch: F,
    cursor: Option<i64>,
    page: std::vec::IntoIter<ArchiveRecord>,
    page_size: usize,
    exhausted: bool,
}

impl<F> PagedRecords<F>
where
    F: FnMut(Option<i64>, usize) -> Result<Vec<ArchiveRecord>, StorageError>,
{
    pub fn new(after: Option<i64>, page_size: usize, fetch: F) -> Self {
        Self {
            fetch,
            cursor: after,
            page: Vec::new().into_iter(),
            page_size: page_size.max(1),
            exhausted: false,
        }
    }
}

impl<F> Iterator for PagedRecords<F>
where
    F: FnMut(Option<i64>, usize) -> Result<Vec<ArchiveRecord>, StorageError>,
{
    type Item = Result<ArchiveRecord, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.page.next() {
                self.cursor = Some(record.timestamp);
                return Some(Ok(record));
            }
            if self.exhausted {
                return None;
            }

            match (self.fetch)(self.cursor, self.page_size) {
                Ok(batch) => {
                    if batch.len() < self.page_size {
                        self.exhausted = true;
                    }
                    if batch.is_empty() {
                        return None;
                    }
                    self.page = batch.into_iter();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(timestamps: Vec<i64>) -> impl FnMut(Option<i64>, usize) -> Result<Vec<ArchiveRecord>, StorageError> {
        move |after, limit| {
            Ok(timestamps
                .iter()
                .filter(|ts| after.map_or(true, |a| **ts > a))
                .take(limit)
                .map(|ts| ArchiveRecord::new(*ts))
                .collect())
        }
    }

    #[test]
    fn test_paged_records_cross_page_boundaries() {
        let stream = PagedRecords::new(None, 2, source(vec![1, 2, 3, 4, 5]));
        let seen: Vec<i64> = stream.map(|r| r.unwrap().timestamp).collect();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_paged_records_start_after_cursor() {
        let stream = PagedRecords::new(Some(3), 10, source(vec![1, 2, 3, 4, 5]));
        let seen: Vec<i64> = stream.map(|r| r.unwrap().timestamp).collect();
        assert_eq!(seen, vec![4, 5]);
    }

    #[test]
    fn test_paged_records_fetch_pages_lazily() {
        let mut calls = 0;
        let mut stream = PagedRecords::new(None, 2, |after: Option<i64>, _limit: usize| {
            calls += 1;
            Ok(match after {
                None => vec![ArchiveRecord::new(1), ArchiveRecord::new(2)],
                Some(_) => vec![],
            })
        });
        assert_eq!(stream.next().unwrap().unwrap().timestamp, 1);
        assert_eq!(stream.next().unwrap().unwrap().timestamp, 2);
        assert!(stream.next().is_none());
        drop(stream);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_paged_records_stop_after_error() {
        let mut stream = PagedRecords::new(None, 2, |_: Option<i64>, _: usize| -> Result<Vec<ArchiveRecord>, StorageError> {
            Err(StorageError::Other("boom".to_string()))
        });
        assert!(stream.next().unwrap().is_err());
        assert!(stream.next().is_none());
    }
}
