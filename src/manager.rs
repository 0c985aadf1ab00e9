use std::sync::Arc;

use wxarchive_core::{
    models::{TIME_COLUMN, UNITS_COLUMN},
    AggregateFn, ArchiveRecord, ArchiveStore, BackendDescriptor, RecordStream, Schema, StorageDriver,
    StorageError, TimeSpan, UnitSystem, Value,
};

use crate::error::MaintenanceError;

/// An open archive: one connection, one table, the schema stored with it.
///
/// Dropping a `Manager` releases the connection. `close` does the same but
/// reports a failure to release it.
pub struct Manager {
    descriptor: BackendDescriptor,
    table: Arc<str>,
    schema: Schema,
    store: Box<dyn ArchiveStore>,
}

impl Manager {
    /// Opens an existing archive. Fails with `DatabaseNotFound` or
    /// `TableNotFound` when there is nothing to open.
    pub fn open(driver: &dyn StorageDriver, descriptor: &BackendDescriptor, table: &str) -> Result<Self, MaintenanceError> {
        let store = driver
            .connect(descriptor)
            .map_err(|e| MaintenanceError::on(descriptor, e))?;
        Self::existing(descriptor, table, store)
    }

    /// Like `open`, for archives that are only read. Writes through the
    /// returned manager may fail.
    pub fn open_read_only(
        driver: &dyn StorageDriver,
        descriptor: &BackendDescriptor,
        table: &str,
    ) -> Result<Self, MaintenanceError> {
        let store = driver
            .connect_read_only(descriptor)
            .map_err(|e| MaintenanceError::on(descriptor, e))?;
        Self::existing(descriptor, table, store)
    }

    fn existing(descriptor: &BackendDescriptor, table: &str, store: Box<dyn ArchiveStore>) -> Result<Self, MaintenanceError> {
        if !store.table_exists(table)? {
            return Err(StorageError::TableNotFound(format!("{} in {}", table, descriptor)).into());
        }
        Self::bind(descriptor, table, store)
    }

    /// Opens the archive, creating the database, the archive table and empty
    /// daily summary tables for whichever of them is missing.
    pub fn open_with_create(
        driver: &dyn StorageDriver,
        descriptor: &BackendDescriptor,
        table: &str,
        schema: &Schema,
    ) -> Result<Self, MaintenanceError> {
        let store = match driver.connect(descriptor) {
            Ok(store) => store,
            Err(StorageError::DatabaseNotFound(_)) => {
                driver
                    .create(descriptor)
                    .map_err(|e| MaintenanceError::on(descriptor, e))?;
                tracing::info!(database = %descriptor, "created database");
                driver
                    .connect(descriptor)
                    .map_err(|e| MaintenanceError::on(descriptor, e))?
            }
            Err(e) => return Err(MaintenanceError::on(descriptor, e)),
        };

        if !store.table_exists(table)? {
            store.create_archive_table(table, schema)?;
            store.init_summary_tables(table, &schema.summary_columns())?;
            tracing::info!(database = %descriptor, table, columns = schema.columns().len(), "created archive table");
        }
        Self::bind(descriptor, table, store)
    }

    fn bind(descriptor: &BackendDescriptor, table: &str, store: Box<dyn ArchiveStore>) -> Result<Self, MaintenanceError> {
        let schema = Schema::new(store.schema_of(table)?).map_err(StorageError::from)?;
        Ok(Self {
            descriptor: descriptor.clone(),
            table: Arc::from(table),
            schema,
            store,
        })
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Schema as stored in the database, not as configured.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn store(&self) -> &dyn ArchiveStore {
        self.store.as_ref()
    }

    pub fn records(&self) -> RecordStream<'_> {
        self.store.iterate_records(&self.table)
    }

    pub fn span(&self) -> Result<Option<TimeSpan>, MaintenanceError> {
        let first = self.store.first_timestamp(&self.table)?;
        let last = self.store.last_timestamp(&self.table)?;
        Ok(first.zip(last).map(|(start, end)| TimeSpan::new(start, end)))
    }

    pub fn count(&self) -> Result<i64, MaintenanceError> {
        match self.span()? {
            None => Ok(0),
            Some(span) => match self.store.aggregate(&self.table, span, TIME_COLUMN, AggregateFn::Count)? {
                Value::Integer(n) => Ok(n),
                other => Err(StorageError::Other(format!("unexpected record count {}", other)).into()),
            },
        }
    }

    pub fn unit_system(&self) -> Result<Option<UnitSystem>, MaintenanceError> {
        Ok(self.store.current_unit_system(&self.table)?)
    }

    /// Inserts `records` in one transaction. Every record must carry the unit
    /// system already in the archive, or the first record's one when the
    /// archive is empty.
    pub fn add_records<I>(&self, records: I) -> Result<u64, MaintenanceError>
    where
        I: Iterator<Item = Result<ArchiveRecord, StorageError>>,
    {
        let mut expected = self.unit_system()?;
        let mut checked = records.map(move |record| {
            let record = record?;
            match (expected, record.unit_system()) {
                (Some(want), Some(found)) if want == found => Ok(record),
                (None, Some(found)) => {
                    expected = Some(found);
                    Ok(record)
                }
                (None, None) => Ok(record),
                (Some(want), _) => Err(StorageError::UnitSystemMismatch {
                    timestamp: record.timestamp,
                    expected: want,
                    found: record
                        .get(UNITS_COLUMN)
                        .map_or_else(|| "none".to_string(), |v| v.to_string()),
                }),
            }
        });

        let count = self.store.bulk_insert(&self.table, &mut checked)?;
        tracing::debug!(database = %self.descriptor, table = %self.table, count, "records added");
        Ok(count)
    }

    pub fn close(self) -> Result<(), MaintenanceError> {
        let descriptor = self.descriptor;
        self.store
            .close()
            .map_err(|e| MaintenanceError::on(&descriptor, e))?;
        tracing::debug!(database = %descriptor, "archive closed");
        Ok(())
    }
}
