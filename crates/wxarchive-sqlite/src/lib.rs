//! SQLite storage backend for wxarchive.
//!
//! A database is one file: `root` (descriptor parameter, default the working
//! directory) joined with the database name.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use rusqlite::{
    params, params_from_iter,
    types::{Value as SqlValue, ValueRef},
    Connection, ErrorCode, OpenFlags, OptionalExtension,
};
use wxarchive_core::{
    models::{
        summary::{summary_metadata_table, summary_prefix, summary_table_name, DayAggregate, DaySummary, LAST_UPDATE_KEY},
        StorageType, TIME_COLUMN,
    },
    AggregateFn, ArchiveRecord, ArchiveStore, BackendDescriptor, Schema, SchemaColumn,
    StorageDriver, StorageError, TimeSpan, Value,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }

    pub fn database_path(descriptor: &BackendDescriptor) -> PathBuf {
        let root = descriptor.param("root").unwrap_or(".");
        Path::new(root).join(descriptor.database_name.as_ref())
    }
}

impl SqliteDriver {
    fn open(descriptor: &BackendDescriptor, read_only: bool) -> Result<Box<dyn ArchiveStore>, StorageError> {
        let path = Self::database_path(descriptor);
        if !path.exists() {
            return Err(StorageError::DatabaseNotFound(path.display().to_string()));
        }
        let mode = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let conn = Connection::open_with_flags(&path, mode | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI)
            .map_err(|e| StorageError::Operational(format!("cannot open {}: {}", path.display(), e)))?;

        // Switching to WAL rewrites the file header, so readers keep the
        // journal mode they find.
        if !read_only {
            conn.execute_batch("PRAGMA journal_mode=WAL;")
                .map_err(|e| StorageError::Operational(format!("cannot open {}: {}", path.display(), e)))?;
        }

        tracing::debug!(path = %path.display(), read_only, "SQLite database opened");
        Ok(Box::new(SqliteStore {
            conn: Mutex::new(conn),
        }))
    }
}

impl StorageDriver for SqliteDriver {
    fn connect(&self, descriptor: &BackendDescriptor) -> Result<Box<dyn ArchiveStore>, StorageError> {
        Self::open(descriptor, false)
    }

    fn connect_read_only(&self, descriptor: &BackendDescriptor) -> Result<Box<dyn ArchiveStore>, StorageError> {
        Self::open(descriptor, true)
    }

    fn create(&self, descriptor: &BackendDescriptor) -> Result<(), StorageError> {
        let path = Self::database_path(descriptor);
        if path.exists() {
            return Err(StorageError::DatabaseExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Operational(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(&path)
            .map_err(|e| StorageError::Operational(format!("cannot create {}: {}", path.display(), e)))?;
        // An empty file is not written until something touches the header.
        conn.execute_batch("PRAGMA user_version = 0;").map_err(sql_err)?;
        conn.close().map_err(|(_, e)| sql_err(e))?;
        tracing::debug!(path = %path.display(), "SQLite database created");
        Ok(())
    }

    fn drop_database(&self, descriptor: &BackendDescriptor) -> Result<(), StorageError> {
        let path = Self::database_path(descriptor);
        if !path.exists() {
            return Err(StorageError::DatabaseNotFound(path.display().to_string()));
        }
        std::fs::remove_file(&path)?;
        for suffix in ["-wal", "-shm"] {
            let mut side = path.clone().into_os_string();
            side.push(suffix);
            let side = PathBuf::from(side);
            if side.exists() {
                std::fs::remove_file(side)?;
            }
        }
        tracing::debug!(path = %path.display(), "SQLite database dropped");
        Ok(())
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_err(e: rusqlite::Error) -> StorageError {
    let message = e.to_string();
    if let Some(table) = message.strip_prefix("no such table: ") {
        return StorageError::TableNotFound(table.to_string());
    }
    if let Some(column) = message.strip_prefix("no such column: ") {
        return StorageError::ColumnNotFound(column.to_string());
    }
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                ErrorCode::CannotOpen | ErrorCode::PermissionDenied | ErrorCode::ReadOnly | ErrorCode::NotADatabase
            ) =>
        {
            StorageError::Operational(message)
        }
        _ => StorageError::Other(message),
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

fn affinity(declared: &str) -> StorageType {
    let declared = declared.to_ascii_uppercase();
    if declared.contains("INT") {
        StorageType::Integer
    } else if declared.contains("CHAR") || declared.contains("CLOB") || declared.contains("TEXT") {
        StorageType::Text
    } else {
        StorageType::Real
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Value::Text(Arc::from(String::from_utf8_lossy(bytes).as_ref())),
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Text(s) => SqlValue::Text(s.to_string()),
    }
}

const SUMMARY_COLUMNS: &str = "\"min\", \"mintime\", \"max\", \"maxtime\", \"sum\", \"count\", \"wsum\", \"sumtime\"";

impl SqliteStore {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Other("SQLite connection lock poisoned".to_string()))
    }

    fn table_names(conn: &Connection) -> Result<Vec<String>, StorageError> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sql_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
    }

    fn has_table(conn: &Connection, table: &str) -> Result<bool, StorageError> {
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .map_err(sql_err)
    }

    fn columns(conn: &Connection, table: &str) -> Result<Vec<SchemaColumn>, StorageError> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", quote(table)))
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let declared: String = row.get(2)?;
                Ok(SchemaColumn::new(&name, affinity(&declared)))
            })
            .map_err(sql_err)?;
        let columns = rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)?;
        if columns.is_empty() {
            return Err(StorageError::TableNotFound(table.to_string()));
        }
        Ok(columns)
    }

    fn require_column(conn: &Connection, table: &str, column: &str) -> Result<(), StorageError> {
        if Self::columns(conn, table)?.iter().any(|c| c.name.as_ref() == column) {
            Ok(())
        } else {
            Err(StorageError::ColumnNotFound(column.to_string()))
        }
    }

    fn create_summary_table(conn: &Connection, table: &str, column: &str) -> Result<(), StorageError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                \"dateTime\" INTEGER NOT NULL UNIQUE PRIMARY KEY,
                \"min\" REAL, \"mintime\" INTEGER,
                \"max\" REAL, \"maxtime\" INTEGER,
                \"sum\" REAL, \"count\" INTEGER,
                \"wsum\" REAL, \"sumtime\" INTEGER
            );",
            quote(&summary_table_name(table, column))
        ))
        .map_err(sql_err)
    }
}

impl ArchiveStore for SqliteStore {
    fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        Self::has_table(&conn, table)
    }

    fn create_archive_table(&self, table: &str, schema: &Schema) -> Result<(), StorageError> {
        let columns: Vec<String> = schema
            .columns()
            .iter()
            .map(|c| {
                if c.name.as_ref() == schema.time_column() {
                    format!("{} INTEGER NOT NULL UNIQUE PRIMARY KEY", quote(&c.name))
                } else {
                    format!("{} {}", quote(&c.name), c.storage_type.sql_name())
                }
            })
            .collect();
        let conn = self.conn()?;
        conn.execute_batch(&format!("CREATE TABLE {} ({});", quote(table), columns.join(", ")))
            .map_err(sql_err)?;
        tracing::debug!(table, columns = columns.len(), "SQLite archive table created");
        Ok(())
    }

    fn schema_of(&self, table: &str) -> Result<Vec<SchemaColumn>, StorageError> {
        let conn = self.conn()?;
        Self::columns(&conn, table)
    }

    fn records_after(&self, table: &str, after: Option<i64>, limit: usize) -> Result<Vec<ArchiveRecord>, StorageError> {
        let conn = self.conn()?;
        let time = quote(TIME_COLUMN);
        let sql = match after {
            Some(_) => format!("SELECT * FROM {} WHERE {} > ?1 ORDER BY {} LIMIT ?2", quote(table), time, time),
            None => format!("SELECT * FROM {} ORDER BY {} LIMIT ?1", quote(table), time),
        };
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let names: Vec<Arc<str>> = stmt.column_names().into_iter().map(Arc::from).collect();
        let time_index = names
            .iter()
            .position(|n| n.as_ref() == TIME_COLUMN)
            .ok_or_else(|| StorageError::ColumnNotFound(TIME_COLUMN.to_string()))?;

        let limit = limit as i64;
        let mut rows = match after {
            Some(after) => stmt.query(params![after, limit]),
            None => stmt.query(params![limit]),
        }
        .map_err(sql_err)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(sql_err)? {
            let mut record = ArchiveRecord::new(row.get(time_index).map_err(sql_err)?);
            for (i, name) in names.iter().enumerate() {
                if i != time_index {
                    let value = from_sql(row.get_ref(i).map_err(sql_err)?);
                    record.values.insert(name.clone(), value);
                }
            }
            records.push(record);
        }
        Ok(records)
    }

    fn aggregate(&self, table: &str, span: TimeSpan, column: &str, func: AggregateFn) -> Result<Value, StorageError> {
        let conn = self.conn()?;
        let time = quote(TIME_COLUMN);
        let sql = format!(
            "SELECT {}({}) FROM {} WHERE {} >= ?1 AND {} <= ?2",
            func.sql_name(),
            quote(column),
            quote(table),
            time,
            time
        );
        conn.query_row(&sql, params![span.start, span.end], |row| row.get_ref(0).map(from_sql))
            .map_err(sql_err)
    }

    fn first_timestamp(&self, table: &str) -> Result<Option<i64>, StorageError> {
        let conn = self.conn()?;
        let sql = format!("SELECT MIN({}) FROM {}", quote(TIME_COLUMN), quote(table));
        conn.query_row(&sql, [], |row| row.get(0)).map_err(sql_err)
    }

    fn last_timestamp(&self, table: &str) -> Result<Option<i64>, StorageError> {
        let conn = self.conn()?;
        let sql = format!("SELECT MAX({}) FROM {}", quote(TIME_COLUMN), quote(table));
        conn.query_row(&sql, [], |row| row.get(0)).map_err(sql_err)
    }

    fn update_cell(&self, table: &str, timestamp: i64, column: &str, value: &Value) -> Result<(), StorageError> {
        if column == TIME_COLUMN {
            return Err(StorageError::Other("the time key cannot be updated".to_string()));
        }
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2",
            quote(table),
            quote(column),
            quote(TIME_COLUMN)
        );
        conn.execute(&sql, params![to_sql(value), timestamp])
            .map_err(sql_err)?;
        Ok(())
    }

    fn bulk_insert(
        &self,
        table: &str,
        records: &mut dyn Iterator<Item = Result<ArchiveRecord, StorageError>>,
    ) -> Result<u64, StorageError> {
        let mut conn = self.conn()?;
        let columns = Self::columns(&conn, table)?;
        let names: Vec<String> = columns.iter().map(|c| quote(&c.name)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            names.join(", "),
            placeholders.join(", ")
        );

        let tx = conn.transaction().map_err(sql_err)?;
        let mut count = 0u64;
        {
            let mut stmt = tx.prepare(&sql).map_err(sql_err)?;
            for record in records {
                let record = record?;
                let values = columns.iter().map(|c| {
                    if c.name.as_ref() == TIME_COLUMN {
                        SqlValue::Integer(record.timestamp)
                    } else {
                        record.values.get(&c.name).map_or(SqlValue::Null, to_sql)
                    }
                });
                stmt.execute(params_from_iter(values)).map_err(|e| {
                    if is_constraint_violation(&e) {
                        StorageError::DuplicateTimestamp(record.timestamp)
                    } else {
                        sql_err(e)
                    }
                })?;
                count += 1;
            }
        }
        tx.commit().map_err(sql_err)?;
        tracing::debug!(table, count, "SQLite bulk insert committed");
        Ok(count)
    }

    fn init_summary_tables(&self, table: &str, columns: &[Arc<str>]) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(sql_err)?;
        for column in columns {
            Self::create_summary_table(&tx, table, column)?;
        }
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\"name\" TEXT NOT NULL UNIQUE PRIMARY KEY, \"value\" TEXT);",
            quote(&summary_metadata_table(table))
        ))
        .map_err(sql_err)?;
        tx.commit().map_err(sql_err)
    }

    fn drop_summary_tables(&self, table: &str) -> Result<usize, StorageError> {
        let mut conn = self.conn()?;
        let prefix = summary_prefix(table);
        let doomed: Vec<String> = Self::table_names(&conn)?
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect();
        if doomed.is_empty() {
            return Err(StorageError::NoSuchSummaryTables(table.to_string()));
        }

        let tx = conn.transaction().map_err(sql_err)?;
        for name in &doomed {
            tx.execute_batch(&format!("DROP TABLE {};", quote(name)))
                .map_err(sql_err)?;
        }
        tx.commit().map_err(sql_err)?;
        tracing::debug!(table, dropped = doomed.len(), "SQLite summary tables dropped");
        Ok(doomed.len())
    }

    fn summary_last_update(&self, table: &str) -> Result<Option<i64>, StorageError> {
        let conn = self.conn()?;
        let meta = summary_metadata_table(table);
        if !Self::has_table(&conn, &meta)? {
            return Ok(None);
        }
        let value: Option<String> = conn
            .query_row(
                &format!("SELECT \"value\" FROM {} WHERE \"name\" = ?1", quote(&meta)),
                params![LAST_UPDATE_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        value
            .map(|v| {
                v.parse::<i64>()
                    .map_err(|e| StorageError::Other(format!("invalid {}: {}", LAST_UPDATE_KEY, e)))
            })
            .transpose()
    }

    fn day_summary(&self, table: &str, column: &str, day_start: i64) -> Result<Option<DayAggregate>, StorageError> {
        let conn = self.conn()?;
        let name = summary_table_name(table, column);
        if !Self::has_table(&conn, &name)? {
            return Ok(None);
        }
        conn.query_row(
            &format!("SELECT {} FROM {} WHERE \"dateTime\" = ?1", SUMMARY_COLUMNS, quote(&name)),
            params![day_start],
            |row| {
                Ok(DayAggregate {
                    min: row.get(0)?,
                    min_time: row.get(1)?,
                    max: row.get(2)?,
                    max_time: row.get(3)?,
                    sum: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                    count: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                    wsum: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                    sumtime: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
                })
            },
        )
        .optional()
        .map_err(sql_err)
    }

    fn store_day_summary(&self, table: &str, summary: &DaySummary, last_update: i64) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let meta = summary_metadata_table(table);
        if !Self::has_table(&conn, &meta)? {
            return Err(StorageError::NoSuchSummaryTables(table.to_string()));
        }

        let tx = conn.transaction().map_err(sql_err)?;
        for (column, agg) in &summary.aggregates {
            Self::create_summary_table(&tx, table, column)?;
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (\"dateTime\", {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    quote(&summary_table_name(table, column)),
                    SUMMARY_COLUMNS
                ),
                params![
                    summary.day_start,
                    agg.min,
                    agg.min_time,
                    agg.max,
                    agg.max_time,
                    agg.sum,
                    agg.count,
                    agg.wsum,
                    agg.sumtime
                ],
            )
            .map_err(sql_err)?;
        }
        tx.execute(
            &format!("INSERT OR REPLACE INTO {} (\"name\", \"value\") VALUES (?1, ?2)", quote(&meta)),
            params![LAST_UPDATE_KEY, last_update.to_string()],
        )
        .map_err(sql_err)?;
        tx.commit().map_err(sql_err)
    }

    fn add_column(&self, table: &str, column: &SchemaColumn) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            quote(table),
            quote(&column.name),
            column.storage_type.sql_name()
        ))
        .map_err(sql_err)
    }

    fn rename_column(&self, table: &str, from: &str, to: &str) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        Self::require_column(&conn, table, from)?;
        let old_summary = summary_table_name(table, from);
        let has_summary = Self::has_table(&conn, &old_summary)?;

        let tx = conn.transaction().map_err(sql_err)?;
        tx.execute_batch(&format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {};",
            quote(table),
            quote(from),
            quote(to)
        ))
        .map_err(sql_err)?;
        if has_summary {
            tx.execute_batch(&format!(
                "ALTER TABLE {} RENAME TO {};",
                quote(&old_summary),
                quote(&summary_table_name(table, to))
            ))
            .map_err(sql_err)?;
        }
        tx.commit().map_err(sql_err)
    }

    fn drop_columns(&self, table: &str, columns: &[Arc<str>]) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        for column in columns {
            Self::require_column(&conn, table, column)?;
        }

        let tx = conn.transaction().map_err(sql_err)?;
        for column in columns {
            tx.execute_batch(&format!(
                "ALTER TABLE {} DROP COLUMN {}; DROP TABLE IF EXISTS {};",
                quote(table),
                quote(column),
                quote(&summary_table_name(table, column))
            ))
            .map_err(sql_err)?;
        }
        tx.commit().map_err(sql_err)
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        let SqliteStore { conn } = *self;
        let conn = conn.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.close().map_err(|(_, e)| sql_err(e))?;
        tracing::debug!("SQLite connection closed");
        Ok(())
    }
}
