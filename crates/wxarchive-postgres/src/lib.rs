//! PostgreSQL storage backend for wxarchive.
//!
//! Connection parameters come from the descriptor: `host`, `port`, `user`,
//! `password` and `maintenance_database` (used to create and drop databases).

use std::sync::{Arc, Mutex, MutexGuard};

use postgres::{
    error::SqlState,
    types::{ToSql, Type},
    Client, Config, GenericClient, NoTls, Row,
};
use wxarchive_core::{
    models::{
        summary::{summary_metadata_table, summary_prefix, summary_table_name, DayAggregate, DaySummary, LAST_UPDATE_KEY},
        StorageType, TIME_COLUMN,
    },
    AggregateFn, ArchiveRecord, ArchiveStore, BackendDescriptor, Schema, SchemaColumn,
    StorageDriver, StorageError, TimeSpan, Value,
};

const DEFAULT_MAINTENANCE_DATABASE: &str = "postgres";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }

    pub fn client_config(descriptor: &BackendDescriptor, dbname: &str) -> Result<Config, StorageError> {
        let mut config = Config::new();
        config.host(descriptor.param("host").unwrap_or("localhost"));
        if let Some(port) = descriptor.param("port") {
            let port = port
                .parse::<u16>()
                .map_err(|_| StorageError::Other(format!("invalid port: {}", port)))?;
            config.port(port);
        }
        if let Some(user) = descriptor.param("user") {
            config.user(user);
        }
        if let Some(password) = descriptor.param("password") {
            config.password(password);
        }
        config.dbname(dbname);
        Ok(config)
    }

    fn maintenance_client(descriptor: &BackendDescriptor) -> Result<Client, StorageError> {
        let dbname = descriptor
            .param("maintenance_database")
            .unwrap_or(DEFAULT_MAINTENANCE_DATABASE);
        Self::client_config(descriptor, dbname)?
            .connect(NoTls)
            .map_err(pg_err)
    }
}

impl StorageDriver for PostgresDriver {
    fn connect(&self, descriptor: &BackendDescriptor) -> Result<Box<dyn ArchiveStore>, StorageError> {
        let client = Self::client_config(descriptor, &descriptor.database_name)?
            .connect(NoTls)
            .map_err(|e| match pg_err(e) {
                StorageError::DatabaseNotFound(_) => StorageError::DatabaseNotFound(descriptor.database_name.to_string()),
                other => other,
            })?;
        tracing::debug!(database = %descriptor.database_name, "PostgreSQL connection opened");
        Ok(Box::new(PostgresStore {
            client: Mutex::new(client),
        }))
    }

    fn create(&self, descriptor: &BackendDescriptor) -> Result<(), StorageError> {
        let mut client = Self::maintenance_client(descriptor)?;
        client
            .batch_execute(&format!("CREATE DATABASE {}", quote(&descriptor.database_name)))
            .map_err(|e| match pg_err(e) {
                StorageError::DatabaseExists(_) => StorageError::DatabaseExists(descriptor.database_name.to_string()),
                other => other,
            })?;
        tracing::debug!(database = %descriptor.database_name, "PostgreSQL database created");
        Ok(())
    }

    fn drop_database(&self, descriptor: &BackendDescriptor) -> Result<(), StorageError> {
        let mut client = Self::maintenance_client(descriptor)?;
        client
            .batch_execute(&format!("DROP DATABASE {}", quote(&descriptor.database_name)))
            .map_err(|e| match pg_err(e) {
                StorageError::DatabaseNotFound(_) => StorageError::DatabaseNotFound(descriptor.database_name.to_string()),
                other => other,
            })?;
        tracing::debug!(database = %descriptor.database_name, "PostgreSQL database dropped");
        Ok(())
    }
}

pub struct PostgresStore {
    client: Mutex<Client>,
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Server message plus detail when the error came from the server.
fn describe(e: &postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{}: {}", db.message(), detail),
            None => db.message().to_string(),
        },
        None => e.to_string(),
    }
}

/// Server reachable but refusing this session: credentials, privileges or
/// connection slots.
fn is_rejection(code: &SqlState) -> bool {
    code.code().starts_with("28")
        || *code == SqlState::INSUFFICIENT_PRIVILEGE
        || *code == SqlState::TOO_MANY_CONNECTIONS
        || *code == SqlState::CANNOT_CONNECT_NOW
}

fn classify(code: Option<&SqlState>, message: String) -> StorageError {
    match code {
        Some(code) if *code == SqlState::UNDEFINED_TABLE => StorageError::TableNotFound(message),
        Some(code) if *code == SqlState::UNDEFINED_COLUMN => StorageError::ColumnNotFound(message),
        Some(code) if *code == SqlState::INVALID_CATALOG_NAME => StorageError::DatabaseNotFound(message),
        Some(code) if *code == SqlState::DUPLICATE_DATABASE => StorageError::DatabaseExists(message),
        Some(code) if is_rejection(code) => StorageError::Operational(message),
        Some(_) => StorageError::Other(message),
        // No SQLSTATE: the server was never reached or the connection dropped.
        None => StorageError::Operational(message),
    }
}

fn pg_err(e: postgres::Error) -> StorageError {
    classify(e.code(), describe(&e))
}

fn column_type(data_type: &str) -> StorageType {
    match data_type {
        "bigint" | "integer" | "smallint" => StorageType::Integer,
        "double precision" | "real" | "numeric" => StorageType::Real,
        _ => StorageType::Text,
    }
}

fn pg_type_name(storage_type: StorageType) -> &'static str {
    match storage_type {
        StorageType::Integer => "BIGINT",
        StorageType::Real => "DOUBLE PRECISION",
        StorageType::Text => "TEXT",
    }
}

/// Select expression for one archive column. NUMERIC has no native decoder,
/// so it is read as DOUBLE PRECISION like the other real types.
fn select_expr(name: &str, data_type: &str) -> String {
    match data_type {
        "numeric" => format!("{}::double precision AS {}", quote(name), quote(name)),
        _ => quote(name),
    }
}

fn decode(row: &Row, index: usize) -> Result<Value, StorageError> {
    let conv = |e: postgres::Error| StorageError::Other(describe(&e));
    let ty = row.columns()[index].type_().clone();
    let value = if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index).map_err(conv)?.map(Value::Integer)
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index).map_err(conv)?.map(|v| Value::Integer(v.into()))
    } else if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index).map_err(conv)?.map(|v| Value::Integer(v.into()))
    } else if ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index).map_err(conv)?.map(Value::Real)
    } else if ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index).map_err(conv)?.map(|v| Value::Real(v.into()))
    } else if ty == Type::NUMERIC {
        return Err(StorageError::Other(format!(
            "column {} is NUMERIC and must be selected as double precision",
            row.columns()[index].name()
        )));
    } else {
        row.try_get::<_, Option<String>>(index)
            .map_err(conv)?
            .map(|s| Value::Text(Arc::from(s.as_str())))
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Binds `value` as the declared type of its column. Postgres does not accept
/// mixed types in one column, so the value is coerced first.
fn bind(value: &Value, storage_type: StorageType) -> Result<Box<dyn ToSql + Sync>, StorageError> {
    let bound: Box<dyn ToSql + Sync> = match (value.coerce_to(storage_type)?, storage_type) {
        (Value::Integer(i), _) => Box::new(Some(i)),
        (Value::Real(r), _) => Box::new(Some(r)),
        (Value::Text(s), _) => Box::new(Some(s.to_string())),
        (Value::Null, StorageType::Integer) => Box::new(None::<i64>),
        (Value::Null, StorageType::Real) => Box::new(None::<f64>),
        (Value::Null, StorageType::Text) => Box::new(None::<String>),
    };
    Ok(bound)
}

fn placeholder(index: usize, storage_type: StorageType) -> String {
    format!("${}::{}", index, pg_type_name(storage_type))
}

fn params(boxed: &[Box<dyn ToSql + Sync>]) -> Vec<&(dyn ToSql + Sync)> {
    boxed.iter().map(|b| b.as_ref()).collect()
}

const SUMMARY_COLUMNS: &str = "\"min\", \"mintime\", \"max\", \"maxtime\", \"sum\", \"count\", \"wsum\", \"sumtime\"";

impl PostgresStore {
    fn client(&self) -> Result<MutexGuard<'_, Client>, StorageError> {
        self.client
            .lock()
            .map_err(|_| StorageError::Other("PostgreSQL client lock poisoned".to_string()))
    }

    fn table_names(client: &mut impl GenericClient) -> Result<Vec<String>, StorageError> {
        let rows = client
            .query(
                "SELECT table_name::text FROM information_schema.tables
                 WHERE table_schema = current_schema() ORDER BY table_name",
                &[],
            )
            .map_err(pg_err)?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    fn has_table(client: &mut impl GenericClient, table: &str) -> Result<bool, StorageError> {
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM information_schema.tables
                 WHERE table_schema = current_schema() AND table_name = $1",
                &[&table],
            )
            .map_err(pg_err)?;
        Ok(row.get::<_, i64>(0) > 0)
    }

    fn columns(client: &mut impl GenericClient, table: &str) -> Result<Vec<SchemaColumn>, StorageError> {
        Ok(Self::typed_columns(client, table)?
            .into_iter()
            .map(|(name, data_type)| SchemaColumn::new(&name, column_type(&data_type)))
            .collect())
    }

    /// Column names with their `information_schema` data types.
    fn typed_columns(client: &mut impl GenericClient, table: &str) -> Result<Vec<(String, String)>, StorageError> {
        let rows = client
            .query(
                "SELECT column_name::text, data_type::text FROM information_schema.columns
                 WHERE table_schema = current_schema() AND table_name = $1
                 ORDER BY ordinal_position",
                &[&table],
            )
            .map_err(pg_err)?;
        if rows.is_empty() {
            return Err(StorageError::TableNotFound(table.to_string()));
        }
        Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
    }

    fn column_of(client: &mut impl GenericClient, table: &str, column: &str) -> Result<SchemaColumn, StorageError> {
        Self::columns(client, table)?
            .into_iter()
            .find(|c| c.name.as_ref() == column)
            .ok_or_else(|| StorageError::ColumnNotFound(column.to_string()))
    }

    fn create_summary_table(client: &mut impl GenericClient, table: &str, column: &str) -> Result<(), StorageError> {
        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    \"dateTime\" BIGINT NOT NULL PRIMARY KEY,
                    \"min\" DOUBLE PRECISION, \"mintime\" BIGINT,
                    \"max\" DOUBLE PRECISION, \"maxtime\" BIGINT,
                    \"sum\" DOUBLE PRECISION, \"count\" BIGINT,
                    \"wsum\" DOUBLE PRECISION, \"sumtime\" BIGINT
                )",
                quote(&summary_table_name(table, column))
            ))
            .map_err(pg_err)
    }
}

impl ArchiveStore for PostgresStore {
    fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let mut client = self.client()?;
        Self::has_table(&mut *client, table)
    }

    fn create_archive_table(&self, table: &str, schema: &Schema) -> Result<(), StorageError> {
        let columns: Vec<String> = schema
            .columns()
            .iter()
            .map(|c| {
                if c.name.as_ref() == schema.time_column() {
                    format!("{} BIGINT NOT NULL PRIMARY KEY", quote(&c.name))
                } else {
                    format!("{} {}", quote(&c.name), pg_type_name(c.storage_type))
                }
            })
            .collect();
        let mut client = self.client()?;
        client
            .batch_execute(&format!("CREATE TABLE {} ({})", quote(table), columns.join(", ")))
            .map_err(pg_err)?;
        tracing::debug!(table, columns = columns.len(), "PostgreSQL archive table created");
        Ok(())
    }

    fn schema_of(&self, table: &str) -> Result<Vec<SchemaColumn>, StorageError> {
        let mut client = self.client()?;
        Self::columns(&mut *client, table)
    }

    fn records_after(&self, table: &str, after: Option<i64>, limit: usize) -> Result<Vec<ArchiveRecord>, StorageError> {
        let mut client = self.client()?;
        let select: Vec<String> = Self::typed_columns(&mut *client, table)?
            .iter()
            .map(|(name, data_type)| select_expr(name, data_type))
            .collect();
        let select = select.join(", ");
        let time = quote(TIME_COLUMN);
        let limit = limit as i64;
        let rows = match after {
            Some(after) => client.query(
                &format!("SELECT {} FROM {} WHERE {} > $1::bigint ORDER BY {} LIMIT $2", select, quote(table), time, time),
                &[&after, &limit],
            ),
            None => client.query(
                &format!("SELECT {} FROM {} ORDER BY {} LIMIT $1", select, quote(table), time),
                &[&limit],
            ),
        }
        .map_err(pg_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut timestamp = None;
            let mut values: Vec<(Arc<str>, Value)> = Vec::with_capacity(row.len());
            for (i, column) in row.columns().iter().enumerate() {
                let value = decode(row, i)?;
                if column.name() == TIME_COLUMN {
                    if let Value::Integer(ts) = value {
                        timestamp = Some(ts);
                    }
                } else {
                    values.push((Arc::from(column.name()), value));
                }
            }
            let timestamp = timestamp.ok_or_else(|| StorageError::ColumnNotFound(TIME_COLUMN.to_string()))?;
            let mut record = ArchiveRecord::new(timestamp);
            record.values.extend(values);
            records.push(record);
        }
        Ok(records)
    }

    fn aggregate(&self, table: &str, span: TimeSpan, column: &str, func: AggregateFn) -> Result<Value, StorageError> {
        let expr = match func {
            AggregateFn::Count => format!("COUNT({})", quote(column)),
            _ => format!("{}({})::double precision", func.sql_name(), quote(column)),
        };
        let time = quote(TIME_COLUMN);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} >= $1::bigint AND {} <= $2::bigint",
            expr,
            quote(table),
            time,
            time
        );
        let mut client = self.client()?;
        let row = client.query_one(&sql, &[&span.start, &span.end]).map_err(pg_err)?;
        decode(&row, 0)
    }

    fn first_timestamp(&self, table: &str) -> Result<Option<i64>, StorageError> {
        let mut client = self.client()?;
        let row = client
            .query_one(&format!("SELECT MIN({})::bigint FROM {}", quote(TIME_COLUMN), quote(table)), &[])
            .map_err(pg_err)?;
        row.try_get::<_, Option<i64>>(0).map_err(|e| StorageError::Other(describe(&e)))
    }

    fn last_timestamp(&self, table: &str) -> Result<Option<i64>, StorageError> {
        let mut client = self.client()?;
        let row = client
            .query_one(&format!("SELECT MAX({})::bigint FROM {}", quote(TIME_COLUMN), quote(table)), &[])
            .map_err(pg_err)?;
        row.try_get::<_, Option<i64>>(0).map_err(|e| StorageError::Other(describe(&e)))
    }

    fn update_cell(&self, table: &str, timestamp: i64, column: &str, value: &Value) -> Result<(), StorageError> {
        if column == TIME_COLUMN {
            return Err(StorageError::Other("the time key cannot be updated".to_string()));
        }
        let mut client = self.client()?;
        let target = Self::column_of(&mut *client, table, column)?;
        let bound = [bind(value, target.storage_type)?, Box::new(timestamp) as Box<dyn ToSql + Sync>];
        client
            .execute(
                &format!(
                    "UPDATE {} SET {} = {} WHERE {} = $2::bigint",
                    quote(table),
                    quote(column),
                    placeholder(1, target.storage_type),
                    quote(TIME_COLUMN)
                ),
                &params(&bound),
            )
            .map_err(pg_err)?;
        Ok(())
    }

    fn bulk_insert(
        &self,
        table: &str,
        records: &mut dyn Iterator<Item = Result<ArchiveRecord, StorageError>>,
    ) -> Result<u64, StorageError> {
        let mut client = self.client()?;
        let columns = Self::columns(&mut *client, table)?;
        let names: Vec<String> = columns.iter().map(|c| quote(&c.name)).collect();
        // Bound values are BIGINT, DOUBLE PRECISION or TEXT; the cast lets
        // Postgres assign them to narrower or NUMERIC columns.
        let placeholders: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| placeholder(i + 1, c.storage_type))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            names.join(", "),
            placeholders.join(", ")
        );

        let mut tx = client.transaction().map_err(pg_err)?;
        let stmt = tx.prepare(&sql).map_err(pg_err)?;
        let mut count = 0u64;
        for record in records {
            let record = record?;
            let bound = columns
                .iter()
                .map(|c| {
                    if c.name.as_ref() == TIME_COLUMN {
                        Ok(Box::new(record.timestamp) as Box<dyn ToSql + Sync>)
                    } else {
                        bind(record.values.get(&c.name).unwrap_or(&Value::Null), c.storage_type)
                    }
                })
                .collect::<Result<Vec<_>, StorageError>>()?;
            tx.execute(&stmt, &params(&bound)).map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    StorageError::DuplicateTimestamp(record.timestamp)
                } else {
                    pg_err(e)
                }
            })?;
            count += 1;
        }
        tx.commit().map_err(pg_err)?;
        tracing::debug!(table, count, "PostgreSQL bulk insert committed");
        Ok(count)
    }

    fn init_summary_tables(&self, table: &str, columns: &[Arc<str>]) -> Result<(), StorageError> {
        let mut client = self.client()?;
        let mut tx = client.transaction().map_err(pg_err)?;
        for column in columns {
            Self::create_summary_table(&mut tx, table, column)?;
        }
        tx.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\"name\" TEXT NOT NULL PRIMARY KEY, \"value\" TEXT)",
            quote(&summary_metadata_table(table))
        ))
        .map_err(pg_err)?;
        tx.commit().map_err(pg_err)
    }

    fn drop_summary_tables(&self, table: &str) -> Result<usize, StorageError> {
        let mut client = self.client()?;
        let prefix = summary_prefix(table);
        let doomed: Vec<String> = Self::table_names(&mut *client)?
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect();
        if doomed.is_empty() {
            return Err(StorageError::NoSuchSummaryTables(table.to_string()));
        }

        let mut tx = client.transaction().map_err(pg_err)?;
        for name in &doomed {
            tx.batch_execute(&format!("DROP TABLE {}", quote(name)))
                .map_err(pg_err)?;
        }
        tx.commit().map_err(pg_err)?;
        tracing::debug!(table, dropped = doomed.len(), "PostgreSQL summary tables dropped");
        Ok(doomed.len())
    }

    fn summary_last_update(&self, table: &str) -> Result<Option<i64>, StorageError> {
        let mut client = self.client()?;
        let meta = summary_metadata_table(table);
        if !Self::has_table(&mut *client, &meta)? {
            return Ok(None);
        }
        let row = client
            .query_opt(
                &format!("SELECT \"value\" FROM {} WHERE \"name\" = $1", quote(&meta)),
                &[&LAST_UPDATE_KEY],
            )
            .map_err(pg_err)?;
        row.and_then(|r| r.get::<_, Option<String>>(0))
            .map(|v| {
                v.parse::<i64>()
                    .map_err(|e| StorageError::Other(format!("invalid {}: {}", LAST_UPDATE_KEY, e)))
            })
            .transpose()
    }

    fn day_summary(&self, table: &str, column: &str, day_start: i64) -> Result<Option<DayAggregate>, StorageError> {
        let mut client = self.client()?;
        let name = summary_table_name(table, column);
        if !Self::has_table(&mut *client, &name)? {
            return Ok(None);
        }
        let row = client
            .query_opt(
                &format!("SELECT {} FROM {} WHERE \"dateTime\" = $1", SUMMARY_COLUMNS, quote(&name)),
                &[&day_start],
            )
            .map_err(pg_err)?;
        Ok(row.map(|r| DayAggregate {
            min: r.get(0),
            min_time: r.get(1),
            max: r.get(2),
            max_time: r.get(3),
            sum: r.get::<_, Option<f64>>(4).unwrap_or(0.0),
            count: r.get::<_, Option<i64>>(5).unwrap_or(0),
            wsum: r.get::<_, Option<f64>>(6).unwrap_or(0.0),
            sumtime: r.get::<_, Option<i64>>(7).unwrap_or(0),
        }))
    }

    fn store_day_summary(&self, table: &str, summary: &DaySummary, last_update: i64) -> Result<(), StorageError> {
        let mut client = self.client()?;
        let meta = summary_metadata_table(table);
        if !Self::has_table(&mut *client, &meta)? {
            return Err(StorageError::NoSuchSummaryTables(table.to_string()));
        }

        let mut tx = client.transaction().map_err(pg_err)?;
        for (column, agg) in &summary.aggregates {
            Self::create_summary_table(&mut tx, table, column)?;
            tx.execute(
                &format!(
                    "INSERT INTO {} (\"dateTime\", {}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                     ON CONFLICT (\"dateTime\") DO UPDATE SET
                        \"min\" = EXCLUDED.\"min\", \"mintime\" = EXCLUDED.\"mintime\",
                        \"max\" = EXCLUDED.\"max\", \"maxtime\" = EXCLUDED.\"maxtime\",
                        \"sum\" = EXCLUDED.\"sum\", \"count\" = EXCLUDED.\"count\",
                        \"wsum\" = EXCLUDED.\"wsum\", \"sumtime\" = EXCLUDED.\"sumtime\"",
                    quote(&summary_table_name(table, column)),
                    SUMMARY_COLUMNS
                ),
                &[
                    &summary.day_start,
                    &agg.min,
                    &agg.min_time,
                    &agg.max,
                    &agg.max_time,
                    &agg.sum,
                    &agg.count,
                    &agg.wsum,
                    &agg.sumtime,
                ],
            )
            .map_err(pg_err)?;
        }
        tx.execute(
            &format!(
                "INSERT INTO {} (\"name\", \"value\") VALUES ($1, $2)
                 ON CONFLICT (\"name\") DO UPDATE SET \"value\" = EXCLUDED.\"value\"",
                quote(&meta)
            ),
            &[&LAST_UPDATE_KEY, &last_update.to_string()],
        )
        .map_err(pg_err)?;
        tx.commit().map_err(pg_err)
    }

    fn add_column(&self, table: &str, column: &SchemaColumn) -> Result<(), StorageError> {
        let mut client = self.client()?;
        client
            .batch_execute(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote(table),
                quote(&column.name),
                pg_type_name(column.storage_type)
            ))
            .map_err(pg_err)
    }

    fn rename_column(&self, table: &str, from: &str, to: &str) -> Result<(), StorageError> {
        let mut client = self.client()?;
        Self::column_of(&mut *client, table, from)?;
        let old_summary = summary_table_name(table, from);
        let has_summary = Self::has_table(&mut *client, &old_summary)?;

        let mut tx = client.transaction().map_err(pg_err)?;
        tx.batch_execute(&format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote(table),
            quote(from),
            quote(to)
        ))
        .map_err(pg_err)?;
        if has_summary {
            tx.batch_execute(&format!(
                "ALTER TABLE {} RENAME TO {}",
                quote(&old_summary),
                quote(&summary_table_name(table, to))
            ))
            .map_err(pg_err)?;
        }
        tx.commit().map_err(pg_err)
    }

    fn drop_columns(&self, table: &str, columns: &[Arc<str>]) -> Result<(), StorageError> {
        let mut client = self.client()?;
        for column in columns {
            Self::column_of(&mut *client, table, column)?;
        }

        let mut tx = client.transaction().map_err(pg_err)?;
        for column in columns {
            tx.batch_execute(&format!(
                "ALTER TABLE {} DROP COLUMN {}; DROP TABLE IF EXISTS {}",
                quote(table),
                quote(column),
                quote(&summary_table_name(table, column))
            ))
            .map_err(pg_err)?;
        }
        tx.commit().map_err(pg_err)
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        let PostgresStore { client } = *self;
        let client = client.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        client.close().map_err(pg_err)?;
        tracing::debug!("PostgreSQL connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes_identifiers() {
        assert_eq!(quote("archive"), "\"archive\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_column_type_mapping() {
        assert_eq!(column_type("bigint"), StorageType::Integer);
        assert_eq!(column_type("integer"), StorageType::Integer);
        assert_eq!(column_type("double precision"), StorageType::Real);
        assert_eq!(column_type("text"), StorageType::Text);
        assert_eq!(column_type("character varying"), StorageType::Text);
        for ty in [StorageType::Integer, StorageType::Real, StorageType::Text] {
            assert_eq!(column_type(&pg_type_name(ty).to_lowercase()), ty);
        }
    }

    #[test]
    fn test_rejected_sessions_are_operational() {
        for code in ["28P01", "28000", "42501", "53300", "57P03"] {
            let err = classify(Some(&SqlState::from_code(code)), "password authentication failed".to_string());
            assert!(
                matches!(err, StorageError::Operational(ref m) if m == "password authentication failed"),
                "{} classified as {:?}",
                code,
                err
            );
        }
        assert!(matches!(classify(None, "connection refused".to_string()), StorageError::Operational(_)));
    }

    #[test]
    fn test_sqlstate_classification() {
        assert!(matches!(
            classify(Some(&SqlState::UNDEFINED_TABLE), "missing".to_string()),
            StorageError::TableNotFound(_)
        ));
        assert!(matches!(
            classify(Some(&SqlState::INVALID_CATALOG_NAME), "missing".to_string()),
            StorageError::DatabaseNotFound(_)
        ));
        assert!(matches!(
            classify(Some(&SqlState::DUPLICATE_DATABASE), "exists".to_string()),
            StorageError::DatabaseExists(_)
        ));
        assert!(matches!(
            classify(Some(&SqlState::SYNTAX_ERROR), "bad sql".to_string()),
            StorageError::Other(ref m) if m == "bad sql"
        ));
    }

    #[test]
    fn test_numeric_and_narrow_columns() {
        assert_eq!(column_type("numeric"), StorageType::Real);
        assert_eq!(
            select_expr("rain", "numeric"),
            "\"rain\"::double precision AS \"rain\""
        );
        assert_eq!(select_expr("dateTime", "integer"), "\"dateTime\"");
        assert_eq!(placeholder(3, StorageType::Integer), "$3::BIGINT");
        assert_eq!(placeholder(1, StorageType::Real), "$1::DOUBLE PRECISION");
    }

    #[test]
    fn test_bind_rejects_text_in_numeric_column() {
        assert!(bind(&Value::from("abc"), StorageType::Real).is_err());
        assert!(bind(&Value::from("1.5"), StorageType::Real).is_ok());
        assert!(bind(&Value::Null, StorageType::Integer).is_ok());
    }

    #[test]
    fn test_client_config_from_descriptor() {
        let desc = BackendDescriptor::new("PostgreSQL", "postgres", "weewx")
            .with_param("host", "db.local")
            .with_param("port", "5433")
            .with_param("user", "weewx");
        let config = PostgresDriver::client_config(&desc, "weewx").unwrap();
        assert_eq!(config.get_dbname(), Some("weewx"));
        assert_eq!(config.get_user(), Some("weewx"));
        assert_eq!(config.get_ports(), &[5433]);

        let bad = desc.with_param("port", "many");
        assert!(PostgresDriver::client_config(&bad, "weewx").is_err());
    }
}
