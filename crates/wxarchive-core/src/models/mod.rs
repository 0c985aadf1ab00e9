use std::{collections::BTreeMap, fmt::Display, str::FromStr, sync::Arc};

use thiserror::Error;
use time::OffsetDateTime;

pub mod summary;

/// Name of the time key column of every archive table.
pub const TIME_COLUMN: &str = "dateTime";
/// Column holding the unit system code of a record.
pub const UNITS_COLUMN: &str = "usUnits";
/// Column holding the archive interval of a record, in minutes.
pub const INTERVAL_COLUMN: &str = "interval";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Integer,
    Real,
    Text,
}

impl StorageType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            StorageType::Integer => "INTEGER",
            StorageType::Real => "REAL",
            StorageType::Text => "TEXT",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, StorageType::Integer | StorageType::Real)
    }
}

impl Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql_name())
    }
}

impl FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" | "BIGINT" => Ok(StorageType::Integer),
            "REAL" | "FLOAT" | "DOUBLE" => Ok(StorageType::Real),
            "TEXT" | "VARCHAR" => Ok(StorageType::Text),
            other => Err(format!("unknown storage type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaColumn {
    pub name: Arc<str>,
    pub storage_type: StorageType,
}

impl SchemaColumn {
    pub fn new(name: &str, storage_type: StorageType) -> Self {
        Self {
            name: Arc::from(name),
            storage_type,
        }
    }

    /// Columns that get a daily summary table: numeric observations only.
    pub fn is_summarizable(&self) -> bool {
        self.storage_type.is_numeric()
            && !matches!(self.name.as_ref(), TIME_COLUMN | UNITS_COLUMN | INTERVAL_COLUMN)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("schema has no columns")]
    Empty,
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),
    #[error("time column {0} is missing")]
    MissingTimeColumn(String),
    #[error("time column {0} must be INTEGER")]
    TimeColumnType(String),
}

/// Ordered archive columns. Order is fixed once the schema is built.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<SchemaColumn>,
    time_column: Arc<str>,
}

impl Schema {
    pub fn new(columns: Vec<SchemaColumn>) -> Result<Self, SchemaError> {
        if columns.is_empty() {
            return Err(SchemaError::Empty);
        }

        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(SchemaError::DuplicateColumn(column.name.to_string()));
            }
        }

        match columns.iter().find(|c| c.name.as_ref() == TIME_COLUMN) {
            None => return Err(SchemaError::MissingTimeColumn(TIME_COLUMN.to_string())),
            Some(c) if c.storage_type != StorageType::Integer => {
                return Err(SchemaError::TimeColumnType(TIME_COLUMN.to_string()))
            }
            Some(_) => {}
        }

        Ok(Self {
            columns,
            time_column: Arc::from(TIME_COLUMN),
        })
    }

    pub fn columns(&self) -> &[SchemaColumn] {
        &self.columns
    }

    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name.as_ref() == name)
    }

    pub fn storage_type(&self, name: &str) -> Option<StorageType> {
        self.column(name).map(|c| c.storage_type)
    }

    /// Every column except the time key.
    pub fn value_columns(&self) -> impl Iterator<Item = &SchemaColumn> {
        self.columns
            .iter()
            .filter(move |c| c.name != self.time_column)
    }

    pub fn summary_columns(&self) -> Vec<Arc<str>> {
        self.columns
            .iter()
            .filter(|c| c.is_summarizable())
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn builtin(name: &str) -> Option<Schema> {
        match name {
            "wview" => Some(Self::wview()),
            "wview_extended" => Some(Self::wview_extended()),
            _ => None,
        }
    }

    pub fn wview() -> Schema {
        Self::from_real_columns(WVIEW_COLUMNS, &[])
    }

    pub fn wview_extended() -> Schema {
        Self::from_real_columns(WVIEW_COLUMNS, WVIEW_EXTENDED_COLUMNS)
    }

    fn from_real_columns(base: &[&str], extra: &[&str]) -> Schema {
        let mut columns = vec![
            SchemaColumn::new(TIME_COLUMN, StorageType::Integer),
            SchemaColumn::new(UNITS_COLUMN, StorageType::Integer),
            SchemaColumn::new(INTERVAL_COLUMN, StorageType::Integer),
        ];
        columns.extend(
            base.iter()
                .chain(extra.iter())
                .map(|name| SchemaColumn::new(name, StorageType::Real)),
        );
        Schema {
            columns,
            time_column: Arc::from(TIME_COLUMN),
        }
    }
}

const WVIEW_COLUMNS: &[&str] = &[
    "barometer", "pressure", "altimeter", "inTemp", "outTemp", "inHumidity", "outHumidity",
    "windSpeed", "windDir", "windGust", "windGustDir", "rainRate", "rain", "dewpoint",
    "windchill", "heatindex", "ET", "radiation", "UV", "extraTemp1", "extraTemp2",
    "extraTemp3", "soilTemp1", "soilTemp2", "soilTemp3", "soilTemp4", "leafTemp1",
    "leafTemp2", "extraHumid1", "extraHumid2", "soilMoist1", "soilMoist2", "soilMoist3",
    "soilMoist4", "leafWet1", "leafWet2", "rxCheckPercent", "txBatteryStatus",
    "consBatteryVoltage", "hail", "hailRate", "heatingTemp", "heatingVoltage",
    "supplyVoltage", "referenceVoltage", "windBatteryStatus", "rainBatteryStatus",
    "outTempBatteryStatus", "inTempBatteryStatus",
];

const WVIEW_EXTENDED_COLUMNS: &[&str] = &[
    "appTemp", "cloudbase", "humidex", "maxSolarRad", "snow", "snowRate", "snowDepth",
    "pm1_0", "pm2_5", "pm10_0", "co2", "lightning_distance", "lightning_strike_count",
    "windrun",
];

#[derive(Debug, Error, PartialEq)]
#[error("cannot convert {value} to {target}")]
pub struct CoercionError {
    pub value: String,
    pub target: StorageType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(Arc<str>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Runtime type of the value, `None` for null.
    pub fn storage_type(&self) -> Option<StorageType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(StorageType::Integer),
            Value::Real(_) => Some(StorageType::Real),
            Value::Text(_) => Some(StorageType::Text),
        }
    }

    /// Null matches every declared type.
    pub fn matches(&self, storage_type: StorageType) -> bool {
        self.storage_type().map_or(true, |t| t == storage_type)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn coerce_to(&self, target: StorageType) -> Result<Value, CoercionError> {
        let fail = || CoercionError {
            value: self.to_string(),
            target,
        };

        match (target, self) {
            (_, Value::Null) => Ok(Value::Null),
            (StorageType::Integer, Value::Integer(i)) => Ok(Value::Integer(*i)),
            (StorageType::Integer, Value::Real(r)) => whole_number(*r).ok_or_else(fail),
            (StorageType::Integer, Value::Text(s)) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(i) => Ok(Value::Integer(i)),
                    Err(_) => s
                        .parse::<f64>()
                        .ok()
                        .and_then(whole_number)
                        .ok_or_else(fail),
                }
            }
            (StorageType::Real, Value::Real(r)) => Ok(Value::Real(*r)),
            (StorageType::Real, Value::Integer(i)) => Ok(Value::Real(*i as f64)),
            (StorageType::Real, Value::Text(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|r| r.is_finite())
                .map(Value::Real)
                .ok_or_else(fail),
            (StorageType::Text, Value::Text(s)) => Ok(Value::Text(s.clone())),
            (StorageType::Text, other) => Ok(Value::Text(Arc::from(other.to_string().as_str()))),
        }
    }
}

fn whole_number(r: f64) -> Option<Value> {
    if r.is_finite() && r.fract() == 0.0 && r >= i64::MIN as f64 && r <= i64::MAX as f64 {
        Some(Value::Integer(r as i64))
    } else {
        None
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(Arc::from(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One archive row: the time key plus every other column by name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArchiveRecord {
    pub timestamp: i64,
    pub values: BTreeMap<Arc<str>, Value>,
}

impl ArchiveRecord {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.values.insert(Arc::from(column), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn unit_system(&self) -> Option<UnitSystem> {
        match self.values.get(UNITS_COLUMN)?.coerce_to(StorageType::Integer) {
            Ok(Value::Integer(code)) => UnitSystem::from_code(code),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown unit system: {0}")]
pub struct UnknownUnitSystem(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitSystem {
    Us,
    Metric,
    MetricWx,
}

impl UnitSystem {
    pub fn code(&self) -> i64 {
        match self {
            UnitSystem::Us => 0x01,
            UnitSystem::Metric => 0x10,
            UnitSystem::MetricWx => 0x11,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0x01 => Some(UnitSystem::Us),
            0x10 => Some(UnitSystem::Metric),
            0x11 => Some(UnitSystem::MetricWx),
            _ => None,
        }
    }
}

impl Display for UnitSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            UnitSystem::Us => "US",
            UnitSystem::Metric => "METRIC",
            UnitSystem::MetricWx => "METRICWX",
        })
    }
}

impl FromStr for UnitSystem {
    type Err = UnknownUnitSystem;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(UnitSystem::Us),
            "METRIC" => Ok(UnitSystem::Metric),
            "METRICWX" => Ok(UnitSystem::MetricWx),
            _ => Err(UnknownUnitSystem(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Min,
    Max,
    Sum,
    Avg,
}

impl AggregateFn {
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
        }
    }
}

/// Inclusive range of timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub start: i64,
    pub end: i64,
}

impl TimeSpan {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

impl Display for TimeSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} .. {}]", format_timestamp(self.start), format_timestamp(self.end))
    }
}

pub fn format_timestamp(ts: i64) -> String {
    match OffsetDateTime::from_unix_timestamp(ts) {
        Ok(dt) => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC ({})",
            dt.year(),
            dt.month() as u8,
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            ts
        ),
        Err(_) => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_numeric_text_to_real() {
        let v = Value::from("12.5");
        assert_eq!(v.coerce_to(StorageType::Real).unwrap(), Value::Real(12.5));
        assert!(Value::from("abc").coerce_to(StorageType::Real).is_err());
        assert!(Value::from("NaN").coerce_to(StorageType::Real).is_err());
    }

    #[test]
    fn test_coerce_to_integer() {
        assert_eq!(Value::Real(3.0).coerce_to(StorageType::Integer).unwrap(), Value::Integer(3));
        assert!(Value::Real(3.5).coerce_to(StorageType::Integer).is_err());
        assert_eq!(Value::from(" 42 ").coerce_to(StorageType::Integer).unwrap(), Value::Integer(42));
        assert_eq!(Value::from("7.0").coerce_to(StorageType::Integer).unwrap(), Value::Integer(7));
        assert_eq!(Value::Null.coerce_to(StorageType::Integer).unwrap(), Value::Null);
    }

    #[test]
    fn test_value_matches_declared_type() {
        assert!(Value::Null.matches(StorageType::Real));
        assert!(Value::Real(1.0).matches(StorageType::Real));
        assert!(!Value::Integer(1).matches(StorageType::Real));
        assert!(!Value::from("1").matches(StorageType::Integer));
    }

    #[test]
    fn test_schema_requires_integer_time_column() {
        let err = Schema::new(vec![SchemaColumn::new("outTemp", StorageType::Real)]).unwrap_err();
        assert_eq!(err, SchemaError::MissingTimeColumn("dateTime".to_string()));

        let err = Schema::new(vec![SchemaColumn::new("dateTime", StorageType::Text)]).unwrap_err();
        assert_eq!(err, SchemaError::TimeColumnType("dateTime".to_string()));

        let err = Schema::new(vec![
            SchemaColumn::new("dateTime", StorageType::Integer),
            SchemaColumn::new("outTemp", StorageType::Real),
            SchemaColumn::new("outTemp", StorageType::Real),
        ])
        .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateColumn("outTemp".to_string()));
    }

    #[test]
    fn test_summary_columns_skip_bookkeeping() {
        let schema = Schema::new(vec![
            SchemaColumn::new("dateTime", StorageType::Integer),
            SchemaColumn::new("usUnits", StorageType::Integer),
            SchemaColumn::new("interval", StorageType::Integer),
            SchemaColumn::new("outTemp", StorageType::Real),
            SchemaColumn::new("station", StorageType::Text),
        ])
        .unwrap();
        let summary_columns = schema.summary_columns();
        let cols: Vec<&str> = summary_columns.iter().map(|c| c.as_ref()).collect();
        assert_eq!(cols, vec!["outTemp"]);
        assert_eq!(schema.value_columns().count(), 4);
    }

    #[test]
    fn test_builtin_schemas() {
        let wview = Schema::builtin("wview").unwrap();
        let extended = Schema::builtin("wview_extended").unwrap();
        assert_eq!(wview.columns()[0].name.as_ref(), "dateTime");
        assert!(extended.columns().len() > wview.columns().len());
        assert!(Schema::builtin("nope").is_none());
    }

    #[test]
    fn test_unit_system_codes() {
        assert_eq!("metricwx".parse::<UnitSystem>().unwrap(), UnitSystem::MetricWx);
        assert_eq!(UnitSystem::from_code(16), Some(UnitSystem::Metric));
        assert!("SI".parse::<UnitSystem>().is_err());

        let record = ArchiveRecord::new(100).with("usUnits", 1);
        assert_eq!(record.unit_system(), Some(UnitSystem::Us));
        assert_eq!(ArchiveRecord::new(100).unit_system(), None);
    }
}
