use std::{collections::BTreeMap, path::Path, sync::Arc};

use serde::Deserialize;
use thiserror::Error;
use wxarchive_core::{BackendDescriptor, Schema, SchemaColumn, StorageType, UnitSystem, UnknownUnitSystem};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A binding name could not be turned into a usable backend.
#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("binding not found: {0}")]
    BindingNotFound(String),
    #[error("binding {binding} refers to unknown database {database}")]
    DatabaseNotFound { binding: String, database: String },
    #[error("database {database} refers to unknown database type {database_type}")]
    BackendTypeNotFound { database: String, database_type: String },
    #[error("binding {binding} has an unusable schema {schema}: {reason}")]
    SchemaReference {
        binding: String,
        schema: String,
        reason: String,
    },
    #[error(transparent)]
    UnknownUnitSystem(#[from] UnknownUnitSystem),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub convert: ConvertConfig,

    #[serde(default)]
    pub bindings: BTreeMap<String, BindingConfig>,

    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseConfig>,

    #[serde(default)]
    pub database_types: BTreeMap<String, DatabaseTypeConfig>,

    #[serde(default)]
    pub schemas: BTreeMap<String, SchemaConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConvertConfig {
    /// Unit system for `--reconfigure`. Keeps the source system when unset.
    #[serde(default)]
    pub target_unit: Option<String>,
}

/// Names the database, table and schema an operation works on.
#[derive(Debug, Deserialize, Clone)]
pub struct BindingConfig {
    pub database: String,

    #[serde(default = "default_table_name")]
    pub table_name: String,

    #[serde(default = "default_schema")]
    pub schema: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub database_type: String,
    pub database_name: String,

    /// Connection options. These win over the database type's options.
    #[serde(flatten)]
    pub options: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseTypeConfig {
    pub driver: String,

    #[serde(flatten)]
    pub options: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchemaConfig {
    pub columns: Vec<ColumnConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub storage_type: String,
}

/// Everything an operation needs to reach one archive.
#[derive(Debug, Clone)]
pub struct ResolvedBinding {
    pub name: Arc<str>,
    pub descriptor: BackendDescriptor,
    pub table: Arc<str>,
    pub schema: Schema,
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        json: false,
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_table_name() -> String {
    "archive".to_string()
}

fn default_schema() -> String {
    "wview_extended".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: default_logging(),
            convert: ConvertConfig::default(),
            bindings: BTreeMap::new(),
            databases: BTreeMap::new(),
            database_types: BTreeMap::new(),
            schemas: BTreeMap::new(),
        }
    }
}

fn option_text(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn resolve(&self, binding: &str) -> Result<ResolvedBinding, ResolveError> {
        let bound = self
            .bindings
            .get(binding)
            .ok_or_else(|| ResolveError::BindingNotFound(binding.to_string()))?;

        let database = self
            .databases
            .get(&bound.database)
            .ok_or_else(|| ResolveError::DatabaseNotFound {
                binding: binding.to_string(),
                database: bound.database.clone(),
            })?;

        let database_type = self
            .database_types
            .get(&database.database_type)
            .ok_or_else(|| ResolveError::BackendTypeNotFound {
                database: bound.database.clone(),
                database_type: database.database_type.clone(),
            })?;

        let mut descriptor =
            BackendDescriptor::new(&database.database_type, &database_type.driver, &database.database_name);
        for (key, value) in database_type.options.iter().chain(database.options.iter()) {
            descriptor = descriptor.with_param(key, &option_text(value));
        }

        Ok(ResolvedBinding {
            name: Arc::from(binding),
            descriptor,
            table: Arc::from(bound.table_name.as_str()),
            schema: self.schema(binding, &bound.schema)?,
        })
    }

    fn schema(&self, binding: &str, name: &str) -> Result<Schema, ResolveError> {
        let reference = |reason: String| ResolveError::SchemaReference {
            binding: binding.to_string(),
            schema: name.to_string(),
            reason,
        };

        if let Some(custom) = self.schemas.get(name) {
            let columns = custom
                .columns
                .iter()
                .map(|c| {
                    c.storage_type
                        .parse::<StorageType>()
                        .map(|ty| SchemaColumn::new(&c.name, ty))
                })
                .collect::<Result<Vec<_>, String>>()
                .map_err(reference)?;
            return Schema::new(columns).map_err(|e| reference(e.to_string()));
        }

        Schema::builtin(name).ok_or_else(|| reference("no such schema".to_string()))
    }

    pub fn target_unit(&self) -> Result<Option<UnitSystem>, ResolveError> {
        match &self.convert.target_unit {
            Some(unit) => Ok(Some(unit.parse()?)),
            None => Ok(None),
        }
    }
}
