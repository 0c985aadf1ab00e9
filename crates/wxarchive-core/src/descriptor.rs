use std::{collections::BTreeMap, fmt::Display, sync::Arc};

/// Identifies one database on one backend engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    /// Engine type name as configured, e.g. `SQLite`.
    pub database_type: Arc<str>,
    /// Registry name of the driver serving this engine type.
    pub driver: Arc<str>,
    pub database_name: Arc<str>,
    pub params: BTreeMap<Arc<str>, Arc<str>>,
}

impl BackendDescriptor {
    pub fn new(database_type: &str, driver: &str, database_name: &str) -> Self {
        Self {
            database_type: Arc::from(database_type),
            driver: Arc::from(driver),
            database_name: Arc::from(database_name),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(Arc::from(key), Arc::from(value));
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|v| v.as_ref())
    }

    /// Same engine and connection parameters, different database.
    pub fn with_database_name(&self, database_name: &str) -> Self {
        Self {
            database_name: Arc::from(database_name),
            ..self.clone()
        }
    }
}

impl Display for BackendDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} database '{}'", self.database_type, self.database_name)
    }
}
