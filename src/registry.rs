use std::{collections::BTreeMap, sync::Arc};

use wxarchive_core::{BackendDescriptor, StorageDriver};
use wxarchive_memory::MemoryDriver;
use wxarchive_postgres::PostgresDriver;
use wxarchive_sqlite::SqliteDriver;

use crate::error::MaintenanceError;

/// Storage drivers by the name configuration uses in `driver = "..."`.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<Arc<str>, Arc<dyn StorageDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The drivers shipped with wxarchive: `sqlite`, `postgres` and `memory`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("sqlite", Arc::new(SqliteDriver::new()));
        registry.register("postgres", Arc::new(PostgresDriver::new()));
        registry.register("memory", Arc::new(MemoryDriver::new()));
        registry
    }

    pub fn register(&mut self, name: &str, driver: Arc<dyn StorageDriver>) {
        self.drivers.insert(Arc::from(name), driver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageDriver>> {
        self.drivers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(|k| k.as_ref())
    }

    pub fn driver_for(&self, descriptor: &BackendDescriptor) -> Result<Arc<dyn StorageDriver>, MaintenanceError> {
        self.get(&descriptor.driver).ok_or_else(|| MaintenanceError::DriverLoad {
            driver: descriptor.driver.to_string(),
            database_type: descriptor.database_type.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_drivers() {
        let registry = DriverRegistry::with_defaults();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["memory", "postgres", "sqlite"]);
    }

    #[test]
    fn test_unknown_driver_is_a_load_error() {
        let registry = DriverRegistry::with_defaults();
        let desc = BackendDescriptor::new("MySQL", "mysql", "weewx");
        match registry.driver_for(&desc) {
            Err(MaintenanceError::DriverLoad { driver, database_type }) => {
                assert_eq!(driver, "mysql");
                assert_eq!(database_type, "MySQL");
            }
            Err(other) => panic!("Expected DriverLoad, got {:?}", other),
            Ok(_) => panic!("Expected DriverLoad, got a driver"),
        }
    }
}
