//! Maintenance and migration of weather observation archives.
//!
//! Every operation resolves a configured binding to a backend, opens the
//! archive through a [`manager::Manager`] and reports an outcome value.
//! Conditions that leave nothing to do are outcomes, not errors.

pub mod cli;
pub mod columns;
pub mod config;
pub mod daily;
pub mod error;
pub mod integrity;
pub mod lifecycle;
pub mod manager;
pub mod prompt;
pub mod reconfigure;
pub mod registry;
pub mod transfer;
pub mod units;

pub use config::{Config, ResolveError};
pub use error::MaintenanceError;
pub use manager::Manager;
pub use registry::DriverRegistry;
