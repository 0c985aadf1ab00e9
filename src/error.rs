use thiserror::Error;
use wxarchive_core::{BackendDescriptor, StorageError};

use crate::config::ResolveError;

/// Why a maintenance operation stopped.
///
/// Benign outcomes (nothing to do, operator declined) are not errors; they are
/// reported through each operation's outcome type.
#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("usage: {0}")]
    Usage(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("cannot load driver '{driver}' for database type {database_type}")]
    DriverLoad { driver: String, database_type: String },
    #[error("backend unavailable: {0}")]
    BackendOperational(String),
    #[error("{0} is not initialized: the archive has no unit system yet")]
    NotInitialized(String),
    #[error("transfer incomplete: source holds {expected} records but destination gained {transferred}")]
    TransferMismatch { expected: i64, transferred: i64 },
    #[error("unit conversion failed: {0}")]
    Conversion(String),
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for MaintenanceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Operational(message) => MaintenanceError::BackendOperational(message),
            other => MaintenanceError::Storage(other),
        }
    }
}

impl MaintenanceError {
    /// Classifies a storage failure against the database it happened on.
    pub fn on(descriptor: &BackendDescriptor, e: StorageError) -> Self {
        match e {
            StorageError::Operational(message) => {
                MaintenanceError::BackendOperational(format!("{}: {}", descriptor, message))
            }
            other => MaintenanceError::Storage(other),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            MaintenanceError::Usage(_) => 2,
            _ => 1,
        }
    }

    pub fn is_missing_archive(&self) -> bool {
        matches!(
            self,
            MaintenanceError::Storage(StorageError::DatabaseNotFound(_) | StorageError::TableNotFound(_))
        )
    }
}
