use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::operations::OperationError;
use crate::schema::SchemaError;

/// Errors surfaced by [`crate::AssetRepository`] and [`crate::CursorQuery`].
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No database connection for {} became available within {timeout:?}", .path.display())]
    PoolExhausted { path: PathBuf, timeout: Duration },

    #[error("A write gateway for {} is already open", .path.display())]
    DuplicateWriteGateway { path: PathBuf },
}

impl RepositoryError {
    /// True for transient conditions a caller may retry after a pause.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepositoryError::PoolExhausted { .. } => true,
            RepositoryError::Sqlite(e)
            | RepositoryError::Schema(SchemaError::Sqlite(e))
            | RepositoryError::Operation(OperationError::Sqlite(e)) => is_busy(e),
            _ => false,
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}
