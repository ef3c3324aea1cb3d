//! SQLite storage errors

use quota_core::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when using SQLite storage
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("failed to open sqlite database at {}: {source}", path.display())]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("sqlite statement failed: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    #[error("corrupt usage row for tenant {tenant}: {reason}")]
    CorruptRow { tenant: String, reason: String },
}

impl From<SqliteStoreError> for StoreError {
    fn from(err: SqliteStoreError) -> Self {
        match err {
            SqliteStoreError::CorruptRow { tenant, reason } => StoreError::Corrupt { tenant, reason },
            other => StoreError::Backend(other.to_string()),
        }
    }
}
