//! Error types for QuotaGuard

use thiserror::Error;

/// Errors raised by a counter store or policy source.
///
/// These are never swallowed by the engine; they reach the caller as-is.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backend unavailable, locked past its timeout, or failed the statement
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A persisted row could not be decoded
    #[error("corrupt row for tenant {tenant}: {reason}")]
    Corrupt {
        /// Tenant owning the row
        tenant: String,
        /// What failed to decode
        reason: String,
    },
}

/// Engine-level error
#[derive(Debug, Error)]
pub enum MeteringError {
    /// Store error propagated unmodified
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MeteringError {
    /// Client-facing status for a fault. Always a generic server error.
    pub fn status_code(&self) -> u16 {
        500
    }
}

/// Configuration loading or validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File or environment could not be read or deserialized
    #[error("config load error: {0}")]
    Load(#[from] config::ConfigError),

    /// Values failed validation
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Invalid domain value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Tenant id was empty or blank
    #[error("invalid tenant id: {0}")]
    InvalidTenantId(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
