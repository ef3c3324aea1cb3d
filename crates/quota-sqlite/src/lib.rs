//! QuotaGuard SQLite Storage
//!
//! Persisted [`CounterStore`](quota_core::CounterStore) and
//! [`PolicyResolver`](quota_core::PolicyResolver) on a single SQLite file.
//!
//! The conditional increment is one `UPDATE ... WHERE request_count < limit
//! RETURNING request_count` inside an immediate transaction, so the check and
//! the write can never be split by another connection.

#![warn(clippy::all)]

pub mod error;
pub mod resolver;
pub mod store;

pub use error::SqliteStoreError;
pub use resolver::SqlitePolicyResolver;
pub use store::{SqliteStore, BUSY_TIMEOUT};
