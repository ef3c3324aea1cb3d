//! Atomic Counter Store
//!
//! Persistence abstraction for per-(tenant, window) counters.
//!
//! Every count mutation goes through [`CounterStore::conditional_increment`],
//! which must check `count < limit` and bump the count as one indivisible
//! step at the storage layer. Callers never read-then-write.

use crate::error::StoreResult;
use crate::model::{TenantId, UsageCounter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Result of a conditional increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// Count was below the limit and is now this value
    Incremented(u64),
    /// Count was already at or above the limit, nothing changed
    Rejected,
    /// No row exists for the key
    Missing,
}

/// Counter store trait
///
/// Implementations must be linearizable per `(tenant, window_start)` and must
/// not block callers working on other keys.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Create a zero-count row if absent, otherwise no-op.
    ///
    /// Concurrent calls for the same key never error and never duplicate rows.
    async fn ensure_exists(&self, tenant: &TenantId, window_start: DateTime<Utc>) -> StoreResult<()>;

    /// Atomically increment the row by one only while `count < limit`.
    async fn conditional_increment(
        &self,
        tenant: &TenantId,
        window_start: DateTime<Utc>,
        limit: u64,
    ) -> StoreResult<IncrementOutcome>;

    /// Read a counter without mutating it
    async fn fetch(&self, tenant: &TenantId, window_start: DateTime<Utc>) -> StoreResult<Option<UsageCounter>>;

    /// All counters for a tenant, newest window first
    async fn history(&self, tenant: &TenantId) -> StoreResult<Vec<UsageCounter>>;
}

#[derive(Debug, Clone, Copy)]
struct CounterRow {
    count: u64,
    last_updated: DateTime<Utc>,
}

/// In-memory counter store (for embedding, testing and development)
///
/// Keys live in a sharded map; the shard write lock held by `get_mut` makes
/// the compare-and-increment atomic for one key while leaving other shards free.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    rows: DashMap<(TenantId, DateTime<Utc>), CounterRow>,
}

impl InMemoryCounterStore {
    /// Empty store
    pub fn new() -> Self {
        Self { rows: DashMap::new() }
    }

    /// Number of persisted rows across all tenants
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no row has been created yet
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn ensure_exists(&self, tenant: &TenantId, window_start: DateTime<Utc>) -> StoreResult<()> {
        self.rows
            .entry((tenant.clone(), window_start))
            .or_insert_with(|| CounterRow {
                count: 0,
                last_updated: Utc::now(),
            });
        Ok(())
    }

    async fn conditional_increment(
        &self,
        tenant: &TenantId,
        window_start: DateTime<Utc>,
        limit: u64,
    ) -> StoreResult<IncrementOutcome> {
        let key = (tenant.clone(), window_start);
        let Some(mut row) = self.rows.get_mut(&key) else {
            return Ok(IncrementOutcome::Missing);
        };

        if row.count >= limit {
            return Ok(IncrementOutcome::Rejected);
        }
        row.count += 1;
        row.last_updated = Utc::now();
        Ok(IncrementOutcome::Incremented(row.count))
    }

    async fn fetch(&self, tenant: &TenantId, window_start: DateTime<Utc>) -> StoreResult<Option<UsageCounter>> {
        Ok(self
            .rows
            .get(&(tenant.clone(), window_start))
            .map(|row| UsageCounter {
                tenant: tenant.clone(),
                window_start,
                count: row.count,
                last_updated: row.last_updated,
            }))
    }

    async fn history(&self, tenant: &TenantId) -> StoreResult<Vec<UsageCounter>> {
        let mut counters: Vec<_> = self
            .rows
            .iter()
            .filter(|entry| &entry.key().0 == tenant)
            .map(|entry| UsageCounter {
                tenant: tenant.clone(),
                window_start: entry.key().1,
                count: entry.value().count,
                last_updated: entry.value().last_updated,
            })
            .collect();
        counters.sort_by(|a, b| b.window_start.cmp(&a.window_start));
        Ok(counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn window() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_increment_before_ensure_is_missing() {
        let store = InMemoryCounterStore::new();
        let tenant = TenantId::from(1i64);

        let outcome = store.conditional_increment(&tenant, window(), 5).await.unwrap();
        assert_eq!(outcome, IncrementOutcome::Missing);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let store = InMemoryCounterStore::new();
        let tenant = TenantId::from(1i64);

        store.ensure_exists(&tenant, window()).await.unwrap();
        store.conditional_increment(&tenant, window(), 5).await.unwrap();
        store.ensure_exists(&tenant, window()).await.unwrap();

        assert_eq!(store.len(), 1);
        let counter = store.fetch(&tenant, window()).await.unwrap().unwrap();
        assert_eq!(counter.count, 1);
    }

    #[tokio::test]
    async fn test_increment_stops_at_limit() {
        let store = InMemoryCounterStore::new();
        let tenant = TenantId::from(1i64);
        store.ensure_exists(&tenant, window()).await.unwrap();

        for expected in 1..=3 {
            let outcome = store.conditional_increment(&tenant, window(), 3).await.unwrap();
            assert_eq!(outcome, IncrementOutcome::Incremented(expected));
        }
        let outcome = store.conditional_increment(&tenant, window(), 3).await.unwrap();
        assert_eq!(outcome, IncrementOutcome::Rejected);
        assert_eq!(store.fetch(&tenant, window()).await.unwrap().unwrap().count, 3);
    }

    #[tokio::test]
    async fn test_zero_limit_never_increments() {
        let store = InMemoryCounterStore::new();
        let tenant = TenantId::from(1i64);
        store.ensure_exists(&tenant, window()).await.unwrap();

        let outcome = store.conditional_increment(&tenant, window(), 0).await.unwrap();
        assert_eq!(outcome, IncrementOutcome::Rejected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_increments_are_distinct() {
        let store = Arc::new(InMemoryCounterStore::new());
        let tenant = TenantId::from(7i64);
        let limit = 50;

        let mut handles = Vec::new();
        for _ in 0..200 {
            let store = store.clone();
            let tenant = tenant.clone();
            handles.push(tokio::spawn(async move {
                store.ensure_exists(&tenant, window()).await.unwrap();
                store.conditional_increment(&tenant, window(), limit).await.unwrap()
            }));
        }

        let mut seen = Vec::new();
        for handle in handles {
            if let IncrementOutcome::Incremented(n) = handle.await.unwrap() {
                seen.push(n);
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=limit).collect::<Vec<_>>());
        assert_eq!(store.fetch(&tenant, window()).await.unwrap().unwrap().count, limit);
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let store = InMemoryCounterStore::new();
        let tenant = TenantId::from(1i64);
        let other = TenantId::from(2i64);
        let earlier = window() - chrono::TimeDelta::minutes(5);

        store.ensure_exists(&tenant, earlier).await.unwrap();
        store.ensure_exists(&tenant, window()).await.unwrap();
        store.ensure_exists(&other, window()).await.unwrap();

        let history = store.history(&tenant).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].window_start, window());
        assert_eq!(history[1].window_start, earlier);
    }
}
