//! SQLite-backed counter store
//!
//! Schema:
//! - usage_records: (tenant_id, period_start ms) unique, request_count, last_updated ms
//! - subscription_plans: (id, name unique, description, monthly_quota)
//! - subscriptions: (id, tenant_id, plan_id, start_date ms, end_date ms, is_active)

use crate::error::SqliteStoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quota_core::{CounterStore, IncrementOutcome, Plan, StoreError, StoreResult, TenantId, UsageCounter};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long a writer waits on another connection's lock before failing
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS subscription_plans (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    monthly_quota INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    plan_id INTEGER NOT NULL REFERENCES subscription_plans(id),
    start_date INTEGER NOT NULL,
    end_date INTEGER,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS ix_subscriptions_tenant ON subscriptions(tenant_id, is_active);

CREATE TABLE IF NOT EXISTS usage_records (
    id INTEGER PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    period_start INTEGER NOT NULL,
    request_count INTEGER NOT NULL DEFAULT 0,
    last_updated INTEGER NOT NULL,
    CONSTRAINT uq_usage_tenant_period UNIQUE (tenant_id, period_start)
);
";

/// SQLite-backed counter store.
///
/// One connection per store, shared behind a mutex. Several stores (or
/// processes) may open the same file; WAL mode plus [`BUSY_TIMEOUT`] lets
/// them serialize on SQLite's own write lock.
///
/// Every call through one store, including reads and the policy lookup of a
/// [`SqlitePolicyResolver`](crate::SqlitePolicyResolver) built from it, queues
/// on that mutex. Admissions within a process are therefore serialized across
/// all tenants. This backend suits the CLI and single-node deployments; use a
/// store with per-key atomics (such as `InMemoryCounterStore`) when tenants
/// must not wait on each other.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Create or open a database file and initialize the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteStoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SqliteStoreError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path).map_err(|source| SqliteStoreError::OpenDatabase {
            path: path.clone(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::from_connection(conn, Some(path))
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, SqliteStoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Insert plans that are not present yet (matched by name).
    ///
    /// Returns the number of plans inserted.
    pub fn seed_plans(&self, plans: &[Plan]) -> Result<usize, SqliteStoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO subscription_plans (name, description, monthly_quota)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (name) DO NOTHING",
            )?;
            for plan in plans {
                inserted += stmt.execute(params![plan.name, plan.description, to_sql_int(plan.monthly_quota)])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Plans currently in the catalog, ordered by quota
    pub fn plans(&self) -> Result<Vec<Plan>, SqliteStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name, description, monthly_quota FROM subscription_plans ORDER BY monthly_quota",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Plan {
                name: row.get(0)?,
                description: row.get(1)?,
                monthly_quota: from_sql_int(row.get(2)?),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Put `tenant` on `plan`, ending any subscription it already has.
    ///
    /// At most one subscription per tenant is active afterwards.
    pub fn subscribe(&self, tenant: &TenantId, plan: &str) -> Result<(), SqliteStoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now().timestamp_millis();

        let plan_id: i64 = tx
            .query_row(
                "SELECT id FROM subscription_plans WHERE name = ?1",
                params![plan],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| SqliteStoreError::UnknownPlan(plan.to_string()))?;

        tx.execute(
            "UPDATE subscriptions SET is_active = 0, end_date = ?2
             WHERE tenant_id = ?1 AND is_active = 1",
            params![tenant.as_str(), now],
        )?;
        tx.execute(
            "INSERT INTO subscriptions (tenant_id, plan_id, start_date, is_active)
             VALUES (?1, ?2, ?3, 1)",
            params![tenant.as_str(), plan_id, now],
        )?;
        tx.commit()?;

        debug!(%tenant, plan, "subscription started");
        Ok(())
    }

    /// End every active subscription of `tenant`.
    ///
    /// Returns the number of subscriptions ended.
    pub fn deactivate(&self, tenant: &TenantId) -> Result<usize, SqliteStoreError> {
        let conn = self.conn.lock();
        let ended = conn.execute(
            "UPDATE subscriptions SET is_active = 0, end_date = ?2
             WHERE tenant_id = ?1 AND is_active = 1",
            params![tenant.as_str(), Utc::now().timestamp_millis()],
        )?;
        Ok(ended)
    }

    /// Change a plan's quota. Takes effect on the next admission.
    pub fn set_plan_quota(&self, plan: &str, quota: u64) -> Result<(), SqliteStoreError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE subscription_plans SET monthly_quota = ?2 WHERE name = ?1",
            params![plan, to_sql_int(quota)],
        )?;
        if updated == 0 {
            return Err(SqliteStoreError::UnknownPlan(plan.to_string()));
        }
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> Result<T, SqliteStoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("sqlite task failed: {}", e)))?
        .map_err(StoreError::from)
    }
}

pub(crate) fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn decode_instant(tenant: &str, ms: i64) -> Result<DateTime<Utc>, SqliteStoreError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| SqliteStoreError::CorruptRow {
        tenant: tenant.to_string(),
        reason: format!("timestamp out of range: {}", ms),
    })
}

#[async_trait]
impl CounterStore for SqliteStore {
    async fn ensure_exists(&self, tenant: &TenantId, window_start: DateTime<Utc>) -> StoreResult<()> {
        let tenant = tenant.as_str().to_string();
        self.with_conn(move |conn| {
            let created = conn.execute(
                "INSERT INTO usage_records (tenant_id, period_start, request_count, last_updated)
                 VALUES (?1, ?2, 0, ?3)
                 ON CONFLICT (tenant_id, period_start) DO NOTHING",
                params![tenant, window_start.timestamp_millis(), Utc::now().timestamp_millis()],
            )?;
            if created > 0 {
                debug!(%tenant, %window_start, "created usage record");
            }
            Ok(())
        })
        .await
    }

    async fn conditional_increment(
        &self,
        tenant: &TenantId,
        window_start: DateTime<Utc>,
        limit: u64,
    ) -> StoreResult<IncrementOutcome> {
        let tenant = tenant.as_str().to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let period_start = window_start.timestamp_millis();

            let new_count: Option<i64> = tx
                .query_row(
                    "UPDATE usage_records
                     SET request_count = request_count + 1, last_updated = ?4
                     WHERE tenant_id = ?1 AND period_start = ?2 AND request_count < ?3
                     RETURNING request_count",
                    params![tenant, period_start, to_sql_int(limit), Utc::now().timestamp_millis()],
                    |row| row.get(0),
                )
                .optional()?;

            let outcome = match new_count {
                Some(count) => IncrementOutcome::Incremented(from_sql_int(count)),
                None => {
                    let exists: bool = tx.query_row(
                        "SELECT EXISTS (SELECT 1 FROM usage_records WHERE tenant_id = ?1 AND period_start = ?2)",
                        params![tenant, period_start],
                        |row| row.get(0),
                    )?;
                    if exists {
                        IncrementOutcome::Rejected
                    } else {
                        IncrementOutcome::Missing
                    }
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn fetch(&self, tenant: &TenantId, window_start: DateTime<Utc>) -> StoreResult<Option<UsageCounter>> {
        let tenant = tenant.clone();
        self.with_conn(move |conn| {
            let row: Option<(i64, i64)> = conn
                .query_row(
                    "SELECT request_count, last_updated FROM usage_records
                     WHERE tenant_id = ?1 AND period_start = ?2",
                    params![tenant.as_str(), window_start.timestamp_millis()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            row.map(|(count, updated)| {
                Ok::<_, SqliteStoreError>(UsageCounter {
                    last_updated: decode_instant(tenant.as_str(), updated)?,
                    tenant: tenant.clone(),
                    window_start,
                    count: from_sql_int(count),
                })
            })
            .transpose()
        })
        .await
    }

    async fn history(&self, tenant: &TenantId) -> StoreResult<Vec<UsageCounter>> {
        let tenant = tenant.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT period_start, request_count, last_updated FROM usage_records
                 WHERE tenant_id = ?1 ORDER BY period_start DESC",
            )?;
            let rows = stmt
                .query_map(params![tenant.as_str()], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(start, count, updated)| {
                    Ok::<_, SqliteStoreError>(UsageCounter {
                        tenant: tenant.clone(),
                        window_start: decode_instant(tenant.as_str(), start)?,
                        count: from_sql_int(count),
                        last_updated: decode_instant(tenant.as_str(), updated)?,
                    })
                })
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_missing_then_rejected_distinguished() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tenant = TenantId::from(1i64);

        let outcome = store.conditional_increment(&tenant, window(), 1).await.unwrap();
        assert_eq!(outcome, IncrementOutcome::Missing);

        store.ensure_exists(&tenant, window()).await.unwrap();
        assert_eq!(
            store.conditional_increment(&tenant, window(), 1).await.unwrap(),
            IncrementOutcome::Incremented(1)
        );
        assert_eq!(
            store.conditional_increment(&tenant, window(), 1).await.unwrap(),
            IncrementOutcome::Rejected
        );
    }

    #[tokio::test]
    async fn test_ensure_does_not_reset_count() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tenant = TenantId::from(1i64);

        store.ensure_exists(&tenant, window()).await.unwrap();
        store.conditional_increment(&tenant, window(), 10).await.unwrap();
        store.conditional_increment(&tenant, window(), 10).await.unwrap();
        store.ensure_exists(&tenant, window()).await.unwrap();

        let counter = store.fetch(&tenant, window()).await.unwrap().unwrap();
        assert_eq!(counter.count, 2);
        assert_eq!(store.history(&tenant).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_absent_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let counter = store.fetch(&TenantId::from(1i64), window()).await.unwrap();
        assert!(counter.is_none());
    }

    #[tokio::test]
    async fn test_history_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tenant = TenantId::new("acme").unwrap();
        let earlier = window() - chrono::TimeDelta::minutes(5);

        store.ensure_exists(&tenant, earlier).await.unwrap();
        store.ensure_exists(&tenant, window()).await.unwrap();

        let history = store.history(&tenant).await.unwrap();
        assert_eq!(history.iter().map(|c| c.window_start).collect::<Vec<_>>(), vec![window(), earlier]);
    }

    #[test]
    fn test_seed_plans_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.seed_plans(&Plan::default_catalog()).unwrap(), 3);
        assert_eq!(store.seed_plans(&Plan::default_catalog()).unwrap(), 0);

        let names: Vec<_> = store.plans().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Free", "Pro", "Enterprise"]);
    }

    fn active_plans(store: &SqliteStore, tenant: &str) -> Vec<String> {
        let conn = store.connection();
        let conn = conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT p.name FROM subscriptions s JOIN subscription_plans p ON p.id = s.plan_id
                 WHERE s.tenant_id = ?1 AND s.is_active = 1",
            )
            .unwrap();
        stmt.query_map(params![tenant], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_subscribe_replaces_active_plan() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.seed_plans(&Plan::default_catalog()).unwrap();
        let tenant = TenantId::from(5i64);

        store.subscribe(&tenant, "Free").unwrap();
        store.subscribe(&tenant, "Pro").unwrap();
        assert_eq!(active_plans(&store, "5"), vec!["Pro"]);

        assert_eq!(store.deactivate(&tenant).unwrap(), 1);
        assert!(active_plans(&store, "5").is_empty());
        assert_eq!(store.deactivate(&tenant).unwrap(), 0);
    }

    #[test]
    fn test_subscribe_unknown_plan() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.seed_plans(&Plan::default_catalog()).unwrap();
        let tenant = TenantId::from(5i64);
        store.subscribe(&tenant, "Free").unwrap();

        let err = store.subscribe(&tenant, "Platinum").unwrap_err();
        assert!(matches!(err, SqliteStoreError::UnknownPlan(ref name) if name == "Platinum"));
        // Failed switch keeps the existing subscription
        assert_eq!(active_plans(&store, "5"), vec!["Free"]);
    }

    #[test]
    fn test_set_plan_quota() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.seed_plans(&Plan::default_catalog()).unwrap();

        store.set_plan_quota("Free", 10).unwrap();
        let free = store.plans().unwrap().into_iter().find(|p| p.name == "Free").unwrap();
        assert_eq!(free.monthly_quota, 10);

        assert!(matches!(
            store.set_plan_quota("Platinum", 10),
            Err(SqliteStoreError::UnknownPlan(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_file_never_exceeds_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.db");
        // Two independent connections to one file, as two processes would have
        let stores = [SqliteStore::open(&path).unwrap(), SqliteStore::open(&path).unwrap()];
        let tenant = TenantId::from(9i64);
        let limit = 15;

        let mut handles = Vec::new();
        for i in 0..40 {
            let store = stores[i % 2].clone();
            let tenant = tenant.clone();
            handles.push(tokio::spawn(async move {
                store.ensure_exists(&tenant, window()).await.unwrap();
                store.conditional_increment(&tenant, window(), limit).await.unwrap()
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                IncrementOutcome::Incremented(n) => admitted.push(n),
                IncrementOutcome::Rejected => {}
                IncrementOutcome::Missing => panic!("row vanished"),
            }
        }
        admitted.sort_unstable();
        assert_eq!(admitted, (1..=limit).collect::<Vec<_>>());

        let counter = stores[0].fetch(&tenant, window()).await.unwrap().unwrap();
        assert_eq!(counter.count, limit);
    }
}
