//! Subscription-backed quota resolver

use crate::error::SqliteStoreError;
use crate::store::{from_sql_int, SqliteStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use quota_core::{PeriodStrategy, PolicyResolver, QuotaPolicy, StoreError, StoreResult, TenantId};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

/// Resolves a tenant's quota from its active subscription's plan.
///
/// Subscriptions are owned by billing; this only reads them. If more than one
/// row is active the oldest wins.
pub struct SqlitePolicyResolver {
    conn: Arc<Mutex<Connection>>,
    period: PeriodStrategy,
}

impl SqlitePolicyResolver {
    pub fn new(store: &SqliteStore, period: PeriodStrategy) -> Self {
        Self {
            conn: store.connection(),
            period,
        }
    }
}

#[async_trait]
impl PolicyResolver for SqlitePolicyResolver {
    async fn resolve(&self, tenant: &TenantId) -> StoreResult<Option<QuotaPolicy>> {
        let conn = self.conn.clone();
        let tenant = tenant.as_str().to_string();
        let period = self.period;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.query_row(
                "SELECT p.monthly_quota
                 FROM subscriptions s
                 JOIN subscription_plans p ON p.id = s.plan_id
                 WHERE s.tenant_id = ?1 AND s.is_active = 1
                 ORDER BY s.id
                 LIMIT 1",
                params![tenant],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|quota| quota.map(|q| QuotaPolicy::new(from_sql_int(q), period)))
            .map_err(|e| StoreError::from(SqliteStoreError::from(e)))
        })
        .await
        .map_err(|e| StoreError::Backend(format!("sqlite task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quota_core::{AdmissionStatus, EnforcementEngine, Plan};

    fn subscribe(store: &SqliteStore, tenant: &str, plan: &str, active: bool) {
        let tenant = TenantId::new(tenant).unwrap();
        store.subscribe(&tenant, plan).unwrap();
        if !active {
            store.deactivate(&tenant).unwrap();
        }
    }

    fn store_with_plans() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .seed_plans(&[Plan::new("Tiny", 2), Plan::new("Free", 1_000)])
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_resolves_active_plan() {
        let store = store_with_plans();
        subscribe(&store, "5", "Free", true);

        let resolver = SqlitePolicyResolver::new(&store, PeriodStrategy::CalendarMonth);
        let policy = resolver.resolve(&TenantId::from(5i64)).await.unwrap().unwrap();
        assert_eq!(policy, QuotaPolicy::new(1_000, PeriodStrategy::CalendarMonth));
    }

    #[tokio::test]
    async fn test_inactive_subscription_is_none() {
        let store = store_with_plans();
        subscribe(&store, "5", "Free", false);

        let resolver = SqlitePolicyResolver::new(&store, PeriodStrategy::CalendarMonth);
        assert!(resolver.resolve(&TenantId::from(5i64)).await.unwrap().is_none());
        assert!(resolver.resolve(&TenantId::from(6i64)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_quota_change_applies_immediately() {
        let store = store_with_plans();
        subscribe(&store, "5", "Free", true);
        let resolver = SqlitePolicyResolver::new(&store, PeriodStrategy::CalendarMonth);

        store.set_plan_quota("Free", 3).unwrap();
        let policy = resolver.resolve(&TenantId::from(5i64)).await.unwrap().unwrap();
        assert_eq!(policy.limit, 3);
    }

    #[tokio::test]
    async fn test_engine_over_sqlite() {
        let store = store_with_plans();
        subscribe(&store, "acme", "Tiny", true);

        let period = PeriodStrategy::five_minutes();
        let engine = EnforcementEngine::new(
            Arc::new(SqlitePolicyResolver::new(&store, period)),
            Arc::new(store.clone()),
        );
        let tenant = TenantId::new("acme").unwrap();
        let now = Utc::now();

        assert!(engine.admit(&tenant, now).await.unwrap().is_allowed());
        assert!(engine.admit(&tenant, now).await.unwrap().is_allowed());
        let denied = engine.admit(&tenant, now).await.unwrap();
        assert!(matches!(denied.status, AdmissionStatus::Denied { used: 2, limit: 2, .. }));

        let nobody = engine.admit(&TenantId::new("initech").unwrap(), now).await.unwrap();
        assert_eq!(nobody.status, AdmissionStatus::NoSubscription);
    }
}
