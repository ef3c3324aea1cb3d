//! Plan/Quota Resolver

use crate::error::StoreResult;
use crate::model::{Plan, PeriodStrategy, QuotaPolicy, Subscription, TenantId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Source of a tenant's active quota policy
///
/// `Ok(None)` means the tenant has no active subscription.
#[async_trait]
pub trait PolicyResolver: Send + Sync {
    /// Active policy for `tenant`, if any
    async fn resolve(&self, tenant: &TenantId) -> StoreResult<Option<QuotaPolicy>>;
}

/// In-memory subscription book
///
/// Holds a plan catalog and tenant subscriptions. The period strategy is
/// injected so every resolved policy shares the deployment's window shape.
pub struct InMemoryPolicyResolver {
    period: PeriodStrategy,
    plans: RwLock<HashMap<String, Plan>>,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl InMemoryPolicyResolver {
    /// Create with the default plan catalog
    pub fn new(period: PeriodStrategy) -> Self {
        Self::with_plans(period, Plan::default_catalog())
    }

    /// Create with a custom plan catalog
    pub fn with_plans(period: PeriodStrategy, plans: Vec<Plan>) -> Self {
        Self {
            period,
            plans: RwLock::new(plans.into_iter().map(|p| (p.name.clone(), p)).collect()),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Add or replace a plan
    pub fn upsert_plan(&self, plan: Plan) {
        self.plans.write().insert(plan.name.clone(), plan);
    }

    /// Record a subscription
    pub fn subscribe(&self, tenant: TenantId, plan: &str) {
        self.subscriptions.write().push(Subscription {
            tenant,
            plan: plan.to_string(),
            is_active: true,
        });
    }

    /// Mark every subscription of a tenant inactive
    pub fn deactivate(&self, tenant: &TenantId) {
        for sub in self.subscriptions.write().iter_mut().filter(|s| &s.tenant == tenant) {
            sub.is_active = false;
        }
    }
}

#[async_trait]
impl PolicyResolver for InMemoryPolicyResolver {
    async fn resolve(&self, tenant: &TenantId) -> StoreResult<Option<QuotaPolicy>> {
        let plan_name = self
            .subscriptions
            .read()
            .iter()
            .find(|s| &s.tenant == tenant && s.is_active)
            .map(|s| s.plan.clone());

        let Some(plan_name) = plan_name else {
            return Ok(None);
        };

        Ok(self
            .plans
            .read()
            .get(&plan_name)
            .map(|plan| QuotaPolicy::new(plan.monthly_quota, self.period)))
    }
}

/// Fixed policy for every tenant
#[derive(Debug, Clone, Copy)]
pub struct StaticPolicyResolver(pub QuotaPolicy);

#[async_trait]
impl PolicyResolver for StaticPolicyResolver {
    async fn resolve(&self, _tenant: &TenantId) -> StoreResult<Option<QuotaPolicy>> {
        Ok(Some(self.0))
    }
}
