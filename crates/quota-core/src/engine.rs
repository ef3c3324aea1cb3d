//! Enforcement Engine
//!
//! Runs the admission protocol for one unit of work:
//!
//! 1. resolve the tenant's policy (none → `NoSubscription`, no mutation)
//! 2. resolve the window containing `now`
//! 3. ensure the counter row exists
//! 4. conditionally increment it
//! 5. classify: incremented → `Allowed`; rejected → re-read and either
//!    `Denied` with a retry-after or `Inconsistent`
//!
//! If the row is missing at step 4 the create-then-increment pair is retried
//! at most [`MAX_ADMIT_ATTEMPTS`] times in total before giving up.

use crate::error::MeteringError;
use crate::model::{TenantId, UsageWindow};
use crate::plans::PolicyResolver;
use crate::store::{CounterStore, IncrementOutcome};
use crate::window::WindowResolver;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Create-then-increment attempts per admission (one retry)
pub const MAX_ADMIT_ATTEMPTS: u32 = 2;

/// Why the store contradicted the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inconsistency {
    /// Row absent right after it was ensured
    RowMissing,
    /// Increment was rejected yet the stored count is under the limit
    BelowLimit {
        /// Stored count after the rejection
        count: u64,
        /// Limit the increment was checked against
        limit: u64,
    },
}

/// Admission verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdmissionStatus {
    /// Unit of work may proceed; `used` is this caller's post-increment count
    Allowed {
        /// Count after this admission
        used: u64,
        /// Window limit
        limit: u64,
    },
    /// Quota exhausted for the current window
    Denied {
        /// Count already recorded in the window
        used: u64,
        /// Window limit
        limit: u64,
        /// Seconds until the window closes
        retry_after_secs: u64,
    },
    /// Tenant has no active quota policy
    NoSubscription,
    /// Store state violated the protocol's assumptions
    Inconsistent(Inconsistency),
}

impl AdmissionStatus {
    /// Metric/log label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Allowed { .. } => "allowed",
            Self::Denied { .. } => "denied",
            Self::NoSubscription => "no_subscription",
            Self::Inconsistent(_) => "inconsistent",
        }
    }
}

/// Result of [`EnforcementEngine::admit`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    /// Tenant the decision applies to
    pub tenant: TenantId,
    /// Window the attempt was counted against; absent without a policy
    pub window: Option<UsageWindow>,
    /// Verdict
    pub status: AdmissionStatus,
}

impl Admission {
    /// Whether the unit of work may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self.status, AdmissionStatus::Allowed { .. })
    }

    /// Client-facing status code
    pub fn status_code(&self) -> u16 {
        match self.status {
            AdmissionStatus::Allowed { .. } => 200,
            AdmissionStatus::Denied { .. } => 429,
            AdmissionStatus::NoSubscription => 403,
            AdmissionStatus::Inconsistent(_) => 500,
        }
    }

    /// Human-readable detail for non-admitted outcomes
    pub fn message(&self) -> Option<String> {
        match self.status {
            AdmissionStatus::Allowed { .. } => None,
            AdmissionStatus::Denied { retry_after_secs, .. } => Some(format!(
                "Rate limit exceeded. Try again in {} seconds.",
                retry_after_secs
            )),
            AdmissionStatus::NoSubscription => Some("No active subscription found.".into()),
            AdmissionStatus::Inconsistent(_) => Some("Metering error.".into()),
        }
    }

    /// Response metadata for the transport layer
    pub fn rate_limit_headers(&self) -> Vec<(&'static str, String)> {
        match self.status {
            AdmissionStatus::Allowed { used, limit } => vec![
                ("X-RateLimit-Limit", limit.to_string()),
                ("X-RateLimit-Used", used.to_string()),
                ("X-RateLimit-Remaining", limit.saturating_sub(used).to_string()),
            ],
            AdmissionStatus::Denied { used, limit, retry_after_secs } => vec![
                ("X-RateLimit-Limit", limit.to_string()),
                ("X-RateLimit-Used", used.to_string()),
                ("X-RateLimit-Remaining", limit.saturating_sub(used).to_string()),
                ("Retry-After", retry_after_secs.to_string()),
            ],
            AdmissionStatus::NoSubscription | AdmissionStatus::Inconsistent(_) => Vec::new(),
        }
    }
}

/// Quota enforcement engine
///
/// Holds no lock of its own; correctness rests on the store's conditional
/// increment being atomic per key.
#[derive(Clone)]
pub struct EnforcementEngine {
    policies: Arc<dyn PolicyResolver>,
    store: Arc<dyn CounterStore>,
}

impl EnforcementEngine {
    /// Engine over a policy source and a counter store
    pub fn new(policies: Arc<dyn PolicyResolver>, store: Arc<dyn CounterStore>) -> Self {
        Self { policies, store }
    }

    /// Counter store backing this engine
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Admit against the wall clock
    pub async fn admit_now(&self, tenant: &TenantId) -> Result<Admission, MeteringError> {
        self.admit(tenant, Utc::now()).await
    }

    /// Decide whether `tenant` may proceed at `now`
    ///
    /// Store errors propagate unmodified.
    #[instrument(skip(self, tenant), fields(tenant = %tenant))]
    pub async fn admit(&self, tenant: &TenantId, now: DateTime<Utc>) -> Result<Admission, MeteringError> {
        let Some(policy) = self.policies.resolve(tenant).await? else {
            debug!("no active subscription");
            return Ok(self.finish(tenant, None, AdmissionStatus::NoSubscription));
        };

        let window = WindowResolver::resolve(now, policy.period);
        debug!(limit = policy.limit, window_start = %window.start, "resolved policy");

        for attempt in 1..=MAX_ADMIT_ATTEMPTS {
            self.store.ensure_exists(tenant, window.start).await?;

            match self
                .store
                .conditional_increment(tenant, window.start, policy.limit)
                .await?
            {
                IncrementOutcome::Incremented(used) => {
                    let status = AdmissionStatus::Allowed { used, limit: policy.limit };
                    return Ok(self.finish(tenant, Some(window), status));
                }
                IncrementOutcome::Rejected => {
                    let status = self.classify_rejection(tenant, &window, policy.limit, now).await?;
                    return Ok(self.finish(tenant, Some(window), status));
                }
                IncrementOutcome::Missing => {
                    debug!(attempt, "counter row missing after ensure");
                    metrics::counter!("quota_admit_retries_total").increment(1);
                }
            }
        }

        let status = AdmissionStatus::Inconsistent(Inconsistency::RowMissing);
        Ok(self.finish(tenant, Some(window), status))
    }

    /// Re-read after a rejected increment to tell exhaustion from an anomaly
    async fn classify_rejection(
        &self,
        tenant: &TenantId,
        window: &UsageWindow,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<AdmissionStatus, MeteringError> {
        let status = match self.store.fetch(tenant, window.start).await? {
            Some(counter) if counter.count >= limit => AdmissionStatus::Denied {
                used: counter.count,
                limit,
                retry_after_secs: WindowResolver::retry_after_secs(window, now),
            },
            Some(counter) => AdmissionStatus::Inconsistent(Inconsistency::BelowLimit {
                count: counter.count,
                limit,
            }),
            None => AdmissionStatus::Inconsistent(Inconsistency::RowMissing),
        };
        Ok(status)
    }

    fn finish(&self, tenant: &TenantId, window: Option<UsageWindow>, status: AdmissionStatus) -> Admission {
        match status {
            AdmissionStatus::Denied { retry_after_secs, .. } => {
                warn!(retry_after_secs, "quota exceeded");
            }
            AdmissionStatus::Inconsistent(reason) => {
                error!(?reason, "counter store contradicted admission protocol");
            }
            _ => debug!(outcome = status.label(), "admission decided"),
        }
        metrics::counter!("quota_admissions_total", "outcome" => status.label()).increment(1);

        Admission {
            tenant: tenant.clone(),
            window,
            status,
        }
    }
}
