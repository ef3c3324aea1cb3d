//! Metering Data Model

use crate::error::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;

/// Default rolling period (5 minutes)
pub const DEFAULT_ROLLING_PERIOD_SECS: u64 = 300;

const FIVE_MINUTES: NonZeroU64 = match NonZeroU64::new(DEFAULT_ROLLING_PERIOD_SECS) {
    Some(secs) => secs,
    None => panic!("rolling period must be non-zero"),
};

/// Tenant identifier (Value Object)
///
/// # Invariants
/// - Must be non-empty
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    /// Create new tenant ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::InvalidTenantId("cannot be empty".into()));
        }
        Ok(Self(id))
    }

    /// Get inner value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for TenantId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for TenantId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How quota windows are cut out of the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeriodStrategy {
    /// Fixed-length windows aligned to multiples of the period since the Unix epoch
    Rolling {
        /// Window length in seconds
        period_secs: NonZeroU64,
    },
    /// Calendar months starting at 00:00 UTC on the 1st
    CalendarMonth,
}

impl PeriodStrategy {
    /// Rolling strategy, `None` when `secs` is zero
    pub fn rolling_secs(secs: u64) -> Option<Self> {
        NonZeroU64::new(secs).map(|period_secs| Self::Rolling { period_secs })
    }

    /// Five-minute rolling windows
    pub fn five_minutes() -> Self {
        Self::Rolling { period_secs: FIVE_MINUTES }
    }
}

impl Default for PeriodStrategy {
    fn default() -> Self {
        Self::CalendarMonth
    }
}

impl fmt::Display for PeriodStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rolling { period_secs } => write!(f, "rolling({}s)", period_secs),
            Self::CalendarMonth => write!(f, "calendar_month"),
        }
    }
}

/// Admission limit and period for one tenant
///
/// `limit == 0` never admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    /// Admissions allowed per window
    pub limit: u64,
    /// How windows are cut
    pub period: PeriodStrategy,
}

impl QuotaPolicy {
    /// Policy with `limit` admissions per `period` window
    pub fn new(limit: u64, period: PeriodStrategy) -> Self {
        Self { limit, period }
    }
}

/// One concrete instance of a quota period: `start <= t < end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageWindow {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl UsageWindow {
    /// Whether `t` falls inside this window
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

/// Persisted per-(tenant, window) counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    /// Owning tenant
    pub tenant: TenantId,
    /// Start of the window this row counts
    pub window_start: DateTime<Utc>,
    /// Admissions recorded so far
    pub count: u64,
    /// Time of the last write
    pub last_updated: DateTime<Utc>,
}

/// Subscription plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan name
    pub name: String,
    /// Free-form description
    pub description: Option<String>,
    /// Requests allowed per window
    pub monthly_quota: u64,
}

impl Plan {
    /// Plan without a description
    pub fn new(name: &str, monthly_quota: u64) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            monthly_quota,
        }
    }

    /// Catalog seeded into a fresh deployment
    pub fn default_catalog() -> Vec<Plan> {
        vec![
            Plan::new("Free", 1_000),
            Plan::new("Pro", 100_000),
            Plan::new("Enterprise", 1_000_000),
        ]
    }
}

/// Tenant subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscribed tenant
    pub tenant: TenantId,
    /// Plan name
    pub plan: String,
    /// Only active subscriptions grant a quota
    pub is_active: bool,
}
