//! QuotaGuard Metering Core
//!
//! Usage metering and quota enforcement per tenant and time window.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        QUOTA ENFORCEMENT ENGINE                         │
//! │                                                                         │
//! │   admit(tenant, now)                                                    │
//! │        │                                                                │
//! │  ┌─────▼────────┐   ┌──────────────┐   ┌───────────────────────────┐   │
//! │  │ Plan/Quota   │──►│   Window     │──►│   Atomic Counter Store    │   │
//! │  │  Resolver    │   │   Resolver   │   │ ensure ─► cond. increment │   │
//! │  └──────────────┘   └──────────────┘   └─────────────┬─────────────┘   │
//! │                                                      │                 │
//! │  ┌───────────────────────────────────────────────────▼─────────────┐   │
//! │  │   Allowed(used, limit) | Denied(retry-after) | NoSubscription   │   │
//! │  │                        | Inconsistent                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine holds no locks. The store's conditional increment is the only
//! synchronization point, so tenants and windows never wait on each other.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod plans;
pub mod store;
pub mod telemetry;
pub mod window;

pub use config::{LogConfig, LogFormat, MeteringConfig};
pub use engine::{Admission, AdmissionStatus, EnforcementEngine, Inconsistency, MAX_ADMIT_ATTEMPTS};
pub use error::{ConfigError, DomainError, MeteringError, StoreError, StoreResult};
pub use model::{Plan, PeriodStrategy, QuotaPolicy, Subscription, TenantId, UsageCounter, UsageWindow};
pub use plans::{InMemoryPolicyResolver, PolicyResolver, StaticPolicyResolver};
pub use store::{CounterStore, InMemoryCounterStore, IncrementOutcome};
pub use window::WindowResolver;
