//! Usage command

use super::{parse_tenant, Context, EXIT_ALLOWED, EXIT_NO_SUBSCRIPTION};
use crate::output::OutputFormat;
use chrono::Utc;
use quota_core::{CounterStore, PolicyResolver, UsageCounter, WindowResolver};
use quota_sqlite::SqlitePolicyResolver;
use serde::Serialize;
use tabled::Tabled;

#[derive(Debug, Serialize, Tabled)]
pub struct UsageRow {
    #[tabled(rename = "Tenant")]
    pub tenant: String,
    #[tabled(rename = "Window Start")]
    pub window_start: String,
    #[tabled(rename = "Count")]
    pub count: u64,
    #[tabled(rename = "Last Updated")]
    pub last_updated: String,
}

impl From<UsageCounter> for UsageRow {
    fn from(counter: UsageCounter) -> Self {
        Self {
            tenant: counter.tenant.to_string(),
            window_start: counter.window_start.to_rfc3339(),
            count: counter.count,
            last_updated: counter.last_updated.to_rfc3339(),
        }
    }
}

pub async fn handle(ctx: &Context, tenant: &str, all: bool, format: OutputFormat) -> anyhow::Result<i32> {
    let tenant = parse_tenant(tenant)?;

    let counters = if all {
        ctx.store.history(&tenant).await?
    } else {
        // The current window depends on the tenant's policy period
        let resolver = SqlitePolicyResolver::new(&ctx.store, ctx.config.period_strategy());
        let Some(policy) = resolver.resolve(&tenant).await? else {
            eprintln!("No active subscription found.");
            return Ok(EXIT_NO_SUBSCRIPTION);
        };
        let window = WindowResolver::resolve(Utc::now(), policy.period);
        ctx.store
            .fetch(&tenant, window.start)
            .await?
            .into_iter()
            .collect()
    };

    let rows: Vec<UsageRow> = counters.into_iter().map(UsageRow::from).collect();
    format.print(&rows);
    Ok(EXIT_ALLOWED)
}
