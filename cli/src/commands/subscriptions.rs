//! Subscription and quota commands

use super::{parse_tenant, Context, EXIT_ALLOWED};
use crate::commands::init::PlanRow;
use crate::output::OutputFormat;
use anyhow::Context as _;

pub fn subscribe(ctx: &Context, tenant: &str, plan: &str) -> anyhow::Result<i32> {
    let tenant = parse_tenant(tenant)?;
    ctx.store
        .subscribe(&tenant, plan)
        .with_context(|| format!("subscribing tenant {} to {}", tenant, plan))?;
    println!("Subscribed tenant {} to {}", tenant, plan);
    Ok(EXIT_ALLOWED)
}

pub fn unsubscribe(ctx: &Context, tenant: &str) -> anyhow::Result<i32> {
    let tenant = parse_tenant(tenant)?;
    let ended = ctx.store.deactivate(&tenant)?;
    if ended == 0 {
        println!("Tenant {} has no active subscription", tenant);
    } else {
        println!("Ended subscription for tenant {}", tenant);
    }
    Ok(EXIT_ALLOWED)
}

pub fn set_quota(ctx: &Context, plan: &str, quota: u64, format: OutputFormat) -> anyhow::Result<i32> {
    ctx.store.set_plan_quota(plan, quota)?;
    tracing::info!(plan, quota, "plan quota updated");

    let rows: Vec<PlanRow> = ctx
        .store
        .plans()?
        .into_iter()
        .filter(|p| p.name == plan)
        .map(PlanRow::from)
        .collect();
    format.print(&rows);
    Ok(EXIT_ALLOWED)
}
