//! Schema and plan catalog commands

use super::{Context, EXIT_ALLOWED};
use crate::output::OutputFormat;
use quota_core::Plan;
use serde::Serialize;
use tabled::Tabled;

#[derive(Debug, Serialize, Tabled)]
pub struct PlanRow {
    #[tabled(rename = "Plan")]
    pub name: String,
    #[tabled(rename = "Quota")]
    pub monthly_quota: u64,
    #[tabled(rename = "Description")]
    pub description: String,
}

impl From<Plan> for PlanRow {
    fn from(plan: Plan) -> Self {
        Self {
            name: plan.name,
            monthly_quota: plan.monthly_quota,
            description: plan.description.unwrap_or_default(),
        }
    }
}

pub fn handle(ctx: &Context, format: OutputFormat) -> anyhow::Result<i32> {
    let inserted = ctx.store.seed_plans(&Plan::default_catalog())?;
    tracing::info!(inserted, database = %ctx.config.database_path, "database initialized");
    eprintln!("Database initialized ({} new plans).", inserted);
    list_plans(ctx, format)
}

pub fn list_plans(ctx: &Context, format: OutputFormat) -> anyhow::Result<i32> {
    let rows: Vec<PlanRow> = ctx.store.plans()?.into_iter().map(PlanRow::from).collect();
    format.print(&rows);
    Ok(EXIT_ALLOWED)
}
