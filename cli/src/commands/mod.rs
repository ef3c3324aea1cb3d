//! CLI Commands

pub mod admit;
pub mod init;
pub mod subscriptions;
pub mod usage;
pub mod window;

use crate::{Cli, Commands};
use anyhow::Context as _;
use quota_core::{telemetry, EnforcementEngine, MeteringConfig, TenantId};
use quota_sqlite::{SqlitePolicyResolver, SqliteStore};
use std::sync::Arc;

pub const EXIT_ALLOWED: i32 = 0;
pub const EXIT_FAULT: i32 = 1;
pub const EXIT_DENIED: i32 = 2;
pub const EXIT_NO_SUBSCRIPTION: i32 = 3;

/// Loaded config and opened database
pub struct Context {
    pub config: MeteringConfig,
    pub store: SqliteStore,
}

impl Context {
    pub fn open(config: MeteringConfig) -> anyhow::Result<Self> {
        let store = SqliteStore::open(&config.database_path)
            .with_context(|| format!("opening {}", config.database_path))?;
        Ok(Self { config, store })
    }

    pub fn engine(&self) -> EnforcementEngine {
        let resolver = SqlitePolicyResolver::new(&self.store, self.config.period_strategy());
        EnforcementEngine::new(Arc::new(resolver), Arc::new(self.store.clone()))
    }
}

pub fn parse_tenant(raw: &str) -> anyhow::Result<TenantId> {
    Ok(TenantId::new(raw)?)
}

pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = MeteringConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    config.validate()?;
    telemetry::init(&config.log)?;
    tracing::debug!(database = %config.database_path, period = %config.period_strategy(), "config loaded");

    match cli.command {
        Commands::Window => window::handle(&config, cli.format),
        command => {
            let ctx = Context::open(config)?;
            match command {
                Commands::Init => init::handle(&ctx, cli.format),
                Commands::Plans => init::list_plans(&ctx, cli.format),
                Commands::Admit { tenant } => admit::handle(&ctx, &tenant, cli.format).await,
                Commands::Usage { tenant, all } => usage::handle(&ctx, &tenant, all, cli.format).await,
                Commands::Subscribe { tenant, plan } => subscriptions::subscribe(&ctx, &tenant, &plan),
                Commands::Unsubscribe { tenant } => subscriptions::unsubscribe(&ctx, &tenant),
                Commands::SetQuota { plan, quota } => subscriptions::set_quota(&ctx, &plan, quota, cli.format),
                Commands::Window => window::handle(&ctx.config, cli.format),
            }
        }
    }
}
