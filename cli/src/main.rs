//! QuotaGuard CLI
//!
//! Operator interface for the metering database.
//!
//! # Usage
//!
//! ```bash
//! quotactl init
//! quotactl subscribe --tenant 5 --plan Free
//! quotactl admit --tenant 5
//! quotactl usage --tenant 5 --all --format json
//! quotactl window
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "quotactl")]
#[command(author = "QuotaGuard")]
#[command(version)]
#[command(about = "QuotaGuard metering command line", long_about = None)]
pub struct Cli {
    /// Config file (TOML)
    #[arg(long, short, env = "QUOTA_CONFIG")]
    pub config: Option<String>,

    /// Database file, overrides config
    #[arg(long)]
    pub database: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the schema and seed the default plans
    Init,
    /// Run one admission for a tenant
    Admit {
        #[arg(long)]
        tenant: String,
    },
    /// Show a tenant's usage counters
    Usage {
        #[arg(long)]
        tenant: String,
        /// Include past windows
        #[arg(long)]
        all: bool,
    },
    /// Show the current window for the configured strategy
    Window,
    /// List plans in the catalog
    Plans,
    /// Put a tenant on a plan, replacing its current subscription
    Subscribe {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        plan: String,
    },
    /// End a tenant's active subscription
    Unsubscribe {
        #[arg(long)]
        tenant: String,
    },
    /// Change a plan's quota
    SetQuota {
        #[arg(long)]
        plan: String,
        #[arg(long)]
        quota: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match commands::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            commands::EXIT_FAULT
        }
    };
    std::process::exit(code);
}
