//! Window command

use super::EXIT_ALLOWED;
use crate::output::OutputFormat;
use chrono::{DateTime, Utc};
use quota_core::{MeteringConfig, PeriodStrategy, WindowResolver};
use serde::Serialize;
use tabled::Tabled;

#[derive(Debug, Serialize, Tabled)]
pub struct WindowRow {
    #[tabled(rename = "Strategy")]
    pub strategy: String,
    #[tabled(rename = "Start")]
    pub start: String,
    #[tabled(rename = "End")]
    pub end: String,
    #[tabled(rename = "Resets In (s)")]
    pub resets_in_secs: u64,
}

pub fn window_row(period: PeriodStrategy, now: DateTime<Utc>) -> WindowRow {
    let window = WindowResolver::resolve(now, period);
    WindowRow {
        strategy: period.to_string(),
        start: window.start.to_rfc3339(),
        end: window.end.to_rfc3339(),
        resets_in_secs: WindowResolver::retry_after_secs(&window, now),
    }
}

pub fn handle(config: &MeteringConfig, format: OutputFormat) -> anyhow::Result<i32> {
    let row = window_row(config.period_strategy(), Utc::now());
    format.print(&[row]);
    Ok(EXIT_ALLOWED)
}
