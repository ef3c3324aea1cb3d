//! Admit command

use super::{parse_tenant, Context, EXIT_ALLOWED, EXIT_DENIED, EXIT_FAULT, EXIT_NO_SUBSCRIPTION};
use crate::output::OutputFormat;
use colored::Colorize;
use quota_core::{Admission, AdmissionStatus};
use serde::Serialize;
use tabled::Tabled;

#[derive(Debug, Serialize, Tabled)]
pub struct AdmissionRow {
    #[tabled(rename = "Tenant")]
    pub tenant: String,
    #[tabled(rename = "Verdict")]
    pub verdict: String,
    #[tabled(rename = "Status")]
    pub status_code: u16,
    #[tabled(rename = "Headers")]
    pub headers: String,
    #[tabled(rename = "Detail")]
    pub message: String,
}

impl From<&Admission> for AdmissionRow {
    fn from(admission: &Admission) -> Self {
        let headers = admission
            .rate_limit_headers()
            .into_iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            tenant: admission.tenant.to_string(),
            verdict: admission.status.label().to_string(),
            status_code: admission.status_code(),
            headers,
            message: admission.message().unwrap_or_default(),
        }
    }
}

pub fn exit_code(status: &AdmissionStatus) -> i32 {
    match status {
        AdmissionStatus::Allowed { .. } => EXIT_ALLOWED,
        AdmissionStatus::Denied { .. } => EXIT_DENIED,
        AdmissionStatus::NoSubscription => EXIT_NO_SUBSCRIPTION,
        AdmissionStatus::Inconsistent(_) => EXIT_FAULT,
    }
}

pub async fn handle(ctx: &Context, tenant: &str, format: OutputFormat) -> anyhow::Result<i32> {
    let tenant = parse_tenant(tenant)?;
    let admission = ctx.engine().admit_now(&tenant).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&admission)?);
        }
        OutputFormat::Table => {
            let verdict = match admission.status {
                AdmissionStatus::Allowed { .. } => "ALLOWED".green().bold(),
                AdmissionStatus::Denied { .. } => "DENIED".yellow().bold(),
                AdmissionStatus::NoSubscription => "NO SUBSCRIPTION".red().bold(),
                AdmissionStatus::Inconsistent(_) => "INCONSISTENT".red().bold(),
            };
            println!("{}", verdict);
            format.print(&[AdmissionRow::from(&admission)]);
        }
    }

    Ok(exit_code(&admission.status))
}
