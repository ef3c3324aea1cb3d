//! QuotaGuard Configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then `QUOTA_*`
//! environment variables (`QUOTA_LOG__LEVEL=debug` sets `log.level`).

use crate::error::ConfigError;
use crate::model::{PeriodStrategy, DEFAULT_ROLLING_PERIOD_SECS};
use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "quotaguard.toml";

/// Metering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    /// Short rolling windows instead of calendar months
    pub demo_mode: bool,
    /// Rolling window length when `demo_mode` is on
    pub rolling_period_secs: u64,
    /// SQLite database file
    pub database_path: String,
    /// Logging settings
    pub log: LogConfig,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            demo_mode: false,
            rolling_period_secs: DEFAULT_ROLLING_PERIOD_SECS,
            database_path: "quotaguard.db".into(),
            log: LogConfig::default(),
        }
    }
}

impl MeteringConfig {
    /// Load from `path` (or [`DEFAULT_CONFIG_FILE`] if absent) plus environment
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = path.unwrap_or(DEFAULT_CONFIG_FILE);
        let settings = config::Config::builder()
            .add_source(config::File::with_name(file).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix("QUOTA")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.demo_mode && self.rolling_period_secs == 0 {
            return Err(ConfigError::Invalid("rolling_period_secs must be > 0".into()));
        }
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::Invalid("database_path cannot be empty".into()));
        }
        Ok(())
    }

    /// Period strategy selected by the demo toggle
    pub fn period_strategy(&self) -> PeriodStrategy {
        if self.demo_mode {
            PeriodStrategy::rolling_secs(self.rolling_period_secs)
                .unwrap_or_else(PeriodStrategy::five_minutes)
        } else {
            PeriodStrategy::CalendarMonth
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty on a terminal, JSON otherwise
    #[default]
    Auto,
    /// Human-readable lines
    Pretty,
    /// One JSON object per event
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive; `RUST_LOG` wins when set
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_use_calendar_month() {
        let cfg = MeteringConfig::default();
        assert_eq!(cfg.period_strategy(), PeriodStrategy::CalendarMonth);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_demo_mode_uses_rolling() {
        let cfg = MeteringConfig {
            demo_mode: true,
            ..Default::default()
        };
        assert_eq!(cfg.period_strategy(), PeriodStrategy::five_minutes());
    }

    #[test]
    fn test_zero_rolling_period_rejected() {
        let cfg = MeteringConfig {
            demo_mode: true,
            rolling_period_secs: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "demo_mode = true\nrolling_period_secs = 60\ndatabase_path = \"/tmp/q.db\"\n\n[log]\nformat = \"json\""
        )
        .unwrap();

        let cfg = MeteringConfig::load(file.path().to_str()).unwrap();
        assert_eq!(cfg.period_strategy(), PeriodStrategy::rolling_secs(60).unwrap());
        assert_eq!(cfg.database_path, "/tmp/q.db");
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn test_missing_explicit_file_errors() {
        assert!(MeteringConfig::load(Some("/nonexistent/quotaguard.toml")).is_err());
    }
}
