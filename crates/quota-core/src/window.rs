//! Window Resolver
//!
//! Maps an instant and a [`PeriodStrategy`] to the single window containing it.
//! Rolling windows are aligned to multiples of their length since the Unix epoch,
//! so a 5-minute window always starts on :00, :05, :10, ... of the hour.
//! Calendar windows start at 00:00 UTC on the 1st of the month.

use crate::model::{PeriodStrategy, UsageWindow};
use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};

/// Stateless window resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowResolver;

impl WindowResolver {
    /// Resolve the window containing `now`
    pub fn resolve(now: DateTime<Utc>, period: PeriodStrategy) -> UsageWindow {
        match period {
            PeriodStrategy::Rolling { period_secs } => {
                let period_ms = i64::try_from(period_secs.get().saturating_mul(1000))
                    .unwrap_or(i64::MAX);
                let now_ms = now.timestamp_millis();
                let start_ms = now_ms - now_ms.rem_euclid(period_ms);

                let start = DateTime::from_timestamp_millis(start_ms)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                let end = start
                    .checked_add_signed(TimeDelta::milliseconds(period_ms))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                UsageWindow { start, end }
            }
            PeriodStrategy::CalendarMonth => {
                let (year, month) = (now.year(), now.month());
                let (next_year, next_month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };
                UsageWindow {
                    start: month_start(year, month).unwrap_or(DateTime::<Utc>::MIN_UTC),
                    end: month_start(next_year, next_month).unwrap_or(DateTime::<Utc>::MAX_UTC),
                }
            }
        }
    }

    /// Whole seconds from `now` until the window closes, rounded up.
    ///
    /// Zero once `now` is at or past the end.
    pub fn retry_after_secs(window: &UsageWindow, now: DateTime<Utc>) -> u64 {
        let remaining = window.end - now;
        if remaining <= TimeDelta::zero() {
            return 0;
        }
        let whole = remaining.num_seconds();
        let secs = if remaining > TimeDelta::seconds(whole) { whole + 1 } else { whole };
        secs.max(0) as u64
    }
}

fn month_start(year: i32, month: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
