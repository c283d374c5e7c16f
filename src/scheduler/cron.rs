use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

/// The recurring fleet-pass schedule, parsed from a six-field cron expression
/// (seconds first).
#[derive(Debug, Clone)]
pub struct FleetSchedule {
    expr: String,
    schedule: CronSchedule,
}

impl FleetSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let schedule = CronSchedule::from_str(expr)
            .with_context(|| format!("invalid cron expression '{expr}'"))?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// The first fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }

    /// Fire times in `(now, now + hours]`. This is a dry-run preview only.
    pub fn preview(&self, now: DateTime<Utc>, hours: u64) -> Vec<DateTime<Utc>> {
        let end = now + chrono::Duration::hours(hours as i64);
        self.schedule
            .after(&now)
            .take_while(|t| *t <= end)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_expression_is_hourly_at_quarter_past() {
        let s = FleetSchedule::parse("0 15 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 20, 0).unwrap();
        assert_eq!(
            s.next_after(now),
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 11, 15, 0).unwrap())
        );
    }

    #[test]
    fn test_preview_covers_window() {
        let s = FleetSchedule::parse("0 15 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 20, 0).unwrap();
        let runs = s.preview(now, 24);
        assert_eq!(runs.len(), 24);
        assert!(runs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_invalid_expression_rejected() {
        let err = FleetSchedule::parse("every hour").unwrap_err();
        assert!(err.to_string().contains("every hour"));
    }
}
