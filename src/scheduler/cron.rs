// src/scheduler/cron.rs

//! Cron parsing and minute-boundary arithmetic for the poller.

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, DurationRound, Utc};
use ::cron::Schedule;

use crate::errors::{JobtreeError, Result};

/// A parsed cron expression.
///
/// Classic five-field expressions (minute precision) are accepted alongside
/// the six/seven-field form with a leading seconds field.
#[derive(Debug, Clone)]
pub struct CronExpr {
    expr: String,
    schedule: Schedule,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| JobtreeError::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// Whether the expression fires at any point within the minute that
    /// contains `at`.
    pub fn is_due(&self, at: DateTime<Utc>) -> bool {
        let minute = truncate_to_minute(at);
        let from = minute - Duration::seconds(1);
        self.schedule
            .after(&from)
            .next()
            .is_some_and(|next| next < minute + Duration::minutes(1))
    }

    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }
}

pub fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::minutes(1)).unwrap_or(at)
}

/// The first whole minute strictly after `now`.
pub fn next_minute_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_minute(now) + Duration::minutes(1)
}

/// Time left until [`next_minute_boundary`]. Recomputed on every tick so
/// drift does not accumulate.
pub fn delay_until_next_minute(now: DateTime<Utc>) -> StdDuration {
    (next_minute_boundary(now) - now)
        .to_std()
        .unwrap_or(StdDuration::ZERO)
}
