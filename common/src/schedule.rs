// Schedule parsing and next fire time calculation
//
// Scheduled runs are described by a crontab expression evaluated in a
// configured timezone. The `cron` crate wants a leading seconds field, so
// classic five-field expressions get `0` seconds prepended.

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

/// ScheduleTrigger defines the interface for calculating the next fire time
pub trait ScheduleTrigger: Send + Sync {
    /// Next fire time strictly after `reference`
    fn next_execution_time(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError>;
}

/// A cron expression bound to a timezone
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
    timezone: Tz,
}

impl CronSchedule {
    pub fn new(expression: &str, timezone: &str) -> Result<Self, ScheduleError> {
        let schedule = parse_cron_expression(expression)?;
        let timezone = parse_timezone(timezone)?;
        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
            timezone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// The next `count` fire times after `reference`
    pub fn upcoming(&self, reference: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&reference.with_timezone(&self.timezone))
            .take(count)
            .map(|t| t.with_timezone(&Utc))
            .collect()
    }
}

impl ScheduleTrigger for CronSchedule {
    fn next_execution_time(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let reference_in_tz = reference.with_timezone(&self.timezone);
        self.schedule
            .after(&reference_in_tz)
            .next()
            .map(|next| next.with_timezone(&Utc))
            .ok_or_else(|| ScheduleError::NoNextExecution(self.expression.clone()))
    }
}

/// Bring a crontab expression into the seconds-first form the parser expects
pub fn normalize_cron_expression(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

/// Parse and validate a cron expression
pub fn parse_cron_expression(expression: &str) -> Result<Schedule, ScheduleError> {
    let normalized = normalize_cron_expression(expression);
    Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

pub fn parse_timezone(timezone: &str) -> Result<Tz, ScheduleError> {
    Tz::from_str(timezone).map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))
}
