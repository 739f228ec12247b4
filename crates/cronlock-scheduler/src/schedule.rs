//! Cron expression parsing and next-trigger computation.
//!
//! Expressions are parsed with the same `croner` settings tokio-cron-scheduler
//! uses for its ticks: `sec min hour day-of-month month day-of-week [year]`,
//! seconds required, day-of-week numbered from Sunday = 0, and day-of-month
//! and day-of-week both required to match when both are restricted.

use std::fmt;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use croner::parser::{CronParser, Seconds};
use croner::Cron;
use thiserror::Error;

/// A cron expression that failed to parse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct CronError(pub String);

/// The parser configuration the engine ticks with.
pub(crate) fn engine_parser() -> CronParser {
    CronParser::builder()
        .seconds(Seconds::Required)
        .dom_and_dow(true)
        .build()
}

/// A parsed cron schedule evaluated in a fixed timezone.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    cron: Cron,
    timezone: Tz,
}

impl CronSchedule {
    /// Parse an expression, evaluating trigger times in UTC.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        Self::parse_in(expression, Tz::UTC)
    }

    /// Parse an expression, evaluating trigger times in `timezone`.
    pub fn parse_in(expression: &str, timezone: Tz) -> Result<Self, CronError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(CronError("expression is empty".to_string()));
        }
        let cron = engine_parser()
            .parse(trimmed)
            .map_err(|e| CronError(e.to_string()))?;
        Ok(Self {
            expression: trimmed.to_string(),
            cron,
            timezone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First trigger strictly after `from`, or `None` if the schedule is exhausted.
    ///
    /// Trigger times have whole-second resolution.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from = from.with_nanosecond(0).unwrap_or(from);
        self.cron
            .find_next_occurrence(&from.with_timezone(&self.timezone), false)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Next trigger after the current instant.
    pub fn next_trigger(&self) -> Option<DateTime<Utc>> {
        self.next_after(Utc::now())
    }

    /// The next `count` triggers after `from`.
    pub fn upcoming_after(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut upcoming = Vec::with_capacity(count);
        let mut cursor = from;
        while upcoming.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    upcoming.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        upcoming
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.expression, self.timezone.name())
    }
}
