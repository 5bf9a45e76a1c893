//! Recurring job templates

use super::{JobId, JobRequest};
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use croner::Cron;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(Uuid);

impl ScheduleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ScheduleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Normalise a cron expression to the seconds-first form.
///
/// Classic 5-field expressions (`*/15 * * * *`) get a leading `0` seconds
/// field; 6-field expressions are passed through.
pub fn normalize_cron(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

/// Parse a cron expression (5 or 6 fields).
///
/// Parsed with the same engine as the cron driver, so day-of-week follows
/// the usual convention (`0`/`7` Sunday, `1` Monday).
pub fn parse_cron(expression: &str) -> Result<Cron, ValidationError> {
    let normalized = normalize_cron(expression);
    Cron::new(&normalized)
        .with_seconds_optional()
        .parse()
        .map_err(|e| ValidationError::CronExpression {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
}

/// Next fire time strictly after `after`, `None` if the expression never fires again
pub fn next_fire_time(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    Ok(parse_cron(expression)?.find_next_occurrence(&after, false).ok())
}

/// A cron-triggered job template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub id: ScheduleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub cron_expression: String,
    pub is_active: bool,
    #[serde(default)]
    pub paused: bool,
    pub request: JobRequest,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    /// Job started by the most recent tick
    #[serde(default)]
    pub last_job_id: Option<JobId>,
}

impl Schedule {
    /// Build a validated, active schedule
    pub fn new(cron_expression: impl Into<String>, request: JobRequest) -> Result<Self, ValidationError> {
        let cron_expression = cron_expression.into();
        request.validate()?;
        let now = Utc::now();
        let next_run_at = next_fire_time(&cron_expression, now)?;

        Ok(Self {
            id: ScheduleId::new(),
            name: None,
            cron_expression,
            is_active: true,
            paused: false,
            request,
            created_at: now,
            last_run_at: None,
            next_run_at,
            last_job_id: None,
        })
    }

    /// Active and not paused
    pub fn is_runnable(&self) -> bool {
        self.is_active && !self.paused
    }

    /// Cron expression in the seconds-first form used by the drivers
    pub fn normalized_cron(&self) -> String {
        normalize_cron(&self.cron_expression)
    }

    /// Recompute `next_run_at` from `after`
    pub fn refresh_next_run(&mut self, after: DateTime<Utc>) -> Result<(), ValidationError> {
        self.next_run_at = if self.is_runnable() {
            next_fire_time(&self.cron_expression, after)?
        } else {
            None
        };
        Ok(())
    }
}
