//! Job model and lifecycle state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Opaque unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Job lifecycle status
///
/// Transitions only move forward:
/// `pending -> running -> {completed | failed | cancelled}`, plus
/// `pending -> cancelled` for a job cancelled before it ever ran.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states end the job lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal forward transition
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Cancelled) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job (or schedule) asks to extract
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobRequest {
    pub providers: BTreeSet<String>,
    /// Empty means every registered service of each provider
    #[serde(default)]
    pub services: BTreeSet<String>,
    /// Empty means the extractor's default scope
    #[serde(default)]
    pub regions: BTreeSet<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    pub batch_size: usize,
}

impl JobRequest {
    pub fn new<I, S>(providers: I, batch_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            providers: providers.into_iter().map(Into::into).collect(),
            batch_size,
            ..Default::default()
        }
    }

    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    /// Checks that do not need the registry
    pub fn validate(&self) -> Result<(), crate::error::ValidationError> {
        if self.batch_size == 0 {
            return Err(crate::error::ValidationError::BatchSize);
        }
        if self.providers.is_empty() {
            return Err(crate::error::ValidationError::NoProviders);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCounts {
    /// Raw records pulled from extractors
    pub total: u64,
    /// Artifacts acknowledged by the transport
    pub successful: u64,
    /// Records dropped in transform plus artifacts in undelivered batches
    pub failed: u64,
}

/// Where in the pipeline an error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Resolve,
    Extract,
    Transform,
    Transport,
    Timeout,
}

/// Structured error attached to a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobErrorRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub stage: ErrorStage,
    pub message: String,
    /// True when the error aborted an extractor or the job
    pub fatal: bool,
    pub occurred_at: DateTime<Utc>,
}

impl JobErrorRecord {
    pub fn new(stage: ErrorStage, message: impl Into<String>) -> Self {
        Self {
            provider: None,
            service: None,
            stage,
            message: message.into(),
            fatal: false,
            occurred_at: Utc::now(),
        }
    }

    pub fn for_extractor(mut self, provider: &str, service: &str) -> Self {
        self.provider = Some(provider.to_string());
        self.service = Some(service.to_string());
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

/// A single extraction run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub request: JobRequest,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub counts: JobCounts,
    #[serde(default)]
    pub errors: Vec<JobErrorRecord>,
}

impl Job {
    pub fn new(request: JobRequest) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            request,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            counts: JobCounts::default(),
            errors: Vec::new(),
        }
    }

    /// Move the job forward, stamping `started_at` / `completed_at`.
    ///
    /// Returns the rejected `(from, to)` pair for backward or sideways moves.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), (JobStatus, JobStatus)> {
        if !self.status.can_transition_to(next) {
            return Err((self.status, next));
        }

        let now = Utc::now();
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    pub fn record_error(&mut self, error: JobErrorRecord) {
        self.errors.push(error);
    }

    pub fn fatal_errors(&self) -> impl Iterator<Item = &JobErrorRecord> {
        self.errors.iter().filter(|e| e.fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn test_forward_transitions() {
        let mut job = Job::new(JobRequest::new(["aws"], 10));
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());

        job.transition(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_none());

        job.transition(JobStatus::Completed).unwrap();
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_no_backward_transition() {
        let mut job = Job::new(JobRequest::new(["aws"], 10));
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Failed).unwrap();

        assert_eq!(
            job.transition(JobStatus::Running),
            Err((JobStatus::Failed, JobStatus::Running))
        );
        assert!(job.transition(JobStatus::Completed).is_err());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_pending_can_be_cancelled() {
        let mut job = Job::new(JobRequest::new(["aws"], 10));
        job.transition(JobStatus::Cancelled).unwrap();
        assert!(job.completed_at.is_some());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut job = Job::new(JobRequest::new(["aws"], 10));
        assert!(job.transition(JobStatus::Completed).is_err());
    }

    #[test]
    fn test_request_validation() {
        assert_eq!(
            JobRequest::new(["aws"], 0).validate(),
            Err(ValidationError::BatchSize)
        );
        assert_eq!(
            JobRequest::new(Vec::<String>::new(), 5).validate(),
            Err(ValidationError::NoProviders)
        );
        assert!(JobRequest::new(["aws"], 5).validate().is_ok());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
