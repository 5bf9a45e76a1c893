//! Error taxonomy for the inventory core
//!
//! Each concern gets its own error enum so callers can match on the
//! failure class: authentication failures disable a provider, extraction
//! failures abort a single extractor, transport failures abort a single
//! batch and validation failures reject a request before anything is
//! created.

use crate::model::{JobId, JobStatus, ScheduleId};

/// Credentials for a provider were rejected or could not be used.
///
/// The registry treats this as "provider unavailable": the provider is not
/// registered and jobs proceed without its services.
#[derive(Debug, Clone, thiserror::Error)]
#[error("authentication failed for provider '{provider}': {reason}")]
pub struct AuthenticationError {
    pub provider: String,
    pub reason: String,
}

impl AuthenticationError {
    pub fn new(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a [`CloudSession`](crate::session::CloudSession)
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    /// The connector produced a client of a different type than requested
    #[error("client for {service}/{region} of provider '{provider}' is not a {expected}")]
    ClientType {
        provider: String,
        service: String,
        region: String,
        expected: &'static str,
    },
}

/// Extractor-level failures.
///
/// Resource-level problems (a single inaccessible object) are swallowed by
/// the extractor itself; anything reaching the orchestrator as an
/// `ExtractError` terminates that extractor only.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("permission denied for {resource}: {message}")]
    PermissionDenied { resource: String, message: String },

    /// Transient API failure that outlived the extractor's own retries
    #[error("transient API error after retries: {0}")]
    Transient(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// A raw record could not be turned into a valid artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("record is missing required field '{0}'")]
    MissingField(String),

    #[error("invalid artifact: {0}")]
    Invalid(String),
}

/// Failure delivering a batch to a sink.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transient failure (5xx, connection reset, timeout); retried with backoff
    #[error("retryable transport failure: {0}")]
    Retryable(String),

    /// Permanent failure (4xx, malformed batch); never retried
    #[error("terminal transport failure: {0}")]
    Terminal(String),

    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Returns true if the failure is worth retrying.
    ///
    /// I/O errors on a filesystem sink are usually transient (full disk being
    /// cleaned, NFS hiccup), serialization errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_) | Self::Io(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::Retryable(err.to_string())
        } else {
            match err.status() {
                Some(status) if status.is_server_error() => Self::Retryable(err.to_string()),
                _ => Self::Terminal(err.to_string()),
            }
        }
    }
}

/// Rejected job or schedule parameters. Nothing is created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("batch_size must be greater than zero")]
    BatchSize,

    #[error("at least one provider is required")]
    NoProviders,

    #[error("no extractor could be resolved for providers [{0}]")]
    NothingResolvable(String),

    #[error("invalid cron expression '{expression}': {reason}")]
    CronExpression { expression: String, reason: String },
}

/// Failures of the extractor registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error("no extractors are known for provider '{0}'")]
    UnknownProvider(String),
}

/// Persistence failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize record {id}: {source}")]
    Serde {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned by the [`ExtractionOrchestrator`](crate::orchestrator::ExtractionOrchestrator)
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {0} is already running")]
    JobAlreadyRunning(JobId),

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidState {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job {job_id} execution task failed: {message}")]
    Execution { job_id: JobId, message: String },
}

/// Errors returned by the [`Scheduler`](crate::scheduler::Scheduler)
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("schedule {0} not found")]
    NotFound(ScheduleId),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cron driver error: {0}")]
    Driver(#[from] tokio_cron_scheduler::JobSchedulerError),
}
