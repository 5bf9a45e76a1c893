//! Batch delivery to downstream sinks
//!
//! A [`Transport`] makes one delivery attempt. The [`TransportLayer`] wraps
//! a transport with the retry policy and provides at-least-once delivery
//! from the orchestrator's point of view: retryable failures are retried
//! with exponential backoff, terminal failures are returned immediately so
//! the batch can be recorded as failed.

mod filesystem;
mod http;
mod null;
mod retry;

pub use filesystem::FilesystemTransport;
pub use http::HttpTransport;
pub use null::NullTransport;
pub use retry::RetryPolicy;

use crate::config::{TransportConfig, TransportKind};
use crate::error::TransportError;
use crate::model::{Artifact, JobId};
use async_trait::async_trait;
use backon::Retryable;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

/// A group of artifacts from one extractor, delivered in one call
#[derive(Debug, Clone)]
pub struct Batch {
    pub job_id: JobId,
    pub provider: String,
    pub service: String,
    /// Position of the batch within its extractor's output, from 0
    pub sequence: u64,
    pub artifacts: Vec<Artifact>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Successful delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub delivered: usize,
    /// Attempts made, including the successful one
    pub attempts: usize,
}

/// One delivery attempt to a sink
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver the batch once.
    ///
    /// # Errors
    /// Return [`TransportError::Retryable`] for transient failures and
    /// [`TransportError::Terminal`] for failures a retry cannot fix.
    async fn deliver(&self, batch: &Batch) -> Result<(), TransportError>;
}

/// Transport plus retry policy
pub struct TransportLayer {
    sink: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl TransportLayer {
    pub fn new(sink: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { sink, policy }
    }

    /// Null sink, no retries
    pub fn null() -> Self {
        Self::new(Arc::new(NullTransport::new()), RetryPolicy::none())
    }

    /// Build the sink described by the configuration
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let policy = RetryPolicy::from_config(config);
        let sink: Arc<dyn Transport> = match config.kind {
            TransportKind::Null => Arc::new(NullTransport::new()),
            TransportKind::Http => {
                let raw = config.endpoint_url.as_deref().ok_or_else(|| {
                    TransportError::Terminal("endpoint_url is required for http".to_string())
                })?;
                let endpoint = Url::parse(raw)
                    .map_err(|e| TransportError::Terminal(format!("invalid endpoint_url: {}", e)))?;
                Arc::new(HttpTransport::try_new(
                    endpoint,
                    config.timeout(),
                    config.auth.as_ref(),
                )?)
            }
            TransportKind::Filesystem => {
                let base_dir = config.base_dir.as_ref().ok_or_else(|| {
                    TransportError::Terminal("base_dir is required for filesystem".to_string())
                })?;
                Arc::new(FilesystemTransport::new(base_dir, config.file_pattern())?)
            }
        };

        log::debug!("Using {} transport with {:?}", sink.name(), policy);
        Ok(Self::new(sink, policy))
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver a batch, retrying retryable failures with backoff.
    ///
    /// # Errors
    /// Returns the last error once retries are exhausted, or the first
    /// terminal error.
    pub async fn send(&self, batch: &Batch) -> Result<Ack, TransportError> {
        if batch.is_empty() {
            return Ok(Ack {
                delivered: 0,
                attempts: 0,
            });
        }

        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let sink = &self.sink;

        let result = (move || async move {
            attempts.fetch_add(1, Ordering::Relaxed);
            sink.deliver(batch).await
        })
        .retry(self.policy.backoff())
        .when(TransportError::is_retryable)
        .notify(|err, delay| {
            log::warn!(
                "Delivery of batch {} for {}:{} failed, retrying in {:?}: {}",
                batch.sequence,
                batch.provider,
                batch.service,
                delay,
                err
            );
        })
        .await;

        let attempts = counter.load(Ordering::Relaxed);
        match result {
            Ok(()) => Ok(Ack {
                delivered: batch.len(),
                attempts,
            }),
            Err(e) => {
                log::error!(
                    "Giving up on batch {} for {}:{} after {} attempt(s): {}",
                    batch.sequence,
                    batch.provider,
                    batch.service,
                    attempts,
                    e
                );
                Err(e)
            }
        }
    }
}
