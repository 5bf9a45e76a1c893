use super::{Batch, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sink that acknowledges everything immediately (dry runs, tests)
#[derive(Debug, Default)]
pub struct NullTransport {
    delivered: AtomicU64,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Artifacts acknowledged so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for NullTransport {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn deliver(&self, batch: &Batch) -> Result<(), TransportError> {
        log::trace!(
            "Discarding batch {} of {}:{} ({} artifacts)",
            batch.sequence,
            batch.provider,
            batch.service,
            batch.len()
        );
        self.delivered
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}
