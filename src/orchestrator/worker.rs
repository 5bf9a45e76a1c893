//! Per-extractor pull, transform and batch loop
//!
//! Each resolved extractor runs as one producer task feeding a bounded
//! channel and one batcher draining it. The producer preserves the
//! extractor's pagination order; the batcher sends batches strictly in
//! sequence, so batches of one extractor arrive in order.

use crate::error::TransformError;
use crate::etl::RawRecord;
use crate::model::{Artifact, ErrorStage, Job, JobErrorRecord, JobId, JobRequest};
use crate::registry::ExtractorRegistration;
use crate::transport::{Batch, TransportLayer};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Everything a worker shares with its job
pub(crate) struct WorkerContext {
    pub job_id: JobId,
    pub request: JobRequest,
    pub transport: Arc<TransportLayer>,
    pub job: Arc<Mutex<Job>>,
    pub cancel: CancellationToken,
    pub channel_capacity: usize,
}

impl WorkerContext {
    async fn record(&self, error: JobErrorRecord) {
        self.job.lock().await.record_error(error);
    }
}

/// How one extractor's run ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ExtractorOutcome {
    pub provider: String,
    pub service: String,
    /// Ended by an extractor-level error
    pub aborted: bool,
    /// Never started because the job was cancelled first
    pub skipped: bool,
    pub batches_sent: u64,
    pub batches_delivered: u64,
}

impl ExtractorOutcome {
    pub fn new(provider: &str, service: &str) -> Self {
        Self {
            provider: provider.to_string(),
            service: service.to_string(),
            ..Default::default()
        }
    }

    /// Aborted, or produced batches of which none were delivered
    pub fn failed(&self) -> bool {
        self.aborted || (self.batches_sent > 0 && self.batches_delivered == 0)
    }
}

#[derive(Debug, Default)]
struct BatchTally {
    sent: u64,
    delivered: u64,
}

/// Run one extractor to completion, cancellation or failure
pub(crate) async fn run_extractor(
    ctx: Arc<WorkerContext>,
    registration: ExtractorRegistration,
) -> ExtractorOutcome {
    let mut outcome = ExtractorOutcome::new(&registration.provider, &registration.service);
    if ctx.cancel.is_cancelled() {
        outcome.skipped = true;
        return outcome;
    }

    log::debug!("Job {}: starting {}", ctx.job_id, registration.key());

    let (tx, rx) = mpsc::channel(ctx.channel_capacity.max(1));
    let batcher = tokio::spawn(send_batches(
        Arc::clone(&ctx),
        registration.provider.clone(),
        registration.service.clone(),
        rx,
    ));

    outcome.aborted = produce(&ctx, &registration, tx).await;

    match batcher.await {
        Ok(tally) => {
            outcome.batches_sent = tally.sent;
            outcome.batches_delivered = tally.delivered;
        }
        Err(e) => {
            log::error!("Job {}: batcher for {} failed: {}", ctx.job_id, registration.key(), e);
            ctx.record(
                JobErrorRecord::new(ErrorStage::Transport, format!("batcher task failed: {}", e))
                    .for_extractor(&registration.provider, &registration.service)
                    .fatal(),
            )
            .await;
            outcome.aborted = true;
        }
    }

    log::debug!(
        "Job {}: {} finished, {}/{} batch(es) delivered{}",
        ctx.job_id,
        registration.key(),
        outcome.batches_delivered,
        outcome.batches_sent,
        if outcome.aborted { " (aborted)" } else { "" }
    );
    outcome
}

/// Pull every requested region in turn. Returns true if the extractor
/// aborted with an extractor-level error.
async fn produce(
    ctx: &WorkerContext,
    registration: &ExtractorRegistration,
    tx: mpsc::Sender<Artifact>,
) -> bool {
    let regions: Vec<Option<&str>> = if ctx.request.regions.is_empty() {
        vec![None]
    } else {
        ctx.request.regions.iter().map(|r| Some(r.as_str())).collect()
    };

    let extractor = &registration.extractor;
    for region in regions {
        let mut records = extractor.extract(region, &ctx.request.filters);
        loop {
            if ctx.cancel.is_cancelled() {
                return false;
            }
            let Some(item) = records.next().await else {
                break;
            };

            let raw = match item {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!(
                        "Job {}: {} aborted in region {}: {}",
                        ctx.job_id,
                        registration.key(),
                        region.unwrap_or("default"),
                        e
                    );
                    ctx.record(
                        JobErrorRecord::new(ErrorStage::Extract, e.to_string())
                            .for_extractor(&registration.provider, &registration.service)
                            .fatal(),
                    )
                    .await;
                    return true;
                }
            };

            ctx.job.lock().await.counts.total += 1;

            match normalize(registration, raw) {
                Ok(artifact) => {
                    // Batcher gone means cancellation; stop pulling
                    if tx.send(artifact).await.is_err() {
                        return false;
                    }
                }
                Err(e) => {
                    log::debug!("Job {}: dropped record from {}: {}", ctx.job_id, registration.key(), e);
                    let mut job = ctx.job.lock().await;
                    job.counts.failed += 1;
                    job.record_error(
                        JobErrorRecord::new(ErrorStage::Transform, e.to_string())
                            .for_extractor(&registration.provider, &registration.service),
                    );
                }
            }
        }
    }
    false
}

fn normalize(registration: &ExtractorRegistration, raw: RawRecord) -> Result<Artifact, TransformError> {
    let artifact = registration.extractor.transform(raw)?;
    artifact.validate()?;
    Ok(artifact)
}

async fn send_batches(
    ctx: Arc<WorkerContext>,
    provider: String,
    service: String,
    mut rx: mpsc::Receiver<Artifact>,
) -> BatchTally {
    let batch_size = ctx.request.batch_size.max(1);
    let mut tally = BatchTally::default();
    let mut buffer = Vec::with_capacity(batch_size);

    while let Some(artifact) = rx.recv().await {
        buffer.push(artifact);
        if buffer.len() >= batch_size {
            let artifacts = std::mem::replace(&mut buffer, Vec::with_capacity(batch_size));
            if !flush(&ctx, &provider, &service, artifacts, &mut tally).await {
                return tally;
            }
        }
    }

    if !buffer.is_empty() {
        flush(&ctx, &provider, &service, buffer, &mut tally).await;
    }
    tally
}

/// Send one batch. Returns false once the job has been cancelled.
async fn flush(
    ctx: &WorkerContext,
    provider: &str,
    service: &str,
    artifacts: Vec<Artifact>,
    tally: &mut BatchTally,
) -> bool {
    if ctx.cancel.is_cancelled() {
        log::debug!(
            "Job {}: cancelled, dropping {} unsent artifact(s) from {}:{}",
            ctx.job_id,
            artifacts.len(),
            provider,
            service
        );
        return false;
    }

    let batch = Batch {
        job_id: ctx.job_id,
        provider: provider.to_string(),
        service: service.to_string(),
        sequence: tally.sent,
        artifacts,
    };
    tally.sent += 1;

    match ctx.transport.send(&batch).await {
        Ok(ack) => {
            tally.delivered += 1;
            ctx.job.lock().await.counts.successful += ack.delivered as u64;
            log::debug!(
                "Job {}: delivered batch {} of {}:{} ({} artifacts, {} attempt(s))",
                ctx.job_id,
                batch.sequence,
                provider,
                service,
                ack.delivered,
                ack.attempts
            );
        }
        Err(e) => {
            let mut job = ctx.job.lock().await;
            job.counts.failed += batch.len() as u64;
            job.record_error(
                JobErrorRecord::new(
                    ErrorStage::Transport,
                    format!("batch {} not delivered: {}", batch.sequence, e),
                )
                .for_extractor(provider, service),
            );
        }
    }
    true
}
