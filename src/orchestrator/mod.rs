//! Job lifecycle and execution
//!
//! The orchestrator validates job requests, persists jobs, and runs each
//! job's resolved extractors on a bounded worker pool. Every job carries a
//! cancellation token checked at loop boundaries; an optional wall-clock
//! timeout fails the job and cancels its workers.

mod worker;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, ValidationError};
use crate::model::{ErrorStage, Job, JobErrorRecord, JobId, JobRequest, JobStatus};
use crate::registry::{ExtractorRegistration, ExtractorRegistry, ResolutionWarning};
use crate::store::JobStore;
use crate::transport::TransportLayer;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use worker::{ExtractorOutcome, WorkerContext};

/// In-memory state of a running job
struct ActiveJob {
    job: Arc<Mutex<Job>>,
    cancel: CancellationToken,
}

/// Handle to a started job
#[derive(Debug)]
pub struct RunHandle {
    job_id: JobId,
    handle: JoinHandle<Result<Job, OrchestratorError>>,
}

impl RunHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the job to reach a terminal state
    pub async fn wait(self) -> Result<Job, OrchestratorError> {
        self.handle
            .await
            .map_err(|e| OrchestratorError::Execution {
                job_id: self.job_id,
                message: e.to_string(),
            })?
    }
}

/// Creates, runs, tracks and cancels extraction jobs
pub struct ExtractionOrchestrator {
    registry: Arc<ExtractorRegistry>,
    transport: Arc<TransportLayer>,
    store: Arc<dyn JobStore>,
    config: OrchestratorConfig,
    active: Mutex<HashMap<JobId, ActiveJob>>,
}

impl ExtractionOrchestrator {
    pub fn new(
        registry: Arc<ExtractorRegistry>,
        transport: Arc<TransportLayer>,
        store: Arc<dyn JobStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            store,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ExtractorRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validate and persist a pending job.
    ///
    /// Providers or services that do not resolve are tolerated as long as
    /// at least one extractor does; they are recorded on the job when it
    /// runs.
    ///
    /// # Errors
    /// [`ValidationError`] if the request is malformed or nothing resolves.
    /// No job is created in that case.
    pub async fn create_job(&self, request: JobRequest) -> Result<JobId, OrchestratorError> {
        request.validate()?;

        let resolution = self
            .registry
            .resolve(&request.providers, &request.services)
            .await;
        if resolution.is_empty() {
            let providers: Vec<&str> = request.providers.iter().map(String::as_str).collect();
            return Err(ValidationError::NothingResolvable(providers.join(", ")).into());
        }

        let job = Job::new(request);
        self.store.save_job(&job).await?;
        log::info!(
            "Created job {} ({} extractor(s), batch size {})",
            job.id,
            resolution.extractors.len(),
            job.request.batch_size
        );
        Ok(job.id)
    }

    /// Move a pending job to running and spawn its execution.
    ///
    /// # Errors
    /// [`OrchestratorError::JobAlreadyRunning`] if the job is executing,
    /// [`OrchestratorError::InvalidState`] if it is not pending.
    pub async fn start(self: &Arc<Self>, job_id: JobId) -> Result<RunHandle, OrchestratorError> {
        let mut active = self.active.lock().await;
        if active.contains_key(&job_id) {
            return Err(OrchestratorError::JobAlreadyRunning(job_id));
        }

        let mut job = self
            .store
            .load_job(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(job_id))?;
        job.transition(JobStatus::Running)
            .map_err(|(from, to)| OrchestratorError::InvalidState { job_id, from, to })?;
        self.store.save_job(&job).await?;

        let state = Arc::new(Mutex::new(job));
        let cancel = CancellationToken::new();
        active.insert(
            job_id,
            ActiveJob {
                job: Arc::clone(&state),
                cancel: cancel.clone(),
            },
        );
        drop(active);

        log::info!("Started job {}", job_id);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.execute(job_id, state, cancel).await });
        Ok(RunHandle { job_id, handle })
    }

    /// Start a job and wait for it to finish
    pub async fn run(self: &Arc<Self>, job_id: JobId) -> Result<Job, OrchestratorError> {
        self.start(job_id).await?.wait().await
    }

    /// Current view of a job: the live copy while running, else the stored one
    pub async fn get_status(&self, job_id: JobId) -> Result<Job, OrchestratorError> {
        let live = self
            .active
            .lock()
            .await
            .get(&job_id)
            .map(|entry| Arc::clone(&entry.job));
        if let Some(job) = live {
            return Ok(job.lock().await.clone());
        }

        self.store
            .load_job(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(job_id))
    }

    /// All jobs, newest first, with running jobs shown live
    pub async fn list_jobs(&self) -> Result<Vec<Job>, OrchestratorError> {
        let mut jobs = self.store.list_jobs().await?;
        let live: HashMap<JobId, Arc<Mutex<Job>>> = self
            .active
            .lock()
            .await
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(&entry.job)))
            .collect();

        for job in jobs.iter_mut() {
            if let Some(state) = live.get(&job.id) {
                *job = state.lock().await.clone();
            }
        }
        Ok(jobs)
    }

    pub async fn is_running(&self, job_id: JobId) -> bool {
        self.active.lock().await.contains_key(&job_id)
    }

    /// Request cancellation.
    ///
    /// A running job is flagged and stops at its next loop boundary; a
    /// pending job is cancelled immediately; a finished job is left alone.
    /// Returns the job's status after the call.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobStatus, OrchestratorError> {
        let active = self.active.lock().await;
        if let Some(entry) = active.get(&job_id) {
            let status = entry.job.lock().await.status;
            if !status.is_terminal() && !entry.cancel.is_cancelled() {
                log::info!("Cancellation requested for job {}", job_id);
                entry.cancel.cancel();
            }
            return Ok(status);
        }

        let mut job = self
            .store
            .load_job(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            return Ok(job.status);
        }

        job.transition(JobStatus::Cancelled)
            .map_err(|(from, to)| OrchestratorError::InvalidState { job_id, from, to })?;
        self.store.save_job(&job).await?;
        log::info!("Cancelled pending job {}", job_id);
        Ok(job.status)
    }

    /// Request cancellation of every running job
    pub async fn cancel_all(&self) -> usize {
        let active = self.active.lock().await;
        for entry in active.values() {
            entry.cancel.cancel();
        }
        active.len()
    }

    async fn execute(
        self: Arc<Self>,
        job_id: JobId,
        state: Arc<Mutex<Job>>,
        cancel: CancellationToken,
    ) -> Result<Job, OrchestratorError> {
        let request = state.lock().await.request.clone();
        let resolution = self
            .registry
            .resolve(&request.providers, &request.services)
            .await;

        {
            let mut job = state.lock().await;
            for warning in &resolution.warnings {
                log::warn!("Job {}: {}", job_id, warning);
                job.record_error(warning_record(warning));
            }
            if resolution.is_empty() {
                job.record_error(
                    JobErrorRecord::new(ErrorStage::Resolve, "no extractors resolved at execution")
                        .fatal(),
                );
            }
        }

        log::info!(
            "Job {}: running {} extractor(s) from registry version {}",
            job_id,
            resolution.extractors.len(),
            resolution.version
        );

        let ctx = Arc::new(WorkerContext {
            job_id,
            request,
            transport: Arc::clone(&self.transport),
            job: Arc::clone(&state),
            cancel: cancel.clone(),
            channel_capacity: self.config.channel_capacity,
        });
        let workers = self.run_workers(Arc::clone(&ctx), resolution.extractors);

        let outcomes = match self.config.job_timeout() {
            None => workers.await,
            Some(limit) => {
                tokio::pin!(workers);
                tokio::select! {
                    outcomes = &mut workers => outcomes,
                    _ = tokio::time::sleep(limit) => {
                        self.fail_on_timeout(job_id, &state, &cancel, limit).await;
                        workers.await
                    }
                }
            }
        };

        let all_failed = outcomes.iter().all(ExtractorOutcome::failed);
        let final_job = {
            let mut job = state.lock().await;
            if !job.status.is_terminal() {
                let next = if cancel.is_cancelled() {
                    JobStatus::Cancelled
                } else if all_failed {
                    JobStatus::Failed
                } else {
                    JobStatus::Completed
                };
                job.transition(next)
                    .map_err(|(from, to)| OrchestratorError::InvalidState { job_id, from, to })?;
            }
            job.clone()
        };

        let saved = self.store.save_job(&final_job).await;
        self.active.lock().await.remove(&job_id);
        saved?;

        log::info!(
            "Job {} {}: {} total, {} delivered, {} failed, {} error(s)",
            job_id,
            final_job.status,
            final_job.counts.total,
            final_job.counts.successful,
            final_job.counts.failed,
            final_job.errors.len()
        );
        Ok(final_job)
    }

    async fn run_workers(
        &self,
        ctx: Arc<WorkerContext>,
        extractors: Vec<ExtractorRegistration>,
    ) -> Vec<ExtractorOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_extractors.max(1)));
        let mut workers = JoinSet::new();

        for registration in extractors {
            let ctx = Arc::clone(&ctx);
            let semaphore = Arc::clone(&semaphore);
            workers.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let mut outcome =
                            ExtractorOutcome::new(&registration.provider, &registration.service);
                        outcome.skipped = true;
                        return outcome;
                    }
                };
                worker::run_extractor(ctx, registration).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    log::error!("Job {}: worker task failed: {}", ctx.job_id, e);
                    ctx.job.lock().await.record_error(
                        JobErrorRecord::new(ErrorStage::Extract, format!("worker task failed: {}", e))
                            .fatal(),
                    );
                    outcomes.push(ExtractorOutcome {
                        aborted: true,
                        ..Default::default()
                    });
                }
            }
        }
        outcomes
    }

    /// Mark the job failed, persist it, then cancel the remaining workers
    async fn fail_on_timeout(
        &self,
        job_id: JobId,
        state: &Mutex<Job>,
        cancel: &CancellationToken,
        limit: std::time::Duration,
    ) {
        // Explicit cancellation wins over the timeout
        if cancel.is_cancelled() {
            return;
        }

        let snapshot = {
            let mut job = state.lock().await;
            job.record_error(
                JobErrorRecord::new(ErrorStage::Timeout, format!("job exceeded timeout of {:?}", limit))
                    .fatal(),
            );
            if job.transition(JobStatus::Failed).is_err() {
                None
            } else {
                Some(job.clone())
            }
        };

        log::warn!("Job {} timed out after {:?}, cancelling workers", job_id, limit);
        if let Some(job) = snapshot
            && let Err(e) = self.store.save_job(&job).await
        {
            log::error!("Job {}: failed to persist timeout: {}", job_id, e);
        }
        cancel.cancel();
    }
}

fn warning_record(warning: &ResolutionWarning) -> JobErrorRecord {
    let record = JobErrorRecord::new(ErrorStage::Resolve, warning.to_string());
    match warning {
        ResolutionWarning::ProviderNotRegistered { provider } => JobErrorRecord {
            provider: Some(provider.clone()),
            ..record
        },
        ResolutionWarning::ServiceNotFound { provider, service } => {
            record.for_extractor(provider, service)
        }
    }
}
