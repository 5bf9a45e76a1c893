//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use cloud_inventory::config::OrchestratorConfig;
use cloud_inventory::error::{AuthenticationError, ExtractError, StoreError, TransformError, TransportError};
use cloud_inventory::etl::{Extractor, ExtractorMetadata, Filters, RawRecord, RecordStream};
use cloud_inventory::model::{Artifact, Job, JobId, JobStatus, Schedule, ScheduleId};
use cloud_inventory::registry::{ExtractorCatalog, ExtractorFactory, ExtractorRegistry};
use cloud_inventory::session::{CloudSession, Connector, Credentials, ServiceClient};
use cloud_inventory::store::{JobStore, MemoryStore, ScheduleStore};
use cloud_inventory::transport::{Batch, RetryPolicy, Transport, TransportLayer};
use cloud_inventory::ExtractionOrchestrator;
use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Extractor replaying canned records
#[derive(Clone, Default)]
pub struct StaticExtractor {
    pub provider: String,
    pub service: String,
    pub records: Vec<Value>,
    /// Yield an extractor-level error after this many records
    pub fail_after: Option<usize>,
    /// Pause before each record
    pub delay: Option<Duration>,
    /// Tracks how many extractions run at once
    pub gauge: Option<Arc<Gauge>>,
}

impl StaticExtractor {
    pub fn new(provider: &str, service: &str, count: usize) -> Self {
        Self {
            provider: provider.to_string(),
            service: service.to_string(),
            records: (0..count)
                .map(|i| json!({"id": format!("{}-{}", service, i)}))
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_after(mut self, records: usize) -> Self {
        self.fail_after = Some(records);
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<Gauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }
}

impl Extractor for StaticExtractor {
    fn metadata(&self) -> ExtractorMetadata {
        ExtractorMetadata::new(&self.provider, &self.service, vec!["resource".to_string()])
    }

    fn extract<'a>(&'a self, _region: Option<&'a str>, _filters: &'a Filters) -> RecordStream<'a> {
        async_stream::stream! {
            let _active = self.gauge.as_ref().map(|g| g.enter());
            for (i, record) in self.records.iter().enumerate() {
                if self.fail_after == Some(i) {
                    yield Err(ExtractError::Transient("throttled".to_string()));
                    return;
                }
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(record.clone());
            }
        }
        .boxed()
    }

    fn transform(&self, raw: RawRecord) -> Result<Artifact, TransformError> {
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| TransformError::MissingField("id".to_string()))?;
        Ok(Artifact::new(
            &self.provider,
            format!("{}:{}:resource", self.provider, self.service),
            id,
        )
        .with_service(&self.service))
    }
}

/// High-water mark of concurrent extractions
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

pub struct GaugeGuard<'a>(&'a Gauge);

impl Gauge {
    pub fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self)
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connector that accepts everything except the token "bad"
pub struct StubConnector;

#[async_trait]
impl Connector for StubConnector {
    async fn authenticate(&self, provider: &str, credentials: &Credentials) -> Result<(), AuthenticationError> {
        match credentials {
            Credentials::Token(t) if t == "bad" => Err(AuthenticationError::new(provider, "rejected")),
            _ => Ok(()),
        }
    }

    async fn connect(
        &self,
        _provider: &str,
        _credentials: &Credentials,
        _service: &str,
        _region: &str,
    ) -> Result<ServiceClient, AuthenticationError> {
        Ok(Arc::new(()))
    }
}

pub fn session(provider: &str) -> Arc<CloudSession> {
    Arc::new(CloudSession::new(
        provider,
        Credentials::Token("ok".to_string()),
        Arc::new(StubConnector),
    ))
}

/// Catalog serving the given extractors
pub fn catalog(extractors: Vec<StaticExtractor>) -> ExtractorCatalog {
    let mut catalog = ExtractorCatalog::new();
    for extractor in extractors {
        let provider = extractor.provider.clone();
        let service = extractor.service.clone();
        catalog.register(ExtractorFactory::new(provider, service, move |_session| {
            Arc::new(extractor.clone()) as Arc<dyn Extractor>
        }));
    }
    catalog
}

/// Registry with every catalog provider registered
pub async fn registry(extractors: Vec<StaticExtractor>) -> Arc<ExtractorRegistry> {
    let mut providers: Vec<String> = extractors.iter().map(|e| e.provider.clone()).collect();
    providers.sort();
    providers.dedup();

    let registry = Arc::new(ExtractorRegistry::new(catalog(extractors)));
    for provider in providers {
        registry.register_provider(session(&provider)).await.unwrap();
    }
    registry
}

/// Sink that records batches and can be told to fail
#[derive(Default)]
pub struct RecordingTransport {
    pub batches: Mutex<Vec<Batch>>,
    pub attempts: AtomicUsize,
    /// Reject every batch of this service with a terminal error
    pub reject_service: Option<String>,
    /// Fail this many attempts with a retryable error before succeeding
    pub transient_failures: AtomicUsize,
    pub reject_all: bool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting_all() -> Arc<Self> {
        Arc::new(Self {
            reject_all: true,
            ..Default::default()
        })
    }

    pub fn rejecting(service: &str) -> Arc<Self> {
        Arc::new(Self {
            reject_service: Some(service.to_string()),
            ..Default::default()
        })
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().unwrap().clone()
    }

    /// `(sequence, size)` of delivered batches for one service, in arrival order
    pub fn sizes(&self, service: &str) -> Vec<(u64, usize)> {
        self.batches()
            .iter()
            .filter(|b| b.service == service)
            .map(|b| (b.sequence, b.len()))
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, batch: &Batch) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject_all || self.reject_service.as_deref() == Some(batch.service.as_str()) {
            return Err(TransportError::Terminal("400 rejected".to_string()));
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Retryable("503 unavailable".to_string()));
        }
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

pub fn layer(sink: Arc<RecordingTransport>) -> Arc<TransportLayer> {
    Arc::new(TransportLayer::new(
        sink,
        RetryPolicy::default()
            .with_max_retries(3)
            .with_base_delay(Duration::from_millis(1)),
    ))
}

/// Memory store that records every job status it is asked to save
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    pub saved: Mutex<Vec<(JobId, JobStatus)>>,
    /// Pause inside every job save
    pub save_delay: Option<Duration>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_save_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            save_delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn statuses(&self, job_id: JobId) -> Vec<JobStatus> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }
        self.saved.lock().unwrap().push((job.id, job.status));
        self.inner.save_job(job).await
    }

    async fn load_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.inner.load_job(id).await
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.list_jobs().await
    }
}

#[async_trait]
impl ScheduleStore for RecordingStore {
    async fn save_schedule(&self, schedule: &Schedule) -> Result<(), StoreError> {
        self.inner.save_schedule(schedule).await
    }

    async fn load_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        self.inner.load_schedule(id).await
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        self.inner.list_schedules().await
    }

    async fn delete_schedule(&self, id: ScheduleId) -> Result<bool, StoreError> {
        self.inner.delete_schedule(id).await
    }
}

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_concurrent_extractors: 4,
        default_batch_size: 2,
        job_timeout_seconds: None,
        channel_capacity: 8,
    }
}

pub fn orchestrator(
    registry: Arc<ExtractorRegistry>,
    sink: Arc<RecordingTransport>,
    store: Arc<RecordingStore>,
    config: OrchestratorConfig,
) -> Arc<ExtractionOrchestrator> {
    Arc::new(ExtractionOrchestrator::new(registry, layer(sink), store, config))
}
