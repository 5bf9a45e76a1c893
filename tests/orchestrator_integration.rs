//! Integration tests for job execution
//!
//! These tests drive the orchestrator end to end with canned extractors and
//! a recording transport.

mod common;

use cloud_inventory::error::{OrchestratorError, ValidationError};
use cloud_inventory::model::{ErrorStage, JobRequest, JobStatus};
use common::*;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_end_to_end_batches_per_extractor() {
    let registry = registry(vec![
        StaticExtractor::new("aws", "ec2", 3),
        StaticExtractor::new("aws", "s3", 1),
    ])
    .await;
    let sink = RecordingTransport::new();
    let store = RecordingStore::new();
    let orchestrator = orchestrator(registry, sink.clone(), store, config());

    let request = JobRequest::new(["aws"], 2).with_services(["ec2", "s3"]);
    let job_id = orchestrator.create_job(request).await.unwrap();
    let job = orchestrator.run(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counts.total, 4);
    assert_eq!(job.counts.successful, 4);
    assert_eq!(job.counts.failed, 0);
    assert!(job.errors.is_empty());
    assert!(job.started_at.is_some() && job.completed_at.is_some());

    assert_eq!(sink.sizes("ec2"), vec![(0, 2), (1, 1)]);
    assert_eq!(sink.sizes("s3"), vec![(0, 1)]);
    for batch in sink.batches() {
        assert_eq!(batch.job_id, job_id);
        for artifact in &batch.artifacts {
            artifact.validate().unwrap();
            assert_eq!(artifact.cloud_provider, "aws");
        }
    }
}

#[tokio::test]
async fn test_delivery_count_matches_batch_math() {
    let registry = registry(vec![StaticExtractor::new("gcp", "compute", 10)]).await;
    let sink = RecordingTransport::new();
    let orchestrator = orchestrator(registry, sink.clone(), RecordingStore::new(), config());

    let job_id = orchestrator
        .create_job(JobRequest::new(["gcp"], 3))
        .await
        .unwrap();
    let job = orchestrator.run(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    // ceil(10 / 3)
    let sizes = sink.sizes("compute");
    assert_eq!(sizes.len(), 4);
    assert_eq!(sizes.iter().map(|(_, n)| n).sum::<usize>(), 10);
    assert_eq!(
        sizes.iter().map(|(seq, _)| *seq).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
}

#[tokio::test]
async fn test_status_history_is_monotonic() {
    let registry = registry(vec![StaticExtractor::new("aws", "ec2", 2)]).await;
    let store = RecordingStore::new();
    let orchestrator = orchestrator(registry, RecordingTransport::new(), store.clone(), config());

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws"], 5))
        .await
        .unwrap();
    orchestrator.run(job_id).await.unwrap();

    assert_eq!(
        store.statuses(job_id),
        vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
    );
    assert!(!orchestrator.is_running(job_id).await);
    assert_eq!(
        orchestrator.get_status(job_id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_invalid_requests_create_nothing() {
    let registry = registry(vec![StaticExtractor::new("aws", "ec2", 1)]).await;
    let orchestrator = orchestrator(registry, RecordingTransport::new(), RecordingStore::new(), config());

    let err = orchestrator
        .create_job(JobRequest::new(["aws"], 0))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(ValidationError::BatchSize)));

    let err = orchestrator
        .create_job(JobRequest::new(Vec::<String>::new(), 10))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(ValidationError::NoProviders)));

    let err = orchestrator
        .create_job(JobRequest::new(["azure"], 10))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Validation(ValidationError::NothingResolvable(_))
    ));

    assert!(orchestrator.list_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unregistered_provider_is_a_warning() {
    let registry = registry(vec![StaticExtractor::new("aws", "ec2", 1)]).await;
    let orchestrator = orchestrator(registry, RecordingTransport::new(), RecordingStore::new(), config());

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws", "gcp"], 10))
        .await
        .unwrap();
    let job = orchestrator.run(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.errors.len(), 1);
    let warning = &job.errors[0];
    assert_eq!(warning.stage, ErrorStage::Resolve);
    assert_eq!(warning.provider.as_deref(), Some("gcp"));
    assert!(!warning.fatal);
}

#[tokio::test]
async fn test_concurrent_starts_run_once() {
    let registry = registry(vec![
        StaticExtractor::new("aws", "ec2", 5).with_delay(Duration::from_millis(20)),
    ])
    .await;
    let store = RecordingStore::new();
    let orchestrator = orchestrator(registry, RecordingTransport::new(), store.clone(), config());

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws"], 2))
        .await
        .unwrap();
    let (a, b) = tokio::join!(orchestrator.start(job_id), orchestrator.start(job_id));

    let (handle, err) = match (a, b) {
        (Ok(handle), Err(err)) | (Err(err), Ok(handle)) => (handle, err),
        _ => panic!("expected exactly one start to succeed"),
    };
    assert!(matches!(err, OrchestratorError::JobAlreadyRunning(id) if id == job_id));

    let job = handle.wait().await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        store
            .statuses(job_id)
            .iter()
            .filter(|s| **s == JobStatus::Running)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let registry = registry(vec![
        StaticExtractor::new("aws", "ec2", 5).with_delay(Duration::from_millis(20)),
    ])
    .await;
    let orchestrator = orchestrator(registry, RecordingTransport::new(), RecordingStore::new(), config());

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws"], 2))
        .await
        .unwrap();
    let handle = orchestrator.start(job_id).await.unwrap();
    assert!(orchestrator.is_running(job_id).await);

    let err = orchestrator.start(job_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::JobAlreadyRunning(id) if id == job_id));
    let err = orchestrator.run(job_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::JobAlreadyRunning(_)));

    let job = handle.wait().await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let err = orchestrator.start(job_id).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InvalidState {
            from: JobStatus::Completed,
            to: JobStatus::Running,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cancel_running_job() {
    let registry = registry(vec![
        StaticExtractor::new("aws", "ec2", 200).with_delay(Duration::from_millis(10)),
    ])
    .await;
    let sink = RecordingTransport::new();
    let orchestrator = orchestrator(registry, sink.clone(), RecordingStore::new(), config());

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws"], 5))
        .await
        .unwrap();
    let handle = orchestrator.start(job_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(orchestrator.cancel(job_id).await.unwrap(), JobStatus::Running);
    let job = handle.wait().await.unwrap();

    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.counts.total < 200);
    // Terminal jobs are left alone
    assert_eq!(orchestrator.cancel(job_id).await.unwrap(), JobStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let registry = registry(vec![StaticExtractor::new("aws", "ec2", 1)]).await;
    let orchestrator = orchestrator(registry, RecordingTransport::new(), RecordingStore::new(), config());

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws"], 1))
        .await
        .unwrap();
    assert_eq!(orchestrator.cancel(job_id).await.unwrap(), JobStatus::Cancelled);

    let job = orchestrator.get_status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.started_at.is_none());

    let err = orchestrator.start(job_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidState { .. }));
}

#[tokio::test]
async fn test_timeout_fails_job() {
    let registry = registry(vec![
        StaticExtractor::new("aws", "ec2", 100).with_delay(Duration::from_millis(50)),
    ])
    .await;
    let store = RecordingStore::new();
    let mut config = config();
    config.job_timeout_seconds = Some(1);
    let orchestrator = orchestrator(registry, RecordingTransport::new(), store.clone(), config);

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws"], 10))
        .await
        .unwrap();
    let job = orchestrator.run(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.fatal_errors().any(|e| e.stage == ErrorStage::Timeout));
    assert!(job.counts.total < 100);

    let statuses = store.statuses(job_id);
    assert_eq!(statuses.first(), Some(&JobStatus::Pending));
    assert!(statuses[2..].iter().all(|s| *s == JobStatus::Failed));
}

#[tokio::test]
async fn test_every_extractor_failing_fails_job() {
    let registry = registry(vec![
        StaticExtractor::new("aws", "ec2", 3),
        StaticExtractor::new("aws", "s3", 1),
    ])
    .await;
    let sink = RecordingTransport::rejecting_all();
    let orchestrator = orchestrator(registry, sink.clone(), RecordingStore::new(), config());

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws"], 2))
        .await
        .unwrap();
    let job = orchestrator.run(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.counts.total, 4);
    assert_eq!(job.counts.successful, 0);
    assert_eq!(job.counts.failed, 4);
    assert!(job.errors.iter().all(|e| e.stage == ErrorStage::Transport));
    // Terminal errors are not retried: one attempt per batch
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failures_are_isolated_per_extractor() {
    let registry = registry(vec![
        StaticExtractor::new("aws", "ec2", 4).failing_after(1),
        StaticExtractor::new("aws", "s3", 2),
        StaticExtractor::new("aws", "iam", 2),
    ])
    .await;
    let sink = RecordingTransport::rejecting("iam");
    let orchestrator = orchestrator(registry, sink.clone(), RecordingStore::new(), config());

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws"], 10))
        .await
        .unwrap();
    let job = orchestrator.run(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(sink.sizes("s3"), vec![(0, 2)]);

    let extract_error = job
        .errors
        .iter()
        .find(|e| e.stage == ErrorStage::Extract)
        .unwrap();
    assert_eq!(extract_error.service.as_deref(), Some("ec2"));
    assert!(extract_error.fatal);

    let transport_error = job
        .errors
        .iter()
        .find(|e| e.stage == ErrorStage::Transport)
        .unwrap();
    assert_eq!(transport_error.service.as_deref(), Some("iam"));
    assert_eq!(job.counts.failed, 2);
}

#[tokio::test]
async fn test_transform_failures_are_counted() {
    let mut extractor = StaticExtractor::new("aws", "ec2", 2);
    extractor.records.push(serde_json::json!({"name": "no id"}));
    let registry = registry(vec![extractor]).await;
    let sink = RecordingTransport::new();
    let orchestrator = orchestrator(registry, sink.clone(), RecordingStore::new(), config());

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws"], 10))
        .await
        .unwrap();
    let job = orchestrator.run(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counts.total, 3);
    assert_eq!(job.counts.successful, 2);
    assert_eq!(job.counts.failed, 1);
    assert_eq!(job.errors[0].stage, ErrorStage::Transform);
    assert!(!job.errors[0].fatal);
}

#[tokio::test]
async fn test_transient_transport_failures_are_retried() {
    let registry = registry(vec![StaticExtractor::new("aws", "ec2", 2)]).await;
    let sink = RecordingTransport::new();
    sink.transient_failures.store(2, Ordering::SeqCst);
    let orchestrator = orchestrator(registry, sink.clone(), RecordingStore::new(), config());

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws"], 2))
        .await
        .unwrap();
    let job = orchestrator.run(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counts.successful, 2);
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_worker_pool_is_bounded() {
    let gauge = Arc::new(Gauge::default());
    let extractors = ["ec2", "s3", "rds", "lambda"]
        .iter()
        .map(|service| {
            StaticExtractor::new("aws", service, 3)
                .with_delay(Duration::from_millis(5))
                .with_gauge(Arc::clone(&gauge))
        })
        .collect();
    let registry = registry(extractors).await;
    let mut config = config();
    config.max_concurrent_extractors = 2;
    let orchestrator = orchestrator(registry, RecordingTransport::new(), RecordingStore::new(), config);

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws"], 2))
        .await
        .unwrap();
    let job = orchestrator.run(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counts.successful, 12);
    assert!(gauge.max() <= 2);
}

#[tokio::test]
async fn test_running_job_keeps_its_snapshot() {
    let registry = registry(vec![
        StaticExtractor::new("aws", "ec2", 10).with_delay(Duration::from_millis(10)),
    ])
    .await;
    let orchestrator = orchestrator(
        Arc::clone(&registry),
        RecordingTransport::new(),
        RecordingStore::new(),
        config(),
    );

    let job_id = orchestrator
        .create_job(JobRequest::new(["aws"], 3))
        .await
        .unwrap();
    let handle = orchestrator.start(job_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(registry.unregister_provider("aws").await, 1);
    assert_eq!(registry.unregister_provider("aws").await, 0);

    let job = handle.wait().await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counts.successful, 10);

    let err = orchestrator
        .create_job(JobRequest::new(["aws"], 3))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
}

#[tokio::test]
async fn test_list_jobs_newest_first() {
    let registry = registry(vec![StaticExtractor::new("aws", "ec2", 1)]).await;
    let orchestrator = orchestrator(registry, RecordingTransport::new(), RecordingStore::new(), config());

    let first = orchestrator
        .create_job(JobRequest::new(["aws"], 1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = orchestrator
        .create_job(JobRequest::new(["aws"], 1))
        .await
        .unwrap();

    let ids: Vec<_> = orchestrator
        .list_jobs()
        .await
        .unwrap()
        .iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(ids, vec![second, first]);
}
