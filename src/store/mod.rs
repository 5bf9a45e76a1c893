//! Job and schedule persistence
//!
//! The orchestrator and scheduler only talk to the [`JobStore`] and
//! [`ScheduleStore`] traits. [`MemoryStore`] keeps everything in process,
//! [`DirectoryStore`] keeps one JSON file per record.

mod directory;
mod memory;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;

use crate::config::{StoreConfig, StoreKind};
use crate::error::StoreError;
use crate::model::{Job, JobId, Schedule, ScheduleId};
use async_trait::async_trait;
use std::sync::Arc;

/// Persistence of job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job
    async fn save_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn load_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// All jobs, newest first
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;
}

/// Persistence of schedules
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert or replace a schedule
    async fn save_schedule(&self, schedule: &Schedule) -> Result<(), StoreError>;

    async fn load_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError>;

    /// All schedules, oldest first
    async fn list_schedules(&self) -> Result<Vec<Schedule>, StoreError>;

    /// Returns false if the schedule did not exist
    async fn delete_schedule(&self, id: ScheduleId) -> Result<bool, StoreError>;
}

/// Combined store handed to the orchestrator and scheduler
pub trait Store: JobStore + ScheduleStore {}

impl<T: JobStore + ScheduleStore> Store for T {}

/// Directory used by the directory store when no path is configured
pub const DEFAULT_STORE_DIR: &str = ".inventory";

/// Open the store described by the configuration
pub fn open(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Directory => {
            let path = config
                .path
                .clone()
                .unwrap_or_else(|| std::path::PathBuf::from(DEFAULT_STORE_DIR));
            Ok(Arc::new(DirectoryStore::open(path)?))
        }
    }
}

pub(crate) fn newest_first(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

pub(crate) fn oldest_first(schedules: &mut [Schedule]) {
    schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
}
