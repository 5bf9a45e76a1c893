//! Directory-backed store
//!
//! Layout:
//! ```text
//! <root>/jobs/<job_id>.json
//! <root>/schedules/<schedule_id>.json
//! ```
//! Records are written to a temp file in the same directory and renamed
//! into place.

use super::{JobStore, ScheduleStore, newest_first, oldest_first};
use crate::error::StoreError;
use crate::model::{Job, JobId, Schedule, ScheduleId};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};

const JOBS_DIR: &str = "jobs";
const SCHEDULES_DIR: &str = "schedules";

/// One JSON file per record under a root directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open (and create) the store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        for dir in [JOBS_DIR, SCHEDULES_DIR] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path).map_err(|source| io_error(&path, source))?;
        }
        log::debug!("Opened directory store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, dir: &str, id: &str) -> PathBuf {
        self.root.join(dir).join(format!("{}.json", id))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

async fn blocking<T, F>(path: PathBuf, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&Path) -> Result<T, StoreError> + Send + 'static,
{
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || f(&path))
        .await
        .map_err(|e| StoreError::Io {
            path: display,
            source: std::io::Error::other(e),
        })?
}

fn write_record<T: Serialize>(path: &Path, id: &str, record: &T) -> Result<(), StoreError> {
    let content = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Serde {
        id: id.to_string(),
        source,
    })?;
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| io_error(path, e))?;
    temp.write_all(&content).map_err(|e| io_error(path, e))?;
    temp.persist(path).map_err(|e| io_error(path, e.error))?;
    Ok(())
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Serde {
            id: path.display().to_string(),
            source,
        })
}

/// Read every `*.json` record in a directory, skipping unreadable files
fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    let mut records = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
        let path = entry.map_err(|e| io_error(dir, e))?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_record(&path) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => log::warn!("Skipping unreadable record: {}", e),
        }
    }
    Ok(records)
}

#[async_trait]
impl JobStore for DirectoryStore {
    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        let id = job.id.to_string();
        let path = self.record_path(JOBS_DIR, &id);
        let job = job.clone();
        blocking(path, move |path| write_record(path, &id, &job)).await
    }

    async fn load_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let path = self.record_path(JOBS_DIR, &id.to_string());
        blocking(path, |path| read_record(path)).await
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let dir = self.root.join(JOBS_DIR);
        let mut jobs: Vec<Job> = blocking(dir, |dir| read_all(dir)).await?;
        newest_first(&mut jobs);
        Ok(jobs)
    }
}

#[async_trait]
impl ScheduleStore for DirectoryStore {
    async fn save_schedule(&self, schedule: &Schedule) -> Result<(), StoreError> {
        let id = schedule.id.to_string();
        let path = self.record_path(SCHEDULES_DIR, &id);
        let schedule = schedule.clone();
        blocking(path, move |path| write_record(path, &id, &schedule)).await
    }

    async fn load_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        let path = self.record_path(SCHEDULES_DIR, &id.to_string());
        blocking(path, |path| read_record(path)).await
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        let dir = self.root.join(SCHEDULES_DIR);
        let mut schedules: Vec<Schedule> = blocking(dir, |dir| read_all(dir)).await?;
        oldest_first(&mut schedules);
        Ok(schedules)
    }

    async fn delete_schedule(&self, id: ScheduleId) -> Result<bool, StoreError> {
        let path = self.record_path(SCHEDULES_DIR, &id.to_string());
        blocking(path, |path| match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(path, e)),
        })
        .await
    }
}
