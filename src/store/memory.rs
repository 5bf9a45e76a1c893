use super::{JobStore, ScheduleStore, newest_first, oldest_first};
use crate::error::StoreError;
use crate::model::{Job, JobId, Schedule, ScheduleId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process store; contents are lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    schedules: RwLock<HashMap<ScheduleId, Schedule>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        newest_first(&mut jobs);
        Ok(jobs)
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn save_schedule(&self, schedule: &Schedule) -> Result<(), StoreError> {
        self.schedules
            .write()
            .await
            .insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn load_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        Ok(self.schedules.read().await.get(&id).cloned())
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        let mut schedules: Vec<Schedule> = self.schedules.read().await.values().cloned().collect();
        oldest_first(&mut schedules);
        Ok(schedules)
    }

    async fn delete_schedule(&self, id: ScheduleId) -> Result<bool, StoreError> {
        Ok(self.schedules.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobRequest, JobStatus};

    #[tokio::test]
    async fn test_save_replaces_job() {
        let store = MemoryStore::new();
        let mut job = Job::new(JobRequest::new(["aws"], 10));
        store.save_job(&job).await.unwrap();

        job.transition(JobStatus::Running).unwrap();
        store.save_job(&job).await.unwrap();

        let loaded = store.load_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(store.list_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_schedule() {
        let store = MemoryStore::new();
        let schedule = Schedule::new("*/5 * * * *", JobRequest::new(["aws"], 10)).unwrap();
        store.save_schedule(&schedule).await.unwrap();

        assert!(store.delete_schedule(schedule.id).await.unwrap());
        assert!(!store.delete_schedule(schedule.id).await.unwrap());
        assert!(store.load_schedule(schedule.id).await.unwrap().is_none());
    }
}
