//! Cron-driven job triggering
//!
//! A [`Scheduler`] owns schedule CRUD and turns cron ticks into jobs on the
//! [`ExtractionOrchestrator`]. Ticks and schedule edits are serialized
//! scheduler-wide, so a tick never saves over a concurrent edit; a tick that
//! arrives while the previous run of the same schedule is still going is
//! coalesced, never queued.

use crate::error::SchedulerError;
use crate::model::{JobId, JobRequest, Schedule, ScheduleId, parse_cron};
use crate::orchestrator::ExtractionOrchestrator;
use crate::store::ScheduleStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use uuid::Uuid;

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Started(JobId),
    /// Previous run still active; this tick was dropped
    Coalesced(JobId),
    Paused,
    Inactive,
}

impl std::fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started(job_id) => write!(f, "started job {}", job_id),
            Self::Coalesced(job_id) => write!(f, "coalesced, job {} still running", job_id),
            Self::Paused => write!(f, "paused"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// Partial update of a schedule; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub cron_expression: Option<String>,
    pub request: Option<JobRequest>,
    pub is_active: Option<bool>,
}

struct Driver {
    cron: JobScheduler,
    jobs: HashMap<ScheduleId, Uuid>,
}

pub struct Scheduler {
    orchestrator: Arc<ExtractionOrchestrator>,
    store: Arc<dyn ScheduleStore>,
    /// Held by ticks and by every schedule mutation
    state_lock: Mutex<()>,
    driver: Mutex<Option<Driver>>,
    this: Weak<Scheduler>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<ExtractionOrchestrator>, store: Arc<dyn ScheduleStore>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            orchestrator,
            store,
            state_lock: Mutex::new(()),
            driver: Mutex::new(None),
            this: this.clone(),
        })
    }

    pub fn orchestrator(&self) -> &Arc<ExtractionOrchestrator> {
        &self.orchestrator
    }

    pub async fn create_schedule(
        &self,
        cron_expression: &str,
        request: JobRequest,
        name: Option<String>,
    ) -> Result<Schedule, SchedulerError> {
        let mut schedule = Schedule::new(cron_expression, request)?;
        schedule.name = name;
        self.store.save_schedule(&schedule).await?;
        self.sync_driver(&schedule).await?;

        log::info!(
            "Created schedule {} ({}), next run {}",
            schedule.id,
            schedule.cron_expression,
            format_next(&schedule)
        );
        Ok(schedule)
    }

    pub async fn get_schedule(&self, id: ScheduleId) -> Result<Schedule, SchedulerError> {
        self.store
            .load_schedule(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>, SchedulerError> {
        Ok(self.store.list_schedules().await?)
    }

    /// Apply an update. The whole update is validated before anything is
    /// saved.
    pub async fn update_schedule(
        &self,
        id: ScheduleId,
        update: ScheduleUpdate,
    ) -> Result<Schedule, SchedulerError> {
        let _state = self.state_lock.lock().await;
        let mut schedule = self.get_schedule(id).await?;

        if let Some(expression) = update.cron_expression {
            parse_cron(&expression)?;
            schedule.cron_expression = expression;
        }
        if let Some(request) = update.request {
            request.validate()?;
            schedule.request = request;
        }
        if let Some(name) = update.name {
            schedule.name = Some(name);
        }
        if let Some(is_active) = update.is_active {
            schedule.is_active = is_active;
        }
        schedule.refresh_next_run(Utc::now())?;

        self.store.save_schedule(&schedule).await?;
        self.sync_driver(&schedule).await?;
        log::info!("Updated schedule {}", id);
        Ok(schedule)
    }

    pub async fn delete_schedule(&self, id: ScheduleId) -> Result<(), SchedulerError> {
        let _state = self.state_lock.lock().await;
        if !self.store.delete_schedule(id).await? {
            return Err(SchedulerError::NotFound(id));
        }
        self.remove_from_driver(id).await?;
        log::info!("Deleted schedule {}", id);
        Ok(())
    }

    pub async fn pause(&self, id: ScheduleId) -> Result<Schedule, SchedulerError> {
        self.set_paused(id, true).await
    }

    pub async fn resume(&self, id: ScheduleId) -> Result<Schedule, SchedulerError> {
        self.set_paused(id, false).await
    }

    async fn set_paused(&self, id: ScheduleId, paused: bool) -> Result<Schedule, SchedulerError> {
        let _state = self.state_lock.lock().await;
        let mut schedule = self.get_schedule(id).await?;
        schedule.paused = paused;
        schedule.refresh_next_run(Utc::now())?;
        self.store.save_schedule(&schedule).await?;
        log::info!(
            "{} schedule {}",
            if paused { "Paused" } else { "Resumed" },
            id
        );
        Ok(schedule)
    }

    /// Handle one cron tick for a schedule.
    ///
    /// Starts a job unless the schedule is inactive, paused, or its previous
    /// job is still running.
    pub async fn on_tick(&self, id: ScheduleId) -> Result<TickOutcome, SchedulerError> {
        let _state = self.state_lock.lock().await;
        let mut schedule = self.get_schedule(id).await?;
        let now = Utc::now();

        if !schedule.is_active {
            return Ok(TickOutcome::Inactive);
        }
        if schedule.paused {
            return Ok(TickOutcome::Paused);
        }

        if let Some(previous) = schedule.last_job_id
            && self.orchestrator.is_running(previous).await
        {
            schedule.refresh_next_run(now)?;
            self.store.save_schedule(&schedule).await?;
            log::info!("Schedule {}: job {} still running, tick coalesced", id, previous);
            return Ok(TickOutcome::Coalesced(previous));
        }

        let started = match self.orchestrator.create_job(schedule.request.clone()).await {
            Ok(job_id) => self.orchestrator.start(job_id).await.map(|handle| handle.job_id()),
            Err(e) => Err(e),
        };

        schedule.refresh_next_run(now)?;
        let job_id = match started {
            Ok(job_id) => job_id,
            Err(e) => {
                self.store.save_schedule(&schedule).await?;
                log::warn!("Schedule {}: could not start job: {}", id, e);
                return Err(e.into());
            }
        };

        schedule.last_run_at = Some(now);
        schedule.last_job_id = Some(job_id);
        self.store.save_schedule(&schedule).await?;

        log::info!(
            "Schedule {}: started job {}, next run {}",
            id,
            job_id,
            format_next(&schedule)
        );
        Ok(TickOutcome::Started(job_id))
    }

    /// Start driving every active schedule from its cron expression
    pub async fn start(&self) -> Result<usize, SchedulerError> {
        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            return Ok(driver.as_ref().map(|d| d.jobs.len()).unwrap_or_default());
        }

        let mut state = Driver {
            cron: JobScheduler::new().await?,
            jobs: HashMap::new(),
        };
        for schedule in self.store.list_schedules().await? {
            if schedule.is_active {
                self.add_to_driver(&mut state, &schedule).await?;
            }
        }
        state.cron.start().await?;

        let count = state.jobs.len();
        *driver = Some(state);
        log::info!("Scheduler started with {} schedule(s)", count);
        Ok(count)
    }

    /// Stop the cron driver. Running jobs are left to finish.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let Some(mut state) = self.driver.lock().await.take() else {
            return Ok(());
        };
        state.cron.shutdown().await?;
        log::info!("Scheduler stopped");
        Ok(())
    }

    pub async fn is_started(&self) -> bool {
        self.driver.lock().await.is_some()
    }

    async fn add_to_driver(&self, state: &mut Driver, schedule: &Schedule) -> Result<(), SchedulerError> {
        let this = self.this.clone();
        let id = schedule.id;
        let job = CronJob::new_async(schedule.normalized_cron().as_str(), move |_uuid, _lock| {
            let this = this.clone();
            Box::pin(async move {
                let Some(scheduler) = this.upgrade() else {
                    return;
                };
                match scheduler.on_tick(id).await {
                    Ok(outcome) => log::debug!("Schedule {} tick: {}", id, outcome),
                    Err(e) => log::warn!("Schedule {} tick failed: {}", id, e),
                }
            })
        })?;

        let uuid = state.cron.add(job).await?;
        state.jobs.insert(id, uuid);
        Ok(())
    }

    /// Mirror a saved schedule into the running driver, if any
    async fn sync_driver(&self, schedule: &Schedule) -> Result<(), SchedulerError> {
        let mut driver = self.driver.lock().await;
        let Some(state) = driver.as_mut() else {
            return Ok(());
        };

        if let Some(uuid) = state.jobs.remove(&schedule.id) {
            state.cron.remove(&uuid).await?;
        }
        if schedule.is_active {
            self.add_to_driver(state, schedule).await?;
        }
        Ok(())
    }

    async fn remove_from_driver(&self, id: ScheduleId) -> Result<(), SchedulerError> {
        let mut driver = self.driver.lock().await;
        if let Some(state) = driver.as_mut()
            && let Some(uuid) = state.jobs.remove(&id)
        {
            state.cron.remove(&uuid).await?;
        }
        Ok(())
    }
}

fn format_next(schedule: &Schedule) -> String {
    schedule
        .next_run_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string())
}
