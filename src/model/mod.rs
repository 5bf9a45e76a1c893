//! Data model: jobs, schedules and artifacts

mod artifact;
mod job;
mod schedule;

pub use artifact::{Artifact, ArtifactMetadata};
pub use job::{ErrorStage, Job, JobCounts, JobErrorRecord, JobId, JobRequest, JobStatus};
pub use schedule::{Schedule, ScheduleId, next_fire_time, normalize_cron, parse_cron};
