//! Cloud Inventory
//!
//! Multi-cloud resource inventory core: extractors pull resources from
//! cloud provider APIs, normalize them into [`Artifact`]s and hand them in
//! batches to a downstream transport.

pub mod cli;
pub mod config;
pub mod error;
pub mod etl;
pub mod model;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use config::AppConfig;
pub use error::{OrchestratorError, SchedulerError, TransportError, ValidationError};
pub use etl::{Extractor, ExtractorMetadata};
pub use model::{Artifact, Job, JobId, JobRequest, JobStatus, Schedule, ScheduleId};
pub use orchestrator::{ExtractionOrchestrator, RunHandle};
pub use registry::{ExtractorCatalog, ExtractorFactory, ExtractorRegistry};
pub use scheduler::{Scheduler, TickOutcome};
pub use session::{CloudSession, Connector, Credentials};
pub use store::{DirectoryStore, MemoryStore};
pub use transport::{Batch, Transport, TransportLayer};
