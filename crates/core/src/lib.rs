pub mod config;
pub mod domain;
pub mod errors;
pub mod executor;
pub mod limits;
pub mod orchestrator;
pub mod pipeline;
pub mod ports;
pub mod progress;
pub mod sessions;
pub mod tasks;

pub use domain::chat::{ChatId, InboundEvent, MessageRef, RequesterContext, RequesterId};
pub use domain::content::{
    ArtifactHandle, ContentId, DeliveredArtifact, OutboundArtifact, RetrievalTarget,
};
pub use domain::notice::Notice;
pub use domain::task::{CancelReason, OperationKind, TaskId, TaskOutcome};
pub use domain::tenant::{StartMode, TenantConfig, TenantCredentials, TenantId, TenantPhase};
pub use errors::{FetchError, ProgressError, SessionError, StoreError};
pub use executor::{BoundedExecutor, ExecutorError};
pub use limits::{RequestVerdict, RequesterLimits, MAX_TASKS_PER_REQUESTER};
pub use orchestrator::{FleetOrchestrator, FleetSettings, ReconcileError, ReconcileReport};
pub use pipeline::{PipelineSettings, RetrievalPipeline, RetrievalService};
pub use progress::{ProgressLabels, ProgressReporter, ProgressSettings};
pub use sessions::{LiveSessions, RunningSession};
pub use tasks::{ScheduleError, TaskHandle, TaskRegistry, TaskSnapshot};
