//! Multi-stage underwriting: medical review, then fraud and risk side by side,
//! then premium and decision, with live progress for attached listeners.

pub mod assembler;
pub mod documents;
pub mod domain;
pub mod emitter;
pub mod events;
pub mod invoker;
pub mod orchestrator;
pub mod pipeline;
pub mod reports;
pub mod router;
pub mod sample;
pub mod service;
pub mod session;
pub mod stages;
pub mod state;

#[cfg(test)]
mod tests;

pub use assembler::{ReportAssembler, UnderwritingReport};
pub use documents::{DocumentDescriptor, DocumentStore, DocumentStoreError, InMemoryDocumentStore};
pub use domain::{
    Application, ApplicationError, ApplicationId, FinalDecision, RunId, StageError, StageKind,
    StageResult, StageStatus,
};
pub use emitter::{AttachOutcome, ClientId, Delivery, Listener, ProgressEmitter};
pub use events::{EventStatus, ProgressEvent};
pub use invoker::{StageCallError, StageFunction, StageInvoker, StageRequest};
pub use orchestrator::{RunHandle, RunOutcome, UnderwritingOrchestrator};
pub use pipeline::StagePipeline;
pub use reports::{
    DashboardData, DashboardSummary, InMemoryReportStore, JsonFileReportStore, ReportStore,
    ReportStoreError,
    ReportSummary,
};
pub use router::underwriting_router;
pub use sample::sample_application;
pub use service::{UnderwritingService, UnderwritingServiceError};
pub use stages::{HostedModelStages, RuleBasedStages};
pub use state::{RunState, RunStatus};
