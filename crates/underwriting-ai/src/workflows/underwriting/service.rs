use std::sync::Arc;

use serde::Serialize;

use super::assembler::UnderwritingReport;
use super::documents::{DocumentDescriptor, DocumentStore, DocumentStoreError};
use super::domain::{Application, ApplicationError, ApplicationId, RunId, StageKind};
use super::emitter::{AttachOutcome, Listener};
use super::orchestrator::{RunHandle, RunOutcome, UnderwritingOrchestrator};
use super::pipeline::StageDependency;
use super::reports::{DashboardSummary, ReportStore, ReportStoreError, ReportSummary};

#[derive(Debug, thiserror::Error)]
pub enum UnderwritingServiceError {
    #[error(transparent)]
    Application(#[from] ApplicationError),
    #[error(transparent)]
    Reports(#[from] ReportStoreError),
    #[error(transparent)]
    Documents(#[from] DocumentStoreError),
    #[error("no report for application {0}")]
    ReportNotFound(ApplicationId),
    #[error("unknown run {0}")]
    UnknownRun(RunId),
}

/// Catalogue entry describing one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageDescriptor {
    pub order: usize,
    pub key: &'static str,
    pub role: &'static str,
    pub description: &'static str,
    pub section: &'static str,
    pub depends_on: Vec<StageDependency>,
    pub runs_alongside: Vec<StageKind>,
}

/// A run launched with a listener already attached.
#[derive(Debug)]
pub struct StreamingRun {
    pub handle: RunHandle,
    pub listener: Listener,
}

/// Entry point for the HTTP and socket adapters.
pub struct UnderwritingService {
    orchestrator: UnderwritingOrchestrator,
    documents: Arc<dyn DocumentStore>,
}

impl UnderwritingService {
    pub fn new(orchestrator: UnderwritingOrchestrator, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            orchestrator,
            documents,
        }
    }

    pub fn orchestrator(&self) -> &UnderwritingOrchestrator {
        &self.orchestrator
    }

    fn reports(&self) -> &Arc<dyn ReportStore> {
        self.orchestrator.reports()
    }

    /// Runs the application and waits for the outcome.
    pub async fn process(
        &self,
        application: Application,
    ) -> Result<RunOutcome, UnderwritingServiceError> {
        Ok(self.orchestrator.process(application).await?)
    }

    /// Starts a run with a single-shot listener attached before the first event.
    pub fn stream(&self, application: Application) -> Result<StreamingRun, UnderwritingServiceError> {
        let prepared = self.orchestrator.prepare(application)?;
        let listener = self.orchestrator.emitter().listener();
        self.orchestrator.emitter().attach(prepared.run_id(), &listener);
        let handle = self.orchestrator.launch(prepared);
        Ok(StreamingRun { handle, listener })
    }

    /// Attaches a new listener to an existing run.
    pub fn reconnect(&self, run_id: &RunId) -> Result<Listener, UnderwritingServiceError> {
        let (listener, outcome) = self.orchestrator.emitter().subscribe(run_id);
        match outcome {
            AttachOutcome::Live | AttachOutcome::Replayed => Ok(listener),
            AttachOutcome::UnknownRun => Err(UnderwritingServiceError::UnknownRun(run_id.clone())),
        }
    }

    pub fn stages(&self) -> Vec<StageDescriptor> {
        let pipeline = self.orchestrator.pipeline();
        pipeline
            .stages()
            .enumerate()
            .map(|(index, stage)| StageDescriptor {
                order: index + 1,
                key: stage.key(),
                role: stage.role(),
                description: stage.description(),
                section: stage.section(),
                depends_on: pipeline.dependencies(stage).to_vec(),
                runs_alongside: pipeline.concurrent_with(stage),
            })
            .collect()
    }

    pub fn report(
        &self,
        application_id: &ApplicationId,
    ) -> Result<UnderwritingReport, UnderwritingServiceError> {
        self.reports()
            .get(application_id)?
            .ok_or_else(|| UnderwritingServiceError::ReportNotFound(application_id.clone()))
    }

    /// Every report stored for the application, newest first; empty when none exist.
    pub fn report_history(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<UnderwritingReport>, UnderwritingServiceError> {
        Ok(self.reports().history(application_id)?)
    }

    pub fn report_summaries(&self) -> Result<Vec<ReportSummary>, UnderwritingServiceError> {
        let mut summaries: Vec<ReportSummary> =
            self.reports().list()?.iter().map(ReportSummary::from).collect();
        summaries.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(summaries)
    }

    pub fn dashboard(&self) -> Result<DashboardSummary, UnderwritingServiceError> {
        Ok(DashboardSummary::from_reports(&self.reports().list()?))
    }

    pub fn documents(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<DocumentDescriptor>, UnderwritingServiceError> {
        Ok(self.documents.list(application_id)?)
    }
}
