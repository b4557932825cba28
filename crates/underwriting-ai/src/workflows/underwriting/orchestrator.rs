use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::config::PipelineConfig;

use super::assembler::{ReportAssembler, UnderwritingReport};
use super::domain::{
    Application, ApplicationError, ApplicationId, RunId, StageError, StageKind, StageResult,
};
use super::emitter::ProgressEmitter;
use super::events::{excerpt, EventStatus, ProgressEvent};
use super::invoker::{StageFunction, StageInvoker};
use super::pipeline::StagePipeline;
use super::reports::ReportStore;
use super::state::{RunState, RunStatus};

/// Result of a finished run, as returned to synchronous callers.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub application_id: ApplicationId,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<UnderwritingReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub events: Vec<ProgressEvent>,
    #[serde(skip)]
    pub state: Option<RunState>,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// A validated application with a run id, registered with the emitter but not
/// yet executing. Attach listeners before launching it.
#[derive(Debug)]
pub struct PreparedRun {
    run_id: RunId,
    application: Arc<Application>,
}

impl PreparedRun {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn application(&self) -> &Application {
        &self.application
    }
}

/// Handle on a run executing in its own task.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    application_id: ApplicationId,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub async fn outcome(self) -> RunOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(run_id = %self.run_id, error = %err, "run task aborted");
                RunOutcome {
                    run_id: self.run_id,
                    application_id: self.application_id,
                    status: RunStatus::Failed,
                    report: None,
                    error: Some(format!("run task aborted: {err}")),
                    events: Vec::new(),
                    state: None,
                }
            }
        }
    }
}

/// Drives each run through the stage graph.
#[derive(Clone)]
pub struct UnderwritingOrchestrator {
    pipeline: StagePipeline,
    invoker: StageInvoker,
    emitter: ProgressEmitter,
    assembler: ReportAssembler,
    reports: Arc<dyn ReportStore>,
}

impl UnderwritingOrchestrator {
    pub fn new(
        function: Arc<dyn StageFunction>,
        reports: Arc<dyn ReportStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self::with_components(
            StagePipeline::standard(),
            StageInvoker::new(function, config.stage_timeout),
            ProgressEmitter::new(config.listener_capacity),
            reports,
        )
    }

    pub fn with_components(
        pipeline: StagePipeline,
        invoker: StageInvoker,
        emitter: ProgressEmitter,
        reports: Arc<dyn ReportStore>,
    ) -> Self {
        Self {
            pipeline,
            invoker,
            emitter,
            assembler: ReportAssembler,
            reports,
        }
    }

    pub fn emitter(&self) -> &ProgressEmitter {
        &self.emitter
    }

    pub fn pipeline(&self) -> &StagePipeline {
        &self.pipeline
    }

    pub fn reports(&self) -> &Arc<dyn ReportStore> {
        &self.reports
    }

    pub fn prepare(&self, application: Application) -> Result<PreparedRun, ApplicationError> {
        application.validate()?;
        let run_id = RunId::generate();
        self.emitter.open_run(&run_id);
        Ok(PreparedRun {
            run_id,
            application: Arc::new(application),
        })
    }

    pub fn launch(&self, prepared: PreparedRun) -> RunHandle {
        let orchestrator = self.clone();
        let run_id = prepared.run_id.clone();
        let application_id = prepared.application.application_id.clone();
        let task = tokio::spawn(async move { orchestrator.execute(prepared).await });
        RunHandle {
            run_id,
            application_id,
            task,
        }
    }

    pub fn start(&self, application: Application) -> Result<RunHandle, ApplicationError> {
        let prepared = self.prepare(application)?;
        Ok(self.launch(prepared))
    }

    /// Runs an application to completion and returns the outcome.
    pub async fn process(&self, application: Application) -> Result<RunOutcome, ApplicationError> {
        Ok(self.start(application)?.outcome().await)
    }

    async fn execute(self, prepared: PreparedRun) -> RunOutcome {
        let PreparedRun {
            run_id,
            application,
        } = prepared;
        let mut run = RunContext {
            state: RunState::new(run_id, application.application_id.clone(), Utc::now()),
            events: Vec::new(),
            emitter: self.emitter.clone(),
        };
        if let Err(err) = run.state.begin() {
            error!(error = %err, "run could not begin");
        }
        info!(
            run_id = %run.state.run_id(),
            application_id = %application.application_id,
            "underwriting run started"
        );

        for stage in self.pipeline.stages() {
            run.emit_stage(stage, EventStatus::Pending, format!("{} queued", stage.role()), None);
        }

        let mut in_flight: JoinSet<(StageKind, Result<StageResult, StageError>)> = JoinSet::new();
        loop {
            let readiness = self.pipeline.ready_stages(&run.state);

            for (stage, dependency) in readiness.skipped {
                if let Err(err) = run.state.mark_skipped(stage) {
                    error!(error = %err, "skip rejected");
                    continue;
                }
                let reason = StageError::DependencyFailed { stage, dependency };
                info!(run_id = %run.state.run_id(), %stage, %dependency, "stage skipped");
                run.emit_stage(
                    stage,
                    EventStatus::Skipped,
                    reason.to_string(),
                    Some(json!({ "error_kind": reason.kind(), "dependency": dependency })),
                );
            }

            for stage in readiness.ready {
                if let Err(err) = run.state.mark_dispatched(stage) {
                    error!(error = %err, "dispatch rejected");
                    continue;
                }
                run.emit_stage(
                    stage,
                    EventStatus::Running,
                    format!("{} is analysing the application", stage.role()),
                    None,
                );
                let invoker = self.invoker.clone();
                let application = Arc::clone(&application);
                let prior = self.pipeline.prior_outputs(stage, &run.state);
                in_flight.spawn(async move {
                    let result = AssertUnwindSafe(invoker.invoke(stage, application, prior))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(StageError::UpstreamError {
                                stage,
                                message: "stage function panicked".to_string(),
                            })
                        });
                    (stage, result)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            match joined {
                Ok((stage, Ok(result))) => {
                    let preview = excerpt(&result.payload);
                    if let Err(err) = run.state.record(result) {
                        error!(error = %err, "stage result rejected");
                        continue;
                    }
                    info!(run_id = %run.state.run_id(), %stage, "stage completed");
                    run.emit_stage(
                        stage,
                        EventStatus::Completed,
                        format!("{} completed", stage.role()),
                        preview,
                    );
                }
                Ok((stage, Err(stage_error))) => {
                    warn!(
                        run_id = %run.state.run_id(),
                        %stage,
                        kind = stage_error.kind(),
                        error = %stage_error,
                        "stage failed"
                    );
                    run.fail_stage(stage, &stage_error);
                }
                Err(err) => {
                    error!(run_id = %run.state.run_id(), error = %err, "stage task lost");
                }
            }
        }

        // Anything still dispatched lost its task; anything pending can no longer run.
        for stage in run.state.in_flight() {
            let lost = StageError::UpstreamError {
                stage,
                message: "stage task ended without a result".to_string(),
            };
            run.fail_stage(stage, &lost);
        }
        let stranded: Vec<StageKind> = self
            .pipeline
            .stages()
            .filter(|stage| !run.state.stage_status(*stage).is_terminal())
            .collect();
        for stage in stranded {
            if run.state.mark_skipped(stage).is_ok() {
                run.emit_stage(stage, EventStatus::Skipped, "stage could not be scheduled", None);
            }
        }

        self.finish(run, &application)
    }

    fn finish(&self, mut run: RunContext, application: &Application) -> RunOutcome {
        let report = match self.assembler.assemble(application, &run.state) {
            Ok(report) => report,
            Err(err) => {
                let root_error = run
                    .state
                    .result(self.pipeline.root())
                    .and_then(|result| result.payload.get("error"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string());
                if let Err(transition) = run.state.finish(RunStatus::Failed) {
                    error!(error = %transition, "run finish rejected");
                }
                warn!(run_id = %run.state.run_id(), error = %root_error, "underwriting run failed");
                run.emit_run(
                    EventStatus::RunFailed,
                    format!("Underwriting failed: {root_error}"),
                    Some(json!({
                        "stage": self.pipeline.root(),
                        "error": root_error,
                    })),
                );
                return run.into_outcome(None, Some(root_error));
            }
        };

        if let Err(err) = self.reports.put(&report) {
            warn!(
                run_id = %run.state.run_id(),
                error = %err,
                "report could not be stored; returning it to listeners only"
            );
        }
        if let Err(transition) = run.state.finish(RunStatus::Completed) {
            error!(error = %transition, "run finish rejected");
        }

        info!(
            run_id = %run.state.run_id(),
            application_id = %report.application_id(),
            decision = %report.final_decision,
            total_final_premium = report.total_final_premium,
            "underwriting run completed"
        );
        let payload = serde_json::to_value(&report).ok();
        run.emit_run(
            EventStatus::RunCompleted,
            format!("Underwriting completed: {}", report.final_decision),
            payload,
        );
        run.into_outcome(Some(report), None)
    }
}

/// Per-run bookkeeping owned by the executing task.
struct RunContext {
    state: RunState,
    events: Vec<ProgressEvent>,
    emitter: ProgressEmitter,
}

impl RunContext {
    fn emit_stage(
        &mut self,
        stage: StageKind,
        status: EventStatus,
        message: impl Into<String>,
        payload: Option<Value>,
    ) {
        let event = ProgressEvent::for_stage(&mut self.state, stage, status, message, payload);
        self.publish(event);
    }

    fn emit_run(&mut self, status: EventStatus, message: impl Into<String>, payload: Option<Value>) {
        let event = ProgressEvent::for_run(&mut self.state, status, message, payload);
        self.publish(event);
    }

    fn publish(&mut self, event: ProgressEvent) {
        self.emitter.publish(&event);
        self.events.push(event);
    }

    fn fail_stage(&mut self, stage: StageKind, stage_error: &StageError) {
        let result = StageResult::failed(stage, stage_error, Utc::now());
        let payload = result.payload.clone();
        if let Err(err) = self.state.record(result) {
            error!(error = %err, "stage failure rejected");
            return;
        }
        self.emit_stage(
            stage,
            EventStatus::Failed,
            stage_error.to_string(),
            Some(payload),
        );
    }

    fn into_outcome(self, report: Option<UnderwritingReport>, error: Option<String>) -> RunOutcome {
        RunOutcome {
            run_id: self.state.run_id().clone(),
            application_id: self.state.application_id().clone(),
            status: self.state.status(),
            report,
            error,
            events: self.events,
            state: Some(self.state),
        }
    }
}
