use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use crate::config::PipelineConfig;
use crate::workflows::underwriting::documents::{
    DocumentDescriptor, DocumentStore, DocumentStoreError, InMemoryDocumentStore,
};
use crate::workflows::underwriting::domain::{
    ApplicationId, RunId, StageError, StageKind, StageResult,
};
use crate::workflows::underwriting::events::{EventStatus, ProgressEvent};
use crate::workflows::underwriting::invoker::{
    StageCallError, StageFunction, StageInvoker, StageRequest,
};
use crate::workflows::underwriting::reports::{
    InMemoryReportStore, ReportStore, ReportStoreError,
};
use crate::workflows::underwriting::state::RunState;
use crate::workflows::underwriting::{
    ProgressEmitter, StagePipeline, UnderwritingOrchestrator, UnderwritingReport,
    UnderwritingService,
};

/// What a scripted stage does when invoked.
#[derive(Debug, Clone)]
pub(super) enum Script {
    Succeed(Value),
    Fail(StageCallError),
    Hang,
    Panic,
}

pub(super) fn valid_payload(stage: StageKind) -> Value {
    match stage {
        StageKind::MedicalReview => json!({
            "risk_score": 0.3,
            "abnormal_findings": [{"test": "ldl", "value": 130.0}],
            "critical_alerts": [],
            "summary": "one abnormal lipid value",
        }),
        StageKind::FraudDetection => json!({
            "fraud_score": 0.05,
            "overall_fraud_risk": "LOW",
            "indicators": [],
        }),
        StageKind::RiskAssessment => json!({
            "risk_score": 0.28,
            "risk_level": "standard",
        }),
        StageKind::PremiumCalculation => json!({
            "covers": [
                {"cover_type": "Term Life Insurance", "base_premium": 6000.0, "final_premium": 7020.0},
                {"cover_type": "Accidental Death Benefit", "base_premium": 200.0, "final_premium": 200.0},
            ],
        }),
        StageKind::FinalDecision => json!({
            "decision": "accepted",
            "reasoning": ["within limits"],
        }),
    }
}

/// A run in which every stage settled one second after the previous one.
pub(super) fn settled_state(fraud_fails: bool) -> RunState {
    let started = Utc
        .with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
        .single()
        .expect("valid time");
    let mut state = RunState::new(
        RunId("run_fixed".to_string()),
        ApplicationId("LI2025001".to_string()),
        started,
    );
    for (offset, stage) in StageKind::ordered().into_iter().enumerate() {
        state.mark_dispatched(stage).expect("dispatch");
        let finished = started + chrono::Duration::seconds(offset as i64 + 1);
        let result = if fraud_fails && stage == StageKind::FraudDetection {
            let error = StageError::Timeout {
                stage,
                elapsed_ms: 240_000,
            };
            StageResult::failed(stage, &error, finished)
        } else {
            StageResult::completed(stage, valid_payload(stage), finished)
        };
        state.record(result).expect("record");
    }
    state
}

/// Stage function with per-stage scripted behaviour and a fixed delay.
pub(super) struct ScriptedStages {
    scripts: HashMap<StageKind, Script>,
    delay: Duration,
    requests: Mutex<Vec<StageRequest>>,
}

impl ScriptedStages {
    pub(super) fn happy() -> Self {
        let scripts = StageKind::ordered()
            .into_iter()
            .map(|stage| (stage, Script::Succeed(valid_payload(stage))))
            .collect();
        Self {
            scripts,
            delay: Duration::from_millis(20),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn with(mut self, stage: StageKind, script: Script) -> Self {
        self.scripts.insert(stage, script);
        self
    }

    pub(super) fn calls(&self) -> Vec<StageKind> {
        self.requests().iter().map(|request| request.stage).collect()
    }

    pub(super) fn requests(&self) -> Vec<StageRequest> {
        self.requests.lock().expect("requests mutex poisoned").clone()
    }

    pub(super) fn request_for(&self, stage: StageKind) -> Option<StageRequest> {
        self.requests()
            .into_iter()
            .find(|request| request.stage == stage)
    }
}

#[async_trait]
impl StageFunction for ScriptedStages {
    async fn invoke(&self, request: StageRequest) -> Result<Value, StageCallError> {
        self.requests
            .lock()
            .expect("requests mutex poisoned")
            .push(request.clone());
        tokio::time::sleep(self.delay).await;
        match self.scripts.get(&request.stage).cloned() {
            Some(Script::Succeed(payload)) => Ok(payload),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(valid_payload(request.stage))
            }
            Some(Script::Panic) => panic!("scripted stage panic"),
            None => Err(StageCallError::Upstream("no script".to_string())),
        }
    }
}

pub(super) fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        stage_timeout: Duration::from_secs(5),
        listener_capacity: 64,
    }
}

pub(super) fn orchestrator_with(
    stages: Arc<ScriptedStages>,
    reports: Arc<dyn ReportStore>,
) -> UnderwritingOrchestrator {
    UnderwritingOrchestrator::new(stages, reports, &pipeline_config())
}

pub(super) fn orchestrator_with_invoker(
    invoker: StageInvoker,
    reports: Arc<dyn ReportStore>,
) -> UnderwritingOrchestrator {
    UnderwritingOrchestrator::with_components(
        StagePipeline::standard(),
        invoker,
        ProgressEmitter::new(64),
        reports,
    )
}

pub(super) fn service_with(
    stages: Arc<dyn StageFunction>,
    documents: Arc<dyn DocumentStore>,
) -> (Arc<UnderwritingService>, Arc<InMemoryReportStore>) {
    let reports = Arc::new(InMemoryReportStore::new());
    let orchestrator = UnderwritingOrchestrator::new(stages, reports.clone(), &pipeline_config());
    (
        Arc::new(UnderwritingService::new(orchestrator, documents)),
        reports,
    )
}

pub(super) fn documents_for_sample() -> Arc<InMemoryDocumentStore> {
    let store = InMemoryDocumentStore::new();
    store.register(
        &crate::workflows::underwriting::sample_application(),
        Utc::now(),
    );
    Arc::new(store)
}

pub(super) struct DeniedDocuments;

impl DocumentStore for DeniedDocuments {
    fn list(
        &self,
        _application_id: &ApplicationId,
    ) -> Result<Vec<DocumentDescriptor>, DocumentStoreError> {
        Err(DocumentStoreError::Unauthorized)
    }
}

pub(super) struct UnavailableReports;

impl ReportStore for UnavailableReports {
    fn put(&self, _report: &UnderwritingReport) -> Result<(), ReportStoreError> {
        Err(ReportStoreError::Unavailable("store offline".to_string()))
    }

    fn history(
        &self,
        _application_id: &ApplicationId,
    ) -> Result<Vec<UnderwritingReport>, ReportStoreError> {
        Err(ReportStoreError::Unavailable("store offline".to_string()))
    }

    fn list(&self) -> Result<Vec<UnderwritingReport>, ReportStoreError> {
        Err(ReportStoreError::Unavailable("store offline".to_string()))
    }
}

pub(super) fn event(run_id: &str, sequence: u64, status: EventStatus) -> ProgressEvent {
    ProgressEvent {
        event_id: format!("evt_{run_id}_{sequence:04}"),
        run_id: RunId(run_id.to_string()),
        application_id: ApplicationId("LI2025001".to_string()),
        sequence,
        stage_name: StageKind::MedicalReview.key().to_string(),
        stage_role: StageKind::MedicalReview.role().to_string(),
        status,
        message: format!("event {sequence}"),
        payload: None,
        timestamp: Utc::now(),
    }
}

/// Position of the first event matching the stage and status.
pub(super) fn position(events: &[ProgressEvent], stage: StageKind, status: EventStatus) -> usize {
    events
        .iter()
        .position(|event| event.stage() == Some(stage) && event.status == status)
        .unwrap_or_else(|| panic!("no {status:?} event for {stage}"))
}

pub(super) fn statuses_for(events: &[ProgressEvent], stage: StageKind) -> Vec<EventStatus> {
    events
        .iter()
        .filter(|event| event.stage() == Some(stage))
        .map(|event| event.status)
        .collect()
}
