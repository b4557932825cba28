use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;
use underwriting_ai::config::AppConfig;
use underwriting_ai::error::AppError;
use underwriting_ai::workflows::underwriting::{
    sample_application, HostedModelStages, InMemoryDocumentStore, InMemoryReportStore,
    JsonFileReportStore, ReportStore, RuleBasedStages, StageFunction, UnderwritingOrchestrator,
    UnderwritingService,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Hosted model stages when an endpoint is configured, rule tables otherwise.
pub(crate) fn stage_function(config: &AppConfig) -> Result<Arc<dyn StageFunction>, AppError> {
    match &config.model {
        Some(model) => {
            info!(endpoint = %model.endpoint, model = %model.model, "using hosted model stages");
            Ok(Arc::new(HostedModelStages::new(model.clone())?))
        }
        None => {
            info!("no model endpoint configured; using rule-based stages");
            Ok(Arc::new(RuleBasedStages))
        }
    }
}

pub(crate) fn report_store(config: &AppConfig) -> Result<Arc<dyn ReportStore>, AppError> {
    match &config.storage.report_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "persisting reports to disk");
            Ok(Arc::new(JsonFileReportStore::open(dir)?))
        }
        None => Ok(Arc::new(InMemoryReportStore::new())),
    }
}

/// Document catalogue seeded with the demo application's lab reports.
pub(crate) fn document_store() -> Arc<InMemoryDocumentStore> {
    let documents = InMemoryDocumentStore::new();
    documents.register(&sample_application(), chrono::Utc::now());
    Arc::new(documents)
}

pub(crate) fn underwriting_service(
    config: &AppConfig,
    stages: Arc<dyn StageFunction>,
) -> Result<Arc<UnderwritingService>, AppError> {
    let orchestrator =
        UnderwritingOrchestrator::new(stages, report_store(config)?, &config.pipeline);
    Ok(Arc::new(UnderwritingService::new(
        orchestrator,
        document_store(),
    )))
}
