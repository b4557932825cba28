use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use super::common::*;

use crate::workflows::underwriting::assembler::{AssemblyError, ReportAssembler};
use crate::workflows::underwriting::domain::{
    ApplicationId, FinalDecision, RunId, StageKind, StageStatus,
};
use crate::workflows::underwriting::reports::{
    DashboardSummary, InMemoryReportStore, JsonFileReportStore, ReportStore,
};
use crate::workflows::underwriting::sample::sample_application;
use crate::workflows::underwriting::stages::RuleBasedStages;
use crate::workflows::underwriting::state::RunState;
use crate::workflows::underwriting::UnderwritingOrchestrator;

#[test]
fn assembling_twice_yields_identical_reports() {
    let application = sample_application();
    let state = settled_state(false);
    let assembler = ReportAssembler;

    let first = assembler.assemble(&application, &state).expect("report");
    let second = assembler.assemble(&application, &state).expect("report");

    assert_eq!(
        serde_json::to_string(&first).expect("serializes"),
        serde_json::to_string(&second).expect("serializes")
    );
    assert_eq!(first.application_metadata.processing_time_seconds, 5.0);
    assert_eq!(first.final_decision, FinalDecision::Accepted);
    assert_eq!(first.risk_category, "standard");
}

#[test]
fn report_requires_completed_medical_review() {
    let application = sample_application();
    let state = RunState::new(
        RunId("run_empty".to_string()),
        ApplicationId("LI2025001".to_string()),
        Utc::now(),
    );
    let err = ReportAssembler
        .assemble(&application, &state)
        .expect_err("medical missing");
    assert_eq!(err, AssemblyError::MissingRoot(StageKind::MedicalReview));
}

#[test]
fn defaulted_sections_lower_confidence() {
    let application = sample_application();
    let complete = ReportAssembler
        .assemble(&application, &settled_state(false))
        .expect("report");
    let degraded = ReportAssembler
        .assemble(&application, &settled_state(true))
        .expect("report");

    assert!(degraded.sections.fraud.defaulted);
    assert_eq!(degraded.sections.fraud.status, StageStatus::Failed);
    assert_eq!(degraded.sections.fraud.content["fraud_score"], json!(0.0));
    assert!(degraded.confidence_score < complete.confidence_score);
    assert!((0.5..=1.0).contains(&degraded.confidence_score));
}

#[test]
fn dashboard_counts_decisions_and_pending_reports() {
    let application = sample_application();
    let accepted = ReportAssembler
        .assemble(&application, &settled_state(false))
        .expect("report");
    let mut pending = accepted.clone();
    pending.sections.decision.defaulted = true;
    pending.final_decision = FinalDecision::ManualReview;

    let summary = DashboardSummary::from_reports(&[accepted, pending]);
    assert_eq!(summary.total_applications, 2);
    assert_eq!(summary.total_accepted, 1);
    assert_eq!(summary.total_pending, 1);
    assert_eq!(summary.total_premium_value, 14440.0);
    assert_eq!(summary.average_processing_time, 5.0);
}

#[tokio::test]
async fn sample_application_end_to_end_with_rule_tables() {
    let reports = Arc::new(InMemoryReportStore::new());
    let orchestrator = UnderwritingOrchestrator::new(
        Arc::new(RuleBasedStages),
        reports.clone(),
        &pipeline_config(),
    );

    let outcome = orchestrator
        .process(sample_application())
        .await
        .expect("valid application");
    let report = outcome.report.expect("report");

    assert_eq!(report.application_id().0, "LI2025001");
    assert_eq!(report.final_decision, FinalDecision::AdditionalRequirements);
    assert!(report.total_final_premium >= report.total_base_premium);
    assert_eq!(report.total_base_premium, 7800.0);
    assert_eq!(report.sections.defaulted(), 0);

    let state = outcome.state.expect("state");
    let again = ReportAssembler
        .assemble(&sample_application(), &state)
        .expect("report");
    assert_eq!(again, report);
}

#[test]
fn json_file_store_replaces_a_report_from_the_same_run() {
    let dir = std::env::temp_dir().join(format!("underwriting-reports-{}", uuid::Uuid::new_v4()));
    let store = JsonFileReportStore::open(&dir).expect("store opens");
    let application = sample_application();
    let mut report = ReportAssembler
        .assemble(&application, &settled_state(false))
        .expect("report");

    store.put(&report).expect("first write");
    report.final_decision = FinalDecision::Declined;
    store.put(&report).expect("overwrite");

    let stored = store
        .get(report.application_id())
        .expect("readable")
        .expect("present");
    assert_eq!(stored.final_decision, FinalDecision::Declined);
    assert_eq!(store.list().expect("listable").len(), 1);
    assert!(store
        .get(&ApplicationId("LI0000000".to_string()))
        .expect("readable")
        .is_none());

    std::fs::remove_dir_all(&dir).expect("cleanup");
}
