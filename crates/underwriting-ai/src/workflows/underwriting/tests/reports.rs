use std::path::PathBuf;

use chrono::Duration;

use super::common::*;

use crate::workflows::underwriting::assembler::{ReportAssembler, UnderwritingReport};
use crate::workflows::underwriting::domain::{ApplicationId, FinalDecision, RunId};
use crate::workflows::underwriting::reports::{
    InMemoryReportStore, JsonFileReportStore, ReportStore, ReportStoreError,
};
use crate::workflows::underwriting::sample::sample_application;

fn report(application_id: &str, run_id: &str, minutes_later: i64) -> UnderwritingReport {
    let mut report = ReportAssembler
        .assemble(&sample_application(), &settled_state(false))
        .expect("report");
    let metadata = &mut report.application_metadata;
    metadata.application_id = ApplicationId(application_id.to_string());
    metadata.run_id = RunId(run_id.to_string());
    metadata.completed_at += Duration::minutes(minutes_later);
    report
}

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("underwriting-reports-{}", uuid::Uuid::new_v4()))
}

fn run_ids(reports: &[UnderwritingReport]) -> Vec<&str> {
    reports
        .iter()
        .map(|report| report.run_id().0.as_str())
        .collect()
}

fn assert_keeps_every_run(store: &dyn ReportStore) {
    store.put(&report("LI2025001", "run_a", 0)).expect("put a");
    store.put(&report("LI2025001", "run_b", 10)).expect("put b");
    store.put(&report("LI2025001", "run_c", 5)).expect("put c");
    store.put(&report("LI2025002", "run_d", 1)).expect("put d");

    let id = ApplicationId("LI2025001".to_string());
    let history = store.history(&id).expect("history");
    assert_eq!(run_ids(&history), vec!["run_b", "run_c", "run_a"]);

    let current = store.get(&id).expect("readable").expect("present");
    assert_eq!(current.run_id().0, "run_b");

    let listed = store.list().expect("listable");
    assert_eq!(run_ids(&listed), vec!["run_b", "run_d"]);

    assert!(store
        .history(&ApplicationId("LI0000000".to_string()))
        .expect("history")
        .is_empty());
}

#[test]
fn in_memory_store_keeps_every_run_newest_first() {
    assert_keeps_every_run(&InMemoryReportStore::new());
}

#[test]
fn json_file_store_keeps_every_run_newest_first() {
    let dir = scratch_dir();
    let store = JsonFileReportStore::open(&dir).expect("store opens");
    assert_keeps_every_run(&store);
    std::fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn in_memory_store_replaces_a_report_from_the_same_run() {
    let store = InMemoryReportStore::new();
    let mut first = report("LI2025001", "run_a", 0);
    store.put(&first).expect("put");
    first.final_decision = FinalDecision::Declined;
    store.put(&first).expect("replace");

    let history = store
        .history(&ApplicationId("LI2025001".to_string()))
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].final_decision, FinalDecision::Declined);
}

#[test]
fn json_file_store_never_merges_distinct_application_ids() {
    let dir = scratch_dir();
    let store = JsonFileReportStore::open(&dir).expect("store opens");

    store.put(&report("LI_1", "run_a", 0)).expect("put underscore");
    for lookalike in ["LI/1", "LI.1", "LI 1", "../LI_1"] {
        assert!(
            store
                .get(&ApplicationId(lookalike.to_string()))
                .expect("readable")
                .is_none(),
            "{lookalike} must not resolve to LI_1"
        );
    }

    let mut dotted = report("LI.1", "run_b", 0);
    dotted.final_decision = FinalDecision::Declined;
    store.put(&dotted).expect("put dotted");

    let underscore = store
        .get(&ApplicationId("LI_1".to_string()))
        .expect("readable")
        .expect("present");
    assert_eq!(underscore.run_id().0, "run_a");
    let dotted = store
        .get(&ApplicationId("LI.1".to_string()))
        .expect("readable")
        .expect("present");
    assert_eq!(dotted.final_decision, FinalDecision::Declined);
    assert_eq!(store.list().expect("listable").len(), 2);

    std::fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn json_file_store_accepts_concurrent_runs_for_one_application() {
    let dir = scratch_dir();
    let store = JsonFileReportStore::open(&dir).expect("store opens");
    let reports: Vec<UnderwritingReport> = (0..8)
        .map(|index| report("LI2025001", &format!("run_{index}"), index))
        .collect();

    std::thread::scope(|scope| {
        let handles: Vec<_> = reports
            .iter()
            .map(|report| {
                let store = &store;
                scope.spawn(move || {
                    for _ in 0..5 {
                        store.put(report)?;
                    }
                    Ok::<(), ReportStoreError>(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread").expect("put succeeds");
        }
    });

    let history = store
        .history(&ApplicationId("LI2025001".to_string()))
        .expect("history");
    assert_eq!(history.len(), 8);
    assert_eq!(history[0].run_id().0, "run_7");

    let leftovers = std::fs::read_dir(dir.join(hex::encode("LI2025001")))
        .expect("application dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("tmp"))
        .count();
    assert_eq!(leftovers, 0);

    std::fs::remove_dir_all(&dir).expect("cleanup");
}
