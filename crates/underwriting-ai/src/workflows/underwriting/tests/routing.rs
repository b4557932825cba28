use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use serde_json::Value;
use tower::ServiceExt;

use super::common::*;

use crate::workflows::underwriting::reports::ReportStore;
use crate::workflows::underwriting::router::{self, underwriting_router};
use crate::workflows::underwriting::sample::sample_application;
use crate::workflows::underwriting::stages::RuleBasedStages;

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}

fn post_json(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serializes")))
        .expect("request builds")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request builds")
}

#[tokio::test]
async fn process_route_returns_completed_run_with_report() {
    let (service, reports) = service_with(Arc::new(RuleBasedStages), documents_for_sample());
    let router = underwriting_router(service);

    let response = router
        .oneshot(post_json("/api/v1/underwriting/process", &sample_application()))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["application_id"], "LI2025001");
    assert_eq!(body["applicant_name"], "Rajesh Kumar");
    assert!(body["run_id"].as_str().is_some_and(|id| id.starts_with("run_")));
    assert!(body["events"].as_array().is_some_and(|events| events.len() >= 16));
    let decision = body["report"]["final_decision"].as_str().expect("decision");
    assert!([
        "accepted",
        "additional_requirements",
        "declined",
        "manual_review"
    ]
    .contains(&decision));
    assert_eq!(reports.list().expect("listable").len(), 1);
}

#[tokio::test]
async fn process_handler_rejects_invalid_applications() {
    let (service, _) = service_with(Arc::new(RuleBasedStages), documents_for_sample());
    let mut application = sample_application();
    application.applicant.age = 12;

    let response = router::process_handler(State(service), axum::Json(application)).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert!(body["error"]
        .as_str()
        .is_some_and(|error| error.contains("12")));
}

#[tokio::test]
async fn reports_are_listed_after_the_demo_run() {
    let (service, _) = service_with(Arc::new(RuleBasedStages), documents_for_sample());
    let router = underwriting_router(service);

    let missing = router
        .clone()
        .oneshot(get("/api/v1/underwriting/reports/LI2025001"))
        .await
        .expect("router responds");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let demo = router
        .clone()
        .oneshot(
            Request::post("/api/v1/underwriting/demo")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("router responds");
    assert_eq!(demo.status(), StatusCode::OK);

    let found = router
        .clone()
        .oneshot(get("/api/v1/underwriting/reports/LI2025001"))
        .await
        .expect("router responds");
    assert_eq!(found.status(), StatusCode::OK);
    let report = json_body(found).await;
    assert_eq!(report["application_metadata"]["applicant_name"], "Rajesh Kumar");

    let listing = json_body(
        router
            .clone()
            .oneshot(get("/api/v1/underwriting/reports"))
            .await
            .expect("router responds"),
    )
    .await;
    assert_eq!(listing["count"], 1);

    let dashboard = json_body(
        router
            .oneshot(get("/api/v1/underwriting/dashboard-data"))
            .await
            .expect("router responds"),
    )
    .await;
    assert_eq!(dashboard["total_applications"], 1);
    assert_eq!(dashboard["total_additional_requirements"], 1);
    assert_eq!(dashboard["reports"][0]["applicant_name"], "Rajesh Kumar");
}

#[tokio::test]
async fn report_history_returns_every_run_newest_first() {
    let (service, _) = service_with(Arc::new(RuleBasedStages), documents_for_sample());
    let router = underwriting_router(service);

    let mut run_ids = Vec::new();
    for _ in 0..2 {
        let outcome = json_body(
            router
                .clone()
                .oneshot(post_json(
                    "/api/v1/underwriting/process",
                    &sample_application(),
                ))
                .await
                .expect("router responds"),
        )
        .await;
        run_ids.push(outcome["run_id"].as_str().expect("run id").to_string());
    }

    let response = router
        .clone()
        .oneshot(get("/api/v1/underwriting/reports/LI2025001/all"))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["application_id"], "LI2025001");
    assert_eq!(body["total"], 2);

    let reports = body["reports"].as_array().expect("reports");
    let mut listed: Vec<String> = reports
        .iter()
        .map(|report| {
            report["application_metadata"]["run_id"]
                .as_str()
                .expect("run id")
                .to_string()
        })
        .collect();
    let completed: Vec<chrono::DateTime<chrono::Utc>> = reports
        .iter()
        .map(|report| {
            serde_json::from_value(report["application_metadata"]["completed_at"].clone())
                .expect("timestamp")
        })
        .collect();
    assert!(completed[0] >= completed[1]);
    listed.sort();
    run_ids.sort();
    assert_eq!(listed, run_ids);

    let unknown = json_body(
        router
            .oneshot(get("/api/v1/underwriting/reports/LI0000000/all"))
            .await
            .expect("router responds"),
    )
    .await;
    assert_eq!(unknown["total"], 0);
    assert_eq!(unknown["reports"], serde_json::json!([]));
}

#[tokio::test]
async fn report_listing_surfaces_store_outages() {
    let orchestrator = orchestrator_with(
        Arc::new(ScriptedStages::happy()),
        Arc::new(UnavailableReports),
    );
    let service = Arc::new(
        crate::workflows::underwriting::UnderwritingService::new(
            orchestrator,
            documents_for_sample(),
        ),
    );

    let response = router::reports_handler(State(service.clone())).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let history =
        router::report_history_handler(State(service), Path("LI2025001".to_string())).await;
    assert_eq!(history.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn documents_route_maps_store_errors() {
    let (service, _) = service_with(Arc::new(RuleBasedStages), documents_for_sample());
    let found = router::documents_handler(
        State(service.clone()),
        Path("LI2025001".to_string()),
    )
    .await;
    assert_eq!(found.status(), StatusCode::OK);
    let body = json_body(found).await;
    assert_eq!(body["documents"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["documents"][0]["content_type"], "application/pdf");

    let missing =
        router::documents_handler(State(service), Path("LI0000000".to_string())).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let (denied, _) = service_with(Arc::new(RuleBasedStages), Arc::new(DeniedDocuments));
    let unauthorized =
        router::documents_handler(State(denied), Path("LI2025001".to_string())).await;
    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stages_route_describes_the_graph() {
    let (service, _) = service_with(Arc::new(RuleBasedStages), documents_for_sample());
    let body = json_body(router::stages_handler(State(service)).await).await;

    assert_eq!(body["total_stages"], 5);
    assert_eq!(body["stages"][0]["key"], "medical_review");
    assert_eq!(body["stages"][4]["order"], 5);
    assert!(body["workflow"].as_str().is_some_and(|flow| flow.starts_with("medical_review")));
    assert_eq!(body["stages"][1]["runs_alongside"][0], "risk_assessment");
    assert_eq!(body["stages"][3]["depends_on"][2]["kind"], "advisory");
}

#[tokio::test]
async fn sample_data_route_returns_the_demo_application() {
    let body = json_body(router::sample_data_handler().await).await;
    assert_eq!(body["application_id"], "LI2025001");
    assert_eq!(body["coverage"]["covers"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn stream_route_emits_progress_then_completion() {
    let (service, _) = service_with(Arc::new(RuleBasedStages), documents_for_sample());
    let router = underwriting_router(service);

    let response = router
        .oneshot(post_json(
            "/api/v1/underwriting/process/stream",
            &sample_application(),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("stream ends after the terminal event");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(text.contains("event: progress"));
    assert!(text.contains("event: complete"));
    assert!(text.contains("\"status\":\"run_completed\""));
}

#[tokio::test]
async fn reconnect_route_rejects_unknown_runs() {
    let (service, _) = service_with(Arc::new(RuleBasedStages), documents_for_sample());
    let response =
        router::reconnect_handler(State(service), Path("run_unknown".to_string())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reconnect_after_completion_replays_the_terminal_event() {
    let (service, _) = service_with(Arc::new(RuleBasedStages), documents_for_sample());
    let outcome = service
        .process(sample_application())
        .await
        .expect("valid application");

    let response =
        router::reconnect_handler(State(service), Path(outcome.run_id.0.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("stream ends");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert_eq!(text.matches("event: complete").count(), 1);
    assert!(!text.contains("event: progress"));
}
