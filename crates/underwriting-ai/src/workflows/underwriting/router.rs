use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::{stream, SinkExt, Stream, StreamExt};
use serde_json::json;
use tracing::{debug, warn};

use super::documents::DocumentStoreError;
use super::domain::{Application, ApplicationId, RunId};
use super::emitter::{ClientId, Delivery, Listener};
use super::orchestrator::RunOutcome;
use super::reports::DashboardData;
use super::sample::sample_application;
use super::service::{UnderwritingService, UnderwritingServiceError};
use super::session::{ClientSession, ServerMessage};

const WORKFLOW_SUMMARY: &str =
    "medical_review -> (fraud_detection || risk_assessment) -> premium_calculation -> final_decision";

/// Router exposing processing, streaming and reporting endpoints.
pub fn underwriting_router(service: Arc<UnderwritingService>) -> Router {
    Router::new()
        .route("/api/v1/underwriting/process", post(process_handler))
        .route("/api/v1/underwriting/process/stream", post(stream_handler))
        .route("/api/v1/underwriting/runs/:run_id/events", get(reconnect_handler))
        .route("/api/v1/underwriting/ws/:client_id", get(websocket_handler))
        .route("/api/v1/underwriting/stages", get(stages_handler))
        .route("/api/v1/underwriting/sample-data", get(sample_data_handler))
        .route("/api/v1/underwriting/demo", post(demo_handler))
        .route("/api/v1/underwriting/reports", get(reports_handler))
        .route(
            "/api/v1/underwriting/reports/:application_id",
            get(report_handler),
        )
        .route(
            "/api/v1/underwriting/reports/:application_id/all",
            get(report_history_handler),
        )
        .route("/api/v1/underwriting/dashboard-data", get(dashboard_handler))
        .route(
            "/api/v1/underwriting/documents/:application_id",
            get(documents_handler),
        )
        .with_state(service)
}

fn error_response(error: UnderwritingServiceError) -> Response {
    let status = match &error {
        UnderwritingServiceError::Application(_) => StatusCode::UNPROCESSABLE_ENTITY,
        UnderwritingServiceError::ReportNotFound(_)
        | UnderwritingServiceError::UnknownRun(_)
        | UnderwritingServiceError::Documents(DocumentStoreError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        UnderwritingServiceError::Documents(DocumentStoreError::Unauthorized) => {
            StatusCode::UNAUTHORIZED
        }
        UnderwritingServiceError::Documents(DocumentStoreError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        UnderwritingServiceError::Reports(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = json!({
        "error": error.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

fn outcome_response(outcome: RunOutcome) -> Response {
    let processing_timestamp = outcome
        .events
        .last()
        .map(|event| event.timestamp)
        .unwrap_or_else(chrono::Utc::now);
    let applicant_name = outcome
        .report
        .as_ref()
        .map(|report| report.application_metadata.applicant_name.clone());
    let payload = json!({
        "run_id": outcome.run_id,
        "application_id": outcome.application_id,
        "applicant_name": applicant_name,
        "status": outcome.status,
        "processing_timestamp": processing_timestamp,
        "events": outcome.events,
        "report": outcome.report,
        "error": outcome.error,
    });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

pub(crate) async fn process_handler(
    State(service): State<Arc<UnderwritingService>>,
    axum::Json(application): axum::Json<Application>,
) -> Response {
    match service.process(application).await {
        Ok(outcome) => outcome_response(outcome),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn demo_handler(State(service): State<Arc<UnderwritingService>>) -> Response {
    match service.process(sample_application()).await {
        Ok(outcome) => outcome_response(outcome),
        Err(error) => error_response(error),
    }
}

fn sse_event(delivery: Delivery) -> Result<Event, axum::Error> {
    match delivery {
        Delivery::Event(event) => {
            let name = if event.is_terminal() { "complete" } else { "progress" };
            Event::default()
                .event(name)
                .id(event.event_id.clone())
                .json_data(&event)
        }
        Delivery::Lagged { dropped } => Event::default()
            .event("lagged")
            .json_data(json!({ "dropped": dropped })),
    }
}

fn listener_stream(listener: Listener) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(listener, |mut listener| async move {
        let delivery = listener.recv().await?;
        Some((sse_event(delivery), listener))
    })
}

pub(crate) async fn stream_handler(
    State(service): State<Arc<UnderwritingService>>,
    axum::Json(application): axum::Json<Application>,
) -> Response {
    match service.stream(application) {
        Ok(run) => {
            debug!(run_id = %run.handle.run_id(), "streaming run over sse");
            Sse::new(listener_stream(run.listener))
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn reconnect_handler(
    State(service): State<Arc<UnderwritingService>>,
    Path(run_id): Path<String>,
) -> Response {
    match service.reconnect(&RunId(run_id)) {
        Ok(listener) => Sse::new(listener_stream(listener))
            .keep_alive(KeepAlive::default())
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(service): State<Arc<UnderwritingService>>,
    Path(client_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| client_socket(socket, service, ClientId(client_id)))
}

async fn client_socket(socket: WebSocket, service: Arc<UnderwritingService>, client_id: ClientId) {
    let mut session = ClientSession::open(service, client_id);
    let (mut sender, mut receiver) = socket.split();

    loop {
        let outbound = tokio::select! {
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => session.handle_text(&text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    debug!(client_id = %session.client_id(), error = %err, "socket read failed");
                    break;
                }
            },
            queued = session.next_message() => match queued {
                Some(message) => message,
                None => break,
            },
        };

        let text = match serde_json::to_string(&outbound) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "could not encode client message");
                continue;
            }
        };
        if sender.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}

pub(crate) async fn stages_handler(State(service): State<Arc<UnderwritingService>>) -> Response {
    let stages = service.stages();
    (
        StatusCode::OK,
        axum::Json(json!({
            "total_stages": stages.len(),
            "workflow": WORKFLOW_SUMMARY,
            "stages": stages,
        })),
    )
        .into_response()
}

pub(crate) async fn sample_data_handler() -> Response {
    (StatusCode::OK, axum::Json(sample_application())).into_response()
}

pub(crate) async fn reports_handler(State(service): State<Arc<UnderwritingService>>) -> Response {
    match service.report_summaries() {
        Ok(reports) => (
            StatusCode::OK,
            axum::Json(json!({
                "count": reports.len(),
                "reports": reports,
            })),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn report_handler(
    State(service): State<Arc<UnderwritingService>>,
    Path(application_id): Path<String>,
) -> Response {
    match service.report(&ApplicationId(application_id)) {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn report_history_handler(
    State(service): State<Arc<UnderwritingService>>,
    Path(application_id): Path<String>,
) -> Response {
    let id = ApplicationId(application_id);
    match service.report_history(&id) {
        Ok(reports) => (
            StatusCode::OK,
            axum::Json(json!({
                "application_id": id,
                "total": reports.len(),
                "reports": reports,
            })),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn dashboard_handler(
    State(service): State<Arc<UnderwritingService>>,
) -> Response {
    let (totals, reports) = match (service.dashboard(), service.report_summaries()) {
        (Ok(totals), Ok(reports)) => (totals, reports),
        (Err(error), _) | (_, Err(error)) => return error_response(error),
    };
    (StatusCode::OK, axum::Json(DashboardData { totals, reports })).into_response()
}

pub(crate) async fn documents_handler(
    State(service): State<Arc<UnderwritingService>>,
    Path(application_id): Path<String>,
) -> Response {
    let id = ApplicationId(application_id);
    match service.documents(&id) {
        Ok(documents) => (
            StatusCode::OK,
            axum::Json(json!({
                "application_id": id,
                "documents": documents,
            })),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}
