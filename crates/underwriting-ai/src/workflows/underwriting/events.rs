use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::domain::{ApplicationId, RunId, StageKind};
use super::state::RunState;

/// Stage name carried by run-level events.
pub const WORKFLOW_STAGE_NAME: &str = "workflow";
pub const WORKFLOW_ROLE: &str = "Workflow Orchestrator";

/// Upper bound on string fields copied into a completion excerpt.
pub const EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    RunCompleted,
    RunFailed,
}

impl EventStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::RunCompleted | Self::RunFailed)
    }
}

/// A progress notification for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event_id: String,
    pub run_id: RunId,
    pub application_id: ApplicationId,
    pub sequence: u64,
    pub stage_name: String,
    pub stage_role: String,
    pub status: EventStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Builds a stage-level event, consuming the next sequence number of the run.
    pub fn for_stage(
        state: &mut RunState,
        stage: StageKind,
        status: EventStatus,
        message: impl Into<String>,
        payload: Option<Value>,
    ) -> Self {
        Self::build(
            state,
            stage.key().to_string(),
            stage.role().to_string(),
            status,
            message.into(),
            payload,
        )
    }

    /// Builds a run-level event (`run_completed` / `run_failed`).
    pub fn for_run(
        state: &mut RunState,
        status: EventStatus,
        message: impl Into<String>,
        payload: Option<Value>,
    ) -> Self {
        Self::build(
            state,
            WORKFLOW_STAGE_NAME.to_string(),
            WORKFLOW_ROLE.to_string(),
            status,
            message.into(),
            payload,
        )
    }

    fn build(
        state: &mut RunState,
        stage_name: String,
        stage_role: String,
        status: EventStatus,
        message: String,
        payload: Option<Value>,
    ) -> Self {
        let sequence = state.next_sequence();
        let run_id = state.run_id().clone();
        let suffix = run_id.0.strip_prefix("run_").unwrap_or(&run_id.0);
        Self {
            event_id: format!("evt_{suffix}_{sequence:04}"),
            application_id: state.application_id().clone(),
            run_id,
            sequence,
            stage_name,
            stage_role,
            status,
            message,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn stage(&self) -> Option<StageKind> {
        StageKind::from_key(&self.stage_name)
    }
}

/// Scalar top-level fields of a stage payload, with long strings truncated.
///
/// Nested arrays and objects are summarised by their length so listeners get a
/// readable preview without the full stage output.
pub fn excerpt(payload: &Value) -> Option<Value> {
    let object = payload.as_object()?;
    let mut preview = Map::new();
    for (key, value) in object {
        let entry = match value {
            Value::String(text) => Value::String(truncate(text, EXCERPT_CHARS)),
            Value::Number(_) | Value::Bool(_) => value.clone(),
            Value::Array(items) => Value::from(format!("{} item(s)", items.len())),
            Value::Object(fields) => Value::from(format!("{} field(s)", fields.len())),
            Value::Null => continue,
        };
        preview.insert(key.clone(), entry);
    }
    Some(Value::Object(preview))
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
