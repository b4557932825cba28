use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use super::domain::{Application, FinalDecision, StageError, StageKind, StageResult};
use super::state::PriorOutputs;

/// Everything a stage function sees for one invocation.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage: StageKind,
    pub application: Arc<Application>,
    pub prior_outputs: PriorOutputs,
}

/// Failures a stage function can report on its own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageCallError {
    #[error("upstream call failed: {0}")]
    Upstream(String),
    #[error("output could not be used: {0}")]
    InvalidOutput(String),
}

/// An opaque analysis backend for the five stages.
#[async_trait]
pub trait StageFunction: Send + Sync {
    async fn invoke(&self, request: StageRequest) -> Result<Value, StageCallError>;
}

/// Runs stage functions under a deadline and checks their output shape.
#[derive(Clone)]
pub struct StageInvoker {
    function: Arc<dyn StageFunction>,
    default_timeout: Duration,
    overrides: BTreeMap<StageKind, Duration>,
}

impl StageInvoker {
    pub fn new(function: Arc<dyn StageFunction>, default_timeout: Duration) -> Self {
        Self {
            function,
            default_timeout,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_timeout(mut self, stage: StageKind, timeout: Duration) -> Self {
        self.overrides.insert(stage, timeout);
        self
    }

    pub fn timeout_for(&self, stage: StageKind) -> Duration {
        self.overrides
            .get(&stage)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// Invokes one stage. When the deadline passes the call is dropped and its
    /// result, if any ever arrives, is discarded.
    pub async fn invoke(
        &self,
        stage: StageKind,
        application: Arc<Application>,
        prior_outputs: PriorOutputs,
    ) -> Result<StageResult, StageError> {
        let timeout = self.timeout_for(stage);
        let request = StageRequest {
            stage,
            application,
            prior_outputs,
        };
        let started = Instant::now();

        let payload = match tokio::time::timeout(timeout, self.function.invoke(request)).await {
            Err(_) => {
                warn!(%stage, timeout_ms = timeout.as_millis() as u64, "stage timed out");
                return Err(StageError::Timeout {
                    stage,
                    elapsed_ms: timeout.as_millis() as u64,
                });
            }
            Ok(Err(StageCallError::Upstream(message))) => {
                return Err(StageError::UpstreamError { stage, message })
            }
            Ok(Err(StageCallError::InvalidOutput(reason))) => {
                return Err(StageError::InvalidOutput { stage, reason })
            }
            Ok(Ok(payload)) => payload,
        };

        validate_output(stage, &payload)
            .map_err(|reason| StageError::InvalidOutput { stage, reason })?;

        debug!(
            %stage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stage output accepted"
        );
        Ok(StageResult::completed(stage, payload, Utc::now()))
    }
}

/// Minimum contract each stage payload must satisfy before downstream stages see it.
pub fn validate_output(stage: StageKind, payload: &Value) -> Result<(), String> {
    let object = payload
        .as_object()
        .ok_or_else(|| "payload must be a JSON object".to_string())?;

    let number = |field: &str| match object.get(field) {
        Some(value) if value.is_number() => Ok(()),
        _ => Err(format!("missing numeric field '{field}'")),
    };
    let text = |field: &str| match object.get(field) {
        Some(Value::String(_)) => Ok(()),
        _ => Err(format!("missing string field '{field}'")),
    };
    let array = |field: &str| match object.get(field) {
        Some(Value::Array(_)) => Ok(()),
        _ => Err(format!("missing array field '{field}'")),
    };

    match stage {
        StageKind::MedicalReview => {
            number("risk_score")?;
            array("abnormal_findings")?;
            array("critical_alerts")
        }
        StageKind::FraudDetection => {
            number("fraud_score")?;
            text("overall_fraud_risk")
        }
        StageKind::RiskAssessment => {
            number("risk_score")?;
            text("risk_level")
        }
        StageKind::PremiumCalculation => {
            array("covers")?;
            let covers = object
                .get("covers")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            for (index, cover) in covers.iter().enumerate() {
                for field in ["base_premium", "final_premium"] {
                    if !cover.get(field).is_some_and(Value::is_number) {
                        return Err(format!("cover {index} is missing numeric '{field}'"));
                    }
                }
            }
            Ok(())
        }
        StageKind::FinalDecision => {
            let raw = object
                .get("decision")
                .and_then(Value::as_str)
                .ok_or_else(|| "missing string field 'decision'".to_string())?;
            FinalDecision::parse(raw)
                .map(|_| ())
                .ok_or_else(|| format!("unrecognised decision '{raw}'"))
        }
    }
}
