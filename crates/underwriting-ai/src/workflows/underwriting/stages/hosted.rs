use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::{debug, error};

use crate::config::ModelConfig;
use crate::workflows::underwriting::domain::StageKind;
use crate::workflows::underwriting::invoker::{StageCallError, StageFunction, StageRequest};

#[derive(Debug, thiserror::Error)]
pub enum ModelClientError {
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

/// Sends each stage to an OpenAI-compatible chat-completions endpoint.
///
/// When `api_version` is configured the Azure deployment URL layout and
/// `api-key` header are used; otherwise `/v1/chat/completions` with a bearer token.
pub struct HostedModelStages {
    http_client: Client,
    config: ModelConfig,
}

impl HostedModelStages {
    pub fn new(config: ModelConfig) -> Result<Self, ModelClientError> {
        let http_client = Client::builder().build()?;
        Ok(Self {
            http_client,
            config,
        })
    }

    fn url(&self) -> String {
        match &self.config.api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.config.endpoint, self.config.model, version
            ),
            None => format!("{}/v1/chat/completions", self.config.endpoint),
        }
    }

    fn instructions(stage: StageKind) -> String {
        let contract = match stage {
            StageKind::MedicalReview => {
                "\"risk_score\" (0-1, higher is riskier), \"abnormal_findings\" (array of \
                 {test, value, unit, severity}), \"critical_alerts\" (array of strings), \
                 \"recommendations\" (array of strings), \"summary\" (string)"
            }
            StageKind::FraudDetection => {
                "\"fraud_score\" (0-1), \"overall_fraud_risk\" (LOW, MEDIUM or HIGH), \
                 \"indicators\" (array), \"verification_required\" (array of strings)"
            }
            StageKind::RiskAssessment => {
                "\"risk_score\" (0-1, higher is riskier), \"risk_level\" (low, standard, high \
                 or very_high), \"components\" (object of medical, lifestyle, financial, \
                 occupational scores)"
            }
            StageKind::PremiumCalculation => {
                "\"covers\" (array of {cover_type, sum_assured, base_premium, \
                 loading_percentage, final_premium}; loadings are never negative), \
                 \"total_base_premium\", \"total_final_premium\""
            }
            StageKind::FinalDecision => {
                "\"decision\" (accepted, additional_requirements, declined or manual_review), \
                 \"reasoning\" (array of strings), \"conditions\" (array), \"exclusions\" (array)"
            }
        };
        format!(
            "You are the {role} on a life insurance underwriting team. {description}. \
             Respond with a single JSON object containing {contract}.",
            role = stage.role(),
            description = stage.description(),
        )
    }

    fn user_content(request: &StageRequest) -> Result<String, StageCallError> {
        let prior: Map<String, Value> = request
            .prior_outputs
            .iter()
            .map(|(stage, output)| (stage.key().to_string(), output.clone()))
            .collect();
        serde_json::to_string(&json!({
            "stage": request.stage,
            "application": request.application.as_ref(),
            "prior_outputs": prior,
        }))
        .map_err(|err| StageCallError::Upstream(format!("request encoding failed: {err}")))
    }
}

#[async_trait]
impl StageFunction for HostedModelStages {
    async fn invoke(&self, request: StageRequest) -> Result<Value, StageCallError> {
        let stage = request.stage;
        let body = ChatRequest {
            model: self
                .config
                .api_version
                .is_none()
                .then_some(self.config.model.as_str()),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Self::instructions(stage),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::user_content(&request)?,
                },
            ],
            temperature: 0.1,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut builder = self.http_client.post(self.url()).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = if self.config.api_version.is_some() {
                builder.header("api-key", key)
            } else {
                builder.bearer_auth(key)
            };
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|err| {
            error!(%stage, error = %err, "model request failed");
            StageCallError::Upstream(format!("request failed: {err}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!(%stage, %status, "model endpoint returned an error");
            return Err(StageCallError::Upstream(format!("HTTP {status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| StageCallError::InvalidOutput(format!("unreadable response: {err}")))?;
        debug!(
            %stage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model responded"
        );

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .map(|message| message.content)
            .ok_or_else(|| StageCallError::InvalidOutput("response had no content".to_string()))?;

        parse_json_object(&content)
    }
}

/// Extracts the JSON object from model text, tolerating code fences around it.
fn parse_json_object(content: &str) -> Result<Value, StageCallError> {
    let trimmed = content.trim();
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => {
            return Err(StageCallError::InvalidOutput(
                "response did not contain a JSON object".to_string(),
            ))
        }
    };
    let value: Value = serde_json::from_str(candidate)
        .map_err(|err| StageCallError::InvalidOutput(format!("malformed JSON: {err}")))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(StageCallError::InvalidOutput(
            "response was not a JSON object".to_string(),
        ))
    }
}
