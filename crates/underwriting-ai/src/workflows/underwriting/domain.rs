use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier wrapper for submitted applications (e.g. `LI2025001`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(pub String);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for one execution of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(format!("run_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The unit of work submitted by the dashboard. Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub application_id: ApplicationId,
    pub applicant: ApplicantProfile,
    pub coverage: CoverageRequest,
    #[serde(default)]
    pub lifestyle: Lifestyle,
    #[serde(default)]
    pub health: HealthDeclaration,
    #[serde(default)]
    pub medical_documents: Vec<MedicalDocument>,
}

impl Application {
    pub const MIN_AGE: u8 = 18;
    pub const MAX_AGE: u8 = 80;

    /// Structural checks applied when a request arrives, before any run starts.
    pub fn validate(&self) -> Result<(), ApplicationError> {
        if self.application_id.0.trim().is_empty() {
            return Err(ApplicationError::MissingApplicationId);
        }
        if self.applicant.name.trim().is_empty() {
            return Err(ApplicationError::MissingApplicantName);
        }
        if !(Self::MIN_AGE..=Self::MAX_AGE).contains(&self.applicant.age) {
            return Err(ApplicationError::AgeOutOfRange(self.applicant.age));
        }
        if self.coverage.covers.is_empty() {
            return Err(ApplicationError::NoCoverRequested);
        }
        if let Some(cover) = self.coverage.covers.iter().find(|c| c.sum_assured == 0) {
            return Err(ApplicationError::ZeroSumAssured(cover.cover_type.clone()));
        }
        Ok(())
    }

    pub fn lab_results(&self) -> impl Iterator<Item = &LabResult> {
        self.medical_documents
            .iter()
            .flat_map(|document| document.lab_results.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicantProfile {
    pub name: String,
    pub age: u8,
    pub gender: String,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub annual_income: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRequest {
    pub total_sum_assured: u64,
    pub covers: Vec<CoverRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverRequest {
    pub cover_type: String,
    pub sum_assured: u64,
    #[serde(default)]
    pub term_years: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lifestyle {
    #[serde(default)]
    pub smoker: bool,
    #[serde(default)]
    pub alcohol: Option<String>,
    #[serde(default)]
    pub exercise: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthDeclaration {
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub existing_conditions: Vec<String>,
    #[serde(default)]
    pub family_history: Vec<String>,
}

impl HealthDeclaration {
    pub fn bmi(&self) -> Option<f64> {
        match (self.height_cm, self.weight_kg) {
            (Some(height), Some(weight)) if height > 0.0 && weight > 0.0 => {
                let meters = height / 100.0;
                Some(((weight / (meters * meters)) * 10.0).round() / 10.0)
            }
            _ => None,
        }
    }
}

/// A medical report attached to the application, with its extracted lab values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalDocument {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub lab_results: Vec<LabResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    pub test: String,
    pub value: f64,
    pub unit: String,
    #[serde(default)]
    pub reference_low: Option<f64>,
    #[serde(default)]
    pub reference_high: Option<f64>,
}

impl LabResult {
    pub fn is_abnormal(&self) -> bool {
        self.reference_low.is_some_and(|low| self.value < low)
            || self.reference_high.is_some_and(|high| self.value > high)
    }
}

/// Validation failures for inbound applications.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplicationError {
    #[error("application_id must not be empty")]
    MissingApplicationId,
    #[error("applicant name must not be empty")]
    MissingApplicantName,
    #[error("applicant age {0} is outside the insurable range 18-80")]
    AgeOutOfRange(u8),
    #[error("at least one cover must be requested")]
    NoCoverRequested,
    #[error("cover '{0}' requests a zero sum assured")]
    ZeroSumAssured(String),
}

/// The five analysis stages, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    MedicalReview,
    FraudDetection,
    RiskAssessment,
    PremiumCalculation,
    FinalDecision,
}

impl StageKind {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::MedicalReview,
            Self::FraudDetection,
            Self::RiskAssessment,
            Self::PremiumCalculation,
            Self::FinalDecision,
        ]
    }

    /// Wire name used in events and stage requests.
    pub const fn key(self) -> &'static str {
        match self {
            Self::MedicalReview => "medical_review",
            Self::FraudDetection => "fraud_detection",
            Self::RiskAssessment => "risk_assessment",
            Self::PremiumCalculation => "premium_calculation",
            Self::FinalDecision => "final_decision",
        }
    }

    pub const fn role(self) -> &'static str {
        match self {
            Self::MedicalReview => "Medical Review Specialist",
            Self::FraudDetection => "Fraud Detection Specialist",
            Self::RiskAssessment => "Risk Assessment Specialist",
            Self::PremiumCalculation => "Premium Calculation Specialist",
            Self::FinalDecision => "Senior Underwriting Decision Maker",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::MedicalReview => "Reviews lab values and declarations for abnormal findings",
            Self::FraudDetection => "Verifies data consistency and flags non-disclosure risks",
            Self::RiskAssessment => "Scores medical, lifestyle, financial and occupational risk",
            Self::PremiumCalculation => "Prices each requested cover with medical loadings",
            Self::FinalDecision => "Issues the underwriting decision with conditions",
        }
    }

    /// Report section the stage payload lands in.
    pub const fn section(self) -> &'static str {
        match self {
            Self::MedicalReview => "medical",
            Self::FraudDetection => "fraud",
            Self::RiskAssessment => "risk",
            Self::PremiumCalculation => "premium",
            Self::FinalDecision => "decision",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ordered().into_iter().find(|stage| stage.key() == key)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Per-stage lifecycle inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Dispatched,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageResultStatus {
    Completed,
    Failed,
}

/// Output of one stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub status: StageResultStatus,
    pub payload: Value,
    pub finished_at: DateTime<Utc>,
}

impl StageResult {
    pub fn completed(stage: StageKind, payload: Value, finished_at: DateTime<Utc>) -> Self {
        Self {
            stage,
            status: StageResultStatus::Completed,
            payload,
            finished_at,
        }
    }

    pub fn failed(stage: StageKind, error: &StageError, finished_at: DateTime<Utc>) -> Self {
        Self {
            stage,
            status: StageResultStatus::Failed,
            payload: serde_json::json!({
                "error_kind": error.kind(),
                "error": error.to_string(),
            }),
            finished_at,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StageResultStatus::Completed
    }
}

/// Failure taxonomy for stages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error("{stage} timed out after {elapsed_ms}ms")]
    Timeout { stage: StageKind, elapsed_ms: u64 },
    #[error("{stage} upstream error: {message}")]
    UpstreamError { stage: StageKind, message: String },
    #[error("{stage} returned invalid output: {reason}")]
    InvalidOutput { stage: StageKind, reason: String },
    #[error("{stage} skipped: prerequisite {dependency} did not complete")]
    DependencyFailed {
        stage: StageKind,
        dependency: StageKind,
    },
}

impl StageError {
    pub const fn kind(&self) -> &'static str {
        match self {
            StageError::Timeout { .. } => "timeout",
            StageError::UpstreamError { .. } => "upstream_error",
            StageError::InvalidOutput { .. } => "invalid_output",
            StageError::DependencyFailed { .. } => "dependency_failed",
        }
    }

    pub const fn stage(&self) -> StageKind {
        match self {
            StageError::Timeout { stage, .. }
            | StageError::UpstreamError { stage, .. }
            | StageError::InvalidOutput { stage, .. }
            | StageError::DependencyFailed { stage, .. } => *stage,
        }
    }
}

/// Final underwriting outcomes surfaced on the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    Accepted,
    AdditionalRequirements,
    Declined,
    ManualReview,
}

impl FinalDecision {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::AdditionalRequirements => "additional_requirements",
            Self::Declined => "declined",
            Self::ManualReview => "manual_review",
        }
    }

    /// Accepts the canonical labels plus the looser phrasing models tend to use.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "accepted" | "accept" | "approved" | "auto_approved" => Some(Self::Accepted),
            "additional_requirements" | "approved_with_conditions" => {
                Some(Self::AdditionalRequirements)
            }
            "declined" | "decline" | "rejected" => Some(Self::Declined),
            "manual_review" | "refer" | "referred" => Some(Self::ManualReview),
            _ => None,
        }
    }
}

impl fmt::Display for FinalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
