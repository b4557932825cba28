use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::domain::{Application, ApplicationId, FinalDecision, RunId, StageKind, StageStatus};
use super::state::RunState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationMetadata {
    pub application_id: ApplicationId,
    pub run_id: RunId,
    pub applicant_name: String,
    pub age: u8,
    pub gender: String,
    pub occupation: Option<String>,
    pub total_sum_assured: u64,
    pub covers_requested: usize,
    pub medical_documents: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub processing_time_seconds: f64,
}

/// One report section, sourced from its stage or from the documented default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub status: StageStatus,
    pub defaulted: bool,
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSections {
    pub medical: ReportSection,
    pub fraud: ReportSection,
    pub risk: ReportSection,
    pub premium: ReportSection,
    pub decision: ReportSection,
}

impl ReportSections {
    pub fn get(&self, stage: StageKind) -> &ReportSection {
        match stage {
            StageKind::MedicalReview => &self.medical,
            StageKind::FraudDetection => &self.fraud,
            StageKind::RiskAssessment => &self.risk,
            StageKind::PremiumCalculation => &self.premium,
            StageKind::FinalDecision => &self.decision,
        }
    }

    pub fn defaulted(&self) -> usize {
        StageKind::ordered()
            .into_iter()
            .filter(|stage| self.get(*stage).defaulted)
            .count()
    }
}

/// The consolidated result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderwritingReport {
    pub application_metadata: ApplicationMetadata,
    pub sections: ReportSections,
    pub stage_statuses: BTreeMap<StageKind, StageStatus>,
    pub final_decision: FinalDecision,
    pub risk_category: String,
    pub confidence_score: f64,
    pub total_base_premium: f64,
    pub total_final_premium: f64,
}

impl UnderwritingReport {
    pub fn application_id(&self) -> &ApplicationId {
        &self.application_metadata.application_id
    }

    pub fn run_id(&self) -> &RunId {
        &self.application_metadata.run_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    #[error("cannot assemble a report without a completed {0}")]
    MissingRoot(StageKind),
}

/// Builds reports from run state. Pure: the same state yields the same report.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportAssembler;

impl ReportAssembler {
    pub fn assemble(
        &self,
        application: &Application,
        state: &RunState,
    ) -> Result<UnderwritingReport, AssemblyError> {
        let medical = state
            .result(StageKind::MedicalReview)
            .filter(|result| result.is_completed())
            .ok_or(AssemblyError::MissingRoot(StageKind::MedicalReview))?;

        let sections = ReportSections {
            medical: ReportSection {
                status: StageStatus::Completed,
                defaulted: false,
                content: medical.payload.clone(),
            },
            fraud: section(state, StageKind::FraudDetection),
            risk: section(state, StageKind::RiskAssessment),
            premium: section(state, StageKind::PremiumCalculation),
            decision: section(state, StageKind::FinalDecision),
        };

        let final_decision = sections
            .decision
            .content
            .get("decision")
            .and_then(Value::as_str)
            .and_then(FinalDecision::parse)
            .unwrap_or(FinalDecision::ManualReview);

        let (total_base_premium, total_final_premium) = premium_totals(&sections.premium.content);

        let risk_category = sections
            .risk
            .content
            .get("risk_level")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let confidence_score = confidence(final_decision, &sections);

        let completed_at = state.last_activity();
        let processing_time_seconds =
            (completed_at - state.started_at()).num_milliseconds().max(0) as f64 / 1000.0;

        Ok(UnderwritingReport {
            application_metadata: ApplicationMetadata {
                application_id: application.application_id.clone(),
                run_id: state.run_id().clone(),
                applicant_name: application.applicant.name.clone(),
                age: application.applicant.age,
                gender: application.applicant.gender.clone(),
                occupation: application.applicant.occupation.clone(),
                total_sum_assured: application.coverage.total_sum_assured,
                covers_requested: application.coverage.covers.len(),
                medical_documents: application.medical_documents.len(),
                started_at: state.started_at(),
                completed_at,
                processing_time_seconds,
            },
            sections,
            stage_statuses: state.stage_statuses().clone(),
            final_decision,
            risk_category,
            confidence_score,
            total_base_premium,
            total_final_premium,
        })
    }
}

fn section(state: &RunState, stage: StageKind) -> ReportSection {
    let status = state.stage_status(stage);
    match state.result(stage).filter(|result| result.is_completed()) {
        Some(result) => ReportSection {
            status,
            defaulted: false,
            content: result.payload.clone(),
        },
        None => ReportSection {
            status,
            defaulted: true,
            content: default_section(stage),
        },
    }
}

/// Content used when a non-root stage did not complete.
pub fn default_section(stage: StageKind) -> Value {
    match stage {
        StageKind::MedicalReview => json!({}),
        StageKind::FraudDetection => json!({
            "overall_fraud_risk": "unknown",
            "fraud_score": 0.0,
            "indicators": [],
            "verification_required": ["Manual identity and disclosure verification"],
            "note": "Fraud screening unavailable",
        }),
        StageKind::RiskAssessment => json!({
            "risk_level": "unknown",
            "risk_score": null,
            "note": "Risk assessment unavailable",
        }),
        StageKind::PremiumCalculation => json!({
            "covers": [],
            "total_base_premium": 0.0,
            "total_final_premium": 0.0,
            "note": "Premium not calculated",
        }),
        StageKind::FinalDecision => json!({
            "decision": FinalDecision::ManualReview.label(),
            "reasoning": ["Automated decision unavailable; refer to an underwriter"],
            "conditions": [],
            "exclusions": [],
        }),
    }
}

fn premium_totals(content: &Value) -> (f64, f64) {
    let covers = content
        .get("covers")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let sum = |field: &str| {
        covers
            .iter()
            .filter_map(|cover| cover.get(field).and_then(Value::as_f64))
            .sum::<f64>()
    };
    (round_to(sum("base_premium"), 2), round_to(sum("final_premium"), 2))
}

/// Decision-weighted confidence, nudged by medical and risk consistency and
/// reduced for every defaulted section. Clamped to `[0.5, 1.0]`.
fn confidence(decision: FinalDecision, sections: &ReportSections) -> f64 {
    let mut score: f64 = match decision {
        FinalDecision::Accepted => 0.95,
        FinalDecision::ManualReview => 0.80,
        FinalDecision::AdditionalRequirements => 0.70,
        FinalDecision::Declined => 0.90,
    };

    let medical = &sections.medical.content;
    let critical = medical
        .get("critical_alerts")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    let abnormal = medical
        .get("abnormal_findings")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    if critical > 0 {
        score += 0.05;
    }
    if abnormal == 0 {
        score += 0.05;
    } else if abnormal > 3 {
        score -= 0.10;
    }

    if let Some(risk_score) = sections.risk.content.get("risk_score").and_then(Value::as_f64) {
        if risk_score < 0.2 && decision == FinalDecision::Accepted {
            score += 0.05;
        } else if risk_score > 0.7 && decision == FinalDecision::Declined {
            score += 0.05;
        }
    }

    score -= 0.10 * sections.defaulted() as f64;
    round_to(score.clamp(0.5, 1.0), 3)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
