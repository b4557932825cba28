use async_trait::async_trait;
use serde_json::{json, Value};

use crate::workflows::underwriting::domain::{Application, FinalDecision, LabResult, StageKind};
use crate::workflows::underwriting::invoker::{StageCallError, StageFunction, StageRequest};
use crate::workflows::underwriting::state::PriorOutputs;

const HAZARDOUS_OCCUPATIONS: [&str; 9] = [
    "pilot",
    "miner",
    "mining",
    "diver",
    "driver",
    "construction",
    "military",
    "police",
    "firefighter",
];

/// Annual premium rate per unit of sum assured.
pub fn base_rate(cover_type: &str) -> f64 {
    let cover = cover_type.to_ascii_lowercase();
    if cover.contains("term") {
        0.0012
    } else if cover.contains("critical") {
        0.0008
    } else if cover.contains("accident") {
        0.0002
    } else if cover.contains("disab") {
        0.0015
    } else {
        0.001
    }
}

/// Deterministic underwriting tables for every stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedStages;

#[async_trait]
impl StageFunction for RuleBasedStages {
    async fn invoke(&self, request: StageRequest) -> Result<Value, StageCallError> {
        let application = request.application.as_ref();
        let prior = &request.prior_outputs;
        let payload = match request.stage {
            StageKind::MedicalReview => medical_review(application),
            StageKind::FraudDetection => fraud_detection(application, prior),
            StageKind::RiskAssessment => risk_assessment(application, prior),
            StageKind::PremiumCalculation => premium_calculation(application, prior),
            StageKind::FinalDecision => final_decision(prior),
        };
        Ok(payload)
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn deviation_pct(lab: &LabResult) -> f64 {
    match (lab.reference_low, lab.reference_high) {
        (_, Some(high)) if lab.value > high && high > 0.0 => (lab.value - high) / high * 100.0,
        (Some(low), _) if lab.value < low && low > 0.0 => (low - lab.value) / low * 100.0,
        _ => 0.0,
    }
}

fn severity(deviation: f64) -> &'static str {
    if deviation > 50.0 {
        "critical"
    } else if deviation > 20.0 {
        "moderate"
    } else {
        "mild"
    }
}

fn medical_review(application: &Application) -> Value {
    let mut abnormal = Vec::new();
    let mut critical = Vec::new();
    let mut normal = 0usize;
    let mut score: f64 = 0.05;

    for lab in application.lab_results() {
        if !lab.is_abnormal() {
            normal += 1;
            continue;
        }
        let deviation = deviation_pct(lab);
        let level = severity(deviation);
        score += match level {
            "critical" => 0.30,
            "moderate" => 0.15,
            _ => 0.08,
        };
        if level == "critical" {
            critical.push(json!(format!("{}: {} {}", lab.test, lab.value, lab.unit)));
        }
        abnormal.push(json!({
            "test": lab.test,
            "value": lab.value,
            "unit": lab.unit,
            "reference_low": lab.reference_low,
            "reference_high": lab.reference_high,
            "deviation_pct": round2(deviation),
            "severity": level,
        }));
    }

    let bmi = application.health.bmi();
    let bmi_category = match bmi {
        Some(value) if value < 18.5 => "underweight",
        Some(value) if value < 25.0 => "normal",
        Some(value) if value < 30.0 => "overweight",
        Some(_) => "obese",
        None => "unknown",
    };
    score += match bmi_category {
        "overweight" | "underweight" => 0.05,
        "obese" => 0.15,
        _ => 0.0,
    };
    score += 0.10 * application.health.existing_conditions.len() as f64;
    score += 0.05 * application.health.family_history.len() as f64;

    let recommendations: Vec<String> = abnormal
        .iter()
        .filter_map(|finding| finding["test"].as_str())
        .map(|test| format!("Follow-up testing recommended for {test}"))
        .collect();

    let summary = if abnormal.is_empty() {
        format!("{normal} lab value(s) reviewed; all within reference ranges")
    } else {
        format!(
            "{} abnormal and {} critical finding(s) across {} lab value(s)",
            abnormal.len(),
            critical.len(),
            abnormal.len() + normal
        )
    };

    json!({
        "risk_score": round3(score.min(1.0)),
        "abnormal_findings": abnormal,
        "critical_alerts": critical,
        "normal_findings": normal,
        "bmi": bmi,
        "bmi_category": bmi_category,
        "documents_reviewed": application.medical_documents.len(),
        "recommendations": recommendations,
        "summary": summary,
    })
}

fn coverage_ratio(application: &Application) -> Option<f64> {
    application
        .applicant
        .annual_income
        .filter(|income| *income > 0)
        .map(|income| application.coverage.total_sum_assured as f64 / income as f64)
}

fn array_len(output: Option<&Value>, field: &str) -> usize {
    output
        .and_then(|value| value.get(field))
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

fn fraud_detection(application: &Application, prior: &PriorOutputs) -> Value {
    let medical = prior.get(&StageKind::MedicalReview);
    let mut indicators = Vec::new();
    let mut score: f64 = 0.0;

    match coverage_ratio(application) {
        Some(ratio) if ratio > 25.0 => {
            score += 0.4;
            indicators.push(json!({
                "indicator": "coverage_exceeds_income",
                "severity": "HIGH",
                "detail": format!("Sum assured is {ratio:.1}x declared income"),
            }));
        }
        Some(ratio) if ratio > 15.0 => {
            score += 0.2;
            indicators.push(json!({
                "indicator": "coverage_exceeds_income",
                "severity": "MEDIUM",
                "detail": format!("Sum assured is {ratio:.1}x declared income"),
            }));
        }
        Some(_) => {}
        None => {
            score += 0.1;
            indicators.push(json!({
                "indicator": "income_not_declared",
                "severity": "LOW",
                "detail": "Annual income missing from the application",
            }));
        }
    }

    if application.health.existing_conditions.is_empty()
        && array_len(medical, "critical_alerts") > 0
    {
        score += 0.25;
        indicators.push(json!({
            "indicator": "possible_non_disclosure",
            "severity": "MEDIUM",
            "detail": "Critical lab findings with no declared conditions",
        }));
    }

    let covers_total: u64 = application
        .coverage
        .covers
        .iter()
        .map(|cover| cover.sum_assured)
        .sum();
    if covers_total != application.coverage.total_sum_assured {
        score += 0.15;
        indicators.push(json!({
            "indicator": "sum_assured_mismatch",
            "severity": "MEDIUM",
            "detail": format!(
                "Covers add up to {covers_total} but {} was declared",
                application.coverage.total_sum_assured
            ),
        }));
    }

    let age = u16::from(application.applicant.age);
    if let Some(cover) = application
        .coverage
        .covers
        .iter()
        .find(|cover| cover.term_years.is_some_and(|term| age + u16::from(term) > 80))
    {
        score += 0.05;
        indicators.push(json!({
            "indicator": "term_beyond_age_limit",
            "severity": "LOW",
            "detail": format!("{} runs past age 80", cover.cover_type),
        }));
    }

    let score = round3(score.min(1.0));
    let overall = if score >= 0.5 {
        "HIGH"
    } else if score >= 0.2 {
        "MEDIUM"
    } else {
        "LOW"
    };
    let verification: Vec<&str> = if overall == "LOW" {
        Vec::new()
    } else {
        vec!["Income proof", "Previous medical records"]
    };

    json!({
        "fraud_score": score,
        "overall_fraud_risk": overall,
        "indicators": indicators,
        "verification_required": verification,
    })
}

fn risk_level(score: f64) -> &'static str {
    if score < 0.25 {
        "low"
    } else if score < 0.5 {
        "standard"
    } else if score < 0.75 {
        "high"
    } else {
        "very_high"
    }
}

fn risk_assessment(application: &Application, prior: &PriorOutputs) -> Value {
    let medical_risk = prior
        .get(&StageKind::MedicalReview)
        .and_then(|medical| medical.get("risk_score"))
        .and_then(Value::as_f64)
        .unwrap_or(0.5);

    let lifestyle = &application.lifestyle;
    let mut lifestyle_risk: f64 = 0.0;
    if lifestyle.smoker {
        lifestyle_risk += 0.4;
    }
    let alcohol = lifestyle.alcohol.as_deref().unwrap_or("").to_ascii_lowercase();
    if alcohol.contains("heavy") {
        lifestyle_risk += 0.25;
    } else if alcohol.contains("social") || alcohol.contains("occasional") {
        lifestyle_risk += 0.05;
    }
    let exercise = lifestyle.exercise.as_deref().unwrap_or("").to_ascii_lowercase();
    if exercise.is_empty() || exercise.contains("none") || exercise.contains("sedentary") {
        lifestyle_risk += 0.1;
    }
    let lifestyle_risk = lifestyle_risk.min(1.0);

    let financial_risk = match coverage_ratio(application) {
        Some(ratio) if ratio > 25.0 => 0.6,
        Some(ratio) if ratio > 15.0 => 0.3,
        Some(_) => 0.1,
        None => 0.3,
    };

    let occupation = application
        .applicant
        .occupation
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();
    let occupational_risk = if HAZARDOUS_OCCUPATIONS
        .iter()
        .any(|keyword| occupation.contains(keyword))
    {
        0.5
    } else {
        0.1
    };

    let overall = round3(
        0.5 * medical_risk + 0.2 * lifestyle_risk + 0.15 * financial_risk + 0.15 * occupational_risk,
    );

    json!({
        "risk_score": overall,
        "risk_level": risk_level(overall),
        "components": {
            "medical": round3(medical_risk),
            "lifestyle": round3(lifestyle_risk),
            "financial": financial_risk,
            "occupational": occupational_risk,
        },
        "smoker": lifestyle.smoker,
    })
}

fn premium_calculation(application: &Application, prior: &PriorOutputs) -> Value {
    let risk_score = prior
        .get(&StageKind::RiskAssessment)
        .and_then(|risk| risk.get("risk_score"))
        .and_then(Value::as_f64)
        .unwrap_or(0.5);
    let medical_loading = ((risk_score - 0.2).max(0.0) * 200.0).min(150.0).round();
    let smoker_loading = if application.lifestyle.smoker { 50.0 } else { 0.0 };

    let mut total_base = 0.0;
    let mut total_final = 0.0;
    let covers: Vec<Value> = application
        .coverage
        .covers
        .iter()
        .map(|cover| {
            let rate = base_rate(&cover.cover_type);
            let base = round2(cover.sum_assured as f64 * rate);
            let loading = if cover.cover_type.to_ascii_lowercase().contains("accident") {
                0.0
            } else {
                medical_loading + smoker_loading
            };
            let final_premium = round2(base * (1.0 + loading / 100.0));
            total_base += base;
            total_final += final_premium;
            json!({
                "cover_type": cover.cover_type,
                "sum_assured": cover.sum_assured,
                "base_rate": rate,
                "base_premium": base,
                "loading_percentage": loading,
                "final_premium": final_premium,
            })
        })
        .collect();

    let fraud_screening = match prior
        .get(&StageKind::FraudDetection)
        .and_then(|fraud| fraud.get("overall_fraud_risk"))
        .and_then(Value::as_str)
    {
        None | Some("unknown") => "unavailable",
        Some(_) => "available",
    };

    json!({
        "covers": covers,
        "medical_loading_percentage": medical_loading,
        "smoker_loading_percentage": smoker_loading,
        "total_base_premium": round2(total_base),
        "total_final_premium": round2(total_final),
        "fraud_screening": fraud_screening,
    })
}

fn final_decision(prior: &PriorOutputs) -> Value {
    let medical = prior.get(&StageKind::MedicalReview);
    let risk_level = prior
        .get(&StageKind::RiskAssessment)
        .and_then(|risk| risk.get("risk_level"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let fraud_risk = prior
        .get(&StageKind::FraudDetection)
        .and_then(|fraud| fraud.get("overall_fraud_risk"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let critical = array_len(medical, "critical_alerts");
    let abnormal = array_len(medical, "abnormal_findings");
    let total_final_premium = prior
        .get(&StageKind::PremiumCalculation)
        .and_then(|premium| premium.get("total_final_premium"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    let mut reasoning = vec![format!("Overall risk level is {risk_level}")];
    let mut conditions = Vec::new();

    let decision = if risk_level == "very_high" || critical >= 2 {
        reasoning.push(format!("{critical} critical medical alert(s)"));
        FinalDecision::Declined
    } else if fraud_risk == "HIGH" || fraud_risk == "unknown" {
        reasoning.push(format!("Fraud screening result: {fraud_risk}"));
        conditions.push("Verify identity, income and medical disclosures".to_string());
        FinalDecision::ManualReview
    } else if risk_level == "high" {
        reasoning.push("Risk exceeds automatic acceptance limits".to_string());
        FinalDecision::ManualReview
    } else if abnormal > 0 || risk_level == "standard" {
        reasoning.push(format!("{abnormal} abnormal lab finding(s) need follow-up"));
        if let Some(findings) = medical
            .and_then(|value| value.get("abnormal_findings"))
            .and_then(Value::as_array)
        {
            conditions.extend(
                findings
                    .iter()
                    .filter_map(|finding| finding["test"].as_str())
                    .map(|test| format!("Repeat {test} within 6 months")),
            );
        }
        FinalDecision::AdditionalRequirements
    } else {
        reasoning.push("All findings within standard limits".to_string());
        FinalDecision::Accepted
    };

    json!({
        "decision": decision.label(),
        "reasoning": reasoning,
        "conditions": conditions,
        "exclusions": [],
        "annual_premium": total_final_premium,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::underwriting::assembler::default_section;
    use crate::workflows::underwriting::sample::sample_application;
    use std::collections::BTreeMap;

    fn prior_for(application: &Application, upto: &[StageKind]) -> PriorOutputs {
        let mut prior = BTreeMap::new();
        for stage in upto {
            let payload = match stage {
                StageKind::MedicalReview => medical_review(application),
                StageKind::FraudDetection => fraud_detection(application, &prior),
                StageKind::RiskAssessment => risk_assessment(application, &prior),
                StageKind::PremiumCalculation => premium_calculation(application, &prior),
                StageKind::FinalDecision => final_decision(&prior),
            };
            prior.insert(*stage, payload);
        }
        prior
    }

    #[test]
    fn sample_medical_review_flags_abnormal_labs() {
        let application = sample_application();
        let medical = medical_review(&application);
        assert_eq!(medical["abnormal_findings"].as_array().map(Vec::len), Some(4));
        assert_eq!(medical["critical_alerts"].as_array().map(Vec::len), Some(0));
        assert_eq!(medical["bmi_category"], "overweight");
    }

    #[test]
    fn premium_never_discounts_below_base() {
        let application = sample_application();
        let prior = prior_for(
            &application,
            &[
                StageKind::MedicalReview,
                StageKind::FraudDetection,
                StageKind::RiskAssessment,
            ],
        );
        let premium = premium_calculation(&application, &prior);
        let base = premium["total_base_premium"].as_f64().expect("base");
        let total = premium["total_final_premium"].as_f64().expect("final");
        assert!(total >= base);
        assert_eq!(base, 7800.0);
    }

    #[test]
    fn missing_fraud_output_routes_to_manual_review() {
        let application = sample_application();
        let mut prior = prior_for(
            &application,
            &[
                StageKind::MedicalReview,
                StageKind::RiskAssessment,
                StageKind::PremiumCalculation,
            ],
        );
        prior.remove(&StageKind::FraudDetection);
        let decision = final_decision(&prior);
        assert_eq!(decision["decision"], "manual_review");
    }

    #[test]
    fn default_fraud_section_counts_as_unscreened() {
        let application = sample_application();
        let mut prior = prior_for(
            &application,
            &[StageKind::MedicalReview, StageKind::RiskAssessment],
        );
        prior.insert(
            StageKind::FraudDetection,
            default_section(StageKind::FraudDetection),
        );
        let premium = premium_calculation(&application, &prior);
        assert_eq!(premium["fraud_screening"], "unavailable");

        prior.insert(StageKind::PremiumCalculation, premium);
        assert_eq!(final_decision(&prior)["decision"], "manual_review");
    }

    #[test]
    fn hazardous_occupation_raises_risk() {
        let mut application = sample_application();
        let prior = prior_for(&application, &[StageKind::MedicalReview]);
        let office = risk_assessment(&application, &prior)["risk_score"]
            .as_f64()
            .expect("score");
        application.applicant.occupation = Some("Commercial Pilot".to_string());
        let pilot = risk_assessment(&application, &prior)["risk_score"]
            .as_f64()
            .expect("score");
        assert!(pilot > office);
    }

    #[test]
    fn rates_match_cover_names() {
        assert_eq!(base_rate("Term Life Insurance"), 0.0012);
        assert_eq!(base_rate("Critical Illness"), 0.0008);
        assert_eq!(base_rate("Accidental Death Benefit"), 0.0002);
        assert_eq!(base_rate("Disability Income"), 0.0015);
        assert_eq!(base_rate("Hospital Cash"), 0.001);
    }
}
