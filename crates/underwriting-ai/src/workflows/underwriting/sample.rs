use super::domain::{
    ApplicantProfile, Application, ApplicationId, CoverRequest, CoverageRequest,
    HealthDeclaration, LabResult, Lifestyle, MedicalDocument,
};

pub const SAMPLE_APPLICATION_ID: &str = "LI2025001";

fn lab(test: &str, value: f64, unit: &str, low: Option<f64>, high: Option<f64>) -> LabResult {
    LabResult {
        test: test.to_string(),
        value,
        unit: unit.to_string(),
        reference_low: low,
        reference_high: high,
    }
}

fn cover(cover_type: &str, sum_assured: u64) -> CoverRequest {
    CoverRequest {
        cover_type: cover_type.to_string(),
        sum_assured,
        term_years: Some(20),
    }
}

/// A complete demo application with borderline metabolic and lipid results.
pub fn sample_application() -> Application {
    Application {
        application_id: ApplicationId(SAMPLE_APPLICATION_ID.to_string()),
        applicant: ApplicantProfile {
            name: "Rajesh Kumar".to_string(),
            age: 45,
            gender: "Male".to_string(),
            occupation: Some("IT Professional".to_string()),
            annual_income: Some(1_800_000),
        },
        coverage: CoverageRequest {
            total_sum_assured: 8_000_000,
            covers: vec![
                cover("Term Life Insurance", 5_000_000),
                cover("Critical Illness", 2_000_000),
                cover("Accidental Death Benefit", 1_000_000),
            ],
        },
        lifestyle: Lifestyle {
            smoker: false,
            alcohol: Some("Social, occasional".to_string()),
            exercise: Some("Regular gym".to_string()),
        },
        health: HealthDeclaration {
            height_cm: Some(175.0),
            weight_kg: Some(78.0),
            existing_conditions: Vec::new(),
            family_history: Vec::new(),
        },
        medical_documents: vec![
            MedicalDocument {
                name: "blood_panel.pdf".to_string(),
                url: None,
                lab_results: vec![
                    lab("hemoglobin", 14.2, "g/dL", Some(13.5), Some(17.5)),
                    lab("glucose_fasting", 105.0, "mg/dL", Some(70.0), Some(100.0)),
                    lab("hba1c", 6.2, "%", Some(4.0), Some(5.6)),
                ],
            },
            MedicalDocument {
                name: "lipid_profile.pdf".to_string(),
                url: None,
                lab_results: vec![
                    lab("total_cholesterol", 210.0, "mg/dL", None, Some(200.0)),
                    lab("ldl", 130.0, "mg/dL", None, Some(100.0)),
                    lab("hdl", 45.0, "mg/dL", Some(40.0), None),
                ],
            },
        ],
    }
}
