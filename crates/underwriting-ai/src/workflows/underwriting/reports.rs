use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::assembler::UnderwritingReport;
use super::domain::{ApplicationId, FinalDecision};

#[derive(Debug, thiserror::Error)]
pub enum ReportStoreError {
    #[error("report store unavailable: {0}")]
    Unavailable(String),
    #[error("report store io error: {0}")]
    Io(#[from] io::Error),
    #[error("stored report is not valid json: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Keeps every report produced for an application, one per run.
///
/// The newest report (latest completion time, ties broken by run id) is the
/// application's current report.
pub trait ReportStore: Send + Sync {
    /// Stores a report; a second put for the same run replaces the first.
    fn put(&self, report: &UnderwritingReport) -> Result<(), ReportStoreError>;

    /// Every stored report for the application, newest first.
    fn history(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<UnderwritingReport>, ReportStoreError>;

    fn get(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Option<UnderwritingReport>, ReportStoreError> {
        Ok(self.history(application_id)?.into_iter().next())
    }

    /// The current report of each application, ordered by application id.
    fn list(&self) -> Result<Vec<UnderwritingReport>, ReportStoreError>;
}

fn recency(report: &UnderwritingReport) -> (DateTime<Utc>, &str) {
    (
        report.application_metadata.completed_at,
        report.run_id().0.as_str(),
    )
}

fn newest_first(reports: &mut [UnderwritingReport]) {
    reports.sort_by(|a, b| recency(b).cmp(&recency(a)));
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryReportStore {
    reports: Arc<Mutex<BTreeMap<ApplicationId, Vec<UnderwritingReport>>>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportStore for InMemoryReportStore {
    fn put(&self, report: &UnderwritingReport) -> Result<(), ReportStoreError> {
        let mut reports = self.reports.lock().expect("report store mutex poisoned");
        let runs = reports.entry(report.application_id().clone()).or_default();
        match runs
            .iter()
            .position(|stored| stored.run_id() == report.run_id())
        {
            Some(index) => runs[index] = report.clone(),
            None => runs.push(report.clone()),
        }
        Ok(())
    }

    fn history(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<UnderwritingReport>, ReportStoreError> {
        let mut runs = self
            .reports
            .lock()
            .expect("report store mutex poisoned")
            .get(application_id)
            .cloned()
            .unwrap_or_default();
        newest_first(&mut runs);
        Ok(runs)
    }

    fn list(&self) -> Result<Vec<UnderwritingReport>, ReportStoreError> {
        Ok(self
            .reports
            .lock()
            .expect("report store mutex poisoned")
            .values()
            .filter_map(|runs| runs.iter().max_by(|a, b| recency(a).cmp(&recency(b))))
            .cloned()
            .collect())
    }
}

/// Pretty-printed JSON reports laid out as `<dir>/<application>/<run>.json`.
///
/// Both path components are hex-encoded ids, so distinct ids never share a
/// file whatever characters they contain.
#[derive(Debug, Clone)]
pub struct JsonFileReportStore {
    dir: PathBuf,
}

impl JsonFileReportStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ReportStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn application_dir(&self, application_id: &ApplicationId) -> PathBuf {
        self.dir.join(hex::encode(&application_id.0))
    }

    fn read_reports(dir: &Path) -> Result<Vec<UnderwritingReport>, ReportStoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut reports = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            reports.push(serde_json::from_slice(&fs::read(&path)?)?);
        }
        newest_first(&mut reports);
        Ok(reports)
    }
}

impl ReportStore for JsonFileReportStore {
    fn put(&self, report: &UnderwritingReport) -> Result<(), ReportStoreError> {
        let dir = self.application_dir(report.application_id());
        fs::create_dir_all(&dir)?;
        let stem = hex::encode(&report.run_id().0);
        let staging = dir.join(format!("{stem}.json.tmp"));
        fs::write(&staging, serde_json::to_vec_pretty(report)?)?;
        fs::rename(&staging, dir.join(format!("{stem}.json")))?;
        Ok(())
    }

    fn history(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<UnderwritingReport>, ReportStoreError> {
        Self::read_reports(&self.application_dir(application_id))
    }

    fn list(&self) -> Result<Vec<UnderwritingReport>, ReportStoreError> {
        let mut reports = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(current) = Self::read_reports(&entry.path())?.into_iter().next() {
                reports.push(current);
            }
        }
        reports.sort_by(|a, b| a.application_id().cmp(b.application_id()));
        Ok(reports)
    }
}

/// Listing row for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub application_id: ApplicationId,
    pub applicant_name: String,
    pub final_decision: FinalDecision,
    pub risk_category: String,
    pub confidence_score: f64,
    pub total_final_premium: f64,
    pub processing_time_seconds: f64,
    pub completed_at: DateTime<Utc>,
}

impl From<&UnderwritingReport> for ReportSummary {
    fn from(report: &UnderwritingReport) -> Self {
        let metadata = &report.application_metadata;
        Self {
            application_id: metadata.application_id.clone(),
            applicant_name: metadata.applicant_name.clone(),
            final_decision: report.final_decision,
            risk_category: report.risk_category.clone(),
            confidence_score: report.confidence_score,
            total_final_premium: report.total_final_premium,
            processing_time_seconds: metadata.processing_time_seconds,
            completed_at: metadata.completed_at,
        }
    }
}

/// Aggregate counters for the dashboard header.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub total_applications: usize,
    pub total_accepted: usize,
    pub total_additional_requirements: usize,
    pub total_declined: usize,
    /// Reports whose decision fell back to the manual-review default.
    pub total_pending: usize,
    pub total_premium_value: f64,
    pub average_processing_time: f64,
}

impl DashboardSummary {
    pub fn from_reports(reports: &[UnderwritingReport]) -> Self {
        let mut summary = Self {
            total_applications: reports.len(),
            ..Self::default()
        };
        let mut processing = 0.0;
        for report in reports {
            if report.sections.decision.defaulted {
                summary.total_pending += 1;
            } else {
                match report.final_decision {
                    FinalDecision::Accepted => summary.total_accepted += 1,
                    FinalDecision::AdditionalRequirements | FinalDecision::ManualReview => {
                        summary.total_additional_requirements += 1
                    }
                    FinalDecision::Declined => summary.total_declined += 1,
                }
            }
            summary.total_premium_value += report.total_final_premium;
            processing += report.application_metadata.processing_time_seconds;
        }
        if !reports.is_empty() {
            summary.average_processing_time =
                (processing / reports.len() as f64 * 100.0).round() / 100.0;
        }
        summary.total_premium_value = (summary.total_premium_value * 100.0).round() / 100.0;
        summary
    }
}

/// Dashboard payload: the counters followed by one row per application.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardData {
    #[serde(flatten)]
    pub totals: DashboardSummary,
    pub reports: Vec<ReportSummary>,
}
