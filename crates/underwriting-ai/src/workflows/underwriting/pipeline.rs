use serde::Serialize;

use super::assembler::default_section;
use super::domain::{StageKind, StageStatus};
use super::state::{PriorOutputs, RunState};

/// How strongly a stage relies on one of its prerequisites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Must complete; a failure skips the dependant.
    Required,
    /// Must reach a terminal state; a failure is replaced by the report default.
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageDependency {
    pub stage: StageKind,
    pub kind: DependencyKind,
}

const fn required(stage: StageKind) -> StageDependency {
    StageDependency {
        stage,
        kind: DependencyKind::Required,
    }
}

const fn advisory(stage: StageKind) -> StageDependency {
    StageDependency {
        stage,
        kind: DependencyKind::Advisory,
    }
}

/// What the orchestrator should do next for a given state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Stages to dispatch now, in declaration order.
    pub ready: Vec<StageKind>,
    /// Stages to mark skipped, with the prerequisite that blocked them.
    pub skipped: Vec<(StageKind, StageKind)>,
}

impl Readiness {
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.skipped.is_empty()
    }
}

/// The fixed stage graph:
/// medical -> {fraud, risk} -> premium -> decision.
#[derive(Debug, Clone)]
pub struct StagePipeline {
    edges: [(StageKind, &'static [StageDependency]); 5],
}

const MEDICAL_DEPS: &[StageDependency] = &[];
const FRAUD_DEPS: &[StageDependency] = &[required(StageKind::MedicalReview)];
const RISK_DEPS: &[StageDependency] = &[required(StageKind::MedicalReview)];
const PREMIUM_DEPS: &[StageDependency] = &[
    required(StageKind::MedicalReview),
    required(StageKind::RiskAssessment),
    advisory(StageKind::FraudDetection),
];
const DECISION_DEPS: &[StageDependency] = &[
    required(StageKind::MedicalReview),
    required(StageKind::PremiumCalculation),
    advisory(StageKind::FraudDetection),
];

impl StagePipeline {
    pub fn standard() -> Self {
        Self {
            edges: [
                (StageKind::MedicalReview, MEDICAL_DEPS),
                (StageKind::FraudDetection, FRAUD_DEPS),
                (StageKind::RiskAssessment, RISK_DEPS),
                (StageKind::PremiumCalculation, PREMIUM_DEPS),
                (StageKind::FinalDecision, DECISION_DEPS),
            ],
        }
    }

    /// The stage nothing else can run without.
    pub const fn root(&self) -> StageKind {
        StageKind::MedicalReview
    }

    pub fn stages(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.edges.iter().map(|(stage, _)| *stage)
    }

    pub fn dependencies(&self, stage: StageKind) -> &'static [StageDependency] {
        self.edges
            .iter()
            .find(|(candidate, _)| *candidate == stage)
            .map(|(_, deps)| *deps)
            .unwrap_or(&[])
    }

    /// Pure readiness computation over the state.
    ///
    /// Skips cascade within one call: once a stage is planned as skipped, its own
    /// dependants see it as skipped too. Declaration order is a topological order,
    /// so a single pass suffices.
    pub fn ready_stages(&self, state: &RunState) -> Readiness {
        let mut view = state.stage_statuses().clone();
        let mut readiness = Readiness::default();

        for (stage, deps) in &self.edges {
            if view.get(stage).copied() != Some(StageStatus::Pending) {
                continue;
            }

            let blocked_by = deps.iter().find(|dep| {
                dep.kind == DependencyKind::Required
                    && matches!(
                        view.get(&dep.stage).copied(),
                        Some(StageStatus::Failed | StageStatus::Skipped)
                    )
            });
            if let Some(dep) = blocked_by {
                view.insert(*stage, StageStatus::Skipped);
                readiness.skipped.push((*stage, dep.stage));
                continue;
            }

            let runnable = deps.iter().all(|dep| {
                let status = view.get(&dep.stage).copied().unwrap_or(StageStatus::Pending);
                match dep.kind {
                    DependencyKind::Required => status == StageStatus::Completed,
                    DependencyKind::Advisory => status.is_terminal(),
                }
            });
            if runnable {
                readiness.ready.push(*stage);
            }
        }

        readiness
    }

    /// Inputs handed to `stage`: every completed output, with the report default
    /// standing in for advisory prerequisites that settled without completing.
    pub fn prior_outputs(&self, stage: StageKind, state: &RunState) -> PriorOutputs {
        let mut prior = state.completed_outputs();
        for dep in self.dependencies(stage) {
            if dep.kind == DependencyKind::Advisory && !prior.contains_key(&dep.stage) {
                prior.insert(dep.stage, default_section(dep.stage));
            }
        }
        prior
    }

    /// Stages that may execute at the same time as `stage`.
    pub fn concurrent_with(&self, stage: StageKind) -> Vec<StageKind> {
        let deps = self.dependencies(stage);
        self.stages()
            .filter(|other| *other != stage)
            .filter(|other| {
                self.dependencies(*other) == deps
                    && !self.depends_on(*other, stage)
                    && !self.depends_on(stage, *other)
            })
            .collect()
    }

    fn depends_on(&self, stage: StageKind, prerequisite: StageKind) -> bool {
        self.dependencies(stage)
            .iter()
            .any(|dep| dep.stage == prerequisite || self.depends_on(dep.stage, prerequisite))
    }
}

impl Default for StagePipeline {
    fn default() -> Self {
        Self::standard()
    }
}
