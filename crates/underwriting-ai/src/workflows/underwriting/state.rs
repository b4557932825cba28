use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::domain::{
    ApplicationId, RunId, StageKind, StageResult, StageResultStatus, StageStatus,
};

/// Completed payloads handed to downstream stages, keyed by producing stage.
pub type PriorOutputs = BTreeMap<StageKind, Value>;

/// Lifecycle of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Initialized,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Per-run mutable state, owned by the task driving the run.
#[derive(Debug, Clone)]
pub struct RunState {
    run_id: RunId,
    application_id: ApplicationId,
    started_at: DateTime<Utc>,
    status: RunStatus,
    stages: BTreeMap<StageKind, StageStatus>,
    results: Vec<StageResult>,
    sequence: u64,
}

impl RunState {
    pub fn new(run_id: RunId, application_id: ApplicationId, started_at: DateTime<Utc>) -> Self {
        let stages = StageKind::ordered()
            .into_iter()
            .map(|stage| (stage, StageStatus::Pending))
            .collect();

        Self {
            run_id,
            application_id,
            started_at,
            status: RunStatus::Initialized,
            stages,
            results: Vec::new(),
            sequence: 0,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn application_id(&self) -> &ApplicationId {
        &self.application_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn stage_status(&self, stage: StageKind) -> StageStatus {
        self.stages
            .get(&stage)
            .copied()
            .unwrap_or(StageStatus::Pending)
    }

    pub fn stage_statuses(&self) -> &BTreeMap<StageKind, StageStatus> {
        &self.stages
    }

    /// Results in completion order.
    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn result(&self, stage: StageKind) -> Option<&StageResult> {
        self.results.iter().find(|result| result.stage == stage)
    }

    pub fn completed_outputs(&self) -> PriorOutputs {
        self.results
            .iter()
            .filter(|result| result.is_completed())
            .map(|result| (result.stage, result.payload.clone()))
            .collect()
    }

    pub fn is_settled(&self) -> bool {
        self.stages.values().all(|status| status.is_terminal())
    }

    /// Stages dispatched but not yet finished.
    pub fn in_flight(&self) -> Vec<StageKind> {
        self.stages
            .iter()
            .filter(|(_, status)| **status == StageStatus::Dispatched)
            .map(|(stage, _)| *stage)
            .collect()
    }

    /// Latest stage completion time, or the start time when nothing finished.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.results
            .iter()
            .map(|result| result.finished_at)
            .max()
            .unwrap_or(self.started_at)
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub fn begin(&mut self) -> Result<(), TransitionError> {
        match self.status {
            RunStatus::Initialized => {
                self.status = RunStatus::Running;
                Ok(())
            }
            other => Err(TransitionError::Run {
                from: other,
                to: RunStatus::Running,
            }),
        }
    }

    pub fn finish(&mut self, outcome: RunStatus) -> Result<(), TransitionError> {
        match (self.status, outcome) {
            (RunStatus::Running, RunStatus::Completed | RunStatus::Failed) => {
                self.status = outcome;
                Ok(())
            }
            (from, to) => Err(TransitionError::Run { from, to }),
        }
    }

    pub fn mark_dispatched(&mut self, stage: StageKind) -> Result<(), TransitionError> {
        self.transition(stage, StageStatus::Pending, StageStatus::Dispatched)
    }

    pub fn mark_skipped(&mut self, stage: StageKind) -> Result<(), TransitionError> {
        self.transition(stage, StageStatus::Pending, StageStatus::Skipped)
    }

    /// Records a dispatched stage's result and appends it in completion order.
    pub fn record(&mut self, result: StageResult) -> Result<(), TransitionError> {
        let to = match result.status {
            StageResultStatus::Completed => StageStatus::Completed,
            StageResultStatus::Failed => StageStatus::Failed,
        };
        self.transition(result.stage, StageStatus::Dispatched, to)?;
        self.results.push(result);
        Ok(())
    }

    fn transition(
        &mut self,
        stage: StageKind,
        expected: StageStatus,
        to: StageStatus,
    ) -> Result<(), TransitionError> {
        let current = self.stage_status(stage);
        if current != expected {
            return Err(TransitionError::Stage {
                stage,
                from: current,
                to,
            });
        }
        self.stages.insert(stage, to);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("illegal transition for {stage}: {from:?} -> {to:?}")]
    Stage {
        stage: StageKind,
        from: StageStatus,
        to: StageStatus,
    },
    #[error("illegal run transition: {from:?} -> {to:?}")]
    Run { from: RunStatus, to: RunStatus },
}
