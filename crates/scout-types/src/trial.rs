//! Trial and observation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::ConfigError;
use crate::seed::TrialSeed;
use crate::space::ParamValue;

/// Lifecycle state of a single trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Pruned,
}

impl TrialStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Pruned)
    }
}

impl std::str::FromStr for TrialStatus {
    type Err = ConfigError;

    /// The legacy `succeeded` vocabulary is rejected at the boundary;
    /// `completed` is the only accepted spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "pruned" => Ok(Self::Pruned),
            other => Err(ConfigError::InvalidStatus {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Pruned => "pruned",
        };
        f.write_str(s)
    }
}

/// One evaluation of the objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: String,
    pub study_id: String,
    /// Monotonic insertion order within the study, assigned at dequeue.
    pub number: u32,
    pub params: BTreeMap<String, ParamValue>,
    /// Hyperband bracket; 0 when bracket scheduling is unused.
    pub bracket: u32,
    /// Checkpoint rung within the bracket; 0 when unused.
    pub rung: u32,
    pub score: Option<f64>,
    pub status: TrialStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub intermediate_values: BTreeMap<u32, f64>,
    /// Deterministic triplet seed derived from (study_id, number, base_seed).
    pub seed: TrialSeed,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(
        study_id: impl Into<String>,
        number: u32,
        params: BTreeMap<String, ParamValue>,
        seed: TrialSeed,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            study_id: study_id.into(),
            number,
            params,
            bracket: 0,
            rung: 0,
            score: None,
            status: TrialStatus::Pending,
            started_at: None,
            finished_at: None,
            intermediate_values: BTreeMap::new(),
            seed,
            error: None,
        }
    }

    pub fn with_bracket(mut self, bracket: u32) -> Self {
        self.bracket = bracket;
        self
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, score: f64) {
        self.status = TrialStatus::Completed;
        self.score = Some(score);
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_pruned(&mut self) {
        self.status = TrialStatus::Pruned;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// The mutable subset of a trial, applied atomically by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrialPatch {
    pub status: Option<TrialStatus>,
    pub score: Option<f64>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Intermediate values to merge in, keyed by step.
    pub intermediate_values: BTreeMap<u32, f64>,
}

impl TrialPatch {
    pub fn running() -> Self {
        Self {
            status: Some(TrialStatus::Running),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn completed(score: f64) -> Self {
        Self {
            status: Some(TrialStatus::Completed),
            score: Some(score),
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TrialStatus::Failed),
            error: Some(error.into()),
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn pruned() -> Self {
        Self {
            status: Some(TrialStatus::Pruned),
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn report(step: u32, value: f64) -> Self {
        let mut intermediate_values = BTreeMap::new();
        intermediate_values.insert(step, value);
        Self {
            intermediate_values,
            ..Default::default()
        }
    }
}

/// An intermediate value reported during a trial. Immutable after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub trial_id: String,
    pub bracket: u32,
    pub rung: u32,
    pub score: f64,
    pub recorded_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(trial_id: impl Into<String>, bracket: u32, rung: u32, score: f64) -> Self {
        Self {
            trial_id: trial_id.into(),
            bracket,
            rung,
            score,
            recorded_at: Utc::now(),
        }
    }
}
