//! Study configuration and lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ConfigError;
use crate::space::SearchSpace;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Minimize,
    Maximize,
}

impl Default for Goal {
    fn default() -> Self {
        Self::Minimize
    }
}

impl Goal {
    /// True when `a` is strictly better than `b` under this goal.
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        match self {
            Self::Minimize => a < b,
            Self::Maximize => a > b,
        }
    }

    /// True when `value` is strictly worse than `threshold` under this goal.
    pub fn is_worse(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Minimize => value > threshold,
            Self::Maximize => value < threshold,
        }
    }
}

impl std::str::FromStr for Goal {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimize" | "min" => Ok(Self::Minimize),
            "maximize" | "max" => Ok(Self::Maximize),
            other => Err(ConfigError::InvalidDirection {
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle state of a study.
///
/// Transitions are monotonic toward a terminal state except for the
/// `Paused ⇌ Running` pair. Studies are never deleted automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudyStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl StudyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: StudyStatus) -> bool {
        use StudyStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            (Paused, Cancelled) | (Paused, Failed) => true,
            (a, b) => *a == b,
        }
    }
}

impl std::fmt::Display for StudyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Top-level configuration for a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    pub id: String,
    pub goal: Goal,
    pub max_trials: usize,
    pub parallelism: usize,
    pub seed: u64,
    pub search_space: SearchSpace,

    /// Which proposal algorithm to use; resolved against a whitelist.
    pub sampler: String,
    /// Options forwarded verbatim to sampler init.
    pub sampler_opts: serde_json::Value,

    /// Early-stopping policy, if any; resolved against a whitelist.
    pub pruner: Option<String>,
    /// Options forwarded verbatim to pruner init.
    pub pruner_opts: serde_json::Value,

    /// Per-trial wall-clock limit in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl StudyConfig {
    pub fn new(id: impl Into<String>, search_space: SearchSpace) -> Self {
        let id = id.into();
        let id = if id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            id
        };
        Self {
            id,
            goal: Goal::Minimize,
            max_trials: 100,
            parallelism: 1,
            seed: 0,
            search_space,
            sampler: "random".to_string(),
            sampler_opts: serde_json::Value::Null,
            pruner: None,
            pruner_opts: serde_json::Value::Null,
            timeout_ms: None,
        }
    }

    pub fn with_goal(mut self, goal: Goal) -> Self {
        self.goal = goal;
        self
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_parallelism(mut self, n: usize) -> Self {
        self.parallelism = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_sampler(mut self, sampler: &str, opts: serde_json::Value) -> Self {
        self.sampler = sampler.to_string();
        self.sampler_opts = opts;
        self
    }

    pub fn with_pruner(mut self, pruner: &str, opts: serde_json::Value) -> Self {
        self.pruner = Some(pruner.to_string());
        self.pruner_opts = opts;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Validate the parts the runner relies on; everything here is a
    /// `Config` error and the study is not created.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_trials < 1 {
            return Err(ConfigError::InvalidMaxTrials {
                value: self.max_trials,
            });
        }
        if self.parallelism < 1 {
            return Err(ConfigError::InvalidParallelism {
                value: self.parallelism,
            });
        }
        self.search_space.validate()
    }
}

/// A study record as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    pub config: StudyConfig,
    pub status: StudyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Study {
    pub fn new(config: StudyConfig) -> Self {
        let now = Utc::now();
        Self {
            config,
            status: StudyStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::SearchSpace;

    fn sample_config() -> StudyConfig {
        StudyConfig::new(
            "test-study",
            SearchSpace::new().add_uniform("x", -5.0, 5.0),
        )
        .with_max_trials(50)
        .with_parallelism(4)
    }

    #[test]
    fn goal_comparisons() {
        assert!(Goal::Minimize.is_better(1.0, 2.0));
        assert!(Goal::Maximize.is_better(2.0, 1.0));
        assert!(Goal::Minimize.is_worse(3.0, 2.0));
        assert!(Goal::Maximize.is_worse(1.0, 2.0));
    }

    #[test]
    fn goal_parsing_rejects_unknown() {
        assert_eq!("minimize".parse::<Goal>().unwrap(), Goal::Minimize);
        assert_eq!("max".parse::<Goal>().unwrap(), Goal::Maximize);
        assert!("upward".parse::<Goal>().is_err());
    }

    #[test]
    fn status_transitions() {
        use StudyStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Paused));
    }

    #[test]
    fn config_validation() {
        let config = sample_config();
        assert!(config.validate().is_ok());

        let bad = sample_config().with_parallelism(0);
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvalidParallelism { value: 0 })
        ));

        let empty = StudyConfig::new("s", SearchSpace::new());
        assert!(matches!(empty.validate(), Err(ConfigError::EmptySpace)));
    }

    #[test]
    fn empty_id_gets_generated() {
        let config = StudyConfig::new("", SearchSpace::new().add_uniform("x", 0.0, 1.0));
        assert!(!config.id.is_empty());
    }
}
