//! The public optimization entry point.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use scout_store::MemoryStore;
use scout_types::{
    Goal, ParamValue, ScoutResult, SearchSpace, StudyConfig, StudyStatus,
};

use crate::constraints::ConstraintSet;
use crate::report::Objective;
use crate::runner::StudyRunner;

/// Options recognized by [`optimize`]. Everything has a sensible default;
/// unknown sampler/pruner names fail before any trial runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeOptions {
    pub n_trials: usize,
    pub direction: Goal,
    pub sampler: String,
    pub sampler_opts: serde_json::Value,
    pub pruner: Option<String>,
    pub pruner_opts: serde_json::Value,
    pub parallelism: usize,
    pub seed: u64,
    pub study_name: String,
    pub timeout_ms: Option<u64>,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            n_trials: 100,
            direction: Goal::Minimize,
            sampler: "tpe".to_string(),
            sampler_opts: serde_json::Value::Null,
            pruner: None,
            pruner_opts: serde_json::Value::Null,
            parallelism: 1,
            seed: 0,
            study_name: String::new(),
            timeout_ms: None,
        }
    }
}

impl OptimizeOptions {
    /// Lower the options onto a study config for direct runner use.
    pub fn into_config(self, search_space: SearchSpace) -> StudyConfig {
        let mut config = StudyConfig::new(self.study_name, search_space)
            .with_goal(self.direction)
            .with_max_trials(self.n_trials)
            .with_parallelism(self.parallelism)
            .with_seed(self.seed)
            .with_sampler(&self.sampler, self.sampler_opts);
        if let Some(pruner) = &self.pruner {
            config = config.with_pruner(pruner, self.pruner_opts);
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout_ms(ms);
        }
        config
    }
}

/// What [`optimize`] returns. Callers inspect `status` instead of relying
/// on errors: a study that ran but found nothing completed is not an `Err`.
#[derive(Debug, Clone)]
pub struct OptimizeResult {
    pub study_id: String,
    pub best_score: Option<f64>,
    pub best_params: BTreeMap<String, ParamValue>,
    pub best_trial_id: Option<String>,
    pub n_trials: usize,
    pub status: StudyStatus,
}

/// Run an optimization over `search_space` against a fresh in-memory store.
pub fn optimize(
    objective: Objective,
    search_space: SearchSpace,
    options: OptimizeOptions,
) -> ScoutResult<OptimizeResult> {
    let config = options.into_config(search_space);
    let runner = StudyRunner::new(Arc::new(MemoryStore::new()));
    let outcome = runner.run(config, objective, ConstraintSet::new())?;
    Ok(OptimizeResult {
        study_id: outcome.study_id,
        best_score: outcome.best_score,
        best_params: outcome.best_params,
        best_trial_id: outcome.best_trial_id,
        n_trials: outcome.n_trials,
        status: outcome.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_types::ScoutError;

    fn sphere() -> Objective {
        Arc::new(|h| {
            let x = h.param_f64("x").unwrap_or(0.0);
            let y = h.param_f64("y").unwrap_or(0.0);
            Ok(x * x + y * y)
        })
    }

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add_uniform("x", -5.0, 5.0)
            .add_uniform("y", -5.0, 5.0)
    }

    #[test]
    fn default_options_complete_a_study() {
        let result = optimize(
            sphere(),
            space(),
            OptimizeOptions {
                n_trials: 20,
                sampler: "random".to_string(),
                seed: 1,
                ..OptimizeOptions::default()
            },
        )
        .unwrap();
        assert_eq!(result.status, StudyStatus::Completed);
        assert_eq!(result.n_trials, 20);
        assert!(result.best_score.unwrap() >= 0.0);
        assert!(result.best_params.contains_key("x"));
    }

    #[test]
    fn invalid_parallelism_is_a_config_error() {
        let err = optimize(
            sphere(),
            space(),
            OptimizeOptions {
                parallelism: 0,
                ..OptimizeOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ScoutError::Config(_)));
    }

    #[test]
    fn unknown_pruner_is_rejected() {
        let err = optimize(
            sphere(),
            space(),
            OptimizeOptions {
                pruner: Some("chainsaw".to_string()),
                ..OptimizeOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ScoutError::Config(_)));
    }

    #[test]
    fn options_deserialize_from_json() {
        let options: OptimizeOptions = serde_json::from_value(serde_json::json!({
            "n_trials": 5,
            "direction": "maximize",
            "sampler": "random",
            "parallelism": 2
        }))
        .unwrap();
        assert_eq!(options.n_trials, 5);
        assert_eq!(options.direction, Goal::Maximize);
        assert_eq!(options.parallelism, 2);
        assert!(options.pruner.is_none());
    }
}
