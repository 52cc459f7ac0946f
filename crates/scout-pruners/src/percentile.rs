//! Median and percentile pruning.
//!
//! Both compare the reported value against an order statistic of the
//! intermediate values that completed trials reported at the same step; the
//! median pruner is the 50th percentile specialization.

use serde::{Deserialize, Serialize};

use scout_math::percentile;
use scout_store::TrialStore;
use scout_types::{ConfigError, Goal, PrunerError, TrialStatus};

use crate::Pruner;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PercentileOptions {
    /// Percentile of peers a value must beat to survive (minimize: values
    /// above the threshold are pruned).
    pub percentile: f64,
    /// Completed trials required before any pruning.
    pub n_startup_trials: usize,
    /// Steps at the start of every trial that are never pruned.
    pub n_warmup_steps: u32,
    /// Only evaluate at steps divisible by this interval.
    pub interval_steps: u32,
}

impl Default for PercentileOptions {
    fn default() -> Self {
        Self {
            percentile: 50.0,
            n_startup_trials: 5,
            n_warmup_steps: 0,
            interval_steps: 1,
        }
    }
}

#[derive(Debug)]
pub struct PercentilePruner {
    opts: PercentileOptions,
    goal: Goal,
    label: &'static str,
}

impl PercentilePruner {
    pub fn from_opts(opts: PercentileOptions, goal: Goal) -> Result<Self, ConfigError> {
        if !(0.0..=100.0).contains(&opts.percentile) {
            return Err(ConfigError::PercentileOutOfRange {
                value: opts.percentile,
            });
        }
        Ok(Self {
            opts,
            goal,
            label: "percentile",
        })
    }

    /// Threshold at this step from the completed trials' intermediate
    /// values; `None` while data is insufficient.
    fn threshold(
        &self,
        store: &dyn TrialStore,
        study_id: &str,
        step: u32,
    ) -> Result<Option<f64>, PrunerError> {
        let trials = match store.list_trials(study_id) {
            Ok(trials) => trials,
            // A vanished study is malformed state, not "insufficient data".
            Err(e) => {
                return Err(PrunerError::MalformedState {
                    message: e.to_string(),
                })
            }
        };

        let completed: Vec<_> = trials
            .iter()
            .filter(|t| t.status == TrialStatus::Completed)
            .collect();
        if completed.len() < self.opts.n_startup_trials {
            return Ok(None);
        }

        let values: Vec<f64> = completed
            .iter()
            .filter_map(|t| t.intermediate_values.get(&step).copied())
            .collect();
        if values.is_empty() {
            return Ok(None);
        }

        let p = match self.goal {
            Goal::Minimize => self.opts.percentile,
            Goal::Maximize => 100.0 - self.opts.percentile,
        };
        Ok(Some(percentile(&values, p)))
    }
}

impl Pruner for PercentilePruner {
    fn should_prune(
        &mut self,
        store: &dyn TrialStore,
        study_id: &str,
        _trial_id: &str,
        step: u32,
        value: f64,
    ) -> Result<bool, PrunerError> {
        if step < self.opts.n_warmup_steps {
            return Ok(false);
        }
        if self.opts.interval_steps > 1 && step % self.opts.interval_steps != 0 {
            return Ok(false);
        }
        match self.threshold(store, study_id, step)? {
            // Strictly worse than the threshold prunes.
            Some(threshold) => Ok(self.goal.is_worse(value, threshold)),
            None => Ok(false),
        }
    }

    fn name(&self) -> &str {
        self.label
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MedianOptions {
    pub n_startup_trials: usize,
    pub n_warmup_steps: u32,
    pub interval_steps: u32,
}

impl Default for MedianOptions {
    fn default() -> Self {
        Self {
            n_startup_trials: 5,
            n_warmup_steps: 0,
            interval_steps: 1,
        }
    }
}

/// The 50th-percentile special case.
#[derive(Debug)]
pub struct MedianPruner {
    inner: PercentilePruner,
}

impl MedianPruner {
    pub fn new(opts: MedianOptions, goal: Goal) -> Self {
        let inner = PercentilePruner::from_opts(
            PercentileOptions {
                percentile: 50.0,
                n_startup_trials: opts.n_startup_trials,
                n_warmup_steps: opts.n_warmup_steps,
                interval_steps: opts.interval_steps,
            },
            goal,
        )
        .expect("50.0 is always a valid percentile");
        Self {
            inner: PercentilePruner {
                label: "median",
                ..inner
            },
        }
    }
}

impl Pruner for MedianPruner {
    fn should_prune(
        &mut self,
        store: &dyn TrialStore,
        study_id: &str,
        trial_id: &str,
        step: u32,
        value: f64,
    ) -> Result<bool, PrunerError> {
        self.inner.should_prune(store, study_id, trial_id, step, value)
    }

    fn name(&self) -> &str {
        "median"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_store::MemoryStore;
    use scout_types::{derive_seed, SearchSpace, Study, StudyConfig, Trial, TrialPatch};
    use std::collections::BTreeMap;

    /// Seed a study with `n` completed trials whose intermediate value at
    /// every step in `steps` is taken from `values[i]`.
    fn seeded_store(study_id: &str, values: &[f64], steps: &[u32]) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .put_study(Study::new(StudyConfig::new(
                study_id,
                SearchSpace::new().add_uniform("x", 0.0, 1.0),
            )))
            .unwrap();
        for (i, &v) in values.iter().enumerate() {
            let trial = Trial::new(
                study_id,
                i as u32,
                BTreeMap::new(),
                derive_seed(study_id, i as u32, 0),
            );
            let id = trial.id.clone();
            store.add_trial(trial).unwrap();
            store
                .update_trial(study_id, &id, TrialPatch::running())
                .unwrap();
            for &s in steps {
                store
                    .update_trial(study_id, &id, TrialPatch::report(s, v))
                    .unwrap();
            }
            store
                .update_trial(study_id, &id, TrialPatch::completed(v))
                .unwrap();
        }
        store
    }

    #[test]
    fn median_prunes_clearly_bad_values() {
        let store = seeded_store("s", &[1.0, 0.8, 0.6, 0.5, 0.4], &[5]);
        let mut pruner = MedianPruner::new(MedianOptions::default(), Goal::Minimize);

        // Median at step 5 is 0.6: a report of 10.0 is pruned, 0.3 is kept.
        assert!(pruner.should_prune(&store, "s", "t", 5, 10.0).unwrap());
        assert!(!pruner.should_prune(&store, "s", "t", 5, 0.3).unwrap());
        // Equal to the median is not strictly worse.
        assert!(!pruner.should_prune(&store, "s", "t", 5, 0.6).unwrap());
    }

    #[test]
    fn startup_trials_guard() {
        let store = seeded_store("s", &[1.0, 0.8], &[5]);
        let mut pruner = MedianPruner::new(MedianOptions::default(), Goal::Minimize);
        // Only 2 completed trials < 5 startup requirement.
        assert!(!pruner.should_prune(&store, "s", "t", 5, 100.0).unwrap());
    }

    #[test]
    fn warmup_and_interval_gates() {
        let store = seeded_store("s", &[1.0, 0.8, 0.6, 0.5, 0.4], &[2, 3, 4, 6]);
        let mut pruner = MedianPruner::new(
            MedianOptions {
                n_warmup_steps: 3,
                interval_steps: 2,
                ..MedianOptions::default()
            },
            Goal::Minimize,
        );
        // Below warmup.
        assert!(!pruner.should_prune(&store, "s", "t", 2, 100.0).unwrap());
        // Past warmup but off the interval.
        assert!(!pruner.should_prune(&store, "s", "t", 3, 100.0).unwrap());
        // Step 4: past warmup, on the interval.
        assert!(pruner.should_prune(&store, "s", "t", 4, 100.0).unwrap());
    }

    #[test]
    fn percentile_threshold_interpolates() {
        let store = seeded_store("s", &[1.0, 2.0, 3.0, 4.0, 5.0], &[1]);
        let mut pruner = PercentilePruner::from_opts(
            PercentileOptions {
                percentile: 25.0,
                ..PercentileOptions::default()
            },
            Goal::Minimize,
        )
        .unwrap();
        // 25th percentile of [1..5] is 2.0: only the top quarter survives.
        assert!(pruner.should_prune(&store, "s", "t", 1, 2.5).unwrap());
        assert!(!pruner.should_prune(&store, "s", "t", 1, 1.5).unwrap());
    }

    #[test]
    fn maximize_flips_comparison() {
        let store = seeded_store("s", &[1.0, 0.8, 0.6, 0.5, 0.4], &[5]);
        let mut pruner = MedianPruner::new(MedianOptions::default(), Goal::Maximize);
        assert!(pruner.should_prune(&store, "s", "t", 5, 0.1).unwrap());
        assert!(!pruner.should_prune(&store, "s", "t", 5, 0.9).unwrap());
    }

    #[test]
    fn no_values_at_step_means_no_prune() {
        let store = seeded_store("s", &[1.0, 0.8, 0.6, 0.5, 0.4], &[5]);
        let mut pruner = MedianPruner::new(MedianOptions::default(), Goal::Minimize);
        assert!(!pruner.should_prune(&store, "s", "t", 9, 100.0).unwrap());
    }
}
