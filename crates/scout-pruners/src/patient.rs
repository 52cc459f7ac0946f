//! Patience-based pruning: stop a trial whose reports have stopped
//! improving.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use scout_store::TrialStore;
use scout_types::{Goal, PrunerError};

use crate::Pruner;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientOptions {
    /// Consecutive non-improving reports tolerated before pruning.
    pub patience: usize,
    /// Improvement smaller than this does not reset the counter.
    pub min_delta: f64,
}

impl Default for PatientOptions {
    fn default() -> Self {
        Self {
            patience: 3,
            min_delta: 0.0,
        }
    }
}

/// Per-trial progress state, cleaned up on terminal transition.
#[derive(Debug, Clone, Copy)]
struct Progress {
    best: f64,
    stale: usize,
}

#[derive(Debug)]
pub struct PatientPruner {
    opts: PatientOptions,
    goal: Goal,
    progress: HashMap<String, Progress>,
}

impl PatientPruner {
    pub fn new(opts: PatientOptions, goal: Goal) -> Self {
        Self {
            opts,
            goal,
            progress: HashMap::new(),
        }
    }
}

impl Pruner for PatientPruner {
    fn should_prune(
        &mut self,
        _store: &dyn TrialStore,
        _study_id: &str,
        trial_id: &str,
        _step: u32,
        value: f64,
    ) -> Result<bool, PrunerError> {
        let entry = match self.progress.get_mut(trial_id) {
            Some(entry) => entry,
            None => {
                // First report seeds the baseline and is never stale.
                self.progress.insert(
                    trial_id.to_string(),
                    Progress {
                        best: value,
                        stale: 0,
                    },
                );
                return Ok(false);
            }
        };

        let improved = match self.goal {
            Goal::Minimize => value < entry.best - self.opts.min_delta,
            Goal::Maximize => value > entry.best + self.opts.min_delta,
        };
        if improved {
            entry.best = value;
            entry.stale = 0;
        } else {
            entry.stale += 1;
        }
        Ok(entry.stale > self.opts.patience)
    }

    fn on_trial_finished(&mut self, trial_id: &str) {
        self.progress.remove(trial_id);
    }

    fn name(&self) -> &str {
        "patient"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_store::MemoryStore;

    fn pruner(patience: usize, min_delta: f64, goal: Goal) -> PatientPruner {
        PatientPruner::new(
            PatientOptions {
                patience,
                min_delta,
            },
            goal,
        )
    }

    #[test]
    fn prunes_after_patience_exhausted() {
        let store = MemoryStore::new();
        let mut p = pruner(2, 0.0, Goal::Minimize);

        assert!(!p.should_prune(&store, "s", "t", 0, 1.0).unwrap());
        assert!(!p.should_prune(&store, "s", "t", 1, 1.0).unwrap());
        assert!(!p.should_prune(&store, "s", "t", 2, 1.0).unwrap());
        // Third consecutive non-improving report exceeds patience 2.
        assert!(p.should_prune(&store, "s", "t", 3, 1.0).unwrap());
    }

    #[test]
    fn improvement_resets_the_counter() {
        let store = MemoryStore::new();
        let mut p = pruner(2, 0.0, Goal::Minimize);

        p.should_prune(&store, "s", "t", 0, 1.0).unwrap();
        p.should_prune(&store, "s", "t", 1, 1.0).unwrap();
        p.should_prune(&store, "s", "t", 2, 1.0).unwrap();
        // Improvement rescues the trial.
        assert!(!p.should_prune(&store, "s", "t", 3, 0.5).unwrap());
        assert!(!p.should_prune(&store, "s", "t", 4, 0.5).unwrap());
    }

    #[test]
    fn min_delta_requires_meaningful_improvement() {
        let store = MemoryStore::new();
        let mut p = pruner(1, 0.1, Goal::Minimize);

        p.should_prune(&store, "s", "t", 0, 1.0).unwrap();
        // 0.95 improves by less than min_delta: counts as stale.
        assert!(!p.should_prune(&store, "s", "t", 1, 0.95).unwrap());
        assert!(p.should_prune(&store, "s", "t", 2, 0.94).unwrap());
    }

    #[test]
    fn trials_are_tracked_independently() {
        let store = MemoryStore::new();
        let mut p = pruner(1, 0.0, Goal::Minimize);

        p.should_prune(&store, "s", "a", 0, 1.0).unwrap();
        p.should_prune(&store, "s", "a", 1, 1.0).unwrap();
        // Fresh trial b has its own counter.
        assert!(!p.should_prune(&store, "s", "b", 0, 5.0).unwrap());
    }

    #[test]
    fn state_is_cleaned_up_on_finish() {
        let store = MemoryStore::new();
        let mut p = pruner(1, 0.0, Goal::Minimize);
        p.should_prune(&store, "s", "t", 0, 1.0).unwrap();
        assert!(!p.progress.is_empty());
        p.on_trial_finished("t");
        assert!(p.progress.is_empty());
    }

    #[test]
    fn maximize_direction() {
        let store = MemoryStore::new();
        let mut p = pruner(1, 0.0, Goal::Maximize);
        p.should_prune(&store, "s", "t", 0, 1.0).unwrap();
        assert!(!p.should_prune(&store, "s", "t", 1, 2.0).unwrap());
        assert!(!p.should_prune(&store, "s", "t", 2, 2.0).unwrap());
        assert!(p.should_prune(&store, "s", "t", 3, 1.9).unwrap());
    }
}
