//! Successive Halving: geometric resource rungs, top-fraction retention.

use serde::{Deserialize, Serialize};

use scout_store::TrialStore;
use scout_types::{Goal, PrunerError, TrialStatus};

use crate::Pruner;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HalvingOptions {
    /// Reduction factor between rungs.
    pub eta: f64,
    /// Resource (step) at the first rung.
    pub min_resource: u32,
    /// Completed trials required before any pruning.
    pub warmup_trials: usize,
    /// Peers required at a rung before a decision is made there.
    pub min_peers: usize,
}

impl Default for HalvingOptions {
    fn default() -> Self {
        Self {
            eta: 3.0,
            min_resource: 1,
            warmup_trials: 4,
            min_peers: 4,
        }
    }
}

#[derive(Debug)]
pub struct SuccessiveHalvingPruner {
    opts: HalvingOptions,
    goal: Goal,
}

impl SuccessiveHalvingPruner {
    pub fn new(opts: HalvingOptions, goal: Goal) -> Self {
        Self { opts, goal }
    }

    /// Rung index when `step` sits exactly on a rung boundary
    /// (`min_resource · η^r`), else `None`.
    pub(crate) fn rung_index(step: u32, min_resource: u32, eta: f64) -> Option<u32> {
        if step < min_resource.max(1) {
            return None;
        }
        let mut resource = min_resource.max(1) as f64;
        let mut rung = 0u32;
        // Walk the geometric schedule; rounding keeps integer boundaries.
        while resource < step as f64 + 0.5 {
            if (resource - step as f64).abs() < 0.5 {
                return Some(rung);
            }
            resource *= eta;
            rung += 1;
        }
        if (resource - step as f64).abs() < 0.5 {
            Some(rung)
        } else {
            None
        }
    }

    /// Rank-based retention: does `value` sit inside the keep fraction of
    /// its peers?
    pub(crate) fn within_keep_fraction(
        goal: Goal,
        peers: &[(String, f64)],
        value: f64,
        keep_fraction: f64,
    ) -> bool {
        let mut scores: Vec<f64> = peers.iter().map(|(_, s)| s).copied().collect();
        scores.sort_by(|a, b| {
            let ord = a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal);
            match goal {
                Goal::Minimize => ord,
                Goal::Maximize => ord.reverse(),
            }
        });
        let n_keep = ((scores.len() as f64 * keep_fraction).ceil() as usize)
            .clamp(1, scores.len());
        let cutoff = scores[n_keep - 1];
        !goal.is_worse(value, cutoff)
    }
}

impl Pruner for SuccessiveHalvingPruner {
    fn should_prune(
        &mut self,
        store: &dyn TrialStore,
        study_id: &str,
        _trial_id: &str,
        step: u32,
        value: f64,
    ) -> Result<bool, PrunerError> {
        let Some(rung) = Self::rung_index(step, self.opts.min_resource, self.opts.eta) else {
            return Ok(false);
        };
        if rung == 0 {
            // Everything survives the first rung.
            return Ok(false);
        }

        let trials = store
            .list_trials(study_id)
            .map_err(|e| PrunerError::MalformedState {
                message: e.to_string(),
            })?;
        let completed = trials
            .iter()
            .filter(|t| t.status == TrialStatus::Completed)
            .count();
        if completed < self.opts.warmup_trials {
            return Ok(false);
        }

        let peers = store
            .observations_at_rung(study_id, 0, step)
            .map_err(|e| PrunerError::MalformedState {
                message: e.to_string(),
            })?;
        if peers.len() < self.opts.min_peers {
            return Ok(false);
        }

        // Retain the top η^(−r) fraction at rung r.
        let keep_fraction = self.opts.eta.powi(-(rung as i32));
        Ok(!Self::within_keep_fraction(
            self.goal,
            &peers,
            value,
            keep_fraction,
        ))
    }

    fn keep(
        &self,
        store: &dyn TrialStore,
        study_id: &str,
        trial_id: &str,
        bracket: u32,
        rung_step: u32,
    ) -> Result<bool, PrunerError> {
        let peers = store
            .observations_at_rung(study_id, bracket, rung_step)
            .map_err(|e| PrunerError::MalformedState {
                message: e.to_string(),
            })?;
        if peers.len() < self.opts.min_peers {
            return Ok(true);
        }
        let Some(value) = peers
            .iter()
            .find(|(id, _)| id == trial_id)
            .map(|(_, s)| *s)
        else {
            return Ok(true);
        };
        let rung = Self::rung_index(rung_step, self.opts.min_resource, self.opts.eta)
            .unwrap_or(0);
        if rung == 0 {
            return Ok(true);
        }
        let keep_fraction = self.opts.eta.powi(-(rung as i32));
        Ok(Self::within_keep_fraction(
            self.goal,
            &peers,
            value,
            keep_fraction,
        ))
    }

    fn name(&self) -> &str {
        "successive-halving"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_store::MemoryStore;
    use scout_types::{
        derive_seed, Observation, SearchSpace, Study, StudyConfig, Trial, TrialPatch,
    };
    use std::collections::BTreeMap;

    #[test]
    fn rung_boundaries_follow_the_geometric_schedule() {
        assert_eq!(SuccessiveHalvingPruner::rung_index(1, 1, 3.0), Some(0));
        assert_eq!(SuccessiveHalvingPruner::rung_index(3, 1, 3.0), Some(1));
        assert_eq!(SuccessiveHalvingPruner::rung_index(9, 1, 3.0), Some(2));
        assert_eq!(SuccessiveHalvingPruner::rung_index(27, 1, 3.0), Some(3));
        assert_eq!(SuccessiveHalvingPruner::rung_index(2, 1, 3.0), None);
        assert_eq!(SuccessiveHalvingPruner::rung_index(10, 1, 3.0), None);
    }

    fn store_with_peers(study_id: &str, step: u32, scores: &[f64]) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .put_study(Study::new(StudyConfig::new(
                study_id,
                SearchSpace::new().add_uniform("x", 0.0, 1.0),
            )))
            .unwrap();
        for (i, &s) in scores.iter().enumerate() {
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
            store
                .add_observation(study_id, Observation::new(id.clone(), 0, step, s))
                .unwrap();
            store
                .update_trial(study_id, &id, TrialPatch::completed(s))
                .unwrap();
        }
        store
    }

    #[test]
    fn prunes_outside_keep_fraction() {
        // Nine peers at rung 1 (step 3); keep fraction 1/3 keeps the best 3.
        let scores: Vec<f64> = (1..=9).map(|i| i as f64).collect();
        let store = store_with_peers("s", 3, &scores);
        let mut sha = SuccessiveHalvingPruner::new(HalvingOptions::default(), Goal::Minimize);

        assert!(!sha.should_prune(&store, "s", "t", 3, 2.0).unwrap());
        assert!(!sha.should_prune(&store, "s", "t", 3, 3.0).unwrap());
        assert!(sha.should_prune(&store, "s", "t", 3, 5.0).unwrap());
        assert!(sha.should_prune(&store, "s", "t", 3, 9.5).unwrap());
    }

    #[test]
    fn off_boundary_steps_never_prune() {
        let scores: Vec<f64> = (1..=9).map(|i| i as f64).collect();
        let store = store_with_peers("s", 3, &scores);
        let mut sha = SuccessiveHalvingPruner::new(HalvingOptions::default(), Goal::Minimize);
        assert!(!sha.should_prune(&store, "s", "t", 4, 100.0).unwrap());
    }

    #[test]
    fn warmup_and_min_peers_guard() {
        let store = store_with_peers("s", 3, &[1.0, 2.0]);
        let mut sha = SuccessiveHalvingPruner::new(HalvingOptions::default(), Goal::Minimize);
        // Two completed trials < warmup of 4.
        assert!(!sha.should_prune(&store, "s", "t", 3, 100.0).unwrap());
    }

    #[test]
    fn keep_checks_recorded_peer() {
        let scores: Vec<f64> = (1..=9).map(|i| i as f64).collect();
        let store = store_with_peers("s", 3, &scores);
        let sha = SuccessiveHalvingPruner::new(HalvingOptions::default(), Goal::Minimize);

        let trials = store.list_trials("s").unwrap();
        // Best trial survives, worst does not.
        let best = trials.iter().find(|t| t.score == Some(1.0)).unwrap();
        let worst = trials.iter().find(|t| t.score == Some(9.0)).unwrap();
        assert!(sha.keep(&store, "s", &best.id, 0, 3).unwrap());
        assert!(!sha.keep(&store, "s", &worst.id, 0, 3).unwrap());
    }
}
