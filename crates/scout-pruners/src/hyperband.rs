//! Hyperband: round-robin brackets over a Successive-Halving core.

use serde::{Deserialize, Serialize};

use scout_store::TrialStore;
use scout_types::{Goal, PrunerError};

use crate::halving::SuccessiveHalvingPruner;
use crate::Pruner;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperbandOptions {
    /// Reduction factor between rungs.
    pub eta: f64,
    /// Largest per-trial resource (step budget).
    pub max_resource: u32,
    /// Resource at the first rung.
    pub min_resource: u32,
    /// Peers required at a rung before a decision is made there.
    pub warmup_peers: usize,
}

impl Default for HyperbandOptions {
    fn default() -> Self {
        Self {
            eta: 3.0,
            max_resource: 81,
            min_resource: 1,
            warmup_peers: 4,
        }
    }
}

#[derive(Debug)]
pub struct HyperbandPruner {
    opts: HyperbandOptions,
    goal: Goal,
    n_brackets: u32,
}

impl HyperbandPruner {
    pub fn new(opts: HyperbandOptions, goal: Goal) -> Self {
        // s_max = floor(log_eta(max_resource)); brackets 0..s_max, so a
        // run with eta=3 and max_resource=81 cycles through 4 brackets.
        let s_max = (opts.max_resource.max(1) as f64)
            .log(opts.eta.max(1.0 + f64::EPSILON))
            .floor() as u32;
        Self {
            opts,
            goal,
            n_brackets: s_max.max(1),
        }
    }

    pub fn n_brackets(&self) -> u32 {
        self.n_brackets
    }
}

impl Pruner for HyperbandPruner {
    fn assign_bracket(&mut self, trial_index: u32) -> u32 {
        trial_index % self.n_brackets
    }

    fn should_prune(
        &mut self,
        store: &dyn TrialStore,
        study_id: &str,
        trial_id: &str,
        step: u32,
        value: f64,
    ) -> Result<bool, PrunerError> {
        let Some(rung) =
            SuccessiveHalvingPruner::rung_index(step, self.opts.min_resource, self.opts.eta)
        else {
            return Ok(false);
        };
        if rung == 0 || step > self.opts.max_resource {
            return Ok(false);
        }

        let trial = store
            .fetch_trial(study_id, trial_id)
            .map_err(|e| PrunerError::MalformedState {
                message: e.to_string(),
            })?;
        let peers = store
            .observations_at_rung(study_id, trial.bracket, step)
            .map_err(|e| PrunerError::MalformedState {
                message: e.to_string(),
            })?;
        if peers.len() < self.opts.warmup_peers {
            return Ok(false);
        }

        // Within a bracket each rung keeps the top 1/eta of its peers.
        let keep_fraction = 1.0 / self.opts.eta;
        Ok(!SuccessiveHalvingPruner::within_keep_fraction(
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
        if peers.len() < self.opts.warmup_peers {
            return Ok(true);
        }
        let Some(value) = peers
            .iter()
            .find(|(id, _)| id == trial_id)
            .map(|(_, s)| *s)
        else {
            return Ok(true);
        };
        Ok(SuccessiveHalvingPruner::within_keep_fraction(
            self.goal,
            &peers,
            value,
            1.0 / self.opts.eta,
        ))
    }

    fn name(&self) -> &str {
        "hyperband"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_store::MemoryStore;
    use scout_types::{
        derive_seed, Observation, SearchSpace, Study, StudyConfig, Trial,
    };
    use std::collections::BTreeMap;

    #[test]
    fn bracket_assignment_round_robins() {
        let mut hb = HyperbandPruner::new(HyperbandOptions::default(), Goal::Minimize);
        assert_eq!(hb.n_brackets(), 4);
        let brackets: Vec<u32> = (0..12).map(|i| hb.assign_bracket(i)).collect();
        assert_eq!(brackets, vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3]);
    }

    #[test]
    fn bracket_counts_differ_by_at_most_one() {
        let mut hb = HyperbandPruner::new(HyperbandOptions::default(), Goal::Minimize);
        let mut counts = vec![0usize; hb.n_brackets() as usize];
        for i in 0..50 {
            counts[hb.assign_bracket(i) as usize] += 1;
        }
        let max = counts.iter().copied().max().unwrap();
        let min = counts.iter().copied().min().unwrap();
        assert!(max - min <= 1, "counts: {counts:?}");
    }

    #[test]
    fn peers_are_scoped_to_the_bracket() {
        let store = MemoryStore::new();
        store
            .put_study(Study::new(StudyConfig::new(
                "s",
                SearchSpace::new().add_uniform("x", 0.0, 1.0),
            )))
            .unwrap();

        let mut hb = HyperbandPruner::new(HyperbandOptions::default(), Goal::Minimize);

        // Pending trial in bracket 1; peers exist only in bracket 0.
        let trial = Trial::new("s", 9, BTreeMap::new(), derive_seed("s", 9, 0)).with_bracket(1);
        let trial_id = trial.id.clone();
        store.add_trial(trial).unwrap();
        for i in 0..6 {
            store
                .add_observation("s", Observation::new(format!("peer-{i}"), 0, 3, i as f64))
                .unwrap();
        }
        // No peers in bracket 1 yet: never prune.
        assert!(!hb.should_prune(&store, "s", &trial_id, 3, 100.0).unwrap());

        // Give bracket 1 its own peers; the same bad report now prunes.
        for i in 0..6 {
            store
                .add_observation("s", Observation::new(format!("b1-{i}"), 1, 3, i as f64))
                .unwrap();
        }
        assert!(hb.should_prune(&store, "s", &trial_id, 3, 100.0).unwrap());
        // But the best value at the rung survives.
        assert!(!hb.should_prune(&store, "s", &trial_id, 3, 0.0).unwrap());
    }

    #[test]
    fn steps_past_max_resource_are_ignored() {
        let store = MemoryStore::new();
        store
            .put_study(Study::new(StudyConfig::new(
                "s",
                SearchSpace::new().add_uniform("x", 0.0, 1.0),
            )))
            .unwrap();
        let trial = Trial::new("s", 0, BTreeMap::new(), derive_seed("s", 0, 0));
        let trial_id = trial.id.clone();
        store.add_trial(trial).unwrap();

        let mut hb = HyperbandPruner::new(
            HyperbandOptions {
                max_resource: 9,
                ..HyperbandOptions::default()
            },
            Goal::Minimize,
        );
        assert!(!hb.should_prune(&store, "s", &trial_id, 27, 100.0).unwrap());
    }
}
