//! Wilcoxon signed-rank pruning: stop a trial whose intermediate-value
//! curve is statistically worse than the best completed trial's.

use serde::{Deserialize, Serialize};

use scout_math::{mean, normal_cdf, ranks};
use scout_store::TrialStore;
use scout_types::{Goal, PrunerError, Trial, TrialStatus};

use crate::Pruner;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WilcoxonOptions {
    /// Completed trials required before any test is run.
    pub n_startup_trials: usize,
    /// Two-tailed significance level below which the trial is pruned.
    pub p_threshold: f64,
}

impl Default for WilcoxonOptions {
    fn default() -> Self {
        Self {
            n_startup_trials: 5,
            p_threshold: 0.1,
        }
    }
}

#[derive(Debug)]
pub struct WilcoxonPruner {
    opts: WilcoxonOptions,
    goal: Goal,
}

impl WilcoxonPruner {
    pub fn new(opts: WilcoxonOptions, goal: Goal) -> Self {
        Self { opts, goal }
    }

    /// Two-tailed p-value of the signed-rank statistic `w = min(W+, W−)`
    /// for `n` non-zero differences with the given tie-averaged ranks.
    fn p_value(w: f64, used_ranks: &[f64]) -> f64 {
        let n = used_ranks.len();
        if n == 0 {
            return 1.0;
        }
        if n <= 10 {
            // Exact: enumerate the distribution of W+ over all 2^n sign
            // assignments. Ranks are doubled so tie-averaged halves stay
            // integral.
            let doubled: Vec<u64> = used_ranks.iter().map(|r| (2.0 * r).round() as u64).collect();
            let max_sum: u64 = doubled.iter().sum();
            let mut counts = vec![0f64; (max_sum + 1) as usize];
            counts[0] = 1.0;
            for &r in &doubled {
                for s in (r..=max_sum).rev() {
                    counts[s as usize] += counts[(s - r) as usize];
                }
            }
            let w2 = (2.0 * w).round() as u64;
            let cum: f64 = counts
                .iter()
                .take((w2.min(max_sum) + 1) as usize)
                .sum();
            let total = 2f64.powi(n as i32);
            (2.0 * cum / total).min(1.0)
        } else {
            // Continuity-corrected normal approximation.
            let n = n as f64;
            let mean_w = n * (n + 1.0) / 4.0;
            let var_w = n * (n + 1.0) * (2.0 * n + 1.0) / 24.0;
            let z = (w - mean_w + 0.5) / var_w.sqrt();
            (2.0 * normal_cdf(z)).min(1.0)
        }
    }

    /// Intermediate values in step order.
    fn curve(trial: &Trial) -> Vec<f64> {
        trial.intermediate_values.values().copied().collect()
    }
}

impl Pruner for WilcoxonPruner {
    fn should_prune(
        &mut self,
        store: &dyn TrialStore,
        study_id: &str,
        trial_id: &str,
        step: u32,
        value: f64,
    ) -> Result<bool, PrunerError> {
        let trials = store
            .list_trials(study_id)
            .map_err(|e| PrunerError::MalformedState {
                message: e.to_string(),
            })?;

        let completed: Vec<&Trial> = trials
            .iter()
            .filter(|t| t.status == TrialStatus::Completed && t.score.is_some())
            .collect();
        if completed.len() < self.opts.n_startup_trials {
            return Ok(false);
        }

        // Best completed trial, ties to the earlier number.
        let best = completed
            .iter()
            .min_by(|a, b| {
                let (sa, sb) = (a.score.unwrap(), b.score.unwrap());
                let ord = match self.goal {
                    Goal::Minimize => sa.partial_cmp(&sb),
                    Goal::Maximize => sb.partial_cmp(&sa),
                }
                .unwrap_or(std::cmp::Ordering::Equal);
                ord.then(a.number.cmp(&b.number))
            })
            .expect("completed set is non-empty");

        let pending = trials.iter().find(|t| t.id == trial_id);
        let mut pending_curve = pending.map(Self::curve).unwrap_or_default();
        // The value being reported may not have landed in the store yet.
        if pending.map_or(true, |t| !t.intermediate_values.contains_key(&step)) {
            pending_curve.push(value);
        }
        let mut best_curve = Self::curve(best);
        if pending_curve.is_empty() || best_curve.is_empty() {
            return Ok(false);
        }

        // Pair up by padding the shorter vector with its own mean.
        let pending_mean = mean(&pending_curve);
        let best_mean = mean(&best_curve);
        while pending_curve.len() < best_curve.len() {
            pending_curve.push(pending_mean);
        }
        while best_curve.len() < pending_curve.len() {
            best_curve.push(best_mean);
        }

        // Signed differences; zeros carry no information.
        let diffs: Vec<f64> = pending_curve
            .iter()
            .zip(&best_curve)
            .map(|(p, b)| p - b)
            .filter(|d| *d != 0.0)
            .collect();
        if diffs.is_empty() {
            return Ok(false);
        }

        let abs: Vec<f64> = diffs.iter().map(|d| d.abs()).collect();
        let rank = ranks(&abs);
        let mut w_plus = 0.0;
        let mut w_minus = 0.0;
        for (d, r) in diffs.iter().zip(&rank) {
            if *d > 0.0 {
                w_plus += r;
            } else {
                w_minus += r;
            }
        }
        let w = w_plus.min(w_minus);
        let p = Self::p_value(w, &rank);

        let worse = self.goal.is_worse(mean(&pending_curve), mean(&best_curve));
        Ok(p < self.opts.p_threshold && worse)
    }

    fn name(&self) -> &str {
        "wilcoxon"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_store::MemoryStore;
    use scout_types::{derive_seed, SearchSpace, Study, StudyConfig, TrialPatch};
    use std::collections::BTreeMap;

    fn store_with_curves(study_id: &str, curves: &[Vec<f64>]) -> (MemoryStore, Vec<String>) {
        let store = MemoryStore::new();
        store
            .put_study(Study::new(StudyConfig::new(
                study_id,
                SearchSpace::new().add_uniform("x", 0.0, 1.0),
            )))
            .unwrap();
        let mut ids = Vec::new();
        for (i, curve) in curves.iter().enumerate() {
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
            for (s, &v) in curve.iter().enumerate() {
                store
                    .update_trial(study_id, &id, TrialPatch::report(s as u32, v))
                    .unwrap();
            }
            let last = *curve.last().unwrap();
            store
                .update_trial(study_id, &id, TrialPatch::completed(last))
                .unwrap();
            ids.push(id);
        }
        (store, ids)
    }

    #[test]
    fn exact_p_value_for_known_case() {
        // Five untied ranks, all differences one-sided: W = 0,
        // P(W+ = 0) = 1/32, two-tailed p = 1/16.
        let rank = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let p = WilcoxonPruner::p_value(0.0, &rank);
        assert!((p - 1.0 / 16.0).abs() < 1e-12);
    }

    #[test]
    fn normal_approximation_for_large_n() {
        let rank: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        // A middling W should be nowhere near significant.
        let mean_w = 20.0 * 21.0 / 4.0;
        let p = WilcoxonPruner::p_value(mean_w, &rank);
        assert!(p > 0.9);
        // An extreme W should be.
        let p = WilcoxonPruner::p_value(0.0, &rank);
        assert!(p < 0.01);
    }

    #[test]
    fn prunes_consistently_worse_trial() {
        // Five good completed trials, then a pending trial far worse at
        // every step.
        let good = vec![1.0, 0.8, 0.6, 0.5, 0.4, 0.35, 0.3, 0.28, 0.26, 0.25, 0.24, 0.23];
        let curves: Vec<Vec<f64>> = (0..5).map(|_| good.clone()).collect();
        let (store, _) = store_with_curves("s", &curves);

        let pending = Trial::new("s", 10, BTreeMap::new(), derive_seed("s", 10, 0));
        let pending_id = pending.id.clone();
        store.add_trial(pending).unwrap();
        store
            .update_trial("s", &pending_id, TrialPatch::running())
            .unwrap();
        for s in 0..11u32 {
            store
                .update_trial("s", &pending_id, TrialPatch::report(s, 10.0 + s as f64))
                .unwrap();
        }

        let mut p = WilcoxonPruner::new(WilcoxonOptions::default(), Goal::Minimize);
        assert!(p.should_prune(&store, "s", &pending_id, 11, 25.0).unwrap());
    }

    #[test]
    fn does_not_prune_equivalent_trial() {
        let good = vec![1.0, 0.8, 0.6, 0.5, 0.4];
        let curves: Vec<Vec<f64>> = (0..5).map(|_| good.clone()).collect();
        let (store, _) = store_with_curves("s", &curves);

        let pending = Trial::new("s", 10, BTreeMap::new(), derive_seed("s", 10, 0));
        let pending_id = pending.id.clone();
        store.add_trial(pending).unwrap();
        store
            .update_trial("s", &pending_id, TrialPatch::running())
            .unwrap();
        for (s, v) in good.iter().enumerate() {
            store
                .update_trial("s", &pending_id, TrialPatch::report(s as u32, *v))
                .unwrap();
        }

        let mut p = WilcoxonPruner::new(WilcoxonOptions::default(), Goal::Minimize);
        // A curve tracking the best trial is neither significant nor worse.
        assert!(!p.should_prune(&store, "s", &pending_id, 5, 0.4).unwrap());
    }

    #[test]
    fn startup_guard_blocks_early_tests() {
        let (store, _) = store_with_curves("s", &[vec![1.0, 0.5]]);
        let mut p = WilcoxonPruner::new(WilcoxonOptions::default(), Goal::Minimize);
        assert!(!p.should_prune(&store, "s", "missing", 1, 100.0).unwrap());
    }

    #[test]
    fn better_mean_is_never_pruned_even_if_significant() {
        let bad = vec![5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0];
        let curves: Vec<Vec<f64>> = (0..5).map(|_| bad.clone()).collect();
        let (store, _) = store_with_curves("s", &curves);

        let pending = Trial::new("s", 10, BTreeMap::new(), derive_seed("s", 10, 0));
        let pending_id = pending.id.clone();
        store.add_trial(pending).unwrap();
        store
            .update_trial("s", &pending_id, TrialPatch::running())
            .unwrap();
        for s in 0..12u32 {
            store
                .update_trial("s", &pending_id, TrialPatch::report(s, 1.0))
                .unwrap();
        }

        let mut p = WilcoxonPruner::new(WilcoxonOptions::default(), Goal::Minimize);
        // Statistically different but strictly better: keep.
        assert!(!p.should_prune(&store, "s", &pending_id, 12, 1.0).unwrap());
    }
}
