//! Threshold pruning against a per-step schedule.

use serde::{Deserialize, Serialize};

use scout_store::TrialStore;
use scout_types::{Goal, PrunerError};

use crate::Pruner;

/// How the threshold evolves over steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ThresholdSchedule {
    /// One value for every step.
    Constant { value: f64 },
    /// Anchor points `(step, value)` with linear interpolation between
    /// them; clamped to the first/last anchor outside the range.
    Anchors { points: Vec<(u32, f64)> },
    /// `initial · exp(−rate · step)`.
    ExponentialDecay { initial: f64, rate: f64 },
    /// Piecewise constant: the value of the last anchor at or before the
    /// step.
    Steps { points: Vec<(u32, f64)> },
}

impl Default for ThresholdSchedule {
    fn default() -> Self {
        Self::Constant { value: 0.0 }
    }
}

impl ThresholdSchedule {
    /// Threshold at `step`, or `None` when the schedule has no anchors.
    pub fn at(&self, step: u32) -> Option<f64> {
        match self {
            Self::Constant { value } => Some(*value),
            Self::ExponentialDecay { initial, rate } => {
                Some(initial * (-rate * step as f64).exp())
            }
            Self::Anchors { points } => {
                if points.is_empty() {
                    return None;
                }
                let mut sorted = points.clone();
                sorted.sort_by_key(|(s, _)| *s);
                if step <= sorted[0].0 {
                    return Some(sorted[0].1);
                }
                if step >= sorted[sorted.len() - 1].0 {
                    return Some(sorted[sorted.len() - 1].1);
                }
                for pair in sorted.windows(2) {
                    let (s0, v0) = pair[0];
                    let (s1, v1) = pair[1];
                    if step >= s0 && step <= s1 {
                        let t = (step - s0) as f64 / (s1 - s0) as f64;
                        return Some(v0 + t * (v1 - v0));
                    }
                }
                None
            }
            Self::Steps { points } => {
                if points.is_empty() {
                    return None;
                }
                let mut sorted = points.clone();
                sorted.sort_by_key(|(s, _)| *s);
                let mut current = sorted[0].1;
                for (s, v) in sorted {
                    if s > step {
                        break;
                    }
                    current = v;
                }
                Some(current)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ThresholdOptions {
    pub schedule: ThresholdSchedule,
}

#[derive(Debug)]
pub struct ThresholdPruner {
    opts: ThresholdOptions,
    goal: Goal,
}

impl ThresholdPruner {
    pub fn new(opts: ThresholdOptions, goal: Goal) -> Self {
        Self { opts, goal }
    }
}

impl Pruner for ThresholdPruner {
    fn should_prune(
        &mut self,
        _store: &dyn TrialStore,
        _study_id: &str,
        _trial_id: &str,
        step: u32,
        value: f64,
    ) -> Result<bool, PrunerError> {
        match self.opts.schedule.at(step) {
            // Crossing the threshold on the worse side prunes.
            Some(threshold) => Ok(self.goal.is_worse(value, threshold)),
            None => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "threshold"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_store::MemoryStore;

    fn prune(schedule: ThresholdSchedule, goal: Goal, step: u32, value: f64) -> bool {
        let store = MemoryStore::new();
        let mut p = ThresholdPruner::new(ThresholdOptions { schedule }, goal);
        p.should_prune(&store, "s", "t", step, value).unwrap()
    }

    #[test]
    fn constant_threshold_minimize() {
        let s = ThresholdSchedule::Constant { value: 2.0 };
        assert!(prune(s.clone(), Goal::Minimize, 0, 2.5));
        assert!(!prune(s.clone(), Goal::Minimize, 0, 2.0));
        assert!(!prune(s, Goal::Minimize, 0, 1.0));
    }

    #[test]
    fn constant_threshold_maximize() {
        let s = ThresholdSchedule::Constant { value: 0.5 };
        assert!(prune(s.clone(), Goal::Maximize, 0, 0.4));
        assert!(!prune(s, Goal::Maximize, 0, 0.6));
    }

    #[test]
    fn anchors_interpolate_linearly() {
        let s = ThresholdSchedule::Anchors {
            points: vec![(0, 10.0), (10, 0.0)],
        };
        assert_eq!(s.at(5), Some(5.0));
        assert_eq!(s.at(0), Some(10.0));
        // Clamped past the last anchor.
        assert_eq!(s.at(50), Some(0.0));
        assert!(prune(s, Goal::Minimize, 5, 6.0));
    }

    #[test]
    fn exponential_decay() {
        let s = ThresholdSchedule::ExponentialDecay {
            initial: 1.0,
            rate: 0.5,
        };
        let v = s.at(2).unwrap();
        assert!((v - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn piecewise_steps_hold_last_anchor() {
        let s = ThresholdSchedule::Steps {
            points: vec![(0, 10.0), (5, 4.0), (9, 1.0)],
        };
        assert_eq!(s.at(0), Some(10.0));
        assert_eq!(s.at(4), Some(10.0));
        assert_eq!(s.at(5), Some(4.0));
        assert_eq!(s.at(8), Some(4.0));
        assert_eq!(s.at(20), Some(1.0));
    }

    #[test]
    fn empty_anchor_list_never_prunes() {
        let s = ThresholdSchedule::Anchors { points: vec![] };
        assert!(!prune(s, Goal::Minimize, 3, 1e9));
    }
}
