//! # scout-pruners
//!
//! Early-stopping policies. A pruner looks at a trial's intermediate values
//! (and its peers in the store) and decides whether the trial should stop
//! early. Running out of data is never an error: the pruner simply declines
//! to prune. Built-ins resolve by name through a whitelist; unknown names
//! are a configuration error.

mod halving;
mod hyperband;
mod patient;
mod percentile;
mod threshold;
mod wilcoxon;

pub use halving::SuccessiveHalvingPruner;
pub use hyperband::HyperbandPruner;
pub use patient::PatientPruner;
pub use percentile::{MedianPruner, PercentilePruner};
pub use threshold::{ThresholdPruner, ThresholdSchedule};
pub use wilcoxon::WilcoxonPruner;

use serde::de::DeserializeOwned;

use scout_store::TrialStore;
use scout_types::{ConfigError, Goal, PrunerError};

/// An early-stopping policy.
///
/// Pruner state is owned by the runner and consulted synchronously from the
/// reporting path, so decisions are made before the objective can continue.
pub trait Pruner: Send + std::fmt::Debug {
    /// Should the trial stop at `step` after reporting `value`?
    /// Insufficient data returns `Ok(false)`.
    fn should_prune(
        &mut self,
        store: &dyn TrialStore,
        study_id: &str,
        trial_id: &str,
        step: u32,
        value: f64,
    ) -> Result<bool, PrunerError>;

    /// Bracket for a new trial; non-bracket pruners keep everything in
    /// bracket 0.
    fn assign_bracket(&mut self, _trial_index: u32) -> u32 {
        0
    }

    /// Rung-level retention for bracket-based pruners.
    fn keep(
        &self,
        _store: &dyn TrialStore,
        _study_id: &str,
        _trial_id: &str,
        _bracket: u32,
        _rung: u32,
    ) -> Result<bool, PrunerError> {
        Ok(true)
    }

    /// Per-trial state cleanup on terminal transition.
    fn on_trial_finished(&mut self, _trial_id: &str) {}

    /// Human-readable pruner name.
    fn name(&self) -> &str;
}

/// The built-in pruner set; untrusted names translate only through this
/// enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrunerKind {
    Median,
    Percentile,
    SuccessiveHalving,
    Hyperband,
    Patient,
    Threshold,
    Wilcoxon,
}

impl std::str::FromStr for PrunerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "median" => Ok(Self::Median),
            "percentile" => Ok(Self::Percentile),
            "sha" | "successive-halving" => Ok(Self::SuccessiveHalving),
            "hyperband" => Ok(Self::Hyperband),
            "patient" => Ok(Self::Patient),
            "threshold" => Ok(Self::Threshold),
            "wilcoxon" => Ok(Self::Wilcoxon),
            other => Err(ConfigError::UnknownPruner {
                name: other.to_string(),
            }),
        }
    }
}

pub(crate) fn parse_opts<T: DeserializeOwned + Default>(
    opts: &serde_json::Value,
    pruner: &str,
) -> Result<T, ConfigError> {
    if opts.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(opts.clone()).map_err(|e| ConfigError::InvalidOption {
        name: pruner.to_string(),
        message: e.to_string(),
    })
}

/// Resolve a pruner by name and build it from its options.
pub fn build_pruner(
    name: &str,
    opts: &serde_json::Value,
    goal: Goal,
) -> Result<Box<dyn Pruner>, ConfigError> {
    let kind: PrunerKind = name.parse()?;
    Ok(match kind {
        PrunerKind::Median => Box::new(MedianPruner::new(parse_opts(opts, name)?, goal)),
        PrunerKind::Percentile => {
            Box::new(PercentilePruner::from_opts(parse_opts(opts, name)?, goal)?)
        }
        PrunerKind::SuccessiveHalving => {
            Box::new(SuccessiveHalvingPruner::new(parse_opts(opts, name)?, goal))
        }
        PrunerKind::Hyperband => Box::new(HyperbandPruner::new(parse_opts(opts, name)?, goal)),
        PrunerKind::Patient => Box::new(PatientPruner::new(parse_opts(opts, name)?, goal)),
        PrunerKind::Threshold => Box::new(ThresholdPruner::new(parse_opts(opts, name)?, goal)),
        PrunerKind::Wilcoxon => Box::new(WilcoxonPruner::new(parse_opts(opts, name)?, goal)),
    })
}
