//! The objective-facing trial handle and intermediate-value reporting.
//!
//! The iterative executor hands the objective a [`TrialHandle`]; every
//! `report(value, step)` records the value, then consults the pruner
//! synchronously — a prune decision surfaces as [`TrialError::Pruned`] and
//! the objective unwinds through `?`. Once a trial is pruned (or abandoned
//! by a timeout) no later report reaches the pruner or the store again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use scout_pruners::Pruner;
use scout_store::TrialStore;
use scout_types::{Observation, ParamValue, StoreError, TrialPatch, TrialSeed};

use crate::executor::retry_once;

/// How an objective ends early. `Pruned` is normal control flow, not a
/// failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialError {
    /// The active pruner stopped the trial.
    Pruned,
    /// The pruner state itself is broken; the trial fails.
    PrunerFailed(String),
    /// The objective gave up.
    Failed(String),
}

impl std::fmt::Display for TrialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pruned => write!(f, "trial pruned"),
            Self::PrunerFailed(m) => write!(f, "pruner failure: {m}"),
            Self::Failed(m) => write!(f, "{m}"),
        }
    }
}

/// A user objective. The handle carries the sampled parameters, the
/// deterministic per-trial RNG and the reporting channel.
pub type Objective =
    Arc<dyn Fn(&mut TrialHandle) -> Result<f64, TrialError> + Send + Sync>;

pub(crate) struct Reporter {
    pub store: Arc<dyn TrialStore>,
    pub pruner: Option<Arc<Mutex<Box<dyn Pruner>>>>,
    pub study_id: String,
    pub trial_id: String,
    pub bracket: u32,
    /// Set when the trial was pruned or timed out; later reports bail out.
    pub abandoned: Arc<AtomicBool>,
}

/// The objective's view of one trial.
pub struct TrialHandle {
    params: std::collections::BTreeMap<String, ParamValue>,
    seed: TrialSeed,
    rng: ChaCha8Rng,
    pub(crate) reporter: Option<Reporter>,
}

impl TrialHandle {
    pub(crate) fn new(
        params: std::collections::BTreeMap<String, ParamValue>,
        seed: TrialSeed,
        rng: ChaCha8Rng,
        reporter: Option<Reporter>,
    ) -> Self {
        Self {
            params,
            seed,
            rng,
            reporter,
        }
    }

    pub fn params(&self) -> &std::collections::BTreeMap<String, ParamValue> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Numeric view of a parameter; `None` for categorical values.
    pub fn param_f64(&self, name: &str) -> Option<f64> {
        self.params.get(name).and_then(|v| v.as_f64())
    }

    /// The deterministic seed derived for this trial; identical across
    /// reruns.
    pub fn seed(&self) -> TrialSeed {
        self.seed
    }

    /// Objective-visible RNG, seeded from the trial seed.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Report an intermediate value at `step`.
    ///
    /// Records the value and (when a pruner is active) asks it whether the
    /// trial should stop. Returns `Err(TrialError::Pruned)` on a prune
    /// decision; propagate it with `?`.
    pub fn report(&mut self, value: f64, step: u32) -> Result<(), TrialError> {
        let Some(reporter) = &self.reporter else {
            return Ok(());
        };
        if reporter.abandoned.load(Ordering::SeqCst) {
            return Err(TrialError::Pruned);
        }
        if !value.is_finite() {
            return Err(TrialError::Failed(format!(
                "non-finite intermediate value {value} at step {step}"
            )));
        }

        let store = &reporter.store;
        retry_once(|| {
            store.update_trial(
                &reporter.study_id,
                &reporter.trial_id,
                TrialPatch::report(step, value),
            )
        })
        .map_err(|e| TrialError::Failed(format!("store rejected report: {e}")))?;

        // Observations are immutable; a repeated step is a no-op.
        match store.add_observation(
            &reporter.study_id,
            Observation::new(reporter.trial_id.clone(), reporter.bracket, step, value),
        ) {
            Ok(()) => {}
            Err(StoreError::DuplicateObservation { .. }) => {
                debug!(step, trial_id = %reporter.trial_id, "duplicate report step ignored");
            }
            Err(e) => return Err(TrialError::Failed(format!("store rejected observation: {e}"))),
        }

        if let Some(pruner) = &reporter.pruner {
            let decision = pruner.lock().should_prune(
                store.as_ref(),
                &reporter.study_id,
                &reporter.trial_id,
                step,
                value,
            );
            match decision {
                Ok(true) => {
                    reporter.abandoned.store(true, Ordering::SeqCst);
                    return Err(TrialError::Pruned);
                }
                Ok(false) => {}
                Err(e) => {
                    reporter.abandoned.store(true, Ordering::SeqCst);
                    return Err(TrialError::PrunerFailed(e.to_string()));
                }
            }
        }
        Ok(())
    }
}
