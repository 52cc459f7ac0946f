//! Worker-pool trial dispatch.
//!
//! A bounded rayon pool of `parallelism` workers shares an atomic trial
//! counter. Each worker re-checks the study status at every dequeue
//! (cooperative pause/cancel), derives the trial seed, asks the sampler
//! under serialization with the finished-history snapshot, runs the
//! objective in a fault-isolated scope, and writes the result back. One
//! trial's failure never cancels another; only a store that keeps failing
//! after a retry aborts the study.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use scout_pruners::Pruner;
use scout_samplers::{Params, Sampler};
use scout_store::TrialStore;
use scout_types::{
    derive_seed, EventKind, EventSink, ObjectiveError, ScoutError, ScoutResult, SpaceSource,
    StoreError, StudyConfig, StudyEvent, StudyStatus, Trial, TrialPatch,
};

use crate::constraints::ConstraintSet;
use crate::report::{Objective, Reporter, TrialError, TrialHandle};

/// Local stores get one retry before an error is considered fatal.
pub(crate) fn retry_once<T>(
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    match op() {
        Ok(v) => Ok(v),
        Err(first) => {
            warn!("store operation failed, retrying once: {first}");
            op()
        }
    }
}

pub(crate) struct Execution {
    pub store: Arc<dyn TrialStore>,
    pub config: StudyConfig,
    pub space: SpaceSource,
    pub objective: Objective,
    pub sampler: Arc<Mutex<Box<dyn Sampler>>>,
    pub pruner: Option<Arc<Mutex<Box<dyn Pruner>>>>,
    pub constraints: ConstraintSet,
    pub sink: Arc<dyn EventSink>,
    /// First trial index to dequeue; non-zero when resuming.
    pub start_index: u32,
}

impl Execution {
    /// Drive the worker pool to completion. `Err` means the store became
    /// unusable; the runner marks the study failed.
    pub fn run(&self) -> ScoutResult<()> {
        let parallelism = self.config.parallelism.max(1);
        let next_index = AtomicU32::new(self.start_index);
        let stop = AtomicBool::new(false);
        let fatal: Mutex<Option<StoreError>> = Mutex::new(None);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .build()
            .map_err(|e| ScoutError::Internal(e.to_string()))?;

        pool.scope(|s| {
            for _ in 0..parallelism {
                s.spawn(|_| self.worker_loop(&next_index, &stop, &fatal));
            }
        });

        match fatal.into_inner() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn worker_loop(
        &self,
        next_index: &AtomicU32,
        stop: &AtomicBool,
        fatal: &Mutex<Option<StoreError>>,
    ) {
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            // Cooperative cancellation: status re-checked at every dequeue.
            match self.store.get_study(&self.config.id) {
                Ok(study) if study.status == StudyStatus::Running => {}
                Ok(_) => break,
                Err(e) => {
                    *fatal.lock() = Some(e);
                    stop.store(true, Ordering::SeqCst);
                    break;
                }
            }

            let index = next_index.fetch_add(1, Ordering::SeqCst);
            if index as usize >= self.config.max_trials {
                break;
            }

            match self.run_one(index) {
                Ok(true) => {}
                Ok(false) => {
                    // Sampler has nothing left to propose.
                    stop.store(true, Ordering::SeqCst);
                    break;
                }
                Err(e) => {
                    *fatal.lock() = Some(e);
                    stop.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    /// Run a single trial end to end. `Ok(false)` stops dequeuing; `Err`
    /// is a store failure that survived its retry.
    fn run_one(&self, index: u32) -> Result<bool, StoreError> {
        let study_id = &self.config.id;
        let seed = derive_seed(study_id, index, self.config.seed);
        // Stream 0 feeds the sampler, stream 1 the objective, so the two
        // never consume each other's draws.
        let mut sampler_rng = ChaCha8Rng::from_seed(seed.as_bytes());
        sampler_rng.set_stream(0);
        let mut objective_rng = ChaCha8Rng::from_seed(seed.as_bytes());
        objective_rng.set_stream(1);

        let space = self.space.resolve(index);
        let history: Vec<Trial> = retry_once(|| self.store.list_trials(study_id))?
            .into_iter()
            .filter(|t| t.is_finished())
            .collect();

        let proposal = self
            .sampler
            .lock()
            .next(&space, index, &history, &mut sampler_rng);

        let params: Params = match proposal {
            Ok(Some(params)) => params,
            Ok(None) => {
                info!(study_id = %study_id, index, "sampler exhausted, stopping dispatch");
                return Ok(false);
            }
            Err(e) => {
                // The trial fails with the sampler error; the study goes on.
                warn!(study_id = %study_id, index, "sampler error: {e}");
                let trial = Trial::new(study_id, index, Params::new(), seed);
                let trial_id = trial.id.clone();
                retry_once(|| self.store.add_trial(trial.clone()))?;
                retry_once(|| {
                    self.store
                        .update_trial(study_id, &trial_id, TrialPatch::failed(e.to_string()))
                })?;
                self.emit(EventKind::TrialFailed {
                    trial_id,
                    error: e.to_string(),
                });
                return Ok(true);
            }
        };

        let bracket = match &self.pruner {
            Some(p) => p.lock().assign_bracket(index),
            None => 0,
        };

        let trial = Trial::new(study_id, index, params.clone(), seed).with_bracket(bracket);
        let trial_id = trial.id.clone();
        retry_once(|| self.store.add_trial(trial.clone()))?;
        retry_once(|| {
            self.store
                .update_trial(study_id, &trial_id, TrialPatch::running())
        })?;
        self.emit(EventKind::TrialStarted {
            trial_id: trial_id.clone(),
            number: index,
        });

        let abandoned = Arc::new(AtomicBool::new(false));
        let reporter = Reporter {
            store: Arc::clone(&self.store),
            pruner: self.pruner.clone(),
            study_id: study_id.clone(),
            trial_id: trial_id.clone(),
            bracket,
            abandoned: Arc::clone(&abandoned),
        };
        let handle = TrialHandle::new(params.clone(), seed, objective_rng, Some(reporter));

        let outcome = self.invoke_objective(handle, &abandoned);

        match outcome {
            Ok(score) => {
                let maximize = matches!(self.config.goal, scout_types::Goal::Maximize);
                let score = self.constraints.apply(&params, score, maximize);
                if score.is_finite() {
                    retry_once(|| {
                        self.store
                            .update_trial(study_id, &trial_id, TrialPatch::completed(score))
                    })?;
                    self.emit(EventKind::TrialCompleted {
                        trial_id: trial_id.clone(),
                        score,
                    });
                } else {
                    let err = ObjectiveError::NonFiniteScore { value: score };
                    retry_once(|| {
                        self.store
                            .update_trial(study_id, &trial_id, TrialPatch::failed(err.to_string()))
                    })?;
                    self.emit(EventKind::TrialFailed {
                        trial_id: trial_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
            Err(TrialError::Pruned) => {
                retry_once(|| {
                    self.store
                        .update_trial(study_id, &trial_id, TrialPatch::pruned())
                })?;
                let step = self
                    .store
                    .fetch_trial(study_id, &trial_id)
                    .ok()
                    .and_then(|t| t.intermediate_values.keys().next_back().copied())
                    .unwrap_or(0);
                self.emit(EventKind::TrialPruned {
                    trial_id: trial_id.clone(),
                    step,
                });
            }
            Err(TrialError::PrunerFailed(message)) | Err(TrialError::Failed(message)) => {
                retry_once(|| {
                    self.store
                        .update_trial(study_id, &trial_id, TrialPatch::failed(message.clone()))
                })?;
                self.emit(EventKind::TrialFailed {
                    trial_id: trial_id.clone(),
                    error: message,
                });
            }
        }

        if let Some(p) = &self.pruner {
            p.lock().on_trial_finished(&trial_id);
        }
        Ok(true)
    }

    /// Run the objective in a fault-isolated scope, optionally under a
    /// wall-clock limit.
    fn invoke_objective(
        &self,
        mut handle: TrialHandle,
        abandoned: &Arc<AtomicBool>,
    ) -> Result<f64, TrialError> {
        let objective = Arc::clone(&self.objective);

        match self.config.timeout_ms {
            None => flatten_panic(catch_unwind(AssertUnwindSafe(|| objective(&mut handle)))),
            Some(limit_ms) => {
                // The objective may block arbitrarily, so it runs on its own
                // thread; on timeout the worker abandons it and the thread
                // is left to drain (its reports bail out via `abandoned`).
                let (tx, rx) = crossbeam_channel::bounded(1);
                std::thread::spawn(move || {
                    let result =
                        flatten_panic(catch_unwind(AssertUnwindSafe(|| objective(&mut handle))));
                    let _ = tx.send(result);
                });
                match rx.recv_timeout(Duration::from_millis(limit_ms)) {
                    Ok(result) => result,
                    Err(RecvTimeoutError::Timeout) => {
                        abandoned.store(true, Ordering::SeqCst);
                        Err(TrialError::Failed(
                            ObjectiveError::Timeout { limit_ms }.to_string(),
                        ))
                    }
                    Err(RecvTimeoutError::Disconnected) => Err(TrialError::Failed(
                        "objective thread exited without a result".to_string(),
                    )),
                }
            }
        }
    }

    /// Fire-and-forget event emission; a panicking sink is contained here.
    fn emit(&self, kind: EventKind) {
        let event = StudyEvent::new(self.config.id.clone(), kind);
        let sink = &self.sink;
        let _ = catch_unwind(AssertUnwindSafe(|| sink.emit(&event)));
    }
}

/// Fold a panic payload into the trial error channel.
fn flatten_panic(
    result: Result<Result<f64, TrialError>, Box<dyn std::any::Any + Send>>,
) -> Result<f64, TrialError> {
    match result {
        Ok(inner) => inner,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "objective panicked".to_string()
            };
            Err(TrialError::Failed(
                ObjectiveError::Panicked { message }.to_string(),
            ))
        }
    }
}
