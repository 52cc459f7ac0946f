//! Study lifecycle orchestration: init → dispatch → collect → finalize.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use scout_pruners::{build_pruner, Pruner};
use scout_samplers::{build_sampler, Sampler};
use scout_store::TrialStore;
use scout_types::{
    EventKind, EventSink, NullSink, ParamValue, ScoutError, ScoutResult, SpaceSource, Study,
    StudyConfig, StudyEvent, StudyStatus, Trial, TrialStatus,
};

use crate::constraints::ConstraintSet;
use crate::executor::Execution;
use crate::report::Objective;

/// What a finished run hands back.
#[derive(Debug, Clone)]
pub struct StudyOutcome {
    pub study_id: String,
    pub status: StudyStatus,
    pub best_score: Option<f64>,
    pub best_params: BTreeMap<String, ParamValue>,
    pub best_trial_id: Option<String>,
    pub n_trials: usize,
    pub trials: Vec<Trial>,
}

/// Orchestrates studies against a store and an observer sink.
pub struct StudyRunner {
    store: Arc<dyn TrialStore>,
    sink: Arc<dyn EventSink>,
}

impl StudyRunner {
    pub fn new(store: Arc<dyn TrialStore>) -> Self {
        Self {
            store,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn store(&self) -> &Arc<dyn TrialStore> {
        &self.store
    }

    fn emit(&self, study_id: &str, kind: EventKind) {
        let event = StudyEvent::new(study_id, kind);
        let sink = Arc::clone(&self.sink);
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            sink.emit(&event)
        }));
    }

    /// Run a new study to completion (or pause/cancellation) over the
    /// static search space in its config.
    pub fn run(
        &self,
        config: StudyConfig,
        objective: Objective,
        constraints: ConstraintSet,
    ) -> ScoutResult<StudyOutcome> {
        let space = SpaceSource::Static(config.search_space.clone());
        self.run_with_space(config, space, objective, constraints)
    }

    /// Run with a space that may vary by trial index. The config's static
    /// space still anchors validation and resume.
    pub fn run_with_space(
        &self,
        config: StudyConfig,
        space: SpaceSource,
        objective: Objective,
        constraints: ConstraintSet,
    ) -> ScoutResult<StudyOutcome> {
        config.validate()?;

        // Resolve sampler and pruner before the study exists: a bad name or
        // option map must not leave a study behind.
        let sampler: Box<dyn Sampler> =
            build_sampler(&config.sampler, &config.sampler_opts, config.goal)?;
        let pruner: Option<Box<dyn Pruner>> = match &config.pruner {
            Some(name) => Some(build_pruner(name, &config.pruner_opts, config.goal)?),
            None => None,
        };

        let study_id = config.id.clone();
        self.store.put_study(Study::new(config.clone()))?;
        self.emit(&study_id, EventKind::StudyCreated);
        self.store
            .set_study_status(&study_id, StudyStatus::Running)?;
        self.emit(
            &study_id,
            EventKind::StudyStatusChanged {
                status: StudyStatus::Running,
            },
        );

        self.drive(config, space, objective, constraints, sampler, pruner, 0)
    }

    /// Run with a caller-supplied sampler instead of a whitelisted name:
    /// the plug-in point for custom algorithms and for
    /// [`scout_samplers::FixedTrial`]. The config's `sampler` field is kept
    /// for the record but not resolved.
    pub fn run_with_sampler(
        &self,
        config: StudyConfig,
        sampler: Box<dyn Sampler>,
        objective: Objective,
        constraints: ConstraintSet,
    ) -> ScoutResult<StudyOutcome> {
        config.validate()?;
        let pruner = match &config.pruner {
            Some(name) => Some(build_pruner(name, &config.pruner_opts, config.goal)?),
            None => None,
        };

        let study_id = config.id.clone();
        self.store.put_study(Study::new(config.clone()))?;
        self.emit(&study_id, EventKind::StudyCreated);
        self.store
            .set_study_status(&study_id, StudyStatus::Running)?;
        self.emit(
            &study_id,
            EventKind::StudyStatusChanged {
                status: StudyStatus::Running,
            },
        );
        let space = SpaceSource::Static(config.search_space.clone());
        self.drive(config, space, objective, constraints, sampler, pruner, 0)
    }

    /// Resume a paused study with the same objective and constraints.
    pub fn resume(
        &self,
        study_id: &str,
        objective: Objective,
        constraints: ConstraintSet,
    ) -> ScoutResult<StudyOutcome> {
        let study = self.store.get_study(study_id)?;
        if study.status != StudyStatus::Paused {
            return Err(ScoutError::Internal(format!(
                "study {study_id} is {} and cannot be resumed",
                study.status
            )));
        }
        let config = study.config.clone();
        let sampler = build_sampler(&config.sampler, &config.sampler_opts, config.goal)?;
        let pruner = match &config.pruner {
            Some(name) => Some(build_pruner(name, &config.pruner_opts, config.goal)?),
            None => None,
        };
        let start_index = self.store.list_trials(study_id)?.len() as u32;

        self.store
            .set_study_status(study_id, StudyStatus::Running)?;
        self.emit(
            study_id,
            EventKind::StudyStatusChanged {
                status: StudyStatus::Running,
            },
        );
        let space = SpaceSource::Static(config.search_space.clone());
        self.drive(config, space, objective, constraints, sampler, pruner, start_index)
    }

    #[allow(clippy::too_many_arguments)]
    fn drive(
        &self,
        config: StudyConfig,
        space: SpaceSource,
        objective: Objective,
        constraints: ConstraintSet,
        sampler: Box<dyn Sampler>,
        pruner: Option<Box<dyn Pruner>>,
        start_index: u32,
    ) -> ScoutResult<StudyOutcome> {
        let study_id = config.id.clone();
        info!(study_id = %study_id, sampler = %config.sampler, "study dispatch starting");

        let execution = Execution {
            store: Arc::clone(&self.store),
            config,
            space,
            objective,
            sampler: Arc::new(Mutex::new(sampler)),
            pruner: pruner.map(|p| Arc::new(Mutex::new(p))),
            constraints,
            sink: Arc::clone(&self.sink),
            start_index,
        };
        let result = execution.run();

        if let Err(e) = result {
            error!(study_id = %study_id, "study failed: {e}");
            // Best effort: the store may be the thing that broke.
            let _ = self
                .store
                .set_study_status(&study_id, StudyStatus::Failed);
            self.emit(
                &study_id,
                EventKind::StudyStatusChanged {
                    status: StudyStatus::Failed,
                },
            );
            return Err(e);
        }

        // Terminalize: a still-running study completed normally; paused and
        // cancelled studies keep their status.
        let status = self.store.get_study(&study_id)?.status;
        let final_status = if status == StudyStatus::Running {
            self.store
                .set_study_status(&study_id, StudyStatus::Completed)?;
            StudyStatus::Completed
        } else {
            status
        };

        let outcome = self.collect(&study_id, final_status)?;
        self.emit(
            &study_id,
            EventKind::StudyCompleted {
                best_trial_id: outcome.best_trial_id.clone(),
            },
        );
        info!(
            study_id = %study_id,
            status = %outcome.status,
            n_trials = outcome.n_trials,
            best = ?outcome.best_score,
            "study finished"
        );
        Ok(outcome)
    }

    /// Best completed trial under the goal, ties to the smallest number.
    pub fn best_trial(goal: scout_types::Goal, trials: &[Trial]) -> Option<&Trial> {
        trials
            .iter()
            .filter(|t| t.status == TrialStatus::Completed && t.score.is_some())
            .min_by(|a, b| {
                let (sa, sb) = (a.score.unwrap(), b.score.unwrap());
                let ord = match goal {
                    scout_types::Goal::Minimize => sa.partial_cmp(&sb),
                    scout_types::Goal::Maximize => sb.partial_cmp(&sa),
                }
                .unwrap_or(std::cmp::Ordering::Equal);
                ord.then(a.number.cmp(&b.number))
            })
    }

    fn collect(&self, study_id: &str, status: StudyStatus) -> ScoutResult<StudyOutcome> {
        let study = self.store.get_study(study_id)?;
        let trials = self.store.list_trials(study_id)?;
        let best = Self::best_trial(study.config.goal, &trials);
        Ok(StudyOutcome {
            study_id: study_id.to_string(),
            status,
            best_score: best.and_then(|t| t.score),
            best_params: best.map(|t| t.params.clone()).unwrap_or_default(),
            best_trial_id: best.map(|t| t.id.clone()),
            n_trials: trials.len(),
            trials,
        })
    }

    /// Control surface: workers notice at their next dequeue.
    pub fn pause(&self, study_id: &str) -> ScoutResult<()> {
        self.store.set_study_status(study_id, StudyStatus::Paused)?;
        self.emit(
            study_id,
            EventKind::StudyStatusChanged {
                status: StudyStatus::Paused,
            },
        );
        Ok(())
    }

    pub fn cancel(&self, study_id: &str) -> ScoutResult<()> {
        self.store
            .set_study_status(study_id, StudyStatus::Cancelled)?;
        self.emit(
            study_id,
            EventKind::StudyStatusChanged {
                status: StudyStatus::Cancelled,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_store::MemoryStore;
    use scout_types::{derive_seed, Goal, SearchSpace};

    fn runner() -> StudyRunner {
        StudyRunner::new(Arc::new(MemoryStore::new()))
    }

    fn sphere_objective() -> Objective {
        Arc::new(|h| {
            let x = h.param_f64("x").unwrap_or(0.0);
            let y = h.param_f64("y").unwrap_or(0.0);
            Ok(x * x + y * y)
        })
    }

    fn sphere_config(id: &str) -> StudyConfig {
        StudyConfig::new(
            id,
            SearchSpace::new()
                .add_uniform("x", -5.0, 5.0)
                .add_uniform("y", -5.0, 5.0),
        )
        .with_max_trials(30)
        .with_seed(42)
    }

    #[test]
    fn run_returns_best_completed_trial() {
        let runner = runner();
        let outcome = runner
            .run(sphere_config("r1"), sphere_objective(), ConstraintSet::new())
            .unwrap();

        assert_eq!(outcome.status, StudyStatus::Completed);
        assert_eq!(outcome.n_trials, 30);
        let best = outcome.best_score.unwrap();
        assert!(best >= 0.0);
        // Best really is the minimum of the completed scores.
        let min = outcome
            .trials
            .iter()
            .filter_map(|t| t.score)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(best, min);
    }

    #[test]
    fn unknown_sampler_creates_no_study() {
        let runner = runner();
        let mut config = sphere_config("r2");
        config.sampler = "quantum-annealing".to_string();
        let err = runner
            .run(config, sphere_objective(), ConstraintSet::new())
            .unwrap_err();
        assert!(matches!(err, ScoutError::Config(_)));
        assert!(runner.store().get_study("r2").is_err());
    }

    #[test]
    fn tie_breaks_to_smaller_number() {
        let mut a = Trial::new("s", 3, BTreeMap::new(), derive_seed("s", 3, 0));
        a.mark_running();
        a.mark_completed(1.0);
        let mut b = Trial::new("s", 1, BTreeMap::new(), derive_seed("s", 1, 0));
        b.mark_running();
        b.mark_completed(1.0);
        let trials = vec![a, b.clone()];
        let best = StudyRunner::best_trial(Goal::Minimize, &trials).unwrap();
        assert_eq!(best.number, 1);
        assert_eq!(best.id, b.id);
    }

    #[test]
    fn maximize_picks_the_largest_score() {
        let mk = |n: u32, s: f64| {
            let mut t = Trial::new("s", n, BTreeMap::new(), derive_seed("s", n, 0));
            t.mark_running();
            t.mark_completed(s);
            t
        };
        let trials = vec![mk(0, 0.3), mk(1, 0.9), mk(2, 0.5)];
        let best = StudyRunner::best_trial(Goal::Maximize, &trials).unwrap();
        assert_eq!(best.number, 1);
    }

    #[test]
    fn resume_continues_from_where_pause_left_off() {
        let store = Arc::new(MemoryStore::new());
        let runner = StudyRunner::new(store.clone());

        // Pause after a handful of trials via the objective itself.
        let store_ref = store.clone();
        let pausing_objective: Objective = Arc::new(move |h| {
            let done = store_ref
                .list_trials("r5")
                .map(|ts| ts.iter().filter(|t| t.is_finished()).count())
                .unwrap_or(0);
            if done >= 5 {
                let _ = store_ref.set_study_status("r5", StudyStatus::Paused);
            }
            Ok(h.param_f64("x").unwrap_or(0.0).powi(2))
        });

        let config = StudyConfig::new("r5", SearchSpace::new().add_uniform("x", -5.0, 5.0))
            .with_max_trials(20)
            .with_seed(9);
        let outcome = runner
            .run(config, pausing_objective, ConstraintSet::new())
            .unwrap();
        assert_eq!(outcome.status, StudyStatus::Paused);
        let after_pause = outcome.n_trials;
        assert!(after_pause < 20);

        let outcome = runner
            .resume(
                "r5",
                Arc::new(|h| Ok(h.param_f64("x").unwrap_or(0.0).powi(2))),
                ConstraintSet::new(),
            )
            .unwrap();
        assert_eq!(outcome.status, StudyStatus::Completed);
        assert_eq!(outcome.n_trials, 20);

        // Numbers stay unique and contiguous across the pause.
        let mut numbers: Vec<u32> = outcome.trials.iter().map(|t| t.number).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn cancelled_study_keeps_terminal_status() {
        let store = Arc::new(MemoryStore::new());
        let runner = StudyRunner::new(store.clone());
        let store_ref = store.clone();
        let objective: Objective = Arc::new(move |_| {
            let _ = store_ref.set_study_status("r6", StudyStatus::Cancelled);
            Ok(0.0)
        });
        let config = StudyConfig::new("r6", SearchSpace::new().add_uniform("x", 0.0, 1.0))
            .with_max_trials(50);
        let outcome = runner
            .run(config, objective, ConstraintSet::new())
            .unwrap();
        assert_eq!(outcome.status, StudyStatus::Cancelled);
        assert!(outcome.n_trials < 50);
    }
}
