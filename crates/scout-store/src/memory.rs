//! In-memory store: `DashMap` keyed by study id, one `RwLock`ed record per
//! study so trial updates serialize against readers of the same study
//! without blocking other studies.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use scout_types::{
    Observation, StoreError, Study, StudyStatus, Trial, TrialPatch, TrialStatus,
};

use crate::TrialStore;

#[derive(Debug)]
struct StudyRecord {
    study: Study,
    /// Trials in insertion order; `number` is monotonic over this Vec.
    trials: Vec<Trial>,
    by_id: HashMap<String, usize>,
    numbers: HashSet<u32>,
    /// Peer index: `(bracket, rung)` -> scores at that rung.
    rungs: HashMap<(u32, u32), Vec<(String, f64)>>,
    /// Uniqueness guard for `(trial_id, bracket, rung)`.
    observed: HashSet<(String, u32, u32)>,
}

impl StudyRecord {
    fn new(study: Study) -> Self {
        Self {
            study,
            trials: Vec::new(),
            by_id: HashMap::new(),
            numbers: HashSet::new(),
            rungs: HashMap::new(),
            observed: HashSet::new(),
        }
    }
}

/// The authoritative in-memory implementation of [`TrialStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    studies: DashMap<String, RwLock<StudyRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            studies: DashMap::new(),
        }
    }

    fn with_record<T>(
        &self,
        study_id: &str,
        f: impl FnOnce(&StudyRecord) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let entry = self
            .studies
            .get(study_id)
            .ok_or_else(|| StoreError::StudyNotFound {
                study_id: study_id.to_string(),
            })?;
        let guard = entry.read();
        f(&guard)
    }

    fn with_record_mut<T>(
        &self,
        study_id: &str,
        f: impl FnOnce(&mut StudyRecord) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let entry = self
            .studies
            .get(study_id)
            .ok_or_else(|| StoreError::StudyNotFound {
                study_id: study_id.to_string(),
            })?;
        let mut guard = entry.write();
        f(&mut guard)
    }
}

impl TrialStore for MemoryStore {
    fn put_study(&self, study: Study) -> Result<(), StoreError> {
        let id = study.id().to_string();
        match self.studies.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::DuplicateStudy { study_id: id })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(study_id = %id, "study created");
                slot.insert(RwLock::new(StudyRecord::new(study)));
                Ok(())
            }
        }
    }

    fn get_study(&self, study_id: &str) -> Result<Study, StoreError> {
        self.with_record(study_id, |rec| Ok(rec.study.clone()))
    }

    fn set_study_status(&self, study_id: &str, status: StudyStatus) -> Result<(), StoreError> {
        self.with_record_mut(study_id, |rec| {
            let current = rec.study.status;
            if !current.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    from: current.to_string(),
                    to: status.to_string(),
                });
            }
            rec.study.status = status;
            rec.study.updated_at = Utc::now();
            Ok(())
        })
    }

    fn add_trial(&self, trial: Trial) -> Result<(), StoreError> {
        let study_id = trial.study_id.clone();
        self.with_record_mut(&study_id, |rec| {
            if rec.by_id.contains_key(&trial.id) {
                return Err(StoreError::DuplicateTrial {
                    study_id: trial.study_id.clone(),
                    detail: format!("id {}", trial.id),
                });
            }
            if !rec.numbers.insert(trial.number) {
                return Err(StoreError::DuplicateTrial {
                    study_id: trial.study_id.clone(),
                    detail: format!("number {}", trial.number),
                });
            }
            rec.by_id.insert(trial.id.clone(), rec.trials.len());
            rec.trials.push(trial);
            Ok(())
        })
    }

    fn update_trial(
        &self,
        study_id: &str,
        trial_id: &str,
        patch: TrialPatch,
    ) -> Result<(), StoreError> {
        self.with_record_mut(study_id, |rec| {
            let idx = *rec
                .by_id
                .get(trial_id)
                .ok_or_else(|| StoreError::TrialNotFound {
                    trial_id: trial_id.to_string(),
                })?;
            let trial = &mut rec.trials[idx];

            // Validate against the merged state before mutating anything.
            let next_status = patch.status.unwrap_or(trial.status);
            let next_score = patch.score.or(trial.score);
            let next_error = patch.error.clone().or_else(|| trial.error.clone());
            if next_status == TrialStatus::Completed {
                match next_score {
                    Some(s) if s.is_finite() => {}
                    Some(s) => {
                        return Err(StoreError::InvalidUpdate {
                            message: format!("completed trial requires a finite score, got {s}"),
                        })
                    }
                    None => {
                        return Err(StoreError::InvalidUpdate {
                            message: "completed trial requires a score".to_string(),
                        })
                    }
                }
            }
            if next_status == TrialStatus::Failed && next_error.is_none() {
                return Err(StoreError::InvalidUpdate {
                    message: "failed trial requires an error message".to_string(),
                });
            }

            if let Some(status) = patch.status {
                trial.status = status;
            }
            if let Some(score) = patch.score {
                trial.score = Some(score);
            }
            if let Some(error) = patch.error {
                trial.error = Some(error);
            }
            if let Some(at) = patch.started_at {
                trial.started_at = Some(at);
            }
            if let Some(at) = patch.finished_at {
                trial.finished_at = Some(at);
            }
            for (step, value) in patch.intermediate_values {
                trial.intermediate_values.insert(step, value);
            }
            Ok(())
        })
    }

    fn fetch_trial(&self, study_id: &str, trial_id: &str) -> Result<Trial, StoreError> {
        self.with_record(study_id, |rec| {
            rec.by_id
                .get(trial_id)
                .map(|&idx| rec.trials[idx].clone())
                .ok_or_else(|| StoreError::TrialNotFound {
                    trial_id: trial_id.to_string(),
                })
        })
    }

    fn list_trials(&self, study_id: &str) -> Result<Vec<Trial>, StoreError> {
        self.with_record(study_id, |rec| Ok(rec.trials.clone()))
    }

    fn add_observation(
        &self,
        study_id: &str,
        observation: Observation,
    ) -> Result<(), StoreError> {
        if !observation.score.is_finite() {
            return Err(StoreError::NonFiniteObservation {
                value: observation.score,
            });
        }
        self.with_record_mut(study_id, |rec| {
            let key = (
                observation.trial_id.clone(),
                observation.bracket,
                observation.rung,
            );
            if !rec.observed.insert(key) {
                return Err(StoreError::DuplicateObservation {
                    trial_id: observation.trial_id.clone(),
                    bracket: observation.bracket,
                    rung: observation.rung,
                });
            }
            rec.rungs
                .entry((observation.bracket, observation.rung))
                .or_default()
                .push((observation.trial_id, observation.score));
            Ok(())
        })
    }

    fn observations_at_rung(
        &self,
        study_id: &str,
        bracket: u32,
        rung: u32,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.with_record(study_id, |rec| {
            Ok(rec.rungs.get(&(bracket, rung)).cloned().unwrap_or_default())
        })
    }

    fn list_studies(&self) -> Vec<Study> {
        self.studies
            .iter()
            .map(|entry| entry.value().read().study.clone())
            .collect()
    }
}
