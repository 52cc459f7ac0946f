//! # scout-store
//!
//! The trial store: a typed, concurrency-safe repository of studies, trials
//! and intermediate observations. The in-memory implementation here is
//! authoritative; a persistent adapter implements the same [`TrialStore`]
//! contract against three tables (`studies`, `trials`, `observations`) with
//! the constraints documented on the trait methods.

mod memory;

pub use memory::MemoryStore;

use scout_types::{Observation, StoreError, Study, StudyStatus, Trial, TrialPatch};

/// The store contract. All operations are safe under multiple concurrent
/// readers and writers; trial updates are serialized per trial and list
/// operations return a stable snapshot.
///
/// Persistent adapters map this onto `studies(id, name, goal, status,
/// config, metadata, timestamps)`, `trials(id, study_id, number
/// unique-per-study, params, score, status, metadata, started_at,
/// completed_at)` and `observations(id, trial_id, bracket, rung, score,
/// metadata, timestamp)`, with: goal in {minimize, maximize}; trial status
/// in {pending, running, completed, failed, pruned}; finite observation
/// scores; bracket >= 0 and rung >= 0; a completed trial has a score; a
/// failed trial has an error; `(trial_id, bracket, rung)` unique.
pub trait TrialStore: Send + Sync {
    /// Insert a study record. Fails on id collision.
    fn put_study(&self, study: Study) -> Result<(), StoreError>;

    fn get_study(&self, study_id: &str) -> Result<Study, StoreError>;

    /// Move the study to `status`, enforcing the monotonic transition rules
    /// (`Paused ⇌ Running` excepted).
    fn set_study_status(&self, study_id: &str, status: StudyStatus) -> Result<(), StoreError>;

    /// Insert a trial. Fails with a duplicate error on id or number
    /// collision within the study.
    fn add_trial(&self, trial: Trial) -> Result<(), StoreError>;

    /// Apply `patch` atomically with respect to concurrent readers. Only
    /// status, score, error, timestamps and intermediate values are
    /// mutable; a patch moving the trial to `Completed` must carry a finite
    /// score, and one moving it to `Failed` must carry an error.
    fn update_trial(
        &self,
        study_id: &str,
        trial_id: &str,
        patch: TrialPatch,
    ) -> Result<(), StoreError>;

    fn fetch_trial(&self, study_id: &str, trial_id: &str) -> Result<Trial, StoreError>;

    /// Stable snapshot of every trial in the study, in insertion order.
    fn list_trials(&self, study_id: &str) -> Result<Vec<Trial>, StoreError>;

    /// Record an intermediate observation. `(trial_id, bracket, rung)` is
    /// unique and the score must be finite; observations are immutable.
    fn add_observation(&self, study_id: &str, observation: Observation)
        -> Result<(), StoreError>;

    /// Peer scores at `(bracket, rung)`. Callers must not assume any
    /// ordering.
    fn observations_at_rung(
        &self,
        study_id: &str,
        bracket: u32,
        rung: u32,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    fn list_studies(&self) -> Vec<Study>;
}
