//! Aggregated status queries over the store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use scout_store::TrialStore;
use scout_types::{ParamValue, ScoutResult, StudyStatus, TrialStatus};

use crate::runner::StudyRunner;

/// A point-in-time summary of one study, the shape the CLI prints and the
/// dashboard consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyReport {
    pub study_id: String,
    pub status: StudyStatus,
    pub n_trials: usize,
    pub n_pending: usize,
    pub n_running: usize,
    pub n_completed: usize,
    pub n_failed: usize,
    pub n_pruned: usize,
    pub best_score: Option<f64>,
    pub best_trial_id: Option<String>,
    pub best_params: BTreeMap<String, ParamValue>,
}

impl StudyReport {
    pub fn collect(store: &dyn TrialStore, study_id: &str) -> ScoutResult<Self> {
        let study = store.get_study(study_id)?;
        let trials = store.list_trials(study_id)?;

        let count = |status: TrialStatus| trials.iter().filter(|t| t.status == status).count();
        let best = StudyRunner::best_trial(study.config.goal, &trials);

        Ok(Self {
            study_id: study_id.to_string(),
            status: study.status,
            n_trials: trials.len(),
            n_pending: count(TrialStatus::Pending),
            n_running: count(TrialStatus::Running),
            n_completed: count(TrialStatus::Completed),
            n_failed: count(TrialStatus::Failed),
            n_pruned: count(TrialStatus::Pruned),
            best_score: best.and_then(|t| t.score),
            best_trial_id: best.map(|t| t.id.clone()),
            best_params: best.map(|t| t.params.clone()).unwrap_or_default(),
        })
    }
}

impl std::fmt::Display for StudyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "study {} [{}]", self.study_id, self.status)?;
        writeln!(
            f,
            "  trials: {} total ({} completed, {} pruned, {} failed, {} running)",
            self.n_trials, self.n_completed, self.n_pruned, self.n_failed, self.n_running
        )?;
        match self.best_score {
            Some(score) => {
                writeln!(f, "  best: {score}")?;
                for (name, value) in &self.best_params {
                    writeln!(f, "    {name} = {value}")?;
                }
                Ok(())
            }
            None => writeln!(f, "  best: (none yet)"),
        }
    }
}
