//! Telemetry event types and the observer sink contract.
//!
//! The runner emits one event per lifecycle transition. Sinks are
//! fire-and-forget: a slow or broken sink never blocks or fails the
//! optimization loop, and sinks share no state with the store. The dashboard
//! is rebuilt against these types without touching the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::study::StudyStatus;
use crate::trial::TrialStatus;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EventKind {
    StudyCreated,
    StudyStatusChanged { status: StudyStatus },
    TrialStarted { trial_id: String, number: u32 },
    TrialCompleted { trial_id: String, score: f64 },
    TrialPruned { trial_id: String, step: u32 },
    TrialFailed { trial_id: String, error: String },
    StudyCompleted { best_trial_id: Option<String> },
}

/// A single telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyEvent {
    pub study_id: String,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
}

impl StudyEvent {
    pub fn new(study_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            study_id: study_id.into(),
            kind,
            at: Utc::now(),
        }
    }

    pub fn trial_status(&self) -> Option<TrialStatus> {
        match &self.kind {
            EventKind::TrialStarted { .. } => Some(TrialStatus::Running),
            EventKind::TrialCompleted { .. } => Some(TrialStatus::Completed),
            EventKind::TrialPruned { .. } => Some(TrialStatus::Pruned),
            EventKind::TrialFailed { .. } => Some(TrialStatus::Failed),
            _ => None,
        }
    }
}

/// Observer sink. Implementations must not block and must not panic through
/// `emit`; errors are swallowed at the call site.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &StudyEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &StudyEvent) {}
}
