//! # scout-engine
//!
//! The optimization loop: worker-pool executors (one-shot and iterative),
//! the study runner, constraint composition, built-in benchmark objectives
//! and the public [`optimize`] entry point.

pub mod boot;
pub mod constraints;
pub mod executor;
pub mod objectives;
pub mod optimize;
pub mod report;
pub mod runner;
pub mod status;
pub mod telemetry;

pub use constraints::ConstraintSet;
pub use optimize::{optimize, OptimizeOptions, OptimizeResult};
pub use report::{Objective, TrialError, TrialHandle};
pub use runner::{StudyOutcome, StudyRunner};
pub use status::StudyReport;
pub use telemetry::{ChannelSink, LogSink};
