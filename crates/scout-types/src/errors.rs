use thiserror::Error;

/// Main error type for the Scout system
#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sampler error: {0}")]
    Sampler(#[from] SamplerError),

    #[error("Pruner error: {0}")]
    Pruner(#[from] PrunerError),

    #[error("Objective error: {0}")]
    Objective(#[from] ObjectiveError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors: surfaced to the caller before a study is created.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid search space for '{name}': {message}")]
    InvalidSpace { name: String, message: String },

    #[error("Empty search space")]
    EmptySpace,

    #[error("Invalid direction: {value} (expected 'minimize' or 'maximize')")]
    InvalidDirection { value: String },

    #[error("Invalid trial status: {value}")]
    InvalidStatus { value: String },

    #[error("parallelism must be >= 1, got {value}")]
    InvalidParallelism { value: usize },

    #[error("max_trials must be >= 1, got {value}")]
    InvalidMaxTrials { value: usize },

    #[error("Percentile must lie in [0, 100], got {value}")]
    PercentileOutOfRange { value: f64 },

    #[error("Unknown sampler: {name}")]
    UnknownSampler { name: String },

    #[error("Unknown pruner: {name}")]
    UnknownPruner { name: String },

    #[error("Invalid option '{name}': {message}")]
    InvalidOption { name: String, message: String },

    #[error("Fixed value for '{name}' is not valid for its distribution: {message}")]
    FixedValueRejected { name: String, message: String },

    #[error("Dashboard enabled without a secret of at least {min_len} characters")]
    DashboardSecretTooShort { min_len: usize },

    #[error("Store file {path} is world-writable")]
    WorldWritableStore { path: String },
}

/// Store errors. The in-memory adapter retries updates once; persistent
/// adapters propagate.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Study not found: {study_id}")]
    StudyNotFound { study_id: String },

    #[error("Study already exists: {study_id}")]
    DuplicateStudy { study_id: String },

    #[error("Trial not found: {trial_id}")]
    TrialNotFound { trial_id: String },

    #[error("Duplicate trial in study {study_id}: {detail}")]
    DuplicateTrial { study_id: String, detail: String },

    #[error("Duplicate observation for trial {trial_id} at bracket {bracket}, rung {rung}")]
    DuplicateObservation {
        trial_id: String,
        bracket: u32,
        rung: u32,
    },

    #[error("Observation score must be finite, got {value}")]
    NonFiniteObservation { value: f64 },

    #[error("Invalid trial update: {message}")]
    InvalidUpdate { message: String },

    #[error("Invalid study status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Store backend failure: {message}")]
    Backend { message: String },
}

/// Sampler errors mark the affected trial failed; the study continues.
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Distribution '{name}' cannot be sampled: {message}")]
    ImpossibleDistribution { name: String, message: String },

    #[error("Numerical failure in {sampler}: {message}")]
    Numerical { sampler: String, message: String },

    #[error("Grid exhausted after {size} points")]
    GridExhausted { size: usize },
}

/// Insufficient data is never a pruner error (the pruner just declines to
/// prune); this covers genuinely malformed state.
#[derive(Error, Debug)]
pub enum PrunerError {
    #[error("Malformed pruner state: {message}")]
    MalformedState { message: String },
}

/// Any failure escaping the user objective, caught at the worker boundary
/// and recorded on the trial.
#[derive(Error, Debug)]
pub enum ObjectiveError {
    #[error("Objective failed: {message}")]
    Failed { message: String },

    #[error("Objective panicked: {message}")]
    Panicked { message: String },

    #[error("Objective returned a non-finite score: {value}")]
    NonFiniteScore { value: f64 },

    #[error("Objective timed out after {limit_ms} ms")]
    Timeout { limit_ms: u64 },
}

/// Result type alias for Scout operations
pub type ScoutResult<T> = Result<T, ScoutError>;
