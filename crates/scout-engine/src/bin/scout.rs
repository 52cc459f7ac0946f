//! `scout` command-line wrapper.
//!
//! `study start` runs a study file against the built-in benchmark
//! objectives and records the outcome in a local registry directory
//! (`SCOUT_STATE_DIR`, default `.scout/`); `status`, `pause`, `resume` and
//! `cancel` operate on that registry. Exit codes: 0 success, 1 argument
//! error, 2 study not found, 3 runtime failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::error;

use scout_engine::{
    objectives, ConstraintSet, LogSink, OptimizeOptions, StudyReport, StudyRunner,
};
use scout_store::MemoryStore;
use scout_types::{ScoutError, SearchSpace, StudyStatus};

#[derive(Parser)]
#[command(name = "scout", about = "Hyperparameter optimization engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage studies.
    Study {
        #[command(subcommand)]
        action: StudyAction,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Executor {
    /// One-shot dispatch; any configured pruner is ignored.
    Local,
    /// Reporting executor with pruning enabled.
    Iterative,
}

#[derive(Subcommand)]
enum StudyAction {
    /// Run a study definition file to completion.
    Start {
        file: PathBuf,
        #[arg(long, value_enum)]
        executor: Option<Executor>,
    },
    /// Print status, trial counts and the current best.
    Status { study_id: String },
    Pause { study_id: String },
    Resume { study_id: String },
    Cancel { study_id: String },
}

/// A study definition file: a benchmark objective name, a search space and
/// the optimize options.
#[derive(Debug, Serialize, Deserialize)]
struct StudyFile {
    objective: String,
    search_space: SearchSpace,
    #[serde(flatten)]
    options: OptimizeOptions,
}

fn state_dir() -> PathBuf {
    std::env::var("SCOUT_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".scout"))
}

fn report_path(study_id: &str) -> PathBuf {
    state_dir().join(format!("{study_id}.json"))
}

fn load_report(study_id: &str) -> Result<StudyReport, ExitCode> {
    let path = report_path(study_id);
    let data = std::fs::read_to_string(&path).map_err(|_| {
        eprintln!("study not found: {study_id}");
        ExitCode::from(2)
    })?;
    serde_json::from_str(&data).map_err(|e| {
        eprintln!("corrupt study record {}: {e}", path.display());
        ExitCode::from(3)
    })
}

fn save_report(report: &StudyReport) -> Result<(), ExitCode> {
    let dir = state_dir();
    std::fs::create_dir_all(&dir).map_err(|e| {
        eprintln!("cannot create state dir {}: {e}", dir.display());
        ExitCode::from(3)
    })?;
    let path = report_path(&report.study_id);
    std::fs::write(&path, serde_json::to_string_pretty(report).unwrap_or_default()).map_err(
        |e| {
            eprintln!("cannot write {}: {e}", path.display());
            ExitCode::from(3)
        },
    )
}

fn start(file: PathBuf, executor: Option<Executor>) -> Result<(), ExitCode> {
    let data = std::fs::read_to_string(&file).map_err(|e| {
        eprintln!("cannot read {}: {e}", file.display());
        ExitCode::from(1)
    })?;
    let study: StudyFile = serde_json::from_str(&data).map_err(|e| {
        eprintln!("malformed study file: {e}");
        ExitCode::from(1)
    })?;

    let mut options = study.options;
    if matches!(executor, Some(Executor::Local)) {
        options.pruner = None;
    }

    let objective = objectives::builtin(&study.objective).map_err(|e| {
        eprintln!("{e}");
        ExitCode::from(1)
    })?;

    let config = options.into_config(study.search_space);
    let study_id = config.id.clone();
    let store = Arc::new(MemoryStore::new());
    let runner = StudyRunner::new(store.clone()).with_sink(Arc::new(LogSink));
    runner
        .run(config, objective, ConstraintSet::new())
        .map_err(|e| match e {
            ScoutError::Config(e) => {
                eprintln!("{e}");
                ExitCode::from(1)
            }
            other => {
                error!("study failed: {other}");
                ExitCode::from(3)
            }
        })?;

    // The runner's store is process-local; the registry file is what the
    // other subcommands read back.
    let report = StudyReport::collect(store.as_ref(), &study_id).map_err(|e| {
        error!("cannot summarize study: {e}");
        ExitCode::from(3)
    })?;
    save_report(&report)?;
    print!("{report}");
    Ok(())
}

fn set_status(study_id: &str, next: StudyStatus) -> Result<(), ExitCode> {
    let mut report = load_report(study_id)?;
    if !report.status.can_transition_to(next) {
        eprintln!("cannot move study {study_id} from {} to {next}", report.status);
        return Err(ExitCode::from(3));
    }
    report.status = next;
    save_report(&report)?;
    println!("study {study_id} is now {next}");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    // try_parse keeps clap's auto-exit from stealing exit code 2, which is
    // reserved for "study not found".
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too; they are not errors.
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    let result = match cli.command {
        Command::Study { action } => match action {
            StudyAction::Start { file, executor } => start(file, executor),
            StudyAction::Status { study_id } => load_report(&study_id).map(|r| print!("{r}")),
            StudyAction::Pause { study_id } => set_status(&study_id, StudyStatus::Paused),
            StudyAction::Resume { study_id } => set_status(&study_id, StudyStatus::Running),
            StudyAction::Cancel { study_id } => set_status(&study_id, StudyStatus::Cancelled),
        },
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}
