use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use plan_engine::{
    ArtifactError, ConfigError, DomainSelectionError, PlannerFailure, ProblemError, RunError,
    StartupError,
};
use thiserror::Error;
use tracing::error;

mod bootstrap;
mod cli;
mod loop_runner;
mod planner;
mod session;

use cli::Command;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("problem file is invalid: {0}")]
    Problem(#[from] ProblemError),
    #[error("run config is invalid: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot select domain: {0}")]
    Selection(#[from] DomainSelectionError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Planner(#[from] PlannerFailure),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
}

pub(crate) fn run(args: &[String]) -> ExitCode {
    let command = match cli::parse_args(args) {
        Ok(Command::Help) => {
            println!("{}", cli::usage_text());
            return ExitCode::SUCCESS;
        }
        Ok(command) => command,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    bootstrap::init_tracing();
    let stdout = io::stdout();
    if let Err(err) = session::execute(command, &mut stdout.lock()) {
        error!(error = %err, "run_failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
