use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod artifacts;
pub mod config;
pub mod context;
pub mod domain;
pub mod plan;
pub mod planner;
pub mod problem;
pub mod run;
pub mod scheduler;
pub mod world;

pub use artifacts::{plan_cache_key, ArtifactError, ArtifactStore, CacheReadState};
pub use config::{
    load_run_config, parse_run_config_json, ConfigError, ElevatorParams, LogisticsParams,
    RobotParams, RunConfig,
};
pub use context::{DomainKind, DomainSelection, DomainSelectionError, DomainVariant, RunContext};
pub use domain::{
    Applied, Completion, DecodeError, DomainAction, DomainActionTable, Endpoint, PhaseChange,
    Rejection, RobotPhase, Transition, TransitionKind, TransitionProgress,
};
pub use plan::{
    NormalizedPlan, PlanDiagnostic, PlanDialect, PlanErrorCode, PlanTextNormalizer, TimedAction,
    WAIT_ACTION,
};
pub use planner::{
    classify_response, parse_planner_response_json, PlannerFailure, PlannerOutcome,
    PlannerRequest, PlannerResponse,
};
pub use problem::{parse_problem_json, PddlSerializer, ProblemError, ProblemModel};
pub use run::{PlanRun, RunError};
pub use scheduler::{
    PlanScheduler, RunProgressAccumulator, RunProgressSnapshot, RunStats, SchedulerEvent,
    SchedulerState,
};
pub use world::{
    ConstraintViolation, Effect, Entity, EntityId, EntityKind, Fact, Placement, Relation,
    RelationKind, ResourceKey, WorldInitError, WorldModel,
};

pub const HOME_ENV_VAR: &str = "PLANVIS_HOME";
const DEFAULT_HOME_DIR: &str = ".planvis";

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub home: PathBuf,
    pub domains_dir: PathBuf,
    pub generated_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl RunPaths {
    pub fn artifact_store(&self) -> ArtifactStore {
        ArtifactStore::new(self.generated_dir.clone(), self.cache_dir.clone())
    }

    pub fn domain_file(&self, selection: DomainSelection) -> PathBuf {
        self.domains_dir.join(selection.domain_file_name())
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to resolve current directory: {0}")]
    CurrentDir(#[source] std::io::Error),
    #[error("failed to create directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "{var} is set but does not point to a usable directory: {path}\n\
Set it to an existing directory or unset it to use ./{DEFAULT_HOME_DIR}."
    )]
    InvalidEnvHome { var: &'static str, path: PathBuf },
}

/// Resolves the artifact home: an explicit override, then `PLANVIS_HOME`, then
/// `./.planvis`. The generated and cache directories are created.
pub fn resolve_run_paths(home_override: Option<&Path>) -> Result<RunPaths, StartupError> {
    let home = match home_override {
        Some(path) => normalize_path(path),
        None => resolve_home()?,
    };
    let paths = RunPaths {
        domains_dir: home.join("domains"),
        generated_dir: home.join("generated"),
        cache_dir: home.join("cache"),
        home,
    };

    for dir in [&paths.generated_dir, &paths.cache_dir] {
        fs::create_dir_all(dir).map_err(|source| StartupError::CreateDir {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(paths)
}

fn resolve_home() -> Result<PathBuf, StartupError> {
    match env::var(HOME_ENV_VAR) {
        Ok(value) => {
            let raw = PathBuf::from(value.trim());
            if value.trim().is_empty() || raw.is_file() {
                return Err(StartupError::InvalidEnvHome {
                    var: HOME_ENV_VAR,
                    path: raw,
                });
            }
            Ok(normalize_path(&raw))
        }
        Err(env::VarError::NotPresent) => {
            let cwd = env::current_dir().map_err(StartupError::CurrentDir)?;
            Ok(cwd.join(DEFAULT_HOME_DIR))
        }
        Err(source) => Err(StartupError::EnvVar {
            var: HOME_ENV_VAR,
            source,
        }),
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn override_home_creates_artifact_dirs() {
        let temp = TempDir::new().expect("tempdir");
        let home = temp.path().join("runs");

        let paths = resolve_run_paths(Some(&home)).expect("paths");

        assert!(paths.generated_dir.is_dir());
        assert!(paths.cache_dir.is_dir());
        assert_eq!(paths.domains_dir, home.join("domains"));
    }

    #[test]
    fn domain_file_uses_canonical_name() {
        let temp = TempDir::new().expect("tempdir");
        let paths = resolve_run_paths(Some(temp.path())).expect("paths");
        let selection =
            DomainSelection::new(DomainKind::Elevator, DomainVariant::Numeric).expect("selection");

        assert!(paths
            .domain_file(selection)
            .ends_with("domains/domain-elevator-numeric.pddl"));
    }
}
