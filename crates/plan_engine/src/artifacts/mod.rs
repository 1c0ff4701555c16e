mod atomic_io;
mod cache;
mod hashing;

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::planner::PlannerResponse;

use atomic_io::write_atomic;

pub use cache::CacheReadState;
pub use hashing::plan_cache_key;

pub const PROBLEM_FILE_NAME: &str = "problem.pddl";
pub const PLAN_FILE_NAME: &str = "output_plan.txt";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid artifact at {path}: {message}")]
    Encode { path: PathBuf, message: String },
}

/// Files a run leaves behind under its home directory: the generated problem, the
/// plan that was executed, and cached planner responses.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    generated_dir: PathBuf,
    cache_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(generated_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            generated_dir,
            cache_dir,
        }
    }

    pub fn problem_path(&self) -> PathBuf {
        self.generated_dir.join(PROBLEM_FILE_NAME)
    }

    pub fn plan_path(&self) -> PathBuf {
        self.generated_dir.join(PLAN_FILE_NAME)
    }

    pub fn write_problem(&self, problem_pddl: &str) -> Result<PathBuf, ArtifactError> {
        self.write_text(self.problem_path(), problem_pddl)
    }

    /// Stores raw planner text verbatim.
    pub fn write_plan_text(&self, plan_text: &str) -> Result<PathBuf, ArtifactError> {
        self.write_text(self.plan_path(), plan_text)
    }

    pub fn cached_response(&self, key: &str) -> Result<CacheReadState, ArtifactError> {
        cache::read_cached_response(&self.cache_dir, key)
    }

    pub fn store_response(
        &self,
        key: &str,
        response: &PlannerResponse,
    ) -> Result<PathBuf, ArtifactError> {
        cache::write_cached_response(&self.cache_dir, key, response)
    }

    fn write_text(&self, path: PathBuf, text: &str) -> Result<PathBuf, ArtifactError> {
        write_atomic(&path, text).map_err(|source| ArtifactError::Write {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), bytes = text.len(), "artifact_written");
        Ok(path)
    }
}
