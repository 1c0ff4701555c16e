use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::planner::PlannerResponse;

use super::atomic_io::write_atomic;
use super::ArtifactError;

pub(crate) const PLAN_CACHE_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct CachedPlanV1 {
    pub format_version: u16,
    pub key_sha256_hex: String,
    pub response: PlannerResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheReadState {
    Missing,
    /// The entry exists but is corrupt, from another format version or for another key.
    Unreadable,
    Present(PlannerResponse),
}

pub(crate) fn plan_cache_dir(cache_dir: &Path) -> PathBuf {
    cache_dir.join("plans")
}

pub(crate) fn cache_entry_path(cache_dir: &Path, key: &str) -> PathBuf {
    plan_cache_dir(cache_dir).join(format!("{key}.json"))
}

pub(crate) fn read_cached_response(
    cache_dir: &Path,
    key: &str,
) -> Result<CacheReadState, ArtifactError> {
    let path = cache_entry_path(cache_dir, key);
    if !path.exists() {
        return Ok(CacheReadState::Missing);
    }

    let raw = fs::read_to_string(&path).map_err(|source| ArtifactError::Read {
        path: path.clone(),
        source,
    })?;
    let entry = match serde_json::from_str::<CachedPlanV1>(&raw) {
        Ok(entry) => entry,
        Err(error) => {
            warn!(path = %path.display(), error = %error, "plan_cache_entry_unreadable");
            return Ok(CacheReadState::Unreadable);
        }
    };
    if entry.format_version != PLAN_CACHE_FORMAT_VERSION || entry.key_sha256_hex != key {
        warn!(
            path = %path.display(),
            format_version = entry.format_version,
            "plan_cache_entry_mismatch"
        );
        return Ok(CacheReadState::Unreadable);
    }
    debug!(key, "plan_cache_hit");
    Ok(CacheReadState::Present(entry.response))
}

pub(crate) fn write_cached_response(
    cache_dir: &Path,
    key: &str,
    response: &PlannerResponse,
) -> Result<PathBuf, ArtifactError> {
    let path = cache_entry_path(cache_dir, key);
    let entry = CachedPlanV1 {
        format_version: PLAN_CACHE_FORMAT_VERSION,
        key_sha256_hex: key.to_string(),
        response: response.clone(),
    };
    let text = serde_json::to_string_pretty(&entry).map_err(|error| ArtifactError::Encode {
        path: path.clone(),
        message: format!("failed to encode cached plan json: {error}"),
    })?;
    write_atomic(&path, &text).map_err(|source| ArtifactError::Write {
        path: path.clone(),
        source,
    })?;
    debug!(key, path = %path.display(), "plan_cache_stored");
    Ok(path)
}
