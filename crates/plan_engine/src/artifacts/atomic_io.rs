use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

/// Stages `contents` in a hidden sibling file and renames it over `path`, so readers
/// see either the old artifact or the new one.
pub(crate) fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
    let dir = artifact_dir(path);
    fs::create_dir_all(dir)?;

    let staging = staging_path(path);
    let outcome = fs::write(&staging, contents).and_then(|()| fs::rename(&staging, path));
    if outcome.is_err() {
        let _ = fs::remove_file(&staging);
    }
    outcome
}

fn artifact_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// `.<name>.<pid>.tmp` so concurrent runs sharing a home never clobber each other's
/// staging file.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    artifact_dir(path).join(format!(".{name}.{}.tmp", process::id()))
}
