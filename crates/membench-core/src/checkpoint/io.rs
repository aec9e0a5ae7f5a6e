//! Durable file writes for checkpoint state.
//!
//! Every write goes to a sibling temp file, is fsynced, then renamed over the
//! target so readers see either the old or the new content, never a torn file.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::HarnessResult;

pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> HarnessResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)?;
    sync_parent(path);
    Ok(())
}

pub(crate) fn write_json_atomic<T: serde::Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> HarnessResult<()> {
    let content = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &content)
}

/// Removes a file, treating "already gone" as success.
pub(crate) fn remove_if_exists(path: &Path) -> HarnessResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            sync_parent(path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Reads a file, mapping "not found" to `None`.
pub(crate) fn read_optional(path: &Path) -> HarnessResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// Persist the rename itself. Directory fsync is unsupported on some
// platforms, so failures are only logged.
fn sync_parent(path: &Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::File::open(parent).and_then(|d| d.sync_all()) {
            tracing::debug!(dir = %parent.display(), error = %e, "directory fsync failed");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
    }

    #[test]
    fn missing_files_are_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.txt");
        assert!(read_optional(&path).unwrap().is_none());
        remove_if_exists(&path).unwrap();
    }
}
