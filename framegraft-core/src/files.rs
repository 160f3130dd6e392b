//! Filesystem helpers: module/executable locations and the crash-artifact
//! directory layout.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Directory containing the running executable.
pub fn module_directory() -> Option<PathBuf> {
    std::env::current_exe().ok()?.parent().map(Path::to_path_buf)
}

/// File stem of the running executable.
pub fn executable_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Root directory for persisted artifacts (crash reports, log copies).
///
/// `%ProgramData%` on Windows, the temp directory elsewhere.
pub fn data_root() -> PathBuf {
    if cfg!(windows) {
        if let Ok(program_data) = std::env::var("ProgramData") {
            return PathBuf::from(program_data);
        }
    }
    std::env::temp_dir()
}

/// Create `<data root>/framegraft/<exe>/<microseconds>/` for one crash.
pub fn unique_artifact_directory() -> std::io::Result<PathBuf> {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    let dir = data_root()
        .join("framegraft")
        .join(executable_name())
        .join(micros.to_string());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Copy the active log file next to a crash artifact. Missing logs are not
/// an error; there is nothing useful to do about them while crashing.
pub fn copy_log_to(log_file: &Path, destination_dir: &Path) {
    if log_file.is_file() {
        let target = destination_dir.join(
            log_file.file_name().unwrap_or_else(|| std::ffi::OsStr::new("framegraft.log")),
        );
        if let Err(e) = std::fs::copy(log_file, &target) {
            tracing::warn!("failed to copy log to {}: {e}", target.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_directory_is_created_and_unique() {
        let a = unique_artifact_directory().unwrap();
        assert!(a.is_dir());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = unique_artifact_directory().unwrap();
        assert_ne!(a, b);
        let _ = std::fs::remove_dir_all(&a);
        let _ = std::fs::remove_dir_all(&b);
    }

    #[test]
    fn copy_log_places_file_beside_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("framegraft.log");
        std::fs::write(&log, "line").unwrap();
        let dest = dir.path().join("crash");
        std::fs::create_dir(&dest).unwrap();
        copy_log_to(&log, &dest);
        assert_eq!(std::fs::read_to_string(dest.join("framegraft.log")).unwrap(), "line");
    }
}
