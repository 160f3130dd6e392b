//! Crash containment for the public entry points.
//!
//! Unwinds escaping an entry point become `Error::ExceptionHandler`; a
//! report with the panic payload and a backtrace is written under the
//! artifact directory and the current log file is copied alongside it.

use std::panic::{AssertUnwindSafe, UnwindSafe};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use crate::error::{Error, Result};
use crate::files;

static ACTIVE_LOG_FILE: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();

fn active_log_file() -> &'static Mutex<Option<PathBuf>> {
    ACTIVE_LOG_FILE.get_or_init(|| Mutex::new(None))
}

/// Record which log file should ride along with crash reports.
pub fn set_active_log_file(path: Option<PathBuf>) {
    *active_log_file().lock().unwrap() = path;
}

fn payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn write_report(message: &str) {
    let Ok(dir) = files::unique_artifact_directory() else {
        return;
    };
    let backtrace = std::backtrace::Backtrace::force_capture();
    let report = format!("panic: {message}\n\nbacktrace:\n{backtrace}\n");
    let path = dir.join("framegraft-crash.txt");
    if std::fs::write(&path, report).is_ok() {
        tracing::error!("crash report written to {}", path.display());
    }
    if let Some(log) = active_log_file().lock().unwrap().as_ref() {
        files::copy_log_to(log, &dir);
    }
}

/// Run `f`, converting a panic into `Error::ExceptionHandler` after writing
/// a crash report. Every public entry point goes through this.
pub fn guarded<T>(f: impl FnOnce() -> Result<T> + UnwindSafe) -> Result<T> {
    match std::panic::catch_unwind(f) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload_message(payload.as_ref());
            tracing::error!("exception caught at api boundary: {message}");
            write_report(&message);
            Err(Error::ExceptionHandler)
        }
    }
}

/// `guarded` for closures capturing state the compiler cannot prove unwind
/// safe (locks, contexts). Safe here because a failed call abandons the
/// whole operation rather than observing half-updated state.
pub fn guarded_unsafe_state<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    guarded(AssertUnwindSafe(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_passes_through() {
        assert_eq!(guarded(|| Ok(5u32)), Ok(5));
    }

    #[test]
    fn error_passes_through() {
        assert_eq!(guarded::<u32>(|| Err(Error::InvalidParameter)), Err(Error::InvalidParameter));
    }

    #[test]
    fn panic_becomes_exception_handler() {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {})); // keep test output clean
        let result = guarded::<u32>(|| panic!("simulated access violation"));
        std::panic::set_hook(previous);
        assert_eq!(result, Err(Error::ExceptionHandler));
    }
}
