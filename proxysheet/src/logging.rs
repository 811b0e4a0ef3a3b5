//! Tracing setup.
//!
//! The engine logs through `tracing`. A host embedding the library through the
//! C boundary gets a daily-rolling file under the cache root; the CLI adds a
//! stderr layer on top. Installation is process-wide and happens at most once;
//! later calls are no-ops.

use std::path::Path;
use std::sync::OnceLock;

use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{EngineError, EngineResult};

/// Environment variable consulted when no explicit filter is given.
pub const LOG_ENV: &str = "PROXYSHEET_LOG";

const LOG_FILE_PREFIX: &str = "proxysheet.log";

static FILE_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogTargets {
    /// Write to a daily-rolling file in the log directory.
    pub file: bool,
    /// Write human-readable output to stderr.
    pub stderr: bool,
}

impl LogTargets {
    /// File only, used by library hosts.
    pub const FILE: Self = Self {
        file: true,
        stderr: false,
    };

    /// stderr only.
    pub const STDERR: Self = Self {
        file: false,
        stderr: true,
    };
}

fn build_filter(filter: Option<&str>) -> EngineResult<EnvFilter> {
    match filter {
        Some(directive) => EnvFilter::try_new(directive)
            .map_err(|e| EngineError::Logging(format!("bad filter '{}': {}", directive, e))),
        None => Ok(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// Install the global tracing subscriber.
///
/// Returns `Ok(false)` if logging was already initialized by an earlier call.
pub fn init_logging(
    log_dir: &Path,
    filter: Option<&str>,
    targets: LogTargets,
) -> EngineResult<bool> {
    if FILE_GUARD.get().is_some() {
        return Ok(false);
    }

    let env_filter = build_filter(filter)?;

    let (file_layer, guard) = if targets.file {
        std::fs::create_dir_all(log_dir).map_err(|e| {
            EngineError::Logging(format!("cannot create {}: {}", log_dir.display(), e))
        })?;
        let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_timer(fmt::time::LocalTime::new(Rfc3339))
            .with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let stderr_layer = targets
        .stderr
        .then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    // Dropping the guard closes the log file.
    let _ = FILE_GUARD.set(guard);

    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_accepts_directive() {
        assert!(build_filter(Some("proxysheet=debug,reqwest=warn")).is_ok());
    }

    #[test]
    fn test_build_filter_rejects_garbage() {
        let err = build_filter(Some("proxysheet=notalevel")).unwrap_err();
        assert!(matches!(err, EngineError::Logging(_)));
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = init_logging(dir.path(), Some("warn"), LogTargets::FILE).unwrap();
        let second = init_logging(dir.path(), Some("warn"), LogTargets::FILE).unwrap();
        // Another test may have installed a subscriber first; either way the
        // second call must be a no-op.
        let _ = first;
        assert!(!second);
    }
}
