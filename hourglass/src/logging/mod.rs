//! Logging setup: console plus a daily rolling file, local-time timestamps.
//!
//! The console layer is kept quiet by default because the console reporter
//! already renders progress; the file layer records everything the filter
//! lets through.

use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate, Utc};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{Error, Result};

/// Default file log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "hourglass=info,dispatch_engine=info,evm_upstream=info";

/// Log file prefix; the appender adds `.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "hourglass.log";

/// Rotated files older than this many days are removed at startup.
const LOG_RETENTION_DAYS: u64 = 7;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// Console verbosity selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    fn console_filter(self) -> EnvFilter {
        match self {
            Verbosity::Quiet => EnvFilter::new("error"),
            Verbosity::Normal => EnvFilter::new("warn"),
            Verbosity::Verbose => EnvFilter::new(
                "hourglass=debug,dispatch_engine=debug,evm_upstream=debug,warn",
            ),
        }
    }

    fn file_filter(self) -> EnvFilter {
        match self {
            Verbosity::Verbose => EnvFilter::new(
                "hourglass=debug,dispatch_engine=debug,evm_upstream=debug,alloy=info",
            ),
            _ => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        }
    }
}

/// Initialize logging.
///
/// # Returns
/// The appender guard; keep it alive for the whole process so buffered file
/// lines are flushed on exit.
pub fn init_logging(log_dir: &Path, verbosity: Verbosity) -> Result<WorkerGuard> {
    let log_path = PathBuf::from(log_dir);
    std::fs::create_dir_all(&log_path).map_err(|e| {
        Error::config(format!(
            "cannot create log directory {}: {}",
            log_path.display(),
            e
        ))
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_filter(verbosity.console_filter()),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_filter(verbosity.file_filter()),
        )
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    debug!(dir = %log_path.display(), "Logging initialized");
    Ok(guard)
}

/// Date of a file written by the daily appender, from its name.
fn rotation_date(file_name: &str) -> Option<NaiveDate> {
    let suffix = file_name.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(suffix, "%Y-%m-%d").ok()
}

/// Remove rotated log files past the retention period. The appender names
/// files by UTC date, so the cutoff is a UTC date too.
pub async fn cleanup_old_logs(log_dir: &Path) -> std::io::Result<usize> {
    let cutoff = Utc::now().date_naive() - Days::new(LOG_RETENTION_DAYS);
    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let expired = entry
            .file_name()
            .to_str()
            .and_then(rotation_date)
            .is_some_and(|date| date < cutoff);
        if !expired || !entry.file_type().await?.is_file() {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(file = ?entry.file_name(), error = %e, "Could not remove expired log"),
        }
    }

    if removed > 0 {
        info!(removed, "Removed expired log files");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("hourglass=info"));
        assert!(DEFAULT_LOG_FILTER.contains("dispatch_engine=info"));
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Quiet);
    }

    #[test]
    fn test_rotation_date() {
        assert_eq!(
            rotation_date("hourglass.log.2024-02-29"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(rotation_date("hourglass.log"), None);
        assert_eq!(rotation_date("hourglass.log.old"), None);
        assert_eq!(rotation_date("hourglass.logs.2024-02-29"), None);
    }

    #[tokio::test]
    async fn test_cleanup_old_logs() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("hourglass.log.2020-01-01");
        let today = dir
            .path()
            .join(format!("hourglass.log.{}", Utc::now().format("%Y-%m-%d")));
        let unrelated = dir.path().join("notes.txt");
        for path in [&old, &today, &unrelated] {
            std::fs::write(path, b"x").unwrap();
        }

        let deleted = cleanup_old_logs(dir.path()).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(!old.exists());
        assert!(today.exists());
        assert!(unrelated.exists());
    }
}
