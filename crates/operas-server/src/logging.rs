//! Logging initialization.
//!
//! - **Production**: JSON logs to daily rolling files plus compact stdout for
//!   the journal
//! - **Development**: pretty stdout with span events
//!
//! The filter comes from `RUST_LOG`, then `OPERAS_LOG_LEVEL`, then `info`.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the fallback filter directive.
pub const LOG_LEVEL_ENV: &str = "OPERAS_LOG_LEVEL";

const LOG_FILE_PREFIX: &str = "operas";

// Non-blocking writers flush only while their guards live.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where and how to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// JSON file logging plus compact stdout instead of pretty stdout.
    pub production: bool,
    /// Directory for rolling log files (production only).
    pub directory: PathBuf,
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl LogSettings {
    /// Settings for the given mode, reading the level from the environment.
    #[must_use]
    pub fn from_env(production: bool) -> Self {
        Self {
            production,
            directory: log_directory(),
            level: std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string()),
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed or the log
/// directory cannot be created.
pub fn init(settings: &LogSettings) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&settings.level))?;

    if settings.production {
        init_production(env_filter, settings)?;
    } else {
        init_development(env_filter);
    }
    Ok(())
}

fn init_production(env_filter: EnvFilter, settings: &LogSettings) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.directory)?;

    let file_appender =
        RollingFileAppender::new(Rotation::DAILY, &settings.directory, LOG_FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
    Ok(())
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/operas")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "operas")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_valid_path() {
        assert!(!log_directory().as_os_str().is_empty());
    }

    #[test]
    fn test_settings_keep_mode() {
        let settings = LogSettings::from_env(true);
        assert!(settings.production);
        assert!(!settings.level.is_empty());
        assert_eq!(settings.directory, log_directory());
    }

    #[test]
    fn test_default_level_parses() {
        assert!(EnvFilter::try_new("info").is_ok());
    }
}
