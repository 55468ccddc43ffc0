//! Tracing subscriber setup.
//!
//! Two layouts, picked by `log_format`:
//!
//! - `production`: one JSON line per event in a daily file under the log
//!   directory, mirrored to stdout in compact form without colors
//! - `pretty`: multi-line stdout output with span open/close events

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use bletrack_core::{LogFormat, Settings};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Flush guards for the non-blocking writers. Dropping one loses buffered lines.
static WRITER_GUARDS: OnceLock<[WorkerGuard; 2]> = OnceLock::new();

/// Environment variable overriding the configured log level.
pub const LOG_LEVEL_ENV: &str = "BLETRACK_LOG_LEVEL";

/// File name prefix of the daily log files.
const LOG_FILE_PREFIX: &str = "bletrack.log";

/// Install the global subscriber described by `settings`.
///
/// `RUST_LOG` wins when set. Otherwise the level is `BLETRACK_LOG_LEVEL`,
/// falling back to `settings.log_level`.
///
/// # Errors
///
/// Fails when the level is not a valid filter, the log directory cannot be
/// created, or a subscriber is already installed.
pub fn init(settings: &Settings) -> anyhow::Result<()> {
    let directive = filter_directive(settings, std::env::var(LOG_LEVEL_ENV).ok());
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directive))?;

    match settings.log_format {
        LogFormat::Production => {
            let log_dir = settings
                .log_dir
                .clone()
                .unwrap_or_else(default_log_directory);
            init_production(env_filter, &log_dir)
        }
        LogFormat::Pretty => init_pretty(env_filter),
    }
}

/// Level directive from the env override, else from settings.
fn filter_directive(settings: &Settings, env_level: Option<String>) -> String {
    env_level
        .map(|level| level.trim().to_string())
        .filter(|level| !level.is_empty())
        .unwrap_or_else(|| settings.log_level.clone())
}

fn init_production(env_filter: EnvFilter, log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let daily = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(daily);
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
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    let _ = WRITER_GUARDS.set([file_guard, stdout_guard]);
    Ok(())
}

fn init_pretty(env_filter: EnvFilter) -> anyhow::Result<()> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init()?;
    Ok(())
}

/// `/var/log/bletrack` on Linux, the per-user data directory elsewhere.
fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/bletrack")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "bletrack")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_level_overrides_settings() {
        let settings = Settings {
            log_level: "info".to_string(),
            ..Settings::default()
        };

        assert_eq!(filter_directive(&settings, None), "info");
        assert_eq!(filter_directive(&settings, Some("debug".into())), "debug");
        assert_eq!(filter_directive(&settings, Some("  ".into())), "info");
    }

    #[test]
    fn test_default_log_directory_names_the_service() {
        let dir = default_log_directory();
        assert!(!dir.as_os_str().is_empty());
        assert!(dir.to_string_lossy().contains("bletrack") || dir.ends_with("logs"));
    }
}
