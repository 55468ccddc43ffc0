//! Process configuration.
//!
//! Settings are layered with the `config` crate, later sources overriding
//! earlier ones:
//!
//! 1. Built-in defaults
//! 2. An optional TOML file (`BLETRACK_CONFIG`, or `bletrack.toml` when present)
//! 3. Environment variables prefixed with `BLETRACK_` (e.g. `BLETRACK_LISTEN_PORT=8080`)

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "BLETRACK_CONFIG";

/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "bletrack.toml";

const ENV_PREFIX: &str = "BLETRACK";

/// Errors raised while loading configuration or the tag table.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A setting was read but holds an unusable value.
    #[error("Invalid setting '{field}': {message}")]
    Validation {
        /// Setting name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The configured tag table file could not be read.
    #[error("Failed to read tag table {}: {source}", path.display())]
    TagTableRead {
        /// Tag table path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The tag table file was read but its contents are invalid.
    #[error("Invalid tag table {}: {message}", path.display())]
    TagTableInvalid {
        /// Tag table path.
        path: PathBuf,
        /// First problem found.
        message: String,
    },
}

/// How logs are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty stdout with span events.
    #[default]
    Pretty,
    /// JSON rolling files plus compact stdout.
    Production,
}

/// Runtime settings for the ingestion server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Interface to bind.
    #[serde(default = "default_listen_address")]
    pub listen_address: IpAddr,

    /// TCP port to bind.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// SQLite database file.
    #[serde(default = "default_datastore_path")]
    pub datastore_path: PathBuf,

    /// Minimum spacing between stored sightings of one device. 0 disables deduplication.
    #[serde(default = "default_dedup_interval_seconds")]
    pub dedup_interval_seconds: u64,

    /// Optional TOML tag table.
    #[serde(default)]
    pub tag_table_path: Option<PathBuf>,

    /// How far ahead of the server clock a report timestamp may be.
    #[serde(default = "default_max_future_skew_seconds")]
    pub max_future_skew_seconds: u64,

    /// How far behind the server clock a report timestamp may be.
    #[serde(default = "default_max_report_age_seconds")]
    pub max_report_age_seconds: u64,

    /// Per-request deadline. 0 disables it.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output style.
    #[serde(default)]
    pub log_format: LogFormat,

    /// Directory for production log files. Platform default when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_listen_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

const fn default_listen_port() -> u16 {
    5000
}

fn default_datastore_path() -> PathBuf {
    PathBuf::from("bletrack.db")
}

const fn default_dedup_interval_seconds() -> u64 {
    10
}

const fn default_max_future_skew_seconds() -> u64 {
    300
}

const fn default_max_report_age_seconds() -> u64 {
    86_400
}

const fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            datastore_path: default_datastore_path(),
            dedup_interval_seconds: default_dedup_interval_seconds(),
            tag_table_path: None,
            max_future_skew_seconds: default_max_future_skew_seconds(),
            max_report_age_seconds: default_max_report_age_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from the default file locations and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file is missing, a source is
    /// malformed, or a value fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load_from(Some(Path::new(&path)), true),
            None => Self::load_from(Some(Path::new(DEFAULT_CONFIG_FILE)), false),
        }
    }

    /// Load settings from `file` (if any) layered under the environment.
    ///
    /// # Errors
    ///
    /// See [`Settings::load`].
    pub fn load_from(file: Option<&Path>, required: bool) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(
                File::from(file)
                    .format(FileFormat::Toml)
                    .required(required),
            );
        }

        let settings: Self = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datastore_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                field: "datastore_path",
                message: "must not be empty".to_string(),
            });
        }
        if self.max_report_age_seconds == 0 {
            return Err(ConfigError::Validation {
                field: "max_report_age_seconds",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "log_level",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Address the server binds to.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }

    /// Dedup window.
    #[must_use]
    pub const fn dedup_interval(&self) -> Duration {
        Duration::from_secs(self.dedup_interval_seconds)
    }

    /// Request deadline, if enabled.
    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.request_timeout_seconds))
        }
    }
}
