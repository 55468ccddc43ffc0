//! Error types for the bletrack core library.
//!
//! Each pipeline stage owns a specific error type:
//!
//! - [`ParseError`] - a report was malformed or implausible (client's fault)
//! - [`StorageInitError`] - the datastore could not be opened (fatal at startup)
//! - [`StorageWriteError`] - one append failed (per request, recoverable)
//! - [`ConfigError`] - settings or the tag table are unusable (fatal at startup)
//!
//! The per-request failures meet in [`IngestError`], which carries the HTTP
//! status and machine-readable code for each failure mode.

use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::parser::ParseError;
pub use crate::storage::{StorageInitError, StorageWriteError};

/// Failure of one report on its way through the pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The report was rejected by the parser.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The report was kept but could not be written.
    #[error(transparent)]
    Write(#[from] StorageWriteError),
}

impl IngestError {
    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - the report itself is wrong
            Self::Parse(_) => 400,

            // 503 Service Unavailable - the datastore is gone
            Self::Write(StorageWriteError::Closed) => 503,

            // 500 Internal Server Error - the report was fine, the write was not
            Self::Write(_) => 500,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Parse(e) => e.code(),
            Self::Write(StorageWriteError::Duplicate { .. }) => "duplicate_sighting",
            Self::Write(StorageWriteError::Closed) => "datastore_closed",
            Self::Write(_) => "storage_write_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_parse_errors_are_client_errors() {
        let err = IngestError::from(ParseError::MissingField("device_id"));
        assert_eq!(err.http_status_code(), 400);
        assert_eq!(err.error_code(), "missing_field");

        let err = IngestError::from(ParseError::InvalidRssi { value: "10".into() });
        assert_eq!(err.error_code(), "invalid_rssi");
    }

    #[test]
    fn test_write_errors_are_server_errors() {
        let err = IngestError::from(StorageWriteError::Duplicate {
            device_id: "AA:BB:CC:DD:EE:FF".into(),
            observed_at: "2024-01-15T10:00:00.000000Z".into(),
        });
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "duplicate_sighting");

        let err = IngestError::from(StorageWriteError::TaskFailed("panicked".into()));
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "storage_write_failed");

        let err = IngestError::from(StorageWriteError::Closed);
        assert_eq!(err.http_status_code(), 503);
        assert_eq!(err.error_code(), "datastore_closed");
    }

    #[test]
    fn test_error_display_messages() {
        let err = IngestError::from(ParseError::InvalidRssi { value: "10".into() });
        assert!(err.to_string().contains("between -100 and 0"));

        let err = IngestError::from(ParseError::MissingField("device_id"));
        assert!(err.to_string().contains("device_id"));

        let err = StorageInitError::CreateDir {
            path: PathBuf::from("/readonly"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/readonly"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<IngestError>();
        assert_sync::<IngestError>();
    }
}
