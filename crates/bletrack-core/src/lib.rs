//! # bletrack-core
//!
//! Core ingestion pipeline for the bletrack BLE sighting recorder.
//!
//! A BLE gateway (typically a router running a scanner) forwards every
//! advertisement it hears. This crate turns those reports into durable rows:
//!
//! - [`record`] - the canonical [`Sighting`] and normalized [`DeviceId`]
//! - [`parser`] - validation of raw reports into sightings
//! - [`tags`] - optional address → tag name classification
//! - [`gate`] - per-device rate limiting of repeated sightings
//! - [`storage`] - SQLite persistence
//! - [`ingest`] - the pipeline tying the stages together
//! - [`config`] - layered process settings
//! - [`error`] - error types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod gate;
pub mod ingest;
pub mod parser;
pub mod record;
pub mod storage;
pub mod tags;

// Re-export primary types for convenience
pub use config::{ConfigError, LogFormat, Settings};
pub use error::IngestError;
pub use gate::{Decision, DedupGate};
pub use ingest::{IngestOutcome, Ingestor};
pub use parser::{ParseError, ReportContext, ReportParser};
pub use record::{DeviceId, SignalQuality, Sighting, MAX_RSSI_DBM, MIN_RSSI_DBM};
pub use storage::{Storage, StorageInitError, StorageWriteError, StoredSighting};
pub use tags::{Tag, TagTable};
