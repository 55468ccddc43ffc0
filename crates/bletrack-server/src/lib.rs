//! # bletrack-server
//!
//! HTTP ingestion server for the bletrack BLE sighting recorder.
//!
//! This library provides the API handlers, shared state and logging setup;
//! the `bletrack-server` binary wires them to a TCP listener.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
