//! Telemetry session service: lap queries over HTTP.
//!
//! - [`service`]: lap and session operations over the store
//! - [`web`]: axum routes and JSON error mapping
//! - [`ingest`]: recording upload through an external parser
//! - [`telemetry`]: log subscriber and optional OTLP export
//! - [`server`]: listener and shutdown handling

pub mod ingest;
pub mod server;
pub mod service;
pub mod telemetry;
pub mod web;

pub use ingest::{CommandParser, IngestError, ParsedTelemetry, TelemetryParser, UploadReceipt};
pub use service::{LapService, ServiceError};
pub use web::{router, AppState};
