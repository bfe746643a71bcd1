//! SQLite-backed storage for telemetry sessions.
//!
//! Holds session metadata, weather, drivers, and one serialized attribute
//! series per `(session_id, attribute)`. Series are stored in their JSON form
//! alongside a `value_len` column that always matches the stored byte length.
//!
//! Deleting a session removes its weather, drivers and every series.

pub mod db;
pub mod types;

pub use db::{SeriesUpdate, TelemetryDb};
pub use types::*;
