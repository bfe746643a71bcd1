//! Lap segmentation and lap-scoped range queries over telemetry series.
//!
//! A recorded session stores one scalar per sample index for every named
//! attribute (`Speed`, `RPM`, `Lap`, `PlayerIncidents`, ...). This crate turns
//! the `Lap` attribute into lap records and uses those records as index ranges
//! into the other attributes.
//!
//! Everything here is a pure function of its inputs: no I/O, no caching, no
//! shared state. Callers fetch series from storage, hand them in, and persist
//! whatever comes back.
//!
//! # Quick Start
//!
//! ```rust
//! use laps::{aggregate, annotate, segment, IndexedSeries};
//!
//! let lap = IndexedSeries::decode("[0, 1, 1, 1, 2, 2]").unwrap();
//! let speed = IndexedSeries::decode("[0.0, 40.5, 41.0, 43.5, 44.0, 45.5]").unwrap();
//! let incidents = IndexedSeries::decode("[0, 0, 1, 0, 0, 0]").unwrap();
//!
//! let laps = annotate(segment(&lap), Some(&incidents));
//! assert_eq!(laps.len(), 2);
//! assert_eq!(laps[0].is_valid(), Some(false));
//!
//! let stats = aggregate(&speed, laps[1].start_index, laps[1].end_index);
//! assert_eq!(stats.sample_count, 2);
//! ```
//!
//! # Modules
//!
//! - [`series`]: the sparse `index -> sample` mapping and its JSON form
//! - [`segment`]: `Lap` series to [`LapRecord`]s, lookup and filtering
//! - [`incidents`]: validity overlay from the `PlayerIncidents` series
//! - [`range`]: dense extraction and statistics over a lap's range
//! - [`delete`]: range removal with zero-based recompaction

pub mod delete;
pub mod incidents;
pub mod range;
pub mod segment;
pub mod series;

pub use delete::{delete_range, delete_range_each, RangeDeletion};
pub use incidents::{annotate, count_incidents, LapSummary, INCIDENT_MARKER};
pub use range::{aggregate, aggregate_each, extract, AttributeStats, RangeStats};
pub use segment::{find_lap, segment, LapFilter, LapRecord, LapValidity};
pub use series::{IndexedSeries, Sample};

/// Attribute carrying the lap number of every sample.
pub const LAP_ATTRIBUTE: &str = "Lap";

/// Attribute carrying the per-sample incident flag.
pub const INCIDENTS_ATTRIBUTE: &str = "PlayerIncidents";

/// Errors from decoding stored series.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("series is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("series must be a JSON array or object, got {0}")]
    UnexpectedRoot(&'static str),

    #[error("invalid sample index {0:?}: expected a non-negative integer")]
    InvalidIndex(String),

    #[error("sample at index {0} is not a scalar")]
    NonScalar(i64),
}

pub type Result<T> = std::result::Result<T, Error>;
