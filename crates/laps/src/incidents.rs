//! Incident overlay: marks each lap valid or invalid from `PlayerIncidents`.

use serde::Serialize;

use crate::segment::{LapRecord, LapValidity};
use crate::series::{IndexedSeries, Sample};

/// Value flagging an incident at a sample.
pub const INCIDENT_MARKER: i64 = 1;

/// Attach validity to every lap.
///
/// Without incident data every lap is valid with an unknown incident count.
/// Otherwise a lap is valid only when none of its indices carries
/// [`INCIDENT_MARKER`].
pub fn annotate(laps: Vec<LapRecord>, incidents: Option<&IndexedSeries>) -> Vec<LapRecord> {
    laps.into_iter()
        .map(|lap| {
            let validity = match incidents {
                None => LapValidity {
                    valid_lap: true,
                    incidents_in_lap: None,
                },
                Some(series) => {
                    let count = count_incidents(series, lap.start_index, lap.end_index);
                    LapValidity {
                        valid_lap: count == 0,
                        incidents_in_lap: Some(count),
                    }
                }
            };
            lap.with_validity(validity)
        })
        .collect()
}

/// Indices in `[start, end]` whose value is exactly the incident marker.
///
/// Saturates at `u32::MAX`.
pub fn count_incidents(series: &IndexedSeries, start: i64, end: i64) -> u32 {
    let count = series
        .range(start, end)
        .filter(|(_, sample)| is_incident(sample))
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn is_incident(sample: &Sample) -> bool {
    match sample {
        Sample::Int(v) => *v == INCIDENT_MARKER,
        Sample::Float(v) => *v == INCIDENT_MARKER as f64,
        _ => false,
    }
}

/// Totals over an annotated lap list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LapSummary {
    pub lap_count: usize,
    pub valid_lap_count: usize,
    pub invalid_lap_count: usize,
}

impl LapSummary {
    /// Laps that were never annotated count as invalid.
    pub fn from_laps(laps: &[LapRecord]) -> Self {
        let valid = laps.iter().filter(|l| l.is_valid() == Some(true)).count();
        Self {
            lap_count: laps.len(),
            valid_lap_count: valid,
            invalid_lap_count: laps.len() - valid,
        }
    }
}
