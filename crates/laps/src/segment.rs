//! Lap segmentation: `Lap` series in, ordered [`LapRecord`]s out.
//!
//! A lap opens at the first index carrying a new positive lap number and runs
//! up to the index before the next *different* positive lap number. Gaps and
//! non-positive markers (warmup, cooldown, reset) inside that extent are
//! absorbed. The last lap runs to the series' final index.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::series::IndexedSeries;

/// Incident overlay for one lap. See [`crate::annotate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LapValidity {
    pub valid_lap: bool,
    /// `None` when no incident data was available.
    pub incidents_in_lap: Option<u32>,
}

/// One lap's index range within a session.
///
/// `end_index >= start_index` and `sample_count == end_index - start_index + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LapRecord {
    pub lap_number: i64,
    pub start_index: i64,
    pub end_index: i64,
    pub sample_count: i64,
    #[serde(flatten)]
    pub validity: Option<LapValidity>,
}

impl LapRecord {
    pub fn new(lap_number: i64, start_index: i64, end_index: i64) -> Self {
        debug_assert!(end_index >= start_index);
        Self {
            lap_number,
            start_index,
            end_index,
            sample_count: end_index - start_index + 1,
            validity: None,
        }
    }

    pub fn with_validity(mut self, validity: LapValidity) -> Self {
        self.validity = Some(validity);
        self
    }

    pub fn range(&self) -> RangeInclusive<i64> {
        self.start_index..=self.end_index
    }

    pub fn contains(&self, index: i64) -> bool {
        self.range().contains(&index)
    }

    /// `None` until the lap has been annotated.
    pub fn is_valid(&self) -> Option<bool> {
        self.validity.map(|v| v.valid_lap)
    }

    pub fn incidents(&self) -> Option<u32> {
        self.validity.and_then(|v| v.incidents_in_lap)
    }
}

/// Segment a `Lap` series into lap records, in order of first transition.
///
/// Samples that are not positive integers never open or continue a lap. A lap
/// number that reappears later after a different lap produces a second record.
pub fn segment(series: &IndexedSeries) -> Vec<LapRecord> {
    let mut laps = Vec::new();
    // (lap_number, start_index) of the lap still open
    let mut running: Option<(i64, i64)> = None;

    for (index, sample) in series.iter() {
        let Some(lap_number) = sample.as_integer().filter(|n| *n > 0) else {
            continue;
        };

        match running {
            Some((current, _)) if current == lap_number => {}
            Some((current, start)) => {
                laps.push(LapRecord::new(current, start, index - 1));
                running = Some((lap_number, index));
            }
            None => running = Some((lap_number, index)),
        }
    }

    if let (Some((current, start)), Some(last)) = (running, series.last_index()) {
        laps.push(LapRecord::new(current, start, last));
    }

    laps
}

/// First record carrying `lap_number`.
pub fn find_lap(laps: &[LapRecord], lap_number: i64) -> Option<&LapRecord> {
    laps.iter().find(|lap| lap.lap_number == lap_number)
}

/// Optional narrowing of a lap list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct LapFilter {
    pub lap_number: Option<i64>,
    pub min_samples: Option<i64>,
}

impl LapFilter {
    pub fn is_empty(&self) -> bool {
        self.lap_number.is_none() && self.min_samples.is_none()
    }

    pub fn matches(&self, lap: &LapRecord) -> bool {
        self.lap_number.is_none_or(|n| lap.lap_number == n)
            && self.min_samples.is_none_or(|min| lap.sample_count >= min)
    }

    /// Keep matching laps, preserving order.
    pub fn apply(&self, laps: Vec<LapRecord>) -> Vec<LapRecord> {
        laps.into_iter().filter(|lap| self.matches(lap)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Sample;
    use pretty_assertions::assert_eq;

    fn laps_of(pairs: &[(i64, i64)]) -> IndexedSeries {
        pairs.iter().map(|(i, v)| (*i, Sample::Int(*v))).collect()
    }

    fn bounds(laps: &[LapRecord]) -> Vec<(i64, i64, i64, i64)> {
        laps.iter()
            .map(|l| (l.lap_number, l.start_index, l.end_index, l.sample_count))
            .collect()
    }

    #[test]
    fn test_empty_series() {
        assert!(segment(&IndexedSeries::new()).is_empty());
    }

    #[test]
    fn test_single_lap() {
        let series = IndexedSeries::from_values([1i64; 5]);
        assert_eq!(bounds(&segment(&series)), vec![(1, 0, 4, 5)]);
    }

    #[test]
    fn test_contiguous_blocks() {
        let series = laps_of(&[(0, 1), (1, 1), (2, 1), (3, 2), (4, 2)]);
        assert_eq!(
            bounds(&segment(&series)),
            vec![(1, 0, 2, 3), (2, 3, 4, 2)]
        );
    }

    #[test]
    fn test_gap_absorbed_into_running_lap() {
        let series = laps_of(&[(10, 1), (11, 1), (12, 1), (20, 2), (21, 2), (22, 2)]);
        assert_eq!(
            bounds(&segment(&series)),
            vec![(1, 10, 19, 10), (2, 20, 22, 3)]
        );
    }

    #[test]
    fn test_leading_markers_skipped() {
        let series = IndexedSeries::from_values([0i64, -1, 0, 1, 1, 2]);
        assert_eq!(
            bounds(&segment(&series)),
            vec![(1, 3, 4, 2), (2, 5, 5, 1)]
        );
    }

    #[test]
    fn test_marker_between_laps_does_not_close_lap() {
        let series = IndexedSeries::from_values([1i64, 1, 0, 0, 2, 2]);
        assert_eq!(
            bounds(&segment(&series)),
            vec![(1, 0, 3, 4), (2, 4, 5, 2)]
        );
    }

    #[test]
    fn test_last_lap_runs_to_final_index() {
        let series = IndexedSeries::from_values([1i64, 1, 2, 2, 0, 0]);
        assert_eq!(
            bounds(&segment(&series)),
            vec![(1, 0, 1, 2), (2, 2, 5, 4)]
        );
    }

    #[test]
    fn test_only_markers() {
        let series = IndexedSeries::from_values([0i64, 0, -1, -5]);
        assert!(segment(&series).is_empty());
    }

    #[test]
    fn test_immediate_transitions() {
        let series = IndexedSeries::from_values([1i64, 2, 3, 4]);
        let laps = segment(&series);
        assert_eq!(laps.len(), 4);
        assert!(laps.iter().all(|l| l.sample_count == 1));
        assert!(laps.iter().all(|l| l.start_index == l.end_index));
    }

    #[test]
    fn test_out_of_order_lap_numbers_keep_series_order() {
        let series = IndexedSeries::from_values([3i64, 3, 1, 1, 2]);
        let numbers: Vec<i64> = segment(&series).iter().map(|l| l.lap_number).collect();
        assert_eq!(numbers, vec![3, 1, 2]);
    }

    #[test]
    fn test_repeated_lap_number_is_new_record() {
        let series = IndexedSeries::from_values([1i64, 1, 2, 2, 1, 1]);
        assert_eq!(
            bounds(&segment(&series)),
            vec![(1, 0, 1, 2), (2, 2, 3, 2), (1, 4, 5, 2)]
        );
        let first = find_lap(&segment(&series), 1).cloned().unwrap();
        assert_eq!(first.start_index, 0);
    }

    #[test]
    fn test_non_integer_lap_values_are_markers() {
        let series: IndexedSeries = [
            (0, Sample::Null),
            (1, Sample::Text("1".into())),
            (2, Sample::Float(1.0)),
            (3, Sample::Float(1.5)),
            (4, Sample::Int(2)),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            bounds(&segment(&series)),
            vec![(1, 2, 3, 2), (2, 4, 4, 1)]
        );
    }

    #[test]
    fn test_large_lap_numbers() {
        let series = IndexedSeries::from_values([999i64, 999, 1000]);
        assert_eq!(
            bounds(&segment(&series)),
            vec![(999, 0, 1, 2), (1000, 2, 2, 1)]
        );
    }

    #[test]
    fn test_find_lap_missing() {
        let laps = segment(&IndexedSeries::from_values([1i64, 2]));
        assert!(find_lap(&laps, 7).is_none());
    }

    #[test]
    fn test_filter_by_lap_number_and_min_samples() {
        let laps = segment(&IndexedSeries::from_values([1i64, 1, 1, 2, 3, 3]));

        let by_number = LapFilter {
            lap_number: Some(3),
            min_samples: None,
        };
        assert_eq!(bounds(&by_number.apply(laps.clone())), vec![(3, 4, 5, 2)]);

        let by_size = LapFilter {
            lap_number: None,
            min_samples: Some(2),
        };
        let numbers: Vec<i64> = by_size.apply(laps.clone()).iter().map(|l| l.lap_number).collect();
        assert_eq!(numbers, vec![1, 3]);

        assert!(LapFilter::default().is_empty());
        assert_eq!(LapFilter::default().apply(laps.clone()), laps);
    }

    #[test]
    fn test_serialized_shape_without_validity() {
        let lap = LapRecord::new(2, 3, 4);
        let json = serde_json::to_value(&lap).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "lap_number": 2,
                "start_index": 3,
                "end_index": 4,
                "sample_count": 2
            })
        );
    }
}
