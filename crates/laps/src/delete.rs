//! Range deletion with recompaction.
//!
//! Removing a lap from an attribute drops every present entry in the lap's
//! index range and renumbers the survivors `0..n` in their original order.
//! `Null` entries hold no value, so they are never removed; they survive and
//! are renumbered with everything else. Original index positions of survivors
//! are not kept, so a later segmentation sees the series as if the lap had
//! never been recorded.

use crate::series::IndexedSeries;

/// Result of [`delete_range`]. The input series is never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeDeletion {
    pub series: IndexedSeries,
    /// Entries removed. `series.len()` of the input minus this is the
    /// length of `series` here.
    pub deleted_count: usize,
}

/// Remove every present entry in `[start, end]` and recompact the rest from
/// index 0.
pub fn delete_range(series: &IndexedSeries, start: i64, end: i64) -> RangeDeletion {
    let mut deleted_count = 0;
    let survivors = series.iter().filter_map(|(index, sample)| {
        if start <= index && index <= end && sample.is_present() {
            deleted_count += 1;
            None
        } else {
            Some(sample.clone())
        }
    });
    let series = IndexedSeries::from_values(survivors.collect::<Vec<_>>());

    RangeDeletion {
        series,
        deleted_count,
    }
}

/// Apply [`delete_range`] to several series, summing the deleted counts.
pub fn delete_range_each<K, I>(series: I, start: i64, end: i64) -> (Vec<(K, IndexedSeries)>, usize)
where
    I: IntoIterator<Item = (K, IndexedSeries)>,
{
    let mut total = 0;
    let updated = series
        .into_iter()
        .map(|(key, series)| {
            let deletion = delete_range(&series, start, end);
            total += deletion.deleted_count;
            (key, deletion.series)
        })
        .collect();
    (updated, total)
}
