//! Read-only projections of an attribute series onto a lap's index range.

use serde::Serialize;

use crate::series::{IndexedSeries, Sample};

/// Every index in `[start, end]` paired with its sample, `Null` where missing.
///
/// The output is dense over the range regardless of how sparse the source is.
pub fn extract(series: &IndexedSeries, start: i64, end: i64) -> Vec<(i64, Sample)> {
    if start > end {
        return Vec::new();
    }
    (start..=end)
        .map(|index| {
            let sample = series.get(index).cloned().unwrap_or(Sample::Null);
            (index, sample)
        })
        .collect()
}

/// Statistics over the numeric samples in a range.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RangeStats {
    pub average: Option<f64>,
    pub min: Option<Sample>,
    pub max: Option<Sample>,
    pub sample_count: usize,
}

/// Average, min and max over numeric samples in `[start, end]`.
///
/// Strings holding a number count as numeric, see [`Sample::as_number`].
/// Missing, `Null` and other samples are left out entirely; they are not read
/// as zero. `min` and `max` are the samples as stored. An empty selection gives `None` statistics and a zero count.
pub fn aggregate(series: &IndexedSeries, start: i64, end: i64) -> RangeStats {
    let mut stats = RangeStats::default();
    let mut sum = 0.0;
    let mut low: Option<(f64, &Sample)> = None;
    let mut high: Option<(f64, &Sample)> = None;

    for (_, sample) in series.range(start, end) {
        let Some(value) = sample.as_number() else {
            continue;
        };
        sum += value;
        stats.sample_count += 1;
        if low.is_none_or(|(v, _)| value < v) {
            low = Some((value, sample));
        }
        if high.is_none_or(|(v, _)| value > v) {
            high = Some((value, sample));
        }
    }

    if stats.sample_count > 0 {
        stats.average = Some(sum / stats.sample_count as f64);
        stats.min = low.map(|(_, s)| s.clone());
        stats.max = high.map(|(_, s)| s.clone());
    }
    stats
}

/// Statistics for one named attribute.
///
/// `stats` is `None` when the attribute has no stored series, which is
/// different from a stored series with nothing numeric in range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeStats {
    pub attribute: String,
    pub stats: Option<RangeStats>,
}

/// Aggregate several attributes independently over the same range.
pub fn aggregate_each<'a, I>(series: I, start: i64, end: i64) -> Vec<AttributeStats>
where
    I: IntoIterator<Item = (&'a str, Option<&'a IndexedSeries>)>,
{
    series
        .into_iter()
        .map(|(attribute, series)| AttributeStats {
            attribute: attribute.to_string(),
            stats: series.map(|s| aggregate(s, start, end)),
        })
        .collect()
}
