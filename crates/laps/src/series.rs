//! Sparse integer-indexed series and their stored JSON form.
//!
//! Stored series are JSON arrays (position is the sample index) or JSON
//! objects keyed by decimal sample index. Both decode into the same
//! [`IndexedSeries`]; encoding picks an array when the indices are exactly
//! `0..len` and an object otherwise.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};

use crate::{Error, Result};

/// A single recorded value.
///
/// Only [`Sample::Int`] and [`Sample::Float`] are numeric. [`Sample::Null`]
/// marks an index that exists in the stored form without a value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Sample {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl Sample {
    /// Convert a scalar JSON value. Arrays and objects have no sample form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Sample::Null),
            Value::Bool(b) => Some(Sample::Bool(*b)),
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Sample::Int(i),
                None => Sample::Float(n.as_f64()?),
            }),
            Value::String(s) => Some(Sample::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Sample::Int(i) => Value::Number((*i).into()),
            Sample::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            Sample::Bool(b) => Value::Bool(*b),
            Sample::Text(s) => Value::String(s.clone()),
            Sample::Null => Value::Null,
        }
    }

    /// True for every sample except `Null`.
    pub fn is_present(&self) -> bool {
        !matches!(self, Sample::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Sample::Int(_) | Sample::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Sample::Int(i) => Some(*i as f64),
            Sample::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Value for statistics: numbers, and strings that read as a finite
    /// number such as `"20"` or `" 1.5e3"`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Sample::Text(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            other => other.as_f64(),
        }
    }

    /// Integral numeric value, if any. `3.0` qualifies, `3.5` does not.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Sample::Int(i) => Some(*i),
            Sample::Float(f) if f.is_finite() && f.fract() == 0.0 => {
                let i = *f as i64;
                (i as f64 == *f).then_some(i)
            }
            _ => None,
        }
    }
}

impl From<i64> for Sample {
    fn from(value: i64) -> Self {
        Sample::Int(value)
    }
}

impl From<f64> for Sample {
    fn from(value: f64) -> Self {
        Sample::Float(value)
    }
}

impl From<bool> for Sample {
    fn from(value: bool) -> Self {
        Sample::Bool(value)
    }
}

impl From<&str> for Sample {
    fn from(value: &str) -> Self {
        Sample::Text(value.to_string())
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Finite mapping from sample index to [`Sample`], iterated in index order.
///
/// Indices need not start at zero and may have gaps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedSeries {
    samples: BTreeMap<i64, Sample>,
}

impl IndexedSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dense zero-based series from values in order.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Sample>,
    {
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i as i64, v.into()))
            .collect()
    }

    /// Decode the stored JSON form.
    pub fn decode(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_json(&value)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let mut series = Self::new();
        match value {
            Value::Array(items) => {
                for (position, item) in items.iter().enumerate() {
                    let index = position as i64;
                    let sample = Sample::from_json(item).ok_or(Error::NonScalar(index))?;
                    series.samples.insert(index, sample);
                }
            }
            Value::Object(entries) => {
                for (key, item) in entries {
                    let index = parse_index(key)?;
                    let sample = Sample::from_json(item).ok_or(Error::NonScalar(index))?;
                    series.samples.insert(index, sample);
                }
            }
            Value::Null => return Err(Error::UnexpectedRoot("null")),
            Value::Bool(_) => return Err(Error::UnexpectedRoot("boolean")),
            Value::Number(_) => return Err(Error::UnexpectedRoot("number")),
            Value::String(_) => return Err(Error::UnexpectedRoot("string")),
        }
        Ok(series)
    }

    /// JSON form: an array when dense and zero-based, otherwise an object.
    pub fn to_json(&self) -> Value {
        if self.is_dense() {
            Value::Array(self.samples.values().map(Sample::to_json).collect())
        } else {
            let map: Map<String, Value> = self
                .samples
                .iter()
                .map(|(index, sample)| (index.to_string(), sample.to_json()))
                .collect();
            Value::Object(map)
        }
    }

    pub fn encode(&self) -> String {
        self.to_json().to_string()
    }

    /// Byte length of [`encode`](Self::encode).
    pub fn encoded_len(&self) -> usize {
        self.encode().len()
    }

    pub fn insert(&mut self, index: i64, sample: impl Into<Sample>) -> Option<Sample> {
        self.samples.insert(index, sample.into())
    }

    pub fn get(&self, index: i64) -> Option<&Sample> {
        self.samples.get(&index)
    }

    /// Value at `index` when it exists and is not `Null`.
    pub fn get_present(&self, index: i64) -> Option<&Sample> {
        self.samples.get(&index).filter(|s| s.is_present())
    }

    /// Number of indices, including `Null` entries.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of indices holding a non-`Null` sample.
    pub fn present_count(&self) -> usize {
        self.samples.values().filter(|s| s.is_present()).count()
    }

    pub fn first_index(&self) -> Option<i64> {
        self.samples.keys().next().copied()
    }

    pub fn last_index(&self) -> Option<i64> {
        self.samples.keys().next_back().copied()
    }

    /// True when the indices are exactly `0..len`.
    pub fn is_dense(&self) -> bool {
        match self.last_index() {
            None => true,
            Some(last) => self.first_index() == Some(0) && last + 1 == self.samples.len() as i64,
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (i64, &Sample)> + '_ {
        self.samples.iter().map(|(index, sample)| (*index, sample))
    }

    /// Entries with `start <= index <= end`. Empty when `start > end`.
    pub fn range(&self, start: i64, end: i64) -> impl Iterator<Item = (i64, &Sample)> + '_ {
        let entries = (start <= end).then(|| self.samples.range(start..=end));
        entries
            .into_iter()
            .flatten()
            .map(|(index, sample)| (*index, sample))
    }

    pub fn values(&self) -> impl Iterator<Item = &Sample> + '_ {
        self.samples.values()
    }

    pub fn into_values(self) -> impl Iterator<Item = Sample> {
        self.samples.into_values()
    }
}

impl FromIterator<(i64, Sample)> for IndexedSeries {
    fn from_iter<T: IntoIterator<Item = (i64, Sample)>>(iter: T) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

impl Serialize for IndexedSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn parse_index(key: &str) -> Result<i64> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidIndex(key.to_string()));
    }
    key.parse().map_err(|_| Error::InvalidIndex(key.to_string()))
}
