//! Lap queries and session management on top of the telemetry store.
//!
//! Every operation reads the stored series it needs, hands them to the `laps`
//! core, and writes back whatever the core returns. Nothing is cached between
//! calls. All methods block on SQLite and are meant to run on the blocking
//! pool when called from async code.

use std::sync::Arc;

use serde::{Serialize, Serializer};
use telemdb::{
    DeletedRecords, NewSession, SeriesUpdate, SessionDetail, SessionInfo, StoredSeries, TelemetryDb,
};

use laps::{
    AttributeStats, IndexedSeries, LapFilter, LapRecord, LapSummary, RangeStats,
    INCIDENTS_ATTRIBUTE, LAP_ATTRIBUTE,
};

/// Errors surfaced by [`LapService`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("Failed to parse attribute '{attribute}': {source}")]
    DecodeFailure {
        attribute: String,
        #[source]
        source: laps::Error,
    },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("{0}")]
    Ingest(String),
}

impl ServiceError {
    pub fn missing_lap(lap_number: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("Lap {lap_number} not found in session"))
    }

    fn decode(stored: &StoredSeries) -> impl FnOnce(laps::Error) -> Self + '_ {
        move |source| Self::DecodeFailure {
            attribute: stored.attribute.clone(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// `GET /api/sessions/{id}/laps`
#[derive(Debug, Clone, Serialize)]
pub struct LapOverview {
    pub session_id: String,
    #[serde(flatten)]
    pub summary: LapSummary,
    pub laps: Vec<LapRecord>,
}

/// One attribute over one lap, gaps filled with `null`.
#[derive(Debug, Clone, Serialize)]
pub struct LapAttributeSlice {
    pub session_id: String,
    pub lap_number: i64,
    pub attribute: String,
    pub start_index: i64,
    pub end_index: i64,
    pub sample_count: i64,
    /// Array when the lap starts at index 0, otherwise an object keyed by index.
    pub data: serde_json::Value,
}

/// Statistics for several attributes over one lap.
#[derive(Debug, Clone, Serialize)]
pub struct LapAverages {
    pub session_id: String,
    pub lap_number: i64,
    pub start_index: i64,
    pub end_index: i64,
    pub lap_sample_count: i64,
    /// Keyed by attribute in request order.
    #[serde(serialize_with = "attribute_map")]
    pub attributes: Vec<AttributeStats>,
}

impl LapAverages {
    pub fn stats(&self, attribute: &str) -> Option<Option<&RangeStats>> {
        self.attributes
            .iter()
            .find(|a| a.attribute == attribute)
            .map(|a| a.stats.as_ref())
    }
}

fn attribute_map<S: Serializer>(
    attributes: &[AttributeStats],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(attributes.iter().map(|a| (&a.attribute, &a.stats)))
}

/// Outcome of removing one lap from a set of attributes.
#[derive(Debug, Clone, Serialize)]
pub struct LapDeletion {
    pub session_id: String,
    pub lap_number: i64,
    pub attributes_deleted: Vec<String>,
    pub start_index: i64,
    pub end_index: i64,
    pub data_points_deleted: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionList {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDeletion {
    pub session_id: String,
    pub message: String,
    pub deleted_records: DeletedRecords,
}

/// Lap and session operations over a shared store.
#[derive(Clone)]
pub struct LapService {
    db: Arc<TelemetryDb>,
}

impl LapService {
    pub fn new(db: Arc<TelemetryDb>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &TelemetryDb {
        &self.db
    }

    /// Segmented laps of a session, without incident data.
    pub fn laps(&self, session_id: &str) -> Result<Vec<LapRecord>> {
        segment_stored(session_id, self.db.get_series_raw(session_id, LAP_ATTRIBUTE)?)
    }

    /// First lap carrying `lap_number`.
    pub fn lap(&self, session_id: &str, lap_number: i64) -> Result<LapRecord> {
        pick_lap(&self.laps(session_id)?, lap_number)
    }

    /// Incident series, or `None` when absent or undecodable.
    fn incidents(&self, session_id: &str) -> Result<Option<IndexedSeries>> {
        let Some(stored) = self.db.get_series_raw(session_id, INCIDENTS_ATTRIBUTE)? else {
            return Ok(None);
        };
        match stored.decode() {
            Ok(series) => Ok(Some(series)),
            Err(e) => {
                tracing::warn!(
                    session.id = session_id,
                    error = %e,
                    "Ignoring undecodable incident series"
                );
                Ok(None)
            }
        }
    }

    #[tracing::instrument(name = "laps.overview", skip(self))]
    pub fn lap_overview(&self, session_id: &str, filter: LapFilter) -> Result<LapOverview> {
        let laps = self.laps(session_id)?;
        let incidents = self.incidents(session_id)?;
        let laps = filter.apply(laps::annotate(laps, incidents.as_ref()));

        Ok(LapOverview {
            session_id: session_id.to_string(),
            summary: LapSummary::from_laps(&laps),
            laps,
        })
    }

    #[tracing::instrument(name = "laps.attribute", skip(self))]
    pub fn lap_attribute(
        &self,
        session_id: &str,
        lap_number: i64,
        attribute: &str,
    ) -> Result<LapAttributeSlice> {
        let lap = self.lap(session_id, lap_number)?;

        let stored = self
            .db
            .get_series_raw(session_id, attribute)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Attribute '{attribute}' not found for this session"))
            })?;
        let series = stored.decode().map_err(ServiceError::decode(&stored))?;

        let slice: IndexedSeries = laps::extract(&series, lap.start_index, lap.end_index)
            .into_iter()
            .collect();

        Ok(LapAttributeSlice {
            session_id: session_id.to_string(),
            lap_number,
            attribute: attribute.to_string(),
            start_index: lap.start_index,
            end_index: lap.end_index,
            sample_count: lap.sample_count,
            data: slice.to_json(),
        })
    }

    /// Statistics per attribute; attributes without a stored series get `null`.
    ///
    /// A series that fails to decode fails the whole request.
    #[tracing::instrument(name = "laps.averages", skip(self))]
    pub fn lap_averages(
        &self,
        session_id: &str,
        lap_number: i64,
        attributes: &[String],
    ) -> Result<LapAverages> {
        if attributes.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "Missing required query parameter: attribute".to_string(),
            ));
        }
        let lap = self.lap(session_id, lap_number)?;

        let mut decoded = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            let series = match self.db.get_series_raw(session_id, attribute)? {
                Some(stored) => Some(stored.decode().map_err(ServiceError::decode(&stored))?),
                None => None,
            };
            decoded.push((attribute.as_str(), series));
        }

        let stats = laps::aggregate_each(
            decoded.iter().map(|(name, series)| (*name, series.as_ref())),
            lap.start_index,
            lap.end_index,
        );

        Ok(LapAverages {
            session_id: session_id.to_string(),
            lap_number,
            start_index: lap.start_index,
            end_index: lap.end_index,
            lap_sample_count: lap.sample_count,
            attributes: stats,
        })
    }

    /// Remove one lap's samples from the selected attributes, or from every
    /// stored attribute when `attributes` is `None`.
    ///
    /// The lap is located, every affected series decoded and the rewritten
    /// series stored inside one write transaction. Concurrent deletions on
    /// the same store run one after another, each against the series the
    /// previous one left behind.
    #[tracing::instrument(name = "laps.delete", skip(self))]
    pub fn delete_lap(
        &self,
        session_id: &str,
        lap_number: i64,
        attributes: Option<Vec<String>>,
    ) -> Result<LapDeletion> {
        let (lap, attributes, deleted) = self.db.update_series(session_id, |update| {
            delete_lap_in(update, lap_number, attributes)
        })?;

        tracing::info!(
            session.id = session_id,
            lap.number = lap_number,
            data_points = deleted,
            "Deleted lap data"
        );

        Ok(LapDeletion {
            session_id: session_id.to_string(),
            lap_number,
            attributes_deleted: attributes,
            start_index: lap.start_index,
            end_index: lap.end_index,
            data_points_deleted: deleted,
            message: format!("Successfully deleted attribute data for lap {lap_number}"),
        })
    }

    pub fn list_sessions(&self) -> Result<SessionList> {
        Ok(SessionList {
            sessions: self.db.list_sessions()?,
        })
    }

    pub fn get_session(&self, session_id: &str) -> Result<SessionDetail> {
        self.db
            .get_session_detail(session_id)?
            .ok_or_else(|| ServiceError::NotFound("Session not found".to_string()))
    }

    #[tracing::instrument(name = "sessions.delete", skip(self))]
    pub fn delete_session(&self, session_id: &str) -> Result<SessionDeletion> {
        let deleted_records = self
            .db
            .delete_session(session_id)?
            .ok_or_else(|| ServiceError::NotFound("Session not found".to_string()))?;

        Ok(SessionDeletion {
            session_id: session_id.to_string(),
            message: "Session and all associated data deleted successfully".to_string(),
            deleted_records,
        })
    }

    /// Store a new session with its series.
    pub fn create_session(
        &self,
        session: &NewSession,
        series: &[(String, IndexedSeries)],
    ) -> Result<SessionInfo> {
        Ok(self.db.insert_session(session, series)?)
    }
}

fn segment_stored(session_id: &str, stored: Option<StoredSeries>) -> Result<Vec<LapRecord>> {
    let stored = stored.ok_or_else(|| {
        ServiceError::NotFound(format!("No lap data found for session: {session_id}"))
    })?;
    let series = stored.decode().map_err(ServiceError::decode(&stored))?;
    Ok(laps::segment(&series))
}

/// Locate the lap and cut it from each selected series inside `update`.
fn delete_lap_in(
    update: &SeriesUpdate<'_>,
    lap_number: i64,
    attributes: Option<Vec<String>>,
) -> Result<(LapRecord, Vec<String>, usize)> {
    let laps = segment_stored(update.session_id(), update.get_series_raw(LAP_ATTRIBUTE)?)?;
    let lap = pick_lap(&laps, lap_number)?;

    let attributes = match attributes {
        Some(selected) if !selected.is_empty() => selected,
        _ => update.list_attributes()?,
    };

    let mut decoded = Vec::with_capacity(attributes.len());
    for attribute in &attributes {
        let Some(stored) = update.get_series_raw(attribute)? else {
            tracing::debug!(attribute = %attribute, "Skipping attribute with no stored series");
            continue;
        };
        let series = stored.decode().map_err(ServiceError::decode(&stored))?;
        decoded.push((stored.attribute, series));
    }

    let (updated, deleted) = laps::delete_range_each(decoded, lap.start_index, lap.end_index);
    for (attribute, series) in &updated {
        update.put_series(attribute, series)?;
    }
    Ok((lap, attributes, deleted))
}

fn pick_lap(laps: &[LapRecord], lap_number: i64) -> Result<LapRecord> {
    laps::find_lap(laps, lap_number)
        .cloned()
        .ok_or_else(|| ServiceError::missing_lap(lap_number))
}
