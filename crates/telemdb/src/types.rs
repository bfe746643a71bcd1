use serde::{Deserialize, Serialize};

use laps::IndexedSeries;

/// Unique identifier for a recorded session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session metadata row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub track_name: Option<String>,
    pub track_config: Option<String>,
    pub session_type: Option<String>,
    pub session_date: Option<String>,
    pub session_time: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Track conditions for a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weather {
    pub track_air_temp: Option<String>,
    pub track_surface_temp: Option<String>,
    pub skies: Option<String>,
    pub wind_speed: Option<String>,
    pub relative_humidity: Option<String>,
}

/// A driver entry in a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Driver {
    pub driver_name: Option<String>,
    pub car_name: Option<String>,
    pub car_number: Option<String>,
    pub team_name: Option<String>,
}

/// Everything needed to create a session row and its dependents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewSession {
    /// Generated when absent
    pub session_id: Option<SessionId>,
    pub track_name: Option<String>,
    pub track_config: Option<String>,
    pub session_type: Option<String>,
    pub session_date: Option<String>,
    pub session_time: Option<String>,
    pub weather: Option<Weather>,
    pub drivers: Vec<Driver>,
}

/// A session together with its weather and drivers
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session_info: SessionInfo,
    pub weather: Option<Weather>,
    pub drivers: Vec<Driver>,
}

/// Rows removed by a session delete, per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeletedRecords {
    pub session_info: usize,
    pub weather: usize,
    pub drivers: usize,
    pub attribute_values: usize,
}

/// A stored attribute series in its serialized form
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSeries {
    pub session_id: SessionId,
    pub attribute: String,
    pub value: String,
    pub value_len: i64,
}

impl StoredSeries {
    pub fn decode(&self) -> laps::Result<IndexedSeries> {
        IndexedSeries::decode(&self.value)
    }
}

/// Parse a stored `created_at`, written by SQLite as `YYYY-MM-DD HH:MM:SS`
/// or by other tools as RFC 3339.
///
/// Unreadable values are logged and replaced with the current time.
pub fn parse_datetime(s: &str) -> chrono::DateTime<chrono::Utc> {
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return dt.and_utc();
    }
    match chrono::DateTime::parse_from_rfc3339(s) {
        Ok(dt) => dt.with_timezone(&chrono::Utc),
        Err(e) => {
            tracing::warn!(value = s, error = %e, "Unreadable created_at, using current time");
            chrono::Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_datetime_formats() {
        let expected = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 14, 30, 0).unwrap();
        assert_eq!(parse_datetime("2024-05-01 14:30:00"), expected);
        assert_eq!(parse_datetime("2024-05-01T16:30:00+02:00"), expected);

        let before = chrono::Utc::now();
        assert!(parse_datetime("yesterday") >= before);
    }
}
