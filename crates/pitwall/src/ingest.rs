//! Turning an uploaded recording into a stored session.
//!
//! Decoding the binary recording format is delegated to an external program
//! behind [`TelemetryParser`]. The program prints one JSON document on stdout:
//!
//! ```json
//! {
//!   "session_id": "optional",
//!   "session": { "track_name": "Spa", "session_date": "2024-07-28" },
//!   "weather": { "skies": "Clear" },
//!   "drivers": [{ "driver_name": "A. Driver" }],
//!   "attributes": { "Lap": [0, 1, 1], "Speed": [0.0, 31.5, 33.0] }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use telemdb::{Driver, NewSession, SessionId, Weather};

use laps::IndexedSeries;
use pitconf::IngestConfig;

use crate::service::{LapService, Result, ServiceError};

const PROCESS_FAILED: &str = "Failed to process telemetry data";
const INVALID_FORMAT: &str = "Invalid telemetry data format";

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to start parser {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("parser did not finish within {0:?}")]
    Timeout(Duration),

    #[error("parser exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("parser produced no output")]
    EmptyOutput,

    #[error("parser output is not a telemetry document: {0}")]
    InvalidFormat(#[from] serde_json::Error),

    #[error("series {attribute} in parser output is invalid: {source}")]
    InvalidSeries {
        attribute: String,
        source: laps::Error,
    },
}

impl From<IngestError> for ServiceError {
    fn from(e: IngestError) -> Self {
        tracing::error!(error = %e, "Telemetry ingestion failed");
        match e {
            IngestError::InvalidFormat(_) | IngestError::InvalidSeries { .. } => {
                ServiceError::Ingest(INVALID_FORMAT.to_string())
            }
            _ => ServiceError::Ingest(PROCESS_FAILED.to_string()),
        }
    }
}

/// Session columns as reported by the parser.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFields {
    pub track_name: Option<String>,
    pub track_config: Option<String>,
    pub session_type: Option<String>,
    pub session_date: Option<String>,
    pub session_time: Option<String>,
}

/// The parser's output document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedTelemetry {
    pub session_id: Option<String>,
    pub session: SessionFields,
    pub weather: Option<Weather>,
    pub drivers: Vec<Driver>,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ParsedTelemetry {
    /// Split into a session row and decoded series.
    ///
    /// A missing or blank `session_id` gets a fresh one.
    pub fn into_parts(self) -> std::result::Result<(NewSession, Vec<(String, IndexedSeries)>), IngestError> {
        let series = self
            .attributes
            .into_iter()
            .map(|(attribute, value)| match IndexedSeries::from_json(&value) {
                Ok(series) => Ok((attribute, series)),
                Err(source) => Err(IngestError::InvalidSeries { attribute, source }),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let session_id = self
            .session_id
            .filter(|id| !id.trim().is_empty())
            .map(SessionId)
            .unwrap_or_default();

        let session = NewSession {
            session_id: Some(session_id),
            track_name: self.session.track_name,
            track_config: self.session.track_config,
            session_type: self.session.session_type,
            session_date: self.session.session_date,
            session_time: self.session.session_time,
            weather: self.weather,
            drivers: self.drivers,
        };

        Ok((session, series))
    }
}

/// Response to a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub uploaded: bool,
    pub session_id: String,
    pub track_name: Option<String>,
    pub attributes: Vec<String>,
}

/// Decodes a recording file into a [`ParsedTelemetry`].
#[async_trait]
pub trait TelemetryParser: Send + Sync + 'static {
    async fn parse(
        &self,
        recording: &Path,
        attributes: &[String],
    ) -> std::result::Result<ParsedTelemetry, IngestError>;
}

/// Runs an external program as the parser.
///
/// Invoked as `program [args...] <recording> <attributes-json>` without a
/// shell. The process is killed if it outlives the timeout.
#[derive(Debug, Clone)]
pub struct CommandParser {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandParser {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(&config.program, config.args.clone(), config.timeout())
    }
}

#[async_trait]
impl TelemetryParser for CommandParser {
    #[tracing::instrument(name = "ingest.parse", skip(self, attributes), fields(program = %self.program.display()))]
    async fn parse(
        &self,
        recording: &Path,
        attributes: &[String],
    ) -> std::result::Result<ParsedTelemetry, IngestError> {
        let requested = serde_json::to_string(attributes)?;

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .arg(recording)
            .arg(&requested)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| IngestError::Timeout(self.timeout))?
            .map_err(|source| IngestError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(IngestError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(IngestError::EmptyOutput);
        }

        let parsed: ParsedTelemetry = serde_json::from_str(&stdout)?;
        tracing::debug!(series = parsed.attributes.len(), "Parser finished");
        Ok(parsed)
    }
}

/// Store parser output as a new session.
pub fn store_parsed(service: &LapService, parsed: ParsedTelemetry) -> Result<UploadReceipt> {
    let (session, series) = parsed.into_parts()?;
    let attributes = series.iter().map(|(name, _)| name.clone()).collect();
    let info = service.create_session(&session, &series)?;

    tracing::info!(
        session.id = %info.session_id,
        track = info.track_name.as_deref().unwrap_or("unknown"),
        series = series.len(),
        "Stored uploaded session"
    );

    Ok(UploadReceipt {
        uploaded: true,
        session_id: info.session_id.0,
        track_name: info.track_name,
        attributes,
    })
}

/// Whether a client-supplied file name has the `.ibt` extension.
pub fn is_recording_name(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ibt"))
}
