//! HTTP routes for sessions, laps, and uploads.
//!
//! Every response is JSON. Failures carry `{"error": "<message>"}` with the
//! status taken from [`ServiceError`].

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use laps::LapFilter;

use crate::ingest::{self, TelemetryParser};
use crate::service::{LapService, ServiceError};

/// Recordings run to hundreds of megabytes.
const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

const MISSING_ATTRIBUTE: &str = "Missing required query parameter: attribute";
const SINGLE_ATTRIBUTE: &str = "Only one attribute can be requested per lap";

/// Shared state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub service: LapService,
    pub parser: Arc<dyn TelemetryParser>,
}

impl AppState {
    pub fn new(service: LapService, parser: Arc<dyn TelemetryParser>) -> Self {
        Self { service, parser }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health).fallback(method_not_allowed))
        .route(
            "/api/telemetry/upload",
            post(upload)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
                .fallback(method_not_allowed),
        )
        .route("/api/sessions", get(list_sessions).fallback(method_not_allowed))
        .route(
            "/api/sessions/{id}",
            get(get_session)
                .delete(delete_session)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/sessions/{id}/laps",
            get(lap_overview).fallback(method_not_allowed),
        )
        .route(
            "/api/sessions/{id}/laps/{lap}",
            get(lap_attribute)
                .delete(delete_lap)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/sessions/{id}/laps/{lap}/averages",
            get(lap_averages).fallback(method_not_allowed),
        )
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServiceError::DecodeFailure { .. }
            | ServiceError::Storage(_)
            | ServiceError::Ingest(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ServiceError>;

/// Run a blocking store operation off the async workers.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::Storage(anyhow::anyhow!("Worker task failed: {e}")))?
        .map(Json)
}

/// Lap numbers in paths must be integers; anything else is an unknown lap.
fn lap_number(raw: &str) -> Result<i64, ServiceError> {
    raw.parse().map_err(|_| ServiceError::missing_lap(raw))
}

/// Attribute names from `attribute` / `attribute[]` parameters.
///
/// Values may be comma-separated. Names are trimmed, blanks dropped, and
/// duplicates removed keeping the first occurrence.
pub fn attribute_selection<'a, I>(params: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut selected: Vec<String> = Vec::new();
    for (key, value) in params {
        if key != "attribute" && key != "attribute[]" {
            continue;
        }
        for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if !selected.iter().any(|s| s == name) {
                selected.push(name.to_string());
            }
        }
    }
    selected
}

fn query_pairs(params: &[(String, String)]) -> impl Iterator<Item = (&str, &str)> {
    params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
}

fn lap_filter(params: &[(String, String)]) -> Result<LapFilter, ServiceError> {
    let mut filter = LapFilter::default();
    for (key, value) in params {
        let slot = match key.as_str() {
            "lap_number" => &mut filter.lap_number,
            "min_samples" => &mut filter.min_samples,
            _ => continue,
        };
        let parsed = value.trim().parse().map_err(|_| {
            ServiceError::InvalidArgument(format!("Invalid value for {key}: {value}"))
        })?;
        *slot = Some(parsed);
    }
    Ok(filter)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" }))).into_response()
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method Not Allowed" })),
    )
        .into_response()
}

#[tracing::instrument(name = "http.sessions.list", skip(state))]
async fn list_sessions(State(state): State<AppState>) -> Response {
    blocking(move || state.service.list_sessions())
        .await
        .into_response()
}

#[tracing::instrument(name = "http.sessions.get", skip(state))]
async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    blocking(move || state.service.get_session(&id))
        .await
        .into_response()
}

#[tracing::instrument(name = "http.sessions.delete", skip(state))]
async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    blocking(move || state.service.delete_session(&id))
        .await
        .into_response()
}

#[tracing::instrument(name = "http.laps.overview", skip(state, params))]
async fn lap_overview(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let filter = match lap_filter(&params) {
        Ok(f) => f,
        Err(e) => return e.into_response(),
    };
    blocking(move || state.service.lap_overview(&id, filter))
        .await
        .into_response()
}

#[tracing::instrument(name = "http.laps.attribute", skip(state, params))]
async fn lap_attribute(
    State(state): State<AppState>,
    Path((id, lap)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let attribute = match attribute_selection(query_pairs(&params)).as_slice() {
        [] => return ServiceError::InvalidArgument(MISSING_ATTRIBUTE.to_string()).into_response(),
        [one] => one.clone(),
        _ => return ServiceError::InvalidArgument(SINGLE_ATTRIBUTE.to_string()).into_response(),
    };
    let lap = match lap_number(&lap) {
        Ok(n) => n,
        Err(e) => return e.into_response(),
    };
    blocking(move || state.service.lap_attribute(&id, lap, &attribute))
        .await
        .into_response()
}

#[tracing::instrument(name = "http.laps.averages", skip(state, params))]
async fn lap_averages(
    State(state): State<AppState>,
    Path((id, lap)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let attributes = attribute_selection(query_pairs(&params));
    if attributes.is_empty() {
        return ServiceError::InvalidArgument(MISSING_ATTRIBUTE.to_string()).into_response();
    }
    let lap = match lap_number(&lap) {
        Ok(n) => n,
        Err(e) => return e.into_response(),
    };
    blocking(move || state.service.lap_averages(&id, lap, &attributes))
        .await
        .into_response()
}

#[tracing::instrument(name = "http.laps.delete", skip(state, params))]
async fn delete_lap(
    State(state): State<AppState>,
    Path((id, lap)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let lap = match lap_number(&lap) {
        Ok(n) => n,
        Err(e) => return e.into_response(),
    };
    let selected = attribute_selection(query_pairs(&params));
    let attributes = (!selected.is_empty()).then_some(selected);
    blocking(move || state.service.delete_lap(&id, lap, attributes))
        .await
        .into_response()
}

/// Multipart upload: one `telemetry_file` part plus optional `attributes`.
#[tracing::instrument(name = "http.telemetry.upload", skip(state, multipart))]
async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut recording: Option<(String, axum::body::Bytes)> = None;
    let mut attribute_params: Vec<(String, String)> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return ServiceError::InvalidArgument(e.body_text()).into_response(),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "telemetry_file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => recording = Some((file_name, bytes)),
                    Err(e) => return ServiceError::InvalidArgument(e.body_text()).into_response(),
                }
            }
            "attributes" | "attributes[]" => match field.text().await {
                Ok(text) => attribute_params.push(("attribute".to_string(), text)),
                Err(e) => return ServiceError::InvalidArgument(e.body_text()).into_response(),
            },
            _ => {}
        }
    }

    let Some((file_name, bytes)) = recording.filter(|(name, _)| !name.is_empty()) else {
        return ServiceError::InvalidArgument("No file uploaded".to_string()).into_response();
    };
    if !ingest::is_recording_name(&file_name) {
        return ServiceError::InvalidArgument(
            "Invalid file type. Only .ibt files are allowed".to_string(),
        )
        .into_response();
    }
    let attributes = attribute_selection(query_pairs(&attribute_params));

    let staged = match tempfile::Builder::new().prefix("upload-").suffix(".ibt").tempfile() {
        Ok(file) => file,
        Err(e) => return ServiceError::Storage(e.into()).into_response(),
    };
    if let Err(e) = tokio::fs::write(staged.path(), &bytes).await {
        return ServiceError::Storage(e.into()).into_response();
    }
    tracing::debug!(file = %file_name, bytes = bytes.len(), "Staged recording");

    let parsed = match state.parser.parse(staged.path(), &attributes).await {
        Ok(parsed) => parsed,
        Err(e) => return ServiceError::from(e).into_response(),
    };

    let service = state.service.clone();
    blocking(move || ingest::store_parsed(&service, parsed))
        .await
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pairs(raw: &[(&'static str, &'static str)]) -> Vec<(String, String)> {
        raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_attribute_selection() {
        let params = pairs(&[
            ("attribute", "Speed, RPM"),
            ("other", "Gear"),
            ("attribute[]", "Throttle"),
            ("attribute", "RPM,,Speed"),
            ("attribute", "  "),
        ]);
        assert_eq!(
            attribute_selection(query_pairs(&params)),
            vec!["Speed", "RPM", "Throttle"]
        );
        assert!(attribute_selection(query_pairs(&[])).is_empty());
    }

    #[test]
    fn test_lap_filter_params() {
        let filter = lap_filter(&pairs(&[("min_samples", "10"), ("lap_number", "3")])).unwrap();
        assert_eq!(filter.lap_number, Some(3));
        assert_eq!(filter.min_samples, Some(10));

        let err = lap_filter(&pairs(&[("min_samples", "lots")])).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[test]
    fn test_non_numeric_lap_is_not_found() {
        let err = lap_number("abc").unwrap_err();
        assert_eq!(err.to_string(), "Lap abc not found in session");
        assert_eq!(lap_number("12").unwrap(), 12);
    }
}
