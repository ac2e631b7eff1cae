use axum::body::Bytes;
use axum::extract::{Query, RawQuery, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::form_urlencoded;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store::{MeasurementQuery, MeasurementRecord, RealtimeFilter};
use crate::time::parse_timestamp;

const DEFAULT_LATEST_LIMIT: i64 = 100;
const DEFAULT_SERIES_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 5000;

fn clamp_limit(limit: Option<i64>, default: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct SensorsParams {
    pub endpoint: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SensorsResponse {
    pub count: usize,
    pub items: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/api/sensors",
    tag = "measurements",
    params(SensorsParams),
    responses((status = 200, description = "Distinct sensor names", body = SensorsResponse))
)]
pub(crate) async fn list_sensors(
    State(state): State<AppState>,
    Query(params): Query<SensorsParams>,
) -> AppResult<Json<SensorsResponse>> {
    let endpoint = non_empty(params.endpoint);
    let items = state.measurements.sensor_names(endpoint.as_deref()).await?;
    Ok(Json(SensorsResponse {
        count: items.len(),
        items,
    }))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct LatestParams {
    /// Defaults to 100, clamped to 1..=5000.
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/api/latest",
    tag = "measurements",
    params(LatestParams),
    responses((status = 200, description = "Newest records first", body = [MeasurementRecord]))
)]
pub(crate) async fn latest_values(
    State(state): State<AppState>,
    Query(params): Query<LatestParams>,
) -> AppResult<Json<Vec<MeasurementRecord>>> {
    let limit = clamp_limit(params.limit, DEFAULT_LATEST_LIMIT);
    Ok(Json(state.measurements.latest(limit).await?))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct MeasurementsParams {
    pub name: Option<String>,
    /// Inclusive lower bound (RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`).
    pub start: Option<String>,
    /// Inclusive upper bound.
    pub end: Option<String>,
    pub endpoint: Option<String>,
    pub device_ip: Option<String>,
    /// Defaults to 20, clamped to 1..=5000.
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/api/measurements",
    tag = "measurements",
    params(MeasurementsParams),
    responses(
        (status = 200, description = "Newest matches in ascending time order", body = [MeasurementRecord]),
        (status = 400, description = "Missing sensor name")
    )
)]
pub(crate) async fn list_measurements(
    State(state): State<AppState>,
    Query(params): Query<MeasurementsParams>,
) -> AppResult<Json<Vec<MeasurementRecord>>> {
    let Some(name) = non_empty(params.name) else {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "name is required"));
    };
    let query = MeasurementQuery {
        name,
        start: params.start.as_deref().and_then(parse_timestamp),
        end: params.end.as_deref().and_then(parse_timestamp),
        endpoint: non_empty(params.endpoint),
        device_ip: non_empty(params.device_ip),
        limit: clamp_limit(params.limit, DEFAULT_SERIES_LIMIT),
    };
    Ok(Json(state.measurements.measurements(&query).await?))
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct RealtimeEntry {
    pub ts: DateTime<Utc>,
    pub value: i32,
    #[serde(rename = "type")]
    pub kind: String,
    pub device_ip: String,
    pub endpoint: String,
}

/// Sensor name to its most recent reading.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(transparent)]
pub struct RealtimeSnapshot(pub BTreeMap<String, RealtimeEntry>);

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct RealtimeBody {
    #[serde(default)]
    pub names: Vec<String>,
    pub endpoint: Option<String>,
    pub device_ip: Option<String>,
}

/// Accepts repeated `names` keys as well as comma separated lists.
fn realtime_filter_from_query(raw: Option<&str>) -> RealtimeFilter {
    let mut filter = RealtimeFilter::default();
    let Some(raw) = raw else {
        return filter;
    };
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        match key.as_ref() {
            "names" | "names[]" => filter.names.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string),
            ),
            "endpoint" => filter.endpoint = non_empty(Some(value.into_owned())),
            "device_ip" => filter.device_ip = non_empty(Some(value.into_owned())),
            _ => {}
        }
    }
    filter
}

async fn realtime_snapshot(
    state: &AppState,
    filter: &RealtimeFilter,
) -> AppResult<RealtimeSnapshot> {
    let records = state.measurements.latest_per_sensor(filter).await?;
    let entries = records
        .into_iter()
        .map(|record| {
            (
                record.name,
                RealtimeEntry {
                    ts: record.ts,
                    value: record.value,
                    kind: record.kind,
                    device_ip: record.device_ip,
                    endpoint: record.endpoint,
                },
            )
        })
        .collect();
    Ok(RealtimeSnapshot(entries))
}

#[utoipa::path(
    get,
    path = "/api/realtime",
    tag = "measurements",
    params(
        ("names" = Option<Vec<String>>, Query, description = "Sensor names (repeat or comma separate)"),
        ("endpoint" = Option<String>, Query, description = "Endpoint tag"),
        ("device_ip" = Option<String>, Query, description = "Device address")
    ),
    responses((status = 200, description = "Latest reading per sensor", body = RealtimeSnapshot))
)]
pub(crate) async fn realtime_get(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> AppResult<Json<RealtimeSnapshot>> {
    let filter = realtime_filter_from_query(raw.as_deref());
    Ok(Json(realtime_snapshot(&state, &filter).await?))
}

#[utoipa::path(
    post,
    path = "/api/realtime",
    tag = "measurements",
    request_body = RealtimeBody,
    responses(
        (status = 200, description = "Latest reading per sensor", body = RealtimeSnapshot),
        (status = 400, description = "Body is not valid JSON")
    )
)]
pub(crate) async fn realtime_post(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    body: Bytes,
) -> AppResult<Json<RealtimeSnapshot>> {
    let mut filter = realtime_filter_from_query(raw.as_deref());
    if !body.iter().all(u8::is_ascii_whitespace) {
        let body: RealtimeBody = serde_json::from_slice(&body).map_err(|err| {
            AppError::new(StatusCode::BAD_REQUEST, format!("invalid JSON body: {err}"))
        })?;
        if !body.names.is_empty() {
            filter.names = body.names;
        }
        if let Some(endpoint) = non_empty(body.endpoint) {
            filter.endpoint = Some(endpoint);
        }
        if let Some(device_ip) = non_empty(body.device_ip) {
            filter.device_ip = Some(device_ip);
        }
    }
    Ok(Json(realtime_snapshot(&state, &filter).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sensors", get(list_sensors))
        .route("/latest", get(latest_values))
        .route("/measurements", get(list_measurements))
        .route("/realtime", get(realtime_get).post(realtime_post))
}
