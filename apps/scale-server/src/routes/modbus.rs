use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PollerConfig;
use crate::error::{AppError, AppResult};
use crate::modbus::{ByteOrder, WordOrder};
use crate::poller::{ReadOverrides, SchedulerState};
use crate::state::AppState;

/// Public view of the poller configuration.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ModbusConfigView {
    pub host: String,
    pub port: u16,
    pub unit: u8,
    pub address: u16,
    pub interval_ms: u64,
    pub sensor_name: String,
    pub endpoint: String,
    pub word_order: WordOrder,
    pub byte_order: ByteOrder,
    pub debug: bool,
}

impl From<&PollerConfig> for ModbusConfigView {
    fn from(config: &PollerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            unit: config.unit_id,
            address: config.address,
            interval_ms: config.interval.as_millis() as u64,
            sensor_name: config.sensor_name.clone(),
            endpoint: config.endpoint_tag.clone(),
            word_order: config.word_order,
            byte_order: config.byte_order,
            debug: config.debug,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ModbusStatusResponse {
    pub enabled: bool,
    pub running: bool,
    pub state: SchedulerState,
    pub config: ModbusConfigView,
    pub last_ok: Option<DateTime<Utc>>,
    pub last_value: Option<i32>,
    pub last_err: Option<String>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ReadOnceResponse {
    pub registers: Vec<u16>,
    pub value: i32,
    pub config: ModbusConfigView,
    pub inserted: bool,
}

fn status_response(state: &AppState) -> ModbusStatusResponse {
    let status = state.status.get();
    ModbusStatusResponse {
        enabled: state.config.poller.enabled,
        running: status.running,
        state: state.poller.state(),
        config: ModbusConfigView::from(&state.config.poller),
        last_ok: status.last_success_at,
        last_value: status.last_value,
        last_err: status.last_error,
    }
}

#[utoipa::path(
    get,
    path = "/api/modbus/status",
    tag = "modbus",
    responses((status = 200, description = "Poller status", body = ModbusStatusResponse))
)]
pub(crate) async fn modbus_status(State(state): State<AppState>) -> Json<ModbusStatusResponse> {
    Json(status_response(&state))
}

#[utoipa::path(
    post,
    path = "/api/modbus/once",
    tag = "modbus",
    request_body = ReadOverrides,
    responses(
        (status = 200, description = "Register pair and decoded value", body = ReadOnceResponse),
        (status = 502, description = "Device unreachable or read failed"),
        (status = 500, description = "Reading could not be stored")
    )
)]
pub(crate) async fn modbus_once(
    State(state): State<AppState>,
    Json(overrides): Json<ReadOverrides>,
) -> AppResult<Json<ReadOnceResponse>> {
    let reading = state.reader.read_once(&overrides).await?;
    Ok(Json(ReadOnceResponse {
        registers: reading.registers.to_vec(),
        value: reading.value,
        config: ModbusConfigView::from(&reading.effective),
        inserted: reading.inserted,
    }))
}

#[utoipa::path(
    post,
    path = "/api/modbus/start",
    tag = "modbus",
    responses(
        (status = 200, description = "Poller running", body = ModbusStatusResponse),
        (status = 409, description = "Polling is disabled")
    )
)]
pub(crate) async fn modbus_start(
    State(state): State<AppState>,
) -> AppResult<Json<ModbusStatusResponse>> {
    if !state.config.poller.enabled {
        return Err(AppError::conflict(
            "modbus polling is disabled (MODBUS_ENABLED=false)",
        ));
    }
    if !state.poller.start().await {
        tracing::debug!("modbus poller already running");
    }
    Ok(Json(status_response(&state)))
}

#[utoipa::path(
    post,
    path = "/api/modbus/stop",
    tag = "modbus",
    responses((status = 200, description = "Poller stopped", body = ModbusStatusResponse))
)]
pub(crate) async fn modbus_stop(State(state): State<AppState>) -> Json<ModbusStatusResponse> {
    state.poller.stop().await;
    Json(status_response(&state))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/modbus/status", get(modbus_status))
        .route("/modbus/once", post(modbus_once))
        .route("/modbus/start", post(modbus_start))
        .route("/modbus/stop", post(modbus_stop))
}
