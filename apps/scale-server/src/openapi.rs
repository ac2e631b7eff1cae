use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::modbus::{ByteOrder, WordOrder};
use crate::poller::{ReadOverrides, SchedulerState};
use crate::routes::health::{self, HealthResponse};
use crate::routes::measurements::{
    self, RealtimeBody, RealtimeEntry, RealtimeSnapshot, SensorsResponse,
};
use crate::routes::modbus::{self, ModbusConfigView, ModbusStatusResponse, ReadOnceResponse};
use crate::state::AppState;
use crate::store::MeasurementRecord;

#[derive(OpenApi)]
#[openapi(
    info(title = "scale-server", description = "Modbus scale poller and measurement API"),
    paths(
        health::healthz_handler,
        modbus::modbus_status,
        modbus::modbus_once,
        modbus::modbus_start,
        modbus::modbus_stop,
        measurements::list_sensors,
        measurements::latest_values,
        measurements::list_measurements,
        measurements::realtime_get,
        measurements::realtime_post,
    ),
    components(schemas(
        HealthResponse,
        ModbusConfigView,
        ModbusStatusResponse,
        ReadOnceResponse,
        ReadOverrides,
        SchedulerState,
        WordOrder,
        ByteOrder,
        MeasurementRecord,
        SensorsResponse,
        RealtimeEntry,
        RealtimeSnapshot,
        RealtimeBody,
    )),
    tags(
        (name = "health"),
        (name = "modbus", description = "Scale poller control and on-demand reads"),
        (name = "measurements", description = "Stored readings")
    )
)]
struct ApiDoc;

pub fn openapi_json() -> serde_json::Value {
    serde_json::to_value(ApiDoc::openapi()).unwrap_or(serde_json::Value::Null)
}

async fn openapi_handler() -> Json<serde_json::Value> {
    Json(openapi_json())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_handler))
}
