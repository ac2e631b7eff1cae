pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use postgres::PgStore;

pub const ANALOG_KIND: &str = "analog";

/// One persisted reading. Field names are consumed by downstream reporting
/// and must stay stable.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow, utoipa::ToSchema,
)]
pub struct MeasurementRecord {
    pub ts: DateTime<Utc>,
    pub device_ip: String,
    pub endpoint: String,
    pub name: String,
    pub value: i32,
    pub raw_value: i32,
    pub is_nan: bool,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
}

impl MeasurementRecord {
    pub fn analog(
        ts: DateTime<Utc>,
        device_ip: impl Into<String>,
        endpoint: impl Into<String>,
        name: impl Into<String>,
        value: i32,
    ) -> Self {
        Self {
            ts,
            device_ip: device_ip.into(),
            endpoint: endpoint.into(),
            name: name.into(),
            value,
            raw_value: value,
            is_nan: false,
            kind: ANALOG_KIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeasurementQuery {
    pub name: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub endpoint: Option<String>,
    pub device_ip: Option<String>,
    pub limit: i64,
}

#[cfg(test)]
impl MeasurementQuery {
    pub fn matches(&self, record: &MeasurementRecord) -> bool {
        record.name == self.name
            && self.start.map_or(true, |start| record.ts >= start)
            && self.end.map_or(true, |end| record.ts <= end)
            && self
                .endpoint
                .as_deref()
                .map_or(true, |endpoint| record.endpoint == endpoint)
            && self
                .device_ip
                .as_deref()
                .map_or(true, |device_ip| record.device_ip == device_ip)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RealtimeFilter {
    pub names: Vec<String>,
    pub endpoint: Option<String>,
    pub device_ip: Option<String>,
}

#[cfg(test)]
impl RealtimeFilter {
    pub fn matches(&self, record: &MeasurementRecord) -> bool {
        (self.names.is_empty() || self.names.iter().any(|name| *name == record.name))
            && self
                .endpoint
                .as_deref()
                .map_or(true, |endpoint| record.endpoint == endpoint)
            && self
                .device_ip
                .as_deref()
                .map_or(true, |device_ip| record.device_ip == device_ip)
    }
}

/// Append-only destination for readings.
#[async_trait]
pub trait MeasurementSink: Send + Sync {
    async fn append(&self, record: &MeasurementRecord) -> Result<(), sqlx::Error>;
}

/// Lookup and aggregation over stored readings.
#[async_trait]
pub trait MeasurementReader: Send + Sync {
    /// Distinct non-empty sensor names, sorted.
    async fn sensor_names(&self, endpoint: Option<&str>) -> Result<Vec<String>, sqlx::Error>;

    /// Newest records first.
    async fn latest(&self, limit: i64) -> Result<Vec<MeasurementRecord>, sqlx::Error>;

    /// The newest `query.limit` matches, returned oldest first.
    async fn measurements(
        &self,
        query: &MeasurementQuery,
    ) -> Result<Vec<MeasurementRecord>, sqlx::Error>;

    /// Most recent record for every sensor name matching the filter.
    async fn latest_per_sensor(
        &self,
        filter: &RealtimeFilter,
    ) -> Result<Vec<MeasurementRecord>, sqlx::Error>;
}
