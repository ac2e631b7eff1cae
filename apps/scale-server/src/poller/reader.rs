use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::PollerConfig;
use crate::modbus::{ByteOrder, DeviceError, RawRegisterPair, SharedDevice, WordOrder};
use crate::store::{MeasurementRecord, MeasurementSink};

/// Per-call overrides for a single read. Unset fields use the process
/// configuration.
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema)]
pub struct ReadOverrides {
    pub address: Option<u16>,
    pub unit: Option<u8>,
    pub word_order: Option<WordOrder>,
    pub byte_order: Option<ByteOrder>,
    #[serde(default)]
    pub insert: bool,
}

impl ReadOverrides {
    pub fn apply(&self, base: &PollerConfig) -> PollerConfig {
        PollerConfig {
            address: self.address.unwrap_or(base.address),
            unit_id: self.unit.unwrap_or(base.unit_id),
            word_order: self.word_order.unwrap_or(base.word_order),
            byte_order: self.byte_order.unwrap_or(base.byte_order),
            ..base.clone()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReadOnceError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("persist error: {0}")]
    Persist(#[source] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct OnceReading {
    pub registers: RawRegisterPair,
    pub value: i32,
    pub record: MeasurementRecord,
    pub inserted: bool,
    pub effective: PollerConfig,
}

/// Single synchronous reads outside the poll schedule. Shares the device
/// lock with the scheduler but never touches its status.
pub struct OnDemandReader {
    config: Arc<PollerConfig>,
    device: SharedDevice,
    sink: Arc<dyn MeasurementSink>,
}

impl OnDemandReader {
    pub fn new(
        config: Arc<PollerConfig>,
        device: SharedDevice,
        sink: Arc<dyn MeasurementSink>,
    ) -> Self {
        Self {
            config,
            device,
            sink,
        }
    }

    pub async fn read_once(&self, overrides: &ReadOverrides) -> Result<OnceReading, ReadOnceError> {
        let effective = overrides.apply(&self.config);
        let registers = {
            let mut device = self.device.lock().await;
            device
                .read_register_pair(effective.address, effective.unit_id)
                .await?
        };
        let value = registers.decode(effective.byte_order, effective.word_order);
        let record = MeasurementRecord::analog(
            Utc::now(),
            &effective.host,
            &effective.endpoint_tag,
            &effective.sensor_name,
            value,
        );
        tracing::info!(
            address = effective.address,
            unit_id = effective.unit_id,
            r0 = registers.r0,
            r1 = registers.r1,
            value,
            insert = overrides.insert,
            "modbus on-demand read"
        );

        if overrides.insert {
            self.sink
                .append(&record)
                .await
                .map_err(ReadOnceError::Persist)?;
        }

        Ok(OnceReading {
            registers,
            value,
            record,
            inserted: overrides.insert,
            effective,
        })
    }
}
