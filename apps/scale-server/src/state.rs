use crate::config::ServerConfig;
use crate::modbus::{Connector, DeviceConnection};
use crate::poller::{OnDemandReader, PollScheduler, StatusReporter};
use crate::store::{MeasurementReader, MeasurementSink};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub measurements: Arc<dyn MeasurementReader>,
    pub status: Arc<StatusReporter>,
    pub poller: Arc<PollScheduler>,
    pub reader: Arc<OnDemandReader>,
}

impl AppState {
    /// Wires one shared device connection into both the poll loop and the
    /// on-demand reader.
    pub fn new(
        config: ServerConfig,
        sink: Arc<dyn MeasurementSink>,
        measurements: Arc<dyn MeasurementReader>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let poller_config = Arc::new(config.poller.clone());
        let device = DeviceConnection::new(
            poller_config.host.clone(),
            poller_config.port,
            poller_config.io_timeout,
            connector,
        )
        .shared();
        let status = Arc::new(StatusReporter::new());
        let poller = Arc::new(PollScheduler::new(
            poller_config.clone(),
            device.clone(),
            sink.clone(),
            status.clone(),
        ));
        let reader = Arc::new(OnDemandReader::new(poller_config, device, sink));

        Self {
            config,
            measurements,
            status,
            poller,
            reader,
        }
    }
}
