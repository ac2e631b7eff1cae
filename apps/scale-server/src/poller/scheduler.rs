use chrono::Utc;
use serde::Serialize;
use std::future::IntoFuture;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::status::StatusReporter;
use crate::config::PollerConfig;
use crate::modbus::{DeviceError, SharedDevice};
use crate::store::{MeasurementRecord, MeasurementSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
    Stopping,
}

#[derive(Debug, thiserror::Error)]
enum CycleError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("persist error: {0}")]
    Persist(sqlx::Error),
}

/// One connect → read → decode → persist pass.
#[derive(Clone)]
struct PollCycle {
    config: Arc<PollerConfig>,
    device: SharedDevice,
    sink: Arc<dyn MeasurementSink>,
    status: Arc<StatusReporter>,
}

impl PollCycle {
    async fn run(&self) {
        match self.poll_once().await {
            Ok(record) => self.status.record_success(record.value, record.ts),
            Err(err) => {
                warn!(
                    endpoint = %self.config.host,
                    sensor = %self.config.sensor_name,
                    error = %err,
                    "modbus poll cycle failed"
                );
                self.status.record_failure(err.to_string());
            }
        }
    }

    async fn poll_once(&self) -> Result<MeasurementRecord, CycleError> {
        let config = &self.config;
        let pair = {
            let mut device = self.device.lock().await;
            device
                .read_register_pair(config.address, config.unit_id)
                .await?
        };
        let value = pair.decode(config.byte_order, config.word_order);
        if config.debug {
            info!(
                address = config.address,
                unit_id = config.unit_id,
                r0 = pair.r0,
                r1 = pair.r1,
                value,
                "modbus read"
            );
        }
        let record = MeasurementRecord::analog(
            Utc::now(),
            &config.host,
            &config.endpoint_tag,
            &config.sensor_name,
            value,
        );
        self.sink
            .append(&record)
            .await
            .map_err(CycleError::Persist)?;
        Ok(record)
    }
}

/// Owned handle to a running poll loop.
struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    fn spawn(cycle: PollCycle, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            info!(
                endpoint = %cycle.config.host,
                interval_ms = interval.as_millis() as u64,
                "modbus poller started"
            );
            loop {
                if token.is_cancelled() {
                    break;
                }
                cycle.run().await;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!(endpoint = %cycle.config.host, "modbus poller stopped");
        });
        Self { cancel, task }
    }

    fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals cancellation and waits for the loop until `deadline`. Returns
    /// false when the loop had to be aborted. Either way the task is gone
    /// (and has released the device) when this returns.
    async fn stop_until(mut self, deadline: Instant) -> bool {
        self.cancel.cancel();
        match timeout_at(deadline, &mut self.task).await {
            Ok(_) => true,
            Err(_) => {
                self.task.abort();
                let _ = (&mut self.task).await;
                false
            }
        }
    }
}

/// Runs the background poll loop for the configured device.
pub struct PollScheduler {
    config: Arc<PollerConfig>,
    device: SharedDevice,
    sink: Arc<dyn MeasurementSink>,
    status: Arc<StatusReporter>,
    state: StdMutex<SchedulerState>,
    handle: Mutex<Option<PollerHandle>>,
}

impl PollScheduler {
    pub fn new(
        config: Arc<PollerConfig>,
        device: SharedDevice,
        sink: Arc<dyn MeasurementSink>,
        status: Arc<StatusReporter>,
    ) -> Self {
        Self {
            config,
            device,
            sink,
            status,
            state: StdMutex::new(SchedulerState::Stopped),
            handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: SchedulerState) {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = next;
    }

    /// Spawns the loop. Returns false if it was already running.
    pub async fn start(&self) -> bool {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|running| !running.is_finished()) {
            return false;
        }
        let cycle = PollCycle {
            config: self.config.clone(),
            device: self.device.clone(),
            sink: self.sink.clone(),
            status: self.status.clone(),
        };
        *handle = Some(PollerHandle::spawn(cycle, self.config.interval));
        self.set_state(SchedulerState::Running);
        self.status.set_running(true);
        true
    }

    /// Cancels the loop, waits at most `stop_timeout` for it and closes the
    /// device connection. Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        let mut handle = self.handle.lock().await;
        let Some(running) = handle.take() else {
            return false;
        };
        self.set_state(SchedulerState::Stopping);
        let deadline = Instant::now() + self.config.stop_timeout;

        if !running.stop_until(deadline).await {
            warn!(
                timeout_ms = self.config.stop_timeout.as_millis() as u64,
                "modbus poller did not stop in time; aborted"
            );
        }
        let device = match self.device.try_lock() {
            Ok(device) => Some(device),
            Err(_) => timeout_at(deadline, self.device.lock()).await.ok(),
        };
        match device {
            Some(mut device) => device.close(),
            None => warn!("modbus device busy during shutdown; connection not closed"),
        }

        self.set_state(SchedulerState::Stopped);
        self.status.set_running(false);
        true
    }

    /// Drives `work` to completion, then stops the loop whatever `work`
    /// returned.
    pub async fn stop_after<F: IntoFuture>(&self, work: F) -> F::Output {
        let output = work.await;
        self.stop().await;
        output
    }
}
