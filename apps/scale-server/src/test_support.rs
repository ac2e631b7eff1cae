use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::{PollerConfig, ServerConfig};
use crate::modbus::{Connector, RegisterLink};
use crate::state::AppState;
use crate::store::{
    MeasurementQuery, MeasurementReader, MeasurementRecord, MeasurementSink, RealtimeFilter,
};

pub fn test_config() -> ServerConfig {
    ServerConfig {
        database_url: "postgresql://postgres@localhost/postgres".to_string(),
        db_pool_size: 1,
        cors_origins: vec!["http://localhost:5173".to_string()],
        poller: PollerConfig {
            enabled: true,
            host: "scale.local".to_string(),
            ..PollerConfig::default()
        },
    }
}

pub fn test_state_with(config: ServerConfig) -> (AppState, FakeDevice, Arc<MemoryStore>) {
    let device = FakeDevice::new(0x0001, 0x0000);
    let store = Arc::new(MemoryStore::default());
    let state = AppState::new(config, store.clone(), store.clone(), device.connector());
    (state, device, store)
}

pub fn test_state() -> (AppState, FakeDevice, Arc<MemoryStore>) {
    test_state_with(test_config())
}

#[derive(Default)]
struct FakeDeviceInner {
    registers: Mutex<(u16, u16)>,
    offline: AtomicBool,
    short_response: AtomicBool,
    counting: AtomicBool,
    tick: AtomicU32,
    read_delay_ms: AtomicU64,
    connects: AtomicUsize,
    requests: Mutex<Vec<(u8, u16, u16)>>,
}

/// In-process stand-in for a Modbus device.
#[derive(Clone, Default)]
pub struct FakeDevice {
    inner: Arc<FakeDeviceInner>,
}

impl FakeDevice {
    pub fn new(r0: u16, r1: u16) -> Self {
        let device = Self::default();
        device.set_registers(r0, r1);
        device
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn set_registers(&self, r0: u16, r1: u16) {
        *self.inner.registers.lock().unwrap() = (r0, r1);
    }

    pub fn set_online(&self, online: bool) {
        self.inner.offline.store(!online, Ordering::SeqCst);
    }

    pub fn set_short_response(&self, short: bool) {
        self.inner.short_response.store(short, Ordering::SeqCst);
    }

    /// Each read returns `(n, n)` for an increasing `n`, sampling the two
    /// words across a yield point.
    pub fn set_counting(&self, counting: bool) {
        self.inner.counting.store(counting, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.inner
            .read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(u8, u16, u16)> {
        self.inner.requests.lock().unwrap().clone()
    }

    fn is_offline(&self) -> bool {
        self.inner.offline.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeDevice {
    async fn connect(&self, _host: &str, _port: u16) -> io::Result<Box<dyn RegisterLink>> {
        if self.is_offline() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ));
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeLink {
            device: self.clone(),
        }))
    }
}

struct FakeLink {
    device: FakeDevice,
}

#[async_trait]
impl RegisterLink for FakeLink {
    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> io::Result<Vec<u16>> {
        let inner = &self.device.inner;
        let delay = inner.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.device.is_offline() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        inner
            .requests
            .lock()
            .unwrap()
            .push((unit_id, address, count));

        if inner.counting.load(Ordering::SeqCst) {
            let r0 = inner.tick.fetch_add(1, Ordering::SeqCst) as u16;
            tokio::task::yield_now().await;
            let r1 = inner.tick.load(Ordering::SeqCst).wrapping_sub(1) as u16;
            return Ok(vec![r0, r1]);
        }

        let (r0, r1) = *inner.registers.lock().unwrap();
        if inner.short_response.load(Ordering::SeqCst) {
            return Ok(vec![r0]);
        }
        Ok(vec![r0, r1])
    }
}

/// Measurement store kept in memory with the same query semantics as
/// [`crate::store::PgStore`].
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<MeasurementRecord>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn with_records(records: Vec<MeasurementRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            failing: AtomicBool::new(false),
        }
    }

    pub fn records(&self) -> Vec<MeasurementRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), sqlx::Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(())
    }

    fn newest_first(&self) -> Vec<MeasurementRecord> {
        let mut records = self.records();
        records.sort_by(|a, b| b.ts.cmp(&a.ts));
        records
    }
}

#[async_trait]
impl MeasurementSink for MemoryStore {
    async fn append(&self, record: &MeasurementRecord) -> Result<(), sqlx::Error> {
        self.check()?;
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl MeasurementReader for MemoryStore {
    async fn sensor_names(&self, endpoint: Option<&str>) -> Result<Vec<String>, sqlx::Error> {
        self.check()?;
        let names: HashSet<String> = self
            .records()
            .into_iter()
            .filter(|record| !record.name.is_empty())
            .filter(|record| endpoint.map_or(true, |endpoint| record.endpoint == endpoint))
            .map(|record| record.name)
            .collect();
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        Ok(names)
    }

    async fn latest(&self, limit: i64) -> Result<Vec<MeasurementRecord>, sqlx::Error> {
        self.check()?;
        let mut records = self.newest_first();
        records.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(records)
    }

    async fn measurements(
        &self,
        query: &MeasurementQuery,
    ) -> Result<Vec<MeasurementRecord>, sqlx::Error> {
        self.check()?;
        let mut records: Vec<MeasurementRecord> = self
            .newest_first()
            .into_iter()
            .filter(|record| query.matches(record))
            .take(usize::try_from(query.limit).unwrap_or(0))
            .collect();
        records.reverse();
        Ok(records)
    }

    async fn latest_per_sensor(
        &self,
        filter: &RealtimeFilter,
    ) -> Result<Vec<MeasurementRecord>, sqlx::Error> {
        self.check()?;
        let mut latest: HashMap<String, MeasurementRecord> = HashMap::new();
        for record in self.newest_first() {
            if record.name.is_empty() || !filter.matches(&record) {
                continue;
            }
            latest.entry(record.name.clone()).or_insert(record);
        }
        let mut records: Vec<MeasurementRecord> = latest.into_values().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

/// Minimal Modbus TCP server answering "read holding registers" from a
/// fixed register map. Unknown addresses get an "illegal data address"
/// exception.
pub struct MockModbusServer {
    port: u16,
    unit_ids: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl MockModbusServer {
    pub async fn start(registers: &[(u16, u16)]) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let registers: Arc<HashMap<u16, u16>> = Arc::new(registers.iter().copied().collect());
        let unit_ids = Arc::new(Mutex::new(Vec::new()));

        let seen = unit_ids.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let registers = registers.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let _ = serve_client(stream, registers, seen).await;
                });
            }
        });

        Ok(Self {
            port,
            unit_ids,
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn unit_ids(&self) -> Vec<u8> {
        self.unit_ids.lock().unwrap().clone()
    }
}

impl Drop for MockModbusServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_client(
    mut stream: TcpStream,
    registers: Arc<HashMap<u16, u16>>,
    unit_ids: Arc<Mutex<Vec<u8>>>,
) -> io::Result<()> {
    loop {
        // MBAP header (7) + function (1) + address (2) + quantity (2).
        let mut request = [0u8; 12];
        stream.read_exact(&mut request).await?;
        let unit_id = request[6];
        let function = request[7];
        let address = u16::from_be_bytes([request[8], request[9]]);
        let count = u16::from_be_bytes([request[10], request[11]]);
        unit_ids.lock().unwrap().push(unit_id);

        let words: Option<Vec<u16>> = if function == 0x03 {
            (0..count)
                .map(|offset| {
                    address
                        .checked_add(offset)
                        .and_then(|register| registers.get(&register).copied())
                })
                .collect()
        } else {
            None
        };
        let pdu = match words {
            Some(words) => {
                let mut pdu = vec![function, (words.len() * 2) as u8];
                for word in words {
                    pdu.extend_from_slice(&word.to_be_bytes());
                }
                pdu
            }
            None => vec![function | 0x80, 0x02],
        };

        let mut frame = Vec::with_capacity(7 + pdu.len());
        frame.extend_from_slice(&request[0..2]);
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
        frame.push(unit_id);
        frame.extend_from_slice(&pdu);
        stream.write_all(&frame).await?;
    }
}
