use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::prelude::{Reader, Slave, SlaveContext};

use super::RawRegisterPair;

const REGISTER_PAIR_LEN: u16 = 2;

/// Device connection shared by the poll loop and on-demand reads. The lock is
/// held for a whole request/response exchange.
pub type SharedDevice = Arc<Mutex<DeviceConnection>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("connection error: {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },
    #[error("read error: {0}")]
    Read(String),
}

#[cfg(test)]
impl DeviceError {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// An established transport able to read holding registers.
#[async_trait]
pub trait RegisterLink: Send {
    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> io::Result<Vec<u16>>;
}

/// Opens [`RegisterLink`]s to a device address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> io::Result<Box<dyn RegisterLink>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

struct TcpLink {
    ctx: tokio_modbus::client::Context,
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<Box<dyn RegisterLink>> {
        let socket_addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {host}:{port}"),
                )
            })?;
        let ctx = tokio_modbus::client::tcp::connect_slave(socket_addr, Slave(1)).await?;
        Ok(Box::new(TcpLink { ctx }))
    }
}

#[async_trait]
impl RegisterLink for TcpLink {
    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> io::Result<Vec<u16>> {
        self.ctx.set_slave(Slave(unit_id));
        self.ctx.read_holding_registers(address, count).await
    }
}

pub struct DeviceConnection {
    host: String,
    port: u16,
    io_timeout: Duration,
    connector: Arc<dyn Connector>,
    link: Option<Box<dyn RegisterLink>>,
}

impl DeviceConnection {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        io_timeout: Duration,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            io_timeout,
            connector,
            link: None,
        }
    }

    pub fn shared(self) -> SharedDevice {
        Arc::new(Mutex::new(self))
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Opens the link if it is not already open.
    pub async fn connect(&mut self) -> Result<(), DeviceError> {
        if self.link.is_some() {
            return Ok(());
        }
        let attempt = timeout(self.io_timeout, self.connector.connect(&self.host, self.port)).await;
        match attempt {
            Ok(Ok(link)) => {
                tracing::info!(endpoint = %self.endpoint(), "modbus device connected");
                self.link = Some(link);
                Ok(())
            }
            Ok(Err(err)) => Err(DeviceError::Connection {
                endpoint: self.endpoint(),
                reason: err.to_string(),
            }),
            Err(_) => Err(DeviceError::Connection {
                endpoint: self.endpoint(),
                reason: format!("timed out after {} ms", self.io_timeout.as_millis()),
            }),
        }
    }

    /// Reads two consecutive holding registers starting at `address`,
    /// connecting first if needed. Any read failure closes the link so the
    /// next call starts from a fresh connection.
    pub async fn read_register_pair(
        &mut self,
        address: u16,
        unit_id: u8,
    ) -> Result<RawRegisterPair, DeviceError> {
        self.connect().await?;
        let attempt = {
            let Some(link) = self.link.as_mut() else {
                return Err(DeviceError::Connection {
                    endpoint: self.endpoint(),
                    reason: "link closed".to_string(),
                });
            };
            timeout(
                self.io_timeout,
                link.read_holding_registers(unit_id, address, REGISTER_PAIR_LEN),
            )
            .await
        };

        let outcome = match attempt {
            Ok(Ok(words)) => match words.as_slice() {
                [r0, r1, ..] => Ok(RawRegisterPair { r0: *r0, r1: *r1 }),
                _ => Err(DeviceError::Read(format!(
                    "expected {REGISTER_PAIR_LEN} registers at address {address}, got {}",
                    words.len()
                ))),
            },
            Ok(Err(err)) => Err(DeviceError::Read(err.to_string())),
            Err(_) => Err(DeviceError::Read(format!(
                "timed out after {} ms",
                self.io_timeout.as_millis()
            ))),
        };
        if outcome.is_err() {
            self.close();
        }
        outcome
    }

    pub fn close(&mut self) {
        if self.link.take().is_some() {
            tracing::info!(endpoint = %self.endpoint(), "modbus device connection closed");
        }
    }
}
