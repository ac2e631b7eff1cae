use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::modbus::{ByteOrder, WordOrder};

pub const MIN_POLL_INTERVAL_MS: u64 = 200;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_IO_TIMEOUT_MS: u64 = 3000;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 5000;
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

fn setup_config_path() -> Option<PathBuf> {
    std::env::var("SCALE_SETUP_CONFIG_PATH")
        .ok()
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

/// Reads the optional JSON setup file. Keys are the environment variable
/// names in lower case (`modbus_host`, `database_url`, ...).
fn load_setup_config_overrides() -> HashMap<String, String> {
    match setup_config_path() {
        Some(path) => read_setup_overrides(&path),
        None => HashMap::new(),
    }
}

fn read_setup_overrides(path: &Path) -> HashMap<String, String> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return HashMap::new();
        }
    };
    match parse_setup_overrides(&contents) {
        Ok(overrides) => overrides,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            HashMap::new()
        }
    }
}

fn parse_setup_overrides(contents: &str) -> Result<HashMap<String, String>> {
    let object: serde_json::Map<String, JsonValue> =
        serde_json::from_str(contents).context("setup config must be a JSON object")?;
    Ok(object
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                JsonValue::String(value) => value,
                JsonValue::Number(value) => value.to_string(),
                JsonValue::Bool(value) => value.to_string(),
                _ => return None,
            };
            Some((key.to_ascii_uppercase(), value))
        })
        .collect())
}

/// Environment first, then the setup file. Blank values count as unset.
struct Settings<F> {
    env: F,
    overrides: HashMap<String, String>,
}

impl<F> Settings<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.env)(key)
            .or_else(|| self.overrides.get(key).cloned())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn number<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|value| value.parse::<T>().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|value| {
                matches!(
                    value.to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(false)
    }
}

/// Static description of the single device the poller reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub address: u16,
    pub interval: Duration,
    pub sensor_name: String,
    pub endpoint_tag: String,
    pub word_order: WordOrder,
    pub byte_order: ByteOrder,
    pub debug: bool,
    pub io_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            address: 0,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            sensor_name: "PESO_BASCULA".to_string(),
            endpoint_tag: "analogInputs".to_string(),
            word_order: WordOrder::Big,
            byte_order: ByteOrder::Big,
            debug: false,
            io_timeout: Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
        }
    }
}

impl PollerConfig {
    fn from_settings<F>(settings: &Settings<F>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let interval_ms = settings.number("MODBUS_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS);
        let word_order = settings
            .get("MODBUS_WORD_ORDER")
            .map(|value| value.parse::<WordOrder>())
            .transpose()
            .context("MODBUS_WORD_ORDER")?
            .unwrap_or_default();
        let byte_order = settings
            .get("MODBUS_BYTE_ORDER")
            .map(|value| value.parse::<ByteOrder>())
            .transpose()
            .context("MODBUS_BYTE_ORDER")?
            .unwrap_or_default();

        Ok(Self {
            enabled: settings.flag("MODBUS_ENABLED"),
            host: settings.string("MODBUS_HOST", &defaults.host),
            port: settings.number("MODBUS_PORT", defaults.port),
            unit_id: settings.number("MODBUS_UNIT_ID", defaults.unit_id),
            address: settings.number("MODBUS_ADDRESS", defaults.address),
            interval: clamp_interval(Duration::from_millis(interval_ms)),
            sensor_name: settings.string("MODBUS_SENSOR_NAME", &defaults.sensor_name),
            endpoint_tag: settings.string("MODBUS_ENDPOINT", &defaults.endpoint_tag),
            word_order,
            byte_order,
            debug: settings.flag("MODBUS_DEBUG"),
            io_timeout: Duration::from_millis(
                settings
                    .number("MODBUS_IO_TIMEOUT_MS", DEFAULT_IO_TIMEOUT_MS)
                    .max(1),
            ),
            stop_timeout: Duration::from_millis(
                settings
                    .number("MODBUS_STOP_TIMEOUT_MS", DEFAULT_STOP_TIMEOUT_MS)
                    .max(1),
            ),
        })
    }
}

pub fn clamp_interval(interval: Duration) -> Duration {
    interval.max(Duration::from_millis(MIN_POLL_INTERVAL_MS))
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub db_pool_size: u32,
    pub cors_origins: Vec<String>,
    pub poller: PollerConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let overrides = load_setup_config_overrides();
        Self::from_lookup(|key| std::env::var(key).ok(), overrides)
    }

    fn from_lookup<F>(env: F, overrides: HashMap<String, String>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = Settings { env, overrides };
        let database_url = settings
            .get("SCALE_DATABASE_URL")
            .or_else(|| settings.get("DATABASE_URL"))
            .context("SCALE_DATABASE_URL or DATABASE_URL is required (or present as database_url in the setup config)")?;
        let cors_origins = settings
            .string("SCALE_CORS_ORIGINS", DEFAULT_CORS_ORIGIN)
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            database_url,
            db_pool_size: settings.number("SCALE_DB_POOL_SIZE", 10u32).max(1),
            cors_origins,
            poller: PollerConfig::from_settings(&settings)?,
        })
    }
}
