use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{FunctionCode, MAX_READ_COUNT};
use crate::modbus_tcp::MIN_RESPONSE_LEN;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Host not set")]
    HostMissing,

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Receive buffer too small: {0} < {MIN_RESPONSE_LEN}")]
    RecvBufferTooSmall(usize),

    #[error("Invalid register range: address {address}, count {count}")]
    InvalidRange { address: u16, count: u16 },
}

/// Connection settings for one inverter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// `None` leaves the OS connect timeout in place.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// `None` blocks on reads until the device answers or the socket fails.
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    /// Pause between connecting and the key exchange.
    #[serde(default = "default_handshake_delay")]
    pub handshake_delay_ms: u64,
    #[serde(default = "default_recv_buffer_len")]
    pub recv_buffer_len: usize,
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_handshake_delay() -> u64 {
    3000
}

fn default_recv_buffer_len() -> usize {
    256
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        ClientConfig {
            host: host.into(),
            port: default_port(),
            unit_id: default_unit_id(),
            connect_timeout_ms: None,
            read_timeout_ms: None,
            handshake_delay_ms: default_handshake_delay(),
            recv_buffer_len: default_recv_buffer_len(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_json::from_str(json)?;
        if config.host.is_empty() {
            return Err(ConfigError::HostMissing);
        }
        if config.recv_buffer_len < MIN_RESPONSE_LEN {
            return Err(ConfigError::RecvBufferTooSmall(config.recv_buffer_len));
        }
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn handshake_delay(&self) -> Duration {
        Duration::from_millis(self.handshake_delay_ms)
    }
}

/// One entry of a register table: where to read and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRange {
    pub address: u16,
    pub count: u16,
    pub function_code: FunctionCode,
}

impl RegisterRange {
    pub fn new(address: u16, count: u16, function_code: FunctionCode) -> Result<Self, ConfigError> {
        let end = address as u32 + count as u32;
        if count == 0 || count > MAX_READ_COUNT || end > 0x1_0000 {
            return Err(ConfigError::InvalidRange { address, count });
        }
        Ok(RegisterRange {
            address,
            count,
            function_code,
        })
    }
}
