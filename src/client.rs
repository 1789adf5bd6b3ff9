//! Blocking client for Sungrow inverters speaking encrypted Modbus-TCP.
//!
//! One request is in flight at a time: each read writes a frame and waits
//! for a single answer before returning. Without a configured read timeout
//! a silent device blocks the caller until the socket fails.
//!
//! ```rust,no_run
//! use sungrow_modbus::{converter, SungrowClient};
//!
//! let mut client = SungrowClient::builder()
//!     .host("192.168.1.249")
//!     .unit_id(1)
//!     .build()?;
//! client.connect()?;
//! let words = client.read_input_registers(5003, 2)?;
//! let daily_yield = converter::apply_scale(converter::to_u32(words[0], words[1]), 0.1);
//! println!("daily yield: {daily_yield} kWh");
//! # Ok::<(), sungrow_modbus::SungrowError>(())
//! ```

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::thread;

use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ConfigError, RegisterRange};
use crate::core::{FrameError, FunctionCode};
use crate::crypto::{CryptoEngine, CryptoError, KEY_LEN};
use crate::modbus_tcp::{
    build_read_request, parse_read_response, response_transaction_id, MIN_RESPONSE_LEN,
};
use crate::SungrowError;

/// Shortest key exchange answer that carries a public key.
const KEY_EXCHANGE_MIN_RESPONSE: usize = 25;

pub struct SungrowClientBuilder {
    host: Option<String>,
    port: Option<u16>,
    unit_id: Option<u8>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    handshake_delay_ms: Option<u64>,
}

impl SungrowClientBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    pub fn connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn read_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.read_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn handshake_delay_ms(mut self, delay_ms: u64) -> Self {
        self.handshake_delay_ms = Some(delay_ms);
        self
    }

    pub fn build(self) -> Result<SungrowClient, SungrowError> {
        let host = self
            .host
            .filter(|host| !host.is_empty())
            .ok_or(ConfigError::HostMissing)?;

        let mut config = ClientConfig::new(host);
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(unit_id) = self.unit_id {
            config.unit_id = unit_id;
        }
        if let Some(delay_ms) = self.handshake_delay_ms {
            config.handshake_delay_ms = delay_ms;
        }
        config.connect_timeout_ms = self.connect_timeout_ms;
        config.read_timeout_ms = self.read_timeout_ms;

        Ok(SungrowClient::new(config))
    }
}

pub struct SungrowClient {
    config: ClientConfig,
    stream: Option<TcpStream>,
    transaction_id: u16,
    crypto: CryptoEngine,
}

impl SungrowClient {
    pub fn builder() -> SungrowClientBuilder {
        SungrowClientBuilder {
            host: None,
            port: None,
            unit_id: None,
            connect_timeout_ms: None,
            read_timeout_ms: None,
            handshake_delay_ms: None,
        }
    }

    pub fn new(config: ClientConfig) -> Self {
        SungrowClient {
            config,
            stream: None,
            transaction_id: 0,
            crypto: CryptoEngine::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_enabled()
    }

    /// Open the TCP connection and attempt the key exchange.
    ///
    /// A failed key exchange is logged and leaves the connection usable
    /// with plaintext Modbus. Connecting again starts a fresh session.
    pub fn connect(&mut self) -> Result<(), SungrowError> {
        self.disconnect();

        let stream = self.open_stream()?;
        self.stream = Some(stream);
        info!(
            host = %self.config.host,
            port = self.config.port,
            "connected to sungrow inverter"
        );

        let delay = self.config.handshake_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        match self.perform_key_exchange() {
            Ok(()) => info!("sungrow encryption protocol initialized"),
            Err(e) => warn!(error = %e, "key exchange failed, falling back to standard modbus"),
        }
        Ok(())
    }

    /// Close the connection if open. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            info!(host = %self.config.host, "disconnected from inverter");
        }
        self.transaction_id = 0;
        self.crypto = CryptoEngine::new();
    }

    /// Run the key exchange on the open connection.
    ///
    /// Fails without touching the wire when a session key is already set.
    pub fn perform_key_exchange(&mut self) -> Result<(), SungrowError> {
        if self.crypto.is_enabled() {
            return Err(CryptoError::SessionEstablished.into());
        }
        let buffer_len = self.config.recv_buffer_len.max(KEY_EXCHANGE_MIN_RESPONSE);
        let stream = self.stream.as_mut().ok_or(SungrowError::NotConnected)?;

        let command = CryptoEngine::key_exchange_command();
        stream
            .write_all(&command)
            .map_err(|e| SungrowError::HandshakeFailed(format!("send failed: {e}")))?;
        debug!(frame = %hex::encode(command), "KEY_CMD");

        let mut response = vec![0u8; buffer_len];
        let len = stream
            .read(&mut response)
            .map_err(|e| SungrowError::HandshakeFailed(format!("receive failed: {e}")))?;
        response.truncate(len);
        debug!(frame = %hex::encode(&response), "KEY_RESP");

        if len < KEY_EXCHANGE_MIN_RESPONSE {
            return Err(SungrowError::HandshakeFailed(format!(
                "invalid key exchange response length: {len}"
            )));
        }

        let public_key = &response[len - KEY_LEN..];
        self.crypto.initialize_session(public_key)?;
        Ok(())
    }

    pub fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, SungrowError> {
        self.read_registers(FunctionCode::ReadInputRegisters, address, count)
    }

    pub fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, SungrowError> {
        self.read_registers(FunctionCode::ReadHoldingRegisters, address, count)
    }

    pub fn read_range(&mut self, range: &RegisterRange) -> Result<Vec<u16>, SungrowError> {
        self.read_registers(range.function_code, range.address, range.count)
    }

    fn read_registers(
        &mut self,
        function_code: FunctionCode,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, SungrowError> {
        if self.stream.is_none() {
            return Err(SungrowError::NotConnected);
        }

        let transaction_id = self.next_transaction_id();
        let request = build_read_request(
            transaction_id,
            self.config.unit_id,
            function_code,
            address,
            count,
        );
        if !self.crypto.is_enabled() {
            debug!("encryption not available, using standard modbus");
        }
        let frame = self.crypto.encrypt(&request);
        self.send_frame(&frame)?;

        let raw = self.receive_frame()?;
        let response = self.crypto.decrypt(&raw);

        if let Some(received) = response_transaction_id(&response) {
            if received != transaction_id {
                return Err(FrameError::TransactionMismatch {
                    expected: transaction_id,
                    received,
                }
                .into());
            }
        }
        Ok(parse_read_response(&response)?)
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), SungrowError> {
        let stream = self.stream.as_mut().ok_or(SungrowError::NotConnected)?;
        stream.write_all(frame).map_err(SungrowError::SendFailed)?;
        debug!(frame = %hex::encode(frame), "SEND");
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Vec<u8>, SungrowError> {
        let stream = self.stream.as_mut().ok_or(SungrowError::NotConnected)?;
        let mut response = vec![0u8; self.config.recv_buffer_len.max(MIN_RESPONSE_LEN)];
        let len = stream.read(&mut response).map_err(SungrowError::ReceiveFailed)?;
        response.truncate(len);
        if len == 0 {
            debug!("peer sent no data");
        } else {
            debug!(frame = %hex::encode(&response), "RECV");
        }
        Ok(response)
    }

    fn open_stream(&self) -> Result<TcpStream, SungrowError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let target = (self.config.host.as_str(), self.config.port);

        let stream = match self.config.connect_timeout() {
            None => TcpStream::connect(target).map_err(|e| connection_error(&addr, e))?,
            Some(timeout) => {
                let mut last_error =
                    io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no address");
                let mut connected = None;
                for socket_addr in target.to_socket_addrs().map_err(|e| connection_error(&addr, e))? {
                    match TcpStream::connect_timeout(&socket_addr, timeout) {
                        Ok(stream) => {
                            connected = Some(stream);
                            break;
                        }
                        Err(e) => last_error = e,
                    }
                }
                connected.ok_or_else(|| connection_error(&addr, last_error))?
            }
        };

        stream
            .set_read_timeout(self.config.read_timeout())
            .map_err(|e| connection_error(&addr, e))?;
        Ok(stream)
    }
}

impl Drop for SungrowClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn connection_error(addr: &str, source: io::Error) -> SungrowError {
    SungrowError::Connection {
        addr: addr.to_string(),
        source,
    }
}
