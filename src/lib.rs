// lib.rs

mod client;
mod config;
pub mod converter;
mod core;
mod crypto;
mod modbus_tcp;

pub use client::{SungrowClient, SungrowClientBuilder};
pub use config::{ClientConfig, ConfigError, RegisterRange};
pub use crate::core::{ExceptionCode, FrameError, FunctionCode, ReadRequest};
pub use crate::core::{MAX_READ_COUNT, MBAP_HEADER_LEN, READ_REQUEST_LEN};
pub use crypto::{CryptoEngine, CryptoError, CryptoHeader, BLOCK_LEN, CRYPTO_HEADER_LEN, KEY_LEN};
pub use modbus_tcp::{
    build_exception_response, build_read_request, build_read_response, parse_read_response,
    response_transaction_id, MIN_RESPONSE_LEN,
};

#[derive(Debug, thiserror::Error)]
pub enum SungrowError {
    #[error("Connection to {addr} failed: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Not connected to inverter")]
    NotConnected,

    #[error("Failed to send Modbus frame: {0}")]
    SendFailed(#[source] std::io::Error),

    #[error("Receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    #[error("Key exchange failed: {0}")]
    HandshakeFailed(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}
