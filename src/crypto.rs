//! Vendor encryption layer wrapped around Modbus-TCP frames.
//!
//! The inverter answers a fixed key-exchange read with a 16 byte public key.
//! The session key is that key XOR a device-private constant and drives
//! AES-128 in ECB mode with manual zero padding.
//!
//! Requests travel as `[CryptoHeader][ciphertext]`. Responses keep their
//! 6 byte MBAP header in plaintext and encrypt everything after it.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::{read_u16, MBAP_HEADER_LEN};

pub const BLOCK_LEN: usize = 16;
pub const KEY_LEN: usize = 16;
pub const CRYPTO_HEADER_LEN: usize = 4;

const DEVICE_PRIVATE_KEY: [u8; KEY_LEN] = *b"Grow#0*2Sun68CbE";

/// Read of 8 words at 0x0ae7 from unit 0xf7, transaction id 0x6868.
const KEY_EXCHANGE_COMMAND: [u8; 12] = [
    0x68, 0x68, 0x00, 0x00, 0x00, 0x06, 0xf7, 0x04, 0x0a, 0xe7, 0x00, 0x08,
];

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key size: {0} < 16")]
    InvalidKeyMaterial(usize),

    #[error("Failed to initialize AES cipher")]
    CryptoInitFailed,

    #[error("Session key already established")]
    SessionEstablished,

    #[error("Crypto header too short: {0} bytes")]
    HeaderTooShort(usize),

    #[error("Crypto header mismatch: {plaintext_len} + {padding_len} != {ciphertext_len}")]
    HeaderMismatch {
        plaintext_len: u16,
        padding_len: u8,
        ciphertext_len: usize,
    },
}

/// Header prefixed to every encrypted request payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CryptoHeader {
    pub plaintext_len: u16,
    pub padding_len: u8,
}

impl CryptoHeader {
    pub fn to_bytes(self) -> [u8; CRYPTO_HEADER_LEN] {
        [
            (self.plaintext_len >> 8) as u8,
            self.plaintext_len as u8,
            0x00,
            self.padding_len,
        ]
    }

    pub fn parse(data: &[u8]) -> Result<CryptoHeader, CryptoError> {
        if data.len() < CRYPTO_HEADER_LEN {
            return Err(CryptoError::HeaderTooShort(data.len()));
        }
        Ok(CryptoHeader {
            plaintext_len: read_u16(data, 0),
            padding_len: data[3],
        })
    }

    /// Check the header against the ciphertext that follows it.
    pub fn reconcile(&self, ciphertext_len: usize) -> Result<(), CryptoError> {
        let declared = self.plaintext_len as usize + self.padding_len as usize;
        if declared != ciphertext_len || ciphertext_len % BLOCK_LEN != 0 {
            return Err(CryptoError::HeaderMismatch {
                plaintext_len: self.plaintext_len,
                padding_len: self.padding_len,
                ciphertext_len,
            });
        }
        Ok(())
    }
}

pub struct CryptoEngine {
    cipher: Option<Aes128>,
}

impl Default for CryptoEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoEngine {
    pub fn new() -> Self {
        CryptoEngine { cipher: None }
    }

    pub fn key_exchange_command() -> [u8; 12] {
        KEY_EXCHANGE_COMMAND
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Derive the session key from the peer public key and enable encryption.
    pub fn initialize_session(&mut self, public_key: &[u8]) -> Result<(), CryptoError> {
        if self.cipher.is_some() {
            return Err(CryptoError::SessionEstablished);
        }
        if public_key.len() < KEY_LEN {
            return Err(CryptoError::InvalidKeyMaterial(public_key.len()));
        }

        let key = derive_key(public_key);
        debug!(public_key = %hex::encode(&public_key[..KEY_LEN]), "key derivation");

        let cipher = Aes128::new_from_slice(&key).map_err(|_| CryptoError::CryptoInitFailed)?;
        self.cipher = Some(cipher);
        info!("sungrow encryption initialized");
        Ok(())
    }

    /// Encrypt an outgoing frame as `[CryptoHeader][ciphertext]`.
    ///
    /// Returns the frame unchanged when no session is established, or when
    /// its length cannot be described by the header.
    pub fn encrypt(&self, frame: &[u8]) -> Vec<u8> {
        let Some(cipher) = &self.cipher else {
            return frame.to_vec();
        };
        let Ok(plaintext_len) = u16::try_from(frame.len()) else {
            warn!(len = frame.len(), "frame too long for crypto header, sending plaintext");
            return frame.to_vec();
        };

        let mut padded = pad_to_block(frame);
        let padding_len = (padded.len() - frame.len()) as u8;
        encrypt_blocks(cipher, &mut padded);

        let header = CryptoHeader {
            plaintext_len,
            padding_len,
        };
        let mut result = Vec::with_capacity(CRYPTO_HEADER_LEN + padded.len());
        result.extend_from_slice(&header.to_bytes());
        result.extend_from_slice(&padded);

        debug!(from = frame.len(), to = result.len(), "frame encrypted");
        result
    }

    /// Decrypt an incoming response whose MBAP header is sent in plaintext.
    ///
    /// Trailing zero bytes are stripped as padding, but never below the
    /// length the MBAP header declares.
    pub fn decrypt(&self, frame: &[u8]) -> Vec<u8> {
        let Some(cipher) = &self.cipher else {
            return frame.to_vec();
        };
        if frame.len() <= MBAP_HEADER_LEN {
            debug!(len = frame.len(), "frame too short for decryption");
            return frame.to_vec();
        }

        let (mbap, encrypted) = frame.split_at(MBAP_HEADER_LEN);
        let mut payload = pad_to_block(encrypted);
        decrypt_blocks(cipher, &mut payload);

        let declared = read_u16(mbap, 4) as usize;
        let mut end = payload.len();
        while end > declared && payload[end - 1] == 0x00 {
            end -= 1;
        }
        payload.truncate(end);

        let mut result = Vec::with_capacity(MBAP_HEADER_LEN + payload.len());
        result.extend_from_slice(mbap);
        result.extend_from_slice(&payload);

        debug!(frame = %hex::encode(&result), "frame decrypted");
        result
    }

    /// Recover the plaintext of a frame produced by [`CryptoEngine::encrypt`].
    pub fn decrypt_sealed(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let Some(cipher) = &self.cipher else {
            return Ok(sealed.to_vec());
        };
        let header = CryptoHeader::parse(sealed)?;
        let ciphertext = &sealed[CRYPTO_HEADER_LEN..];
        header.reconcile(ciphertext.len())?;

        let mut plaintext = ciphertext.to_vec();
        decrypt_blocks(cipher, &mut plaintext);
        plaintext.truncate(header.plaintext_len as usize);
        Ok(plaintext)
    }

    /// Encrypt a response the way the inverter does: MBAP header in the
    /// clear, zero padded payload encrypted after it.
    pub fn encrypt_response(&self, frame: &[u8]) -> Vec<u8> {
        let Some(cipher) = &self.cipher else {
            return frame.to_vec();
        };
        if frame.len() <= MBAP_HEADER_LEN {
            return frame.to_vec();
        }

        let (mbap, payload) = frame.split_at(MBAP_HEADER_LEN);
        let mut padded = pad_to_block(payload);
        encrypt_blocks(cipher, &mut padded);

        let mut result = Vec::with_capacity(MBAP_HEADER_LEN + padded.len());
        result.extend_from_slice(mbap);
        result.extend_from_slice(&padded);
        result
    }
}

fn derive_key(public_key: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = public_key[i] ^ DEVICE_PRIVATE_KEY[i];
    }
    key
}

/// Zero pad to the next block boundary; aligned input gets no padding.
fn pad_to_block(data: &[u8]) -> Vec<u8> {
    let padding = (BLOCK_LEN - data.len() % BLOCK_LEN) % BLOCK_LEN;
    let mut padded = Vec::with_capacity(data.len() + padding);
    padded.extend_from_slice(data);
    padded.resize(data.len() + padding, 0x00);
    padded
}

fn encrypt_blocks(cipher: &Aes128, data: &mut [u8]) {
    for block in data.chunks_exact_mut(BLOCK_LEN) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

fn decrypt_blocks(cipher: &Aes128, data: &mut [u8]) {
    for block in data.chunks_exact_mut(BLOCK_LEN) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
}
