use std::fmt;

use thiserror::Error;

/// Length of the MBAP header (transaction id, protocol id, length).
pub const MBAP_HEADER_LEN: usize = 6;

/// Length of a plaintext read request frame.
pub const READ_REQUEST_LEN: usize = 12;

/// Largest register count a single read may ask for.
pub const MAX_READ_COUNT: u16 = 125;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Response too short: {0} bytes, need at least 9")]
    ResponseTooShort(usize),

    #[error("Invalid response: byte count {byte_count}, frame length {frame_len}")]
    InvalidResponse { byte_count: u8, frame_len: usize },

    #[error("Modbus error - function {function_code:#04x}, error code {}: {exception}", .exception.code())]
    ModbusException { function_code: u8, exception: ExceptionCode },

    #[error("Transaction id mismatch: expected {expected}, received {received}")]
    TransactionMismatch { expected: u16, received: u16 },

    #[error("Invalid request frame: {0}")]
    InvalidRequest(&'static str),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FunctionCode {
    ReadHoldingRegisters,
    ReadInputRegisters,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadHoldingRegisters => 0x03,
            FunctionCode::ReadInputRegisters => 0x04,
        }
    }

    pub fn from_code(code: u8) -> Option<FunctionCode> {
        match code {
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x04 => Some(FunctionCode::ReadInputRegisters),
            _ => None,
        }
    }
}

/// Exception code carried after a function code with bit 0x80 set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Unknown(u8),
}

impl ExceptionCode {
    pub fn code(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 1,
            ExceptionCode::IllegalDataAddress => 2,
            ExceptionCode::IllegalDataValue => 3,
            ExceptionCode::ServerDeviceFailure => 4,
            ExceptionCode::Unknown(code) => code,
        }
    }
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            1 => ExceptionCode::IllegalFunction,
            2 => ExceptionCode::IllegalDataAddress,
            3 => ExceptionCode::IllegalDataValue,
            4 => ExceptionCode::ServerDeviceFailure,
            other => ExceptionCode::Unknown(other),
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::ServerDeviceFailure => "Server Device Failure",
            ExceptionCode::Unknown(_) => "Unknown Error",
        };
        f.write_str(name)
    }
}

/// Plaintext Modbus-TCP read request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub function_code: u8,
    pub address: u16,
    pub quantity: u16,
}

impl ReadRequest {
    pub fn new(
        transaction_id: u16,
        unit_id: u8,
        function_code: FunctionCode,
        address: u16,
        quantity: u16,
    ) -> Self {
        ReadRequest {
            transaction_id,
            unit_id,
            function_code: function_code.code(),
            address,
            quantity,
        }
    }

    pub fn encode(&self) -> [u8; READ_REQUEST_LEN] {
        let mut msg = [0u8; READ_REQUEST_LEN];
        msg[0] = (self.transaction_id >> 8) as u8;
        msg[1] = self.transaction_id as u8;
        // protocol id stays 0
        msg[4] = 0x00;
        msg[5] = 0x06; // unit id + function code + address + quantity
        msg[6] = self.unit_id;
        msg[7] = self.function_code;
        msg[8] = (self.address >> 8) as u8;
        msg[9] = self.address as u8;
        msg[10] = (self.quantity >> 8) as u8;
        msg[11] = self.quantity as u8;
        msg
    }

    /// Decode a request frame as a device would see it.
    pub fn decode(frame: &[u8]) -> Result<ReadRequest, FrameError> {
        if frame.len() < READ_REQUEST_LEN {
            return Err(FrameError::InvalidRequest("frame shorter than 12 bytes"));
        }
        let protocol_id = read_u16(frame, 2);
        if protocol_id != 0 {
            return Err(FrameError::InvalidRequest("protocol id must be 0"));
        }
        if read_u16(frame, 4) != 6 {
            return Err(FrameError::InvalidRequest("length field must be 6"));
        }
        Ok(ReadRequest {
            transaction_id: read_u16(frame, 0),
            unit_id: frame[6],
            function_code: frame[7],
            address: read_u16(frame, 8),
            quantity: read_u16(frame, 10),
        })
    }
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    ((buf[offset] as u16) << 8) | (buf[offset + 1] as u16)
}
