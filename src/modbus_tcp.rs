use tracing::warn;

use crate::core::{
    read_u16, ExceptionCode, FrameError, FunctionCode, ReadRequest, READ_REQUEST_LEN,
};

/// Offset of the first data byte after MBAP + unit id + function code + byte count.
const DATA_OFFSET: usize = 9;

/// Shortest frame that can be a read or exception response.
pub const MIN_RESPONSE_LEN: usize = DATA_OFFSET;

/// Largest byte count a read response may carry.
const MAX_BYTE_COUNT: u8 = 250;

/// Generate the plaintext TCP frame for a register read.
pub fn build_read_request(
    transaction_id: u16,
    unit_id: u8,
    function_code: FunctionCode,
    address: u16,
    count: u16,
) -> [u8; READ_REQUEST_LEN] {
    ReadRequest::new(transaction_id, unit_id, function_code, address, count).encode()
}

/// Parse a plaintext TCP response into register words.
pub fn parse_read_response(frame: &[u8]) -> Result<Vec<u16>, FrameError> {
    if frame.len() < MIN_RESPONSE_LEN {
        return Err(FrameError::ResponseTooShort(frame.len()));
    }

    let function_code = frame[7];
    let byte_count = frame[8];

    if (function_code & 0x80) != 0 {
        return Err(FrameError::ModbusException {
            function_code: function_code & 0x7F,
            exception: ExceptionCode::from(byte_count),
        });
    }

    if byte_count == 0
        || byte_count > MAX_BYTE_COUNT
        || frame.len() < DATA_OFFSET + byte_count as usize
    {
        return Err(FrameError::InvalidResponse {
            byte_count,
            frame_len: frame.len(),
        });
    }

    // Firmware answers input reads with 0x02 on some models.
    if function_code != 0x02 && function_code != 0x04 {
        warn!(function_code, byte_count, "unexpected function code, parsing anyway");
    }

    let data = &frame[DATA_OFFSET..DATA_OFFSET + byte_count as usize];
    let registers = data
        .chunks_exact(2)
        .map(|pair| ((pair[0] as u16) << 8) | (pair[1] as u16))
        .collect();
    Ok(registers)
}

/// Transaction id of a response, if the frame is long enough to be one.
pub fn response_transaction_id(frame: &[u8]) -> Option<u16> {
    if frame.len() < MIN_RESPONSE_LEN {
        return None;
    }
    Some(read_u16(frame, 0))
}

/// Build the plaintext answer a device gives to `request`.
pub fn build_read_response(request: &ReadRequest, registers: &[u16]) -> Vec<u8> {
    let byte_count = registers.len() * 2;
    let length = (3 + byte_count) as u16;
    let mut frame = Vec::with_capacity(DATA_OFFSET + byte_count);

    frame.push((request.transaction_id >> 8) as u8);
    frame.push(request.transaction_id as u8);
    frame.push(0x00);
    frame.push(0x00);
    frame.push((length >> 8) as u8);
    frame.push(length as u8);
    frame.push(request.unit_id);
    frame.push(request.function_code);
    frame.push(byte_count as u8);
    for value in registers {
        frame.push((value >> 8) as u8);
        frame.push(*value as u8);
    }
    frame
}

/// Build the exception answer a device gives to `request`.
pub fn build_exception_response(request: &ReadRequest, exception: ExceptionCode) -> Vec<u8> {
    vec![
        (request.transaction_id >> 8) as u8,
        request.transaction_id as u8,
        0x00,
        0x00,
        0x00,
        0x03,
        request.unit_id,
        request.function_code | 0x80,
        exception.code(),
    ]
}
