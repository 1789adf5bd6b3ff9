//! Decoding of raw register words.
//!
//! The inverter reports `0xFFFF` (and `0x7FFF` for signed words) when a
//! reading is unavailable. The `to_*` functions collapse that sentinel to
//! zero; the `checked_*` functions return `None` instead so callers can tell
//! a missing reading from a real zero.

pub const INVALID_WORD: u16 = 0xFFFF;
pub const INVALID_S16_WORD: u16 = 0x7FFF;

pub fn is_invalid_u16(word: u16) -> bool {
    word == INVALID_WORD
}

pub fn is_invalid_u32(high: u16, low: u16) -> bool {
    high == INVALID_WORD && low == INVALID_WORD
}

pub fn to_u16(word: u16) -> u16 {
    checked_u16(word).unwrap_or(0)
}

pub fn to_u32(high: u16, low: u16) -> u32 {
    checked_u32(high, low).unwrap_or(0)
}

pub fn to_s16(word: u16) -> i16 {
    checked_s16(word).unwrap_or(0)
}

pub fn checked_u16(word: u16) -> Option<u16> {
    if is_invalid_u16(word) {
        return None;
    }
    Some(word)
}

pub fn checked_u32(high: u16, low: u16) -> Option<u32> {
    if is_invalid_u32(high, low) {
        return None;
    }
    Some(((high as u32) << 16) | low as u32)
}

pub fn checked_s16(word: u16) -> Option<i16> {
    if word == INVALID_WORD || word == INVALID_S16_WORD {
        return None;
    }
    Some(word as i16)
}

/// Decode `count` words starting at `start` as big-endian text, cut at the
/// first NUL. Words past the end of `words` are ignored.
pub fn to_text(words: &[u16], start: usize, count: usize) -> String {
    let available = words.len().saturating_sub(start).min(count);
    let mut bytes = Vec::with_capacity(available * 2);
    for word in words.iter().skip(start).take(count) {
        bytes.push((word >> 8) as u8);
        bytes.push(*word as u8);
    }
    if let Some(nul) = bytes.iter().position(|&b| b == 0) {
        bytes.truncate(nul);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn apply_scale(raw: u32, factor: f64) -> f64 {
    raw as f64 * factor
}
