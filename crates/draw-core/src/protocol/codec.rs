//! Shared encoding primitives and the protocol error type.
//!
//! Two encodings coexist on the wire:
//!
//! - **Binary** fields in commands and socket messages: little-endian
//!   integers, 4 bytes for ids and counts, 2 bytes for short counts.
//! - **ASCII** fields in query replies (the info block and the device
//!   backend's connection block): 12-byte slots holding a right-aligned
//!   decimal integer followed by a space, i.e. `printf("%11d ")`.

use thiserror::Error;

/// Width in bytes of one ASCII field in a server reply.
pub const FIELD_WIDTH: usize = 12;

/// Errors that can occur while encoding or decoding protocol data.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in a socket frame is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The payload could not be parsed (length out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A textual mouse record did not have the expected shape.
    #[error("malformed mouse record: {0}")]
    MalformedMouseRecord(String),
}

/// Writes `v` little-endian into the first four bytes of `buf`.
///
/// # Panics
///
/// Panics if `buf` is shorter than four bytes.
pub fn put_u32(buf: &mut [u8], v: u32) {
    buf[..4].copy_from_slice(&v.to_le_bytes());
}

/// Writes `v` little-endian into the first two bytes of `buf`.
///
/// # Panics
///
/// Panics if `buf` is shorter than two bytes.
pub fn put_u16(buf: &mut [u8], v: u16) {
    buf[..2].copy_from_slice(&v.to_le_bytes());
}

/// Reads a little-endian `u32` at `offset`.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] if fewer than four bytes remain.
pub fn get_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    let end = offset + 4;
    if buf.len() < end {
        return Err(ProtocolError::InsufficientData {
            needed: end,
            available: buf.len(),
        });
    }
    Ok(u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

/// Reads a little-endian `u16` at `offset`.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] if fewer than two bytes remain.
pub fn get_u16(buf: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    let end = offset + 2;
    if buf.len() < end {
        return Err(ProtocolError::InsufficientData {
            needed: end,
            available: buf.len(),
        });
    }
    Ok(u16::from_le_bytes([buf[offset], buf[offset + 1]]))
}

/// Parses a decimal integer the way the server's replies are read: skip
/// leading spaces, then consume ASCII digits.  Anything after the digits is
/// ignored, and a field with no digits parses as 0.
pub fn atoi(field: &[u8]) -> i32 {
    let mut i = 0;
    while i < field.len() && field[i] == b' ' {
        i += 1;
    }
    let mut n: i32 = 0;
    while i < field.len() && field[i].is_ascii_digit() {
        n = n.wrapping_mul(10).wrapping_add(i32::from(field[i] - b'0'));
        i += 1;
    }
    n
}

/// Returns the `index`-th 12-byte ASCII field of `block`, or an empty slice
/// when the block is too short.
pub fn field(block: &[u8], index: usize) -> &[u8] {
    let start = index * FIELD_WIDTH;
    let end = (start + FIELD_WIDTH).min(block.len());
    if start >= end {
        return &[];
    }
    &block[start..end]
}

/// Encodes `v` as one 12-byte ASCII field (`%11d ` formatting).
pub fn format_field(v: i64) -> [u8; FIELD_WIDTH] {
    let mut out = [b' '; FIELD_WIDTH];
    let text = format!("{v:>11}");
    let bytes = text.as_bytes();
    // Values wider than 11 characters keep their least significant digits.
    let take = bytes.len().min(FIELD_WIDTH - 1);
    out[FIELD_WIDTH - 1 - take..FIELD_WIDTH - 1].copy_from_slice(&bytes[bytes.len() - take..]);
    out
}

/// Encodes `text` into one 12-byte field, right-aligned and space padded.
/// Longer text is truncated to 11 bytes.
pub fn format_text_field(text: &str) -> [u8; FIELD_WIDTH] {
    let mut out = [b' '; FIELD_WIDTH];
    let bytes = text.as_bytes();
    let take = bytes.len().min(FIELD_WIDTH - 1);
    out[FIELD_WIDTH - 1 - take..FIELD_WIDTH - 1].copy_from_slice(&bytes[..take]);
    out
}
