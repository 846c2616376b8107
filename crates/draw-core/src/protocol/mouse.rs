//! Mouse state and the textual mouse record.
//!
//! The device backend delivers mouse activity as ASCII records:
//!
//! ```text
//! <symbol> <x> <y> <buttons> <msec>
//! ```
//!
//! separated by single spaces and terminated by a space.  The symbol is `m`
//! for ordinary motion and `r` when the server wants the client to
//! re-attach because the window changed size.

use std::io::{self, BufRead};
use std::str::FromStr;

use crate::domain::geometry::Point;
use crate::protocol::codec::ProtocolError;

/// Symbol marking a resize notification.
pub const RESIZE_SYMBOL: u8 = b'r';

/// A snapshot of mouse state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mouse {
    pub point: Point,
    /// Button bitmask: 1 left, 2 middle, 4 right, 8/16 wheel.
    pub buttons: u32,
    /// Server timestamp in milliseconds.
    pub msec: u32,
}

/// One decoded mouse record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseEvent {
    pub mouse: Mouse,
    /// `true` when the record announced a window resize.
    pub resized: bool,
}

/// Parses one complete record held in memory, e.g. `"m 10 20 4 1500 "`.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMouseRecord`] if the record is truncated
/// or a numeric field does not parse.
pub fn parse_mouse_record(text: &str) -> Result<MouseEvent, ProtocolError> {
    let mut reader = text.as_bytes();
    read_mouse_record(&mut reader).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            ProtocolError::MalformedMouseRecord(format!("truncated record {text:?}"))
        }
        _ => ProtocolError::MalformedMouseRecord(e.to_string()),
    })
}

/// Reads exactly one record from `r`, blocking until it is complete.
///
/// # Errors
///
/// - [`io::ErrorKind::UnexpectedEof`] if the stream ends before or inside a record.
/// - [`io::ErrorKind::InvalidData`] wrapping a [`ProtocolError`] if a field
///   does not parse.
/// - Any other I/O error from the underlying reader.
pub fn read_mouse_record<R: BufRead + ?Sized>(r: &mut R) -> io::Result<MouseEvent> {
    skip_whitespace(r)?;
    let symbol = read_byte(r)?;
    let x = read_int(r, "x")?;
    let y = read_int(r, "y")?;
    let buttons = read_int(r, "buttons")?;
    let msec = read_int(r, "msec")?;
    Ok(MouseEvent {
        mouse: Mouse {
            point: Point::new(x, y),
            buttons,
            msec,
        },
        resized: symbol == RESIZE_SYMBOL,
    })
}

fn read_byte<R: BufRead + ?Sized>(r: &mut R) -> io::Result<u8> {
    let buf = r.fill_buf()?;
    match buf.first().copied() {
        Some(b) => {
            r.consume(1);
            Ok(b)
        }
        None => Err(io::ErrorKind::UnexpectedEof.into()),
    }
}

fn skip_whitespace<R: BufRead + ?Sized>(r: &mut R) -> io::Result<()> {
    loop {
        let buf = r.fill_buf()?;
        if buf.is_empty() {
            return Ok(());
        }
        let n = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        let exhausted = n == buf.len();
        r.consume(n);
        if !exhausted {
            return Ok(());
        }
    }
}

/// Reads one whitespace-delimited field.  A value out of range for `T` is
/// malformed, like any other unparsable field.
fn read_int<T: FromStr, R: BufRead + ?Sized>(r: &mut R, name: &str) -> io::Result<T> {
    skip_whitespace(r)?;
    let mut token = Vec::new();
    loop {
        let buf = r.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        let n = buf.iter().take_while(|b| !b.is_ascii_whitespace()).count();
        token.extend_from_slice(&buf[..n]);
        let done = n < buf.len();
        r.consume(n);
        if done {
            break;
        }
    }
    if token.is_empty() {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    std::str::from_utf8(&token)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                ProtocolError::MalformedMouseRecord(format!(
                    "field {name}: {:?}",
                    String::from_utf8_lossy(&token)
                )),
            )
        })
}
