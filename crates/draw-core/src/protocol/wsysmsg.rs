//! Message codec for the socket backend.
//!
//! When the display server runs as a separate process reached over a Unix
//! socket, every interaction is a tagged request/reply pair.
//!
//! Wire format:
//! ```text
//! [size:4][type:1][tag:1][body:N]
//! ```
//! `size` counts the whole frame including itself.  All integers are
//! little-endian.  Strings and byte blobs are carried as `[len:4][bytes]`.
//!
//! A request type `T` is always answered by `T + 1` or by `Rerror`.

use tracing::trace;

use crate::domain::geometry::Point;
use crate::protocol::codec::{get_u16, get_u32, put_u16, put_u32, ProtocolError};
use crate::protocol::mouse::Mouse;

/// Bytes in the fixed frame header: size, type, tag.
pub const FRAME_HEADER_SIZE: usize = 4 + 1 + 1;

/// Upper bound on a frame the decoder accepts.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Rerror = 1,
    Trdmouse = 2,
    Rrdmouse = 3,
    Trdkbd = 10,
    Rrdkbd = 11,
    Tlabel = 12,
    Rlabel = 13,
    Tinit = 14,
    Rinit = 15,
    Trdsnarf = 16,
    Rrdsnarf = 17,
    Twrsnarf = 18,
    Rwrsnarf = 19,
    Trddraw = 20,
    Rrddraw = 21,
    Twrdraw = 22,
    Rwrdraw = 23,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        use MessageType::*;
        Ok(match v {
            1 => Rerror,
            2 => Trdmouse,
            3 => Rrdmouse,
            10 => Trdkbd,
            11 => Rrdkbd,
            12 => Tlabel,
            13 => Rlabel,
            14 => Tinit,
            15 => Rinit,
            16 => Trdsnarf,
            17 => Rrdsnarf,
            18 => Twrsnarf,
            19 => Rwrsnarf,
            20 => Trddraw,
            21 => Rrddraw,
            22 => Twrdraw,
            23 => Rwrdraw,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

/// The body of a socket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Rerror(String),
    Trdmouse,
    Rrdmouse { mouse: Mouse, resized: bool },
    Trdkbd,
    /// A 16-bit rune.
    Rrdkbd(u16),
    Tlabel(String),
    Rlabel,
    Tinit { winsize: String, label: String },
    Rinit,
    Trdsnarf,
    Rrdsnarf(Vec<u8>),
    Twrsnarf(Vec<u8>),
    Rwrsnarf,
    Trddraw { count: u32 },
    Rrddraw(Vec<u8>),
    Twrdraw(Vec<u8>),
    Rwrdraw { count: u32 },
}

impl Body {
    /// The type code this body is sent with.
    pub fn message_type(&self) -> MessageType {
        match self {
            Body::Rerror(_) => MessageType::Rerror,
            Body::Trdmouse => MessageType::Trdmouse,
            Body::Rrdmouse { .. } => MessageType::Rrdmouse,
            Body::Trdkbd => MessageType::Trdkbd,
            Body::Rrdkbd(_) => MessageType::Rrdkbd,
            Body::Tlabel(_) => MessageType::Tlabel,
            Body::Rlabel => MessageType::Rlabel,
            Body::Tinit { .. } => MessageType::Tinit,
            Body::Rinit => MessageType::Rinit,
            Body::Trdsnarf => MessageType::Trdsnarf,
            Body::Rrdsnarf(_) => MessageType::Rrdsnarf,
            Body::Twrsnarf(_) => MessageType::Twrsnarf,
            Body::Rwrsnarf => MessageType::Rwrsnarf,
            Body::Trddraw { .. } => MessageType::Trddraw,
            Body::Rrddraw(_) => MessageType::Rrddraw,
            Body::Twrdraw(_) => MessageType::Twrdraw,
            Body::Rwrdraw { .. } => MessageType::Rwrdraw,
        }
    }

    /// The reply type a request body expects, or `None` for replies.
    pub fn reply_type(&self) -> Option<MessageType> {
        let t = self.message_type() as u8;
        if t == MessageType::Rerror as u8 || t % 2 == 1 {
            return None;
        }
        MessageType::try_from(t + 1).ok()
    }
}

/// A tagged socket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wsysmsg {
    pub tag: u8,
    pub body: Body,
}

impl Wsysmsg {
    pub fn new(tag: u8, body: Body) -> Self {
        Self { tag, body }
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

fn put_blob(buf: &mut Vec<u8>, bytes: &[u8]) {
    let mut len = [0u8; 4];
    put_u32(&mut len, bytes.len() as u32);
    buf.extend_from_slice(&len);
    buf.extend_from_slice(bytes);
}

fn put_word(buf: &mut Vec<u8>, v: u32) {
    let mut w = [0u8; 4];
    put_u32(&mut w, v);
    buf.extend_from_slice(&w);
}

/// Encodes a message into a complete frame.
pub fn encode_wsysmsg(msg: &Wsysmsg) -> Vec<u8> {
    let mut buf = vec![0u8; FRAME_HEADER_SIZE];
    buf[4] = msg.body.message_type() as u8;
    buf[5] = msg.tag;
    match &msg.body {
        Body::Rerror(s) | Body::Tlabel(s) => put_blob(&mut buf, s.as_bytes()),
        Body::Rrdmouse { mouse, resized } => {
            put_word(&mut buf, mouse.point.x as u32);
            put_word(&mut buf, mouse.point.y as u32);
            put_word(&mut buf, mouse.buttons);
            put_word(&mut buf, mouse.msec);
            buf.push(u8::from(*resized));
        }
        Body::Rrdkbd(rune) => {
            let mut w = [0u8; 2];
            put_u16(&mut w, *rune);
            buf.extend_from_slice(&w);
        }
        Body::Tinit { winsize, label } => {
            put_blob(&mut buf, winsize.as_bytes());
            put_blob(&mut buf, label.as_bytes());
        }
        Body::Rrdsnarf(data) | Body::Twrsnarf(data) | Body::Rrddraw(data) | Body::Twrdraw(data) => {
            put_blob(&mut buf, data)
        }
        Body::Trddraw { count } | Body::Rwrdraw { count } => put_word(&mut buf, *count),
        Body::Trdmouse
        | Body::Trdkbd
        | Body::Rlabel
        | Body::Rinit
        | Body::Trdsnarf
        | Body::Rwrsnarf => {}
    }
    let size = buf.len() as u32;
    put_u32(&mut buf[0..4], size);
    buf
}

// ── Decoding ──────────────────────────────────────────────────────────────────

fn get_blob(p: &[u8], offset: usize) -> Result<(Vec<u8>, usize), ProtocolError> {
    let len = get_u32(p, offset)? as usize;
    let start = offset + 4;
    let end = start
        .checked_add(len)
        .filter(|&end| end <= p.len())
        .ok_or_else(|| {
            ProtocolError::MalformedPayload(format!(
                "blob of length {len} at offset {start} exceeds frame"
            ))
        })?;
    Ok((p[start..end].to_vec(), end))
}

fn get_string(p: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    let (bytes, end) = get_blob(p, offset)?;
    let s = String::from_utf8(bytes)
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?;
    Ok((s, end))
}

/// Returns the total frame length announced by `bytes`, if the size prefix
/// has arrived.
pub fn frame_len(bytes: &[u8]) -> Option<usize> {
    get_u32(bytes, 0).ok().map(|n| n as usize)
}

/// Decodes one frame from the beginning of `bytes`.
///
/// Returns the message and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the frame is truncated, has an unknown type,
/// or its body does not match the type's layout.
pub fn decode_wsysmsg(bytes: &[u8]) -> Result<(Wsysmsg, usize), ProtocolError> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: FRAME_HEADER_SIZE,
            available: bytes.len(),
        });
    }
    let size = get_u32(bytes, 0)? as usize;
    if size < FRAME_HEADER_SIZE || size > MAX_FRAME_SIZE {
        return Err(ProtocolError::MalformedPayload(format!("bad frame size {size}")));
    }
    if bytes.len() < size {
        return Err(ProtocolError::InsufficientData {
            needed: size,
            available: bytes.len(),
        });
    }
    let ty = MessageType::try_from(bytes[4])?;
    let tag = bytes[5];
    let p = &bytes[..size];
    let off = FRAME_HEADER_SIZE;
    let body = match ty {
        MessageType::Rerror => Body::Rerror(get_string(p, off)?.0),
        MessageType::Trdmouse => Body::Trdmouse,
        MessageType::Rrdmouse => {
            if p.len() < off + 17 {
                return Err(ProtocolError::MalformedPayload(format!(
                    "Rrdmouse: need {} bytes, got {}",
                    off + 17,
                    p.len()
                )));
            }
            let mouse = Mouse {
                point: Point::new(get_u32(p, off)? as i32, get_u32(p, off + 4)? as i32),
                buttons: get_u32(p, off + 8)?,
                msec: get_u32(p, off + 12)?,
            };
            Body::Rrdmouse {
                mouse,
                resized: p[off + 16] != 0,
            }
        }
        MessageType::Trdkbd => Body::Trdkbd,
        MessageType::Rrdkbd => Body::Rrdkbd(get_u16(p, off)?),
        MessageType::Tlabel => Body::Tlabel(get_string(p, off)?.0),
        MessageType::Rlabel => Body::Rlabel,
        MessageType::Tinit => {
            let (winsize, next) = get_string(p, off)?;
            let (label, _) = get_string(p, next)?;
            Body::Tinit { winsize, label }
        }
        MessageType::Rinit => Body::Rinit,
        MessageType::Trdsnarf => Body::Trdsnarf,
        MessageType::Rrdsnarf => Body::Rrdsnarf(get_blob(p, off)?.0),
        MessageType::Twrsnarf => Body::Twrsnarf(get_blob(p, off)?.0),
        MessageType::Rwrsnarf => Body::Rwrsnarf,
        MessageType::Trddraw => Body::Trddraw {
            count: get_u32(p, off)?,
        },
        MessageType::Rrddraw => Body::Rrddraw(get_blob(p, off)?.0),
        MessageType::Twrdraw => Body::Twrdraw(get_blob(p, off)?.0),
        MessageType::Rwrdraw => Body::Rwrdraw {
            count: get_u32(p, off)?,
        },
    };
    trace!(tag, ?ty, size, "decoded frame");
    Ok((Wsysmsg { tag, body }, size))
}
