//! The fixed-size info block describing the image a session is attached to.
//!
//! Wire format: exactly [`INFO_SIZE`] bytes, twelve 12-byte ASCII fields.
//!
//! ```text
//! field  0      image id
//! field  1      channel number
//! field  2      channel descriptor string (e.g. "x8r8g8b8")
//! field  3      replicate flag
//! fields 4..8   bounding rectangle  min.x min.y max.x max.y
//! fields 8..12  clip rectangle      min.x min.y max.x max.y
//! ```
//!
//! Parsing is lenient, like the server's own reader: each integer skips
//! leading spaces and consumes digits, anything else in the field is
//! ignored, and an unparsable channel string yields a zero [`Pix`].

use tracing::warn;

use crate::domain::geometry::{Point, Rect};
use crate::domain::pix::Pix;
use crate::protocol::codec::{atoi, field, format_field, format_text_field, ProtocolError, FIELD_WIDTH};

/// Number of bytes in an info block.
pub const INFO_SIZE: usize = 12 * FIELD_WIDTH;

/// A decoded info block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoBlock {
    pub id: i32,
    pub chan: i32,
    /// Channel descriptor text exactly as the server wrote it (trimmed).
    pub pix_text: String,
    pub pix: Pix,
    pub repl: bool,
    pub r: Rect,
    pub clipr: Rect,
}

fn point_at(block: &[u8], index: usize) -> Point {
    Point::new(atoi(field(block, index)), atoi(field(block, index + 1)))
}

/// Decodes the rectangle stored in the four fields starting at `index`.
pub fn rect_at(block: &[u8], index: usize) -> Rect {
    Rect {
        min: point_at(block, index),
        max: point_at(block, index + 2),
    }
}

/// Encodes `r` as four consecutive 12-byte fields.
pub fn encode_rect(r: &Rect) -> [u8; 4 * FIELD_WIDTH] {
    let mut out = [0u8; 4 * FIELD_WIDTH];
    let coords = [r.min.x, r.min.y, r.max.x, r.max.y];
    for (slot, v) in out.chunks_exact_mut(FIELD_WIDTH).zip(coords) {
        slot.copy_from_slice(&format_field(i64::from(v)));
    }
    out
}

impl InfoBlock {
    /// Decodes an info block.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InsufficientData`] when `block` is shorter
    /// than [`INFO_SIZE`].  Extra bytes are ignored.
    pub fn parse(block: &[u8]) -> Result<InfoBlock, ProtocolError> {
        if block.len() < INFO_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: INFO_SIZE,
                available: block.len(),
            });
        }
        let pix_text = String::from_utf8_lossy(field(block, 2)).trim().to_string();
        let pix = match Pix::parse(&pix_text) {
            Ok(pix) => pix,
            Err(e) => {
                warn!("info block carries unusable channel {pix_text:?}: {e}");
                Pix::default()
            }
        };
        Ok(InfoBlock {
            id: atoi(field(block, 0)),
            chan: atoi(field(block, 1)),
            pix_text,
            pix,
            repl: atoi(field(block, 3)) > 0,
            r: rect_at(block, 4),
            clipr: rect_at(block, 8),
        })
    }

    /// Encodes the block in the server's reply format.  Used by test servers
    /// and fixtures.
    pub fn encode(&self) -> [u8; INFO_SIZE] {
        let mut out = [b' '; INFO_SIZE];
        out[0..12].copy_from_slice(&format_field(i64::from(self.id)));
        out[12..24].copy_from_slice(&format_field(i64::from(self.chan)));
        out[24..36].copy_from_slice(&format_text_field(&self.pix_text));
        out[36..48].copy_from_slice(&format_field(i64::from(self.repl)));
        out[48..96].copy_from_slice(&encode_rect(&self.r));
        out[96..144].copy_from_slice(&encode_rect(&self.clipr));
        out
    }
}
