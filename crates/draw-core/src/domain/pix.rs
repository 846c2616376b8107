//! Pixel channel descriptors, packed colors, and window refresh policies.
//!
//! # Channel descriptors
//!
//! The server describes a pixel layout as a short string such as `x8r8g8b8`
//! or `k1`: a sequence of (channel letter, bit count) pairs, most significant
//! channel first.  On the wire the same information travels as a packed
//! `u32` where each channel occupies one byte holding `type << 4 | nbits`,
//! with the first channel in the most significant occupied byte.
//!
//! | Letter | Channel   |
//! |--------|-----------|
//! | `r`    | red       |
//! | `g`    | green     |
//! | `b`    | blue      |
//! | `k`    | grey      |
//! | `a`    | alpha     |
//! | `m`    | color map |
//! | `x`    | ignored   |

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const CHANNEL_LETTERS: &[u8; 7] = b"rgbkamx";

/// Errors produced while parsing a channel descriptor string.
#[derive(Debug, Error, PartialEq)]
pub enum PixError {
    #[error("unknown channel letter {0:?}")]
    UnknownChannel(char),
    #[error("bad bit count for channel {channel:?}")]
    BadBitCount { channel: char },
    #[error("too many channels in {0:?}")]
    TooManyChannels(String),
    #[error("depth {depth} of {text:?} is not a power-of-two fraction or multiple of 8")]
    BadDepth { text: String, depth: u32 },
    #[error("empty channel descriptor")]
    Empty,
}

/// A packed pixel channel descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pix(pub u32);

impl Pix {
    /// One-bit grey (`k1`), used for the stock color images.
    pub const GREY1: Pix = Pix::pack(&[(3, 1)]);
    /// Eight-bit grey (`k8`).
    pub const GREY8: Pix = Pix::pack(&[(3, 8)]);
    /// 24-bit RGB (`r8g8b8`).
    pub const RGB24: Pix = Pix::pack(&[(0, 8), (1, 8), (2, 8)]);
    /// 32-bit RGBA (`r8g8b8a8`).
    pub const RGBA32: Pix = Pix::pack(&[(0, 8), (1, 8), (2, 8), (4, 8)]);
    /// 32-bit ARGB (`a8r8g8b8`).
    pub const ARGB32: Pix = Pix::pack(&[(4, 8), (0, 8), (1, 8), (2, 8)]);
    /// 32-bit RGB with an ignored byte (`x8r8g8b8`).
    pub const XRGB32: Pix = Pix::pack(&[(6, 8), (0, 8), (1, 8), (2, 8)]);

    const fn pack(channels: &[(u32, u32)]) -> Pix {
        let mut v = 0u32;
        let mut i = 0;
        while i < channels.len() {
            v = v << 8 | channels[i].0 << 4 | channels[i].1;
            i += 1;
        }
        Pix(v)
    }

    /// Total bits per pixel.
    pub fn depth(self) -> u32 {
        let mut d = 0;
        let mut v = self.0;
        while v != 0 {
            d += v & 0xF;
            v >>= 8;
        }
        d
    }

    /// Parses a descriptor such as `"x8r8g8b8"`.  Leading and trailing
    /// whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PixError`] for unknown letters, bit counts outside `1..=8`,
    /// more than four channels, or a depth the server cannot store.
    pub fn parse(text: &str) -> Result<Pix, PixError> {
        let trimmed = text.trim();
        let bytes = trimmed.as_bytes();
        if bytes.is_empty() {
            return Err(PixError::Empty);
        }
        let mut value = 0u32;
        let mut depth = 0u32;
        let mut count = 0;
        let mut i = 0;
        while i < bytes.len() {
            let letter = bytes[i];
            let ty = CHANNEL_LETTERS
                .iter()
                .position(|&c| c == letter)
                .ok_or(PixError::UnknownChannel(letter as char))? as u32;
            let nbits = match bytes.get(i + 1).copied() {
                Some(d @ b'1'..=b'8') => u32::from(d - b'0'),
                _ => {
                    return Err(PixError::BadBitCount {
                        channel: letter as char,
                    })
                }
            };
            count += 1;
            if count > 4 {
                return Err(PixError::TooManyChannels(trimmed.to_string()));
            }
            value = value << 8 | ty << 4 | nbits;
            depth += nbits;
            i += 2;
        }
        if depth == 0 || (depth % 8 != 0 && 8 % depth != 0) {
            return Err(PixError::BadDepth {
                text: trimmed.to_string(),
                depth,
            });
        }
        Ok(Pix(value))
    }
}

impl FromStr for Pix {
    type Err = PixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pix::parse(s)
    }
}

impl fmt::Display for Pix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut shift = 24i32;
        while shift >= 0 {
            let c = (self.0 >> shift) & 0xFF;
            if c != 0 {
                let ty = (c >> 4) as usize;
                let letter = CHANNEL_LETTERS.get(ty).copied().unwrap_or(b'?') as char;
                write!(f, "{}{}", letter, c & 0xF)?;
            }
            shift -= 8;
        }
        Ok(())
    }
}

/// A packed `0xRRGGBBAA` color value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub u32);

impl Color {
    pub const WHITE: Color = Color(0xFFFF_FFFF);
    pub const BLACK: Color = Color(0x0000_00FF);
    pub const TRANSPARENT: Color = Color(0x0000_0000);
}

/// What the server does when a window is uncovered or resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Refresh {
    /// The server keeps a backing store and restores from it.
    #[default]
    Backup = 0,
    /// Uncovered regions are left as they are.
    None = 1,
    /// The client is told and redraws.
    Mesg = 2,
}

impl Refresh {
    /// Maps the raw protocol value, treating unknown values as [`Refresh::Backup`].
    pub fn from_u8(v: u8) -> Refresh {
        match v {
            1 => Refresh::None,
            2 => Refresh::Mesg,
            _ => Refresh::Backup,
        }
    }
}
