//! Command-stream opcodes and their fixed-size encoders.
//!
//! Every command is a single ASCII opcode byte followed by little-endian
//! fields.  The session reserves exactly `*_LEN` bytes in its outgoing
//! buffer and hands the slice to the matching `encode_*` function, so an
//! encoder never allocates and never writes past its slot.
//!
//! ```text
//! 'b' allocate image   id[4] screen[4] refresh[1] chan[4] repl[1] r[16] clipr[16] color[4]
//! 'f' free image       id[4]
//! 'A' allocate screen  id[4] image[4] fill[4] public[1]
//! 'F' free screen      id[4]
//! 'n' attach window    id[4] namelen[1] name[namelen]
//! 'J' 'I'              describe the current image (socket backend)
//! 'v'                  make buffered changes visible
//! ```

use crate::domain::geometry::Rect;
use crate::domain::pix::{Color, Pix, Refresh};
use crate::protocol::codec::put_u32;

pub const OP_ALLOC_IMAGE: u8 = b'b';
pub const OP_FREE_IMAGE: u8 = b'f';
pub const OP_ALLOC_SCREEN: u8 = b'A';
pub const OP_FREE_SCREEN: u8 = b'F';
pub const OP_ATTACH: u8 = b'n';
pub const OP_VISIBLE: u8 = b'v';
pub const OP_INFO: [u8; 2] = [b'J', b'I'];

pub const ALLOC_IMAGE_LEN: usize = 1 + 4 + 4 + 1 + 4 + 1 + 4 * 4 + 4 * 4 + 4;
pub const FREE_IMAGE_LEN: usize = 1 + 4;
pub const ALLOC_SCREEN_LEN: usize = 1 + 4 + 4 + 4 + 1;
pub const FREE_SCREEN_LEN: usize = 1 + 4;

/// Clip rectangle the server expects for replicated images: effectively
/// unbounded in every direction.
pub const REPL_CLIP: Rect = Rect::new(-0x3FFF_FFFF, -0x3FFF_FFFF, 0x3FFF_FFFF, 0x3FFF_FFFF);

/// Parameters of an allocate-image command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocImage {
    pub id: u32,
    /// Owning screen id, or 0 for an off-screen image.
    pub screen_id: u32,
    pub refresh: Refresh,
    pub pix: Pix,
    pub repl: bool,
    pub r: Rect,
    pub clipr: Rect,
    pub color: Color,
}

fn put_rect(buf: &mut [u8], r: &Rect) {
    put_u32(&mut buf[0..], r.min.x as u32);
    put_u32(&mut buf[4..], r.min.y as u32);
    put_u32(&mut buf[8..], r.max.x as u32);
    put_u32(&mut buf[12..], r.max.y as u32);
}

/// Encodes an allocate-image command into `buf[..ALLOC_IMAGE_LEN]`.
pub fn encode_alloc_image(buf: &mut [u8], cmd: &AllocImage) {
    buf[0] = OP_ALLOC_IMAGE;
    put_u32(&mut buf[1..], cmd.id);
    put_u32(&mut buf[5..], cmd.screen_id);
    buf[9] = cmd.refresh as u8;
    put_u32(&mut buf[10..], cmd.pix.0);
    buf[14] = u8::from(cmd.repl);
    put_rect(&mut buf[15..], &cmd.r);
    put_rect(&mut buf[31..], &cmd.clipr);
    put_u32(&mut buf[47..], cmd.color.0);
}

/// Encodes a free-image command into `buf[..FREE_IMAGE_LEN]`.
pub fn encode_free_image(buf: &mut [u8], id: u32) {
    buf[0] = OP_FREE_IMAGE;
    put_u32(&mut buf[1..], id);
}

/// Encodes an allocate-screen command into `buf[..ALLOC_SCREEN_LEN]`.
pub fn encode_alloc_screen(buf: &mut [u8], id: u32, image_id: u32, fill_id: u32, public: bool) {
    buf[0] = OP_ALLOC_SCREEN;
    put_u32(&mut buf[1..], id);
    put_u32(&mut buf[5..], image_id);
    put_u32(&mut buf[9..], fill_id);
    buf[13] = u8::from(public);
}

/// Encodes a free-screen command into `buf[..FREE_SCREEN_LEN]`.
pub fn encode_free_screen(buf: &mut [u8], id: u32) {
    buf[0] = OP_FREE_SCREEN;
    put_u32(&mut buf[1..], id);
}

/// Builds the attach-window frame the device backend writes before querying
/// the info block.  The name is truncated to 255 bytes to fit its length byte.
pub fn encode_attach(id: u32, window_name: &[u8]) -> Vec<u8> {
    let name = &window_name[..window_name.len().min(u8::MAX as usize)];
    let mut buf = vec![0u8; 1 + 4 + 1 + name.len()];
    buf[0] = OP_ATTACH;
    put_u32(&mut buf[1..], id);
    buf[5] = name.len() as u8;
    buf[6..].copy_from_slice(name);
    buf
}
