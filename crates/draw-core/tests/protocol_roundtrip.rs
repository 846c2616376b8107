//! Integration tests for the draw-core wire formats.
//!
//! These go through the public API only and cover the properties the session
//! engine relies on: rectangles survive the 12-byte ASCII field layout, the
//! replicate flag follows the sign of its field, command slots have the
//! sizes the session reserves for them, and socket frames can be split out
//! of a byte stream one at a time.

use draw_core::protocol::codec::{atoi, format_field, get_u32};
use draw_core::protocol::commands::{
    encode_alloc_screen, encode_free_screen, ALLOC_SCREEN_LEN, FREE_SCREEN_LEN,
};
use draw_core::protocol::info::{encode_rect, rect_at};
use draw_core::protocol::wsysmsg::{decode_wsysmsg, encode_wsysmsg, frame_len, Body, Wsysmsg};
use draw_core::{InfoBlock, Pix, Rect, INFO_SIZE};

fn info_with(repl_field: i64, r: Rect) -> Vec<u8> {
    let mut bytes = InfoBlock {
        id: 1,
        chan: Pix::RGB24.0 as i32,
        pix_text: "r8g8b8".to_string(),
        pix: Pix::RGB24,
        repl: false,
        r,
        clipr: r,
    }
    .encode()
    .to_vec();
    bytes[36..48].copy_from_slice(&format_field(repl_field));
    bytes
}

#[test]
fn test_rectangles_round_trip_through_ascii_fields() {
    let samples = [
        Rect::new(0, 0, 0, 0),
        Rect::new(0, 0, 1, 1),
        Rect::new(4, 4, 1020, 764),
        Rect::new(17, 99_999, 123_456, 2_000_000_000),
        Rect::new(i32::MAX - 1, 0, i32::MAX, 5),
    ];
    for r in samples {
        let fields = encode_rect(&r);
        assert_eq!(rect_at(&fields, 0), r, "rectangle {r}");
    }
}

#[test]
fn test_info_block_repl_follows_field_sign() {
    let r = Rect::new(0, 0, 800, 600);
    for n in [0i64, 1, 2, 100, 99_999_999] {
        let info = InfoBlock::parse(&info_with(n, r)).expect("parse");
        assert_eq!(info.repl, n > 0, "replicate field {n}");
        assert_eq!(info.r, r);
    }
}

#[test]
fn test_info_block_fields_are_twelve_bytes_wide() {
    let bytes = info_with(0, Rect::new(1, 2, 3, 4));
    assert_eq!(bytes.len(), INFO_SIZE);
    assert_eq!(atoi(&bytes[48..60]), 1);
    assert_eq!(atoi(&bytes[60..72]), 2);
    assert_eq!(atoi(&bytes[72..84]), 3);
    assert_eq!(atoi(&bytes[84..96]), 4);
}

#[test]
fn test_screen_commands_fill_their_slots_exactly() {
    let mut alloc = vec![0u8; ALLOC_SCREEN_LEN];
    encode_alloc_screen(&mut alloc, 11, 0, 2, false);
    assert_eq!(alloc[0], b'A');
    assert_eq!(get_u32(&alloc, 1), Ok(11));

    let mut free = vec![0u8; FREE_SCREEN_LEN];
    encode_free_screen(&mut free, 11);
    assert_eq!(free, vec![b'F', 11, 0, 0, 0]);
}

#[test]
fn test_socket_stream_splits_into_frames() {
    // Arrange – three frames written back to back, as a reader would see them
    let frames = [
        Wsysmsg::new(1, Body::Rinit),
        Wsysmsg::new(2, Body::Rrddraw(vec![b' '; INFO_SIZE])),
        Wsysmsg::new(3, Body::Rerror("unknown id".to_string())),
    ];
    let stream: Vec<u8> = frames.iter().flat_map(encode_wsysmsg).collect();

    // Act
    let mut decoded = Vec::new();
    let mut rest = &stream[..];
    while !rest.is_empty() {
        let n = frame_len(rest).expect("size prefix");
        let (msg, used) = decode_wsysmsg(&rest[..n]).expect("decode");
        assert_eq!(used, n);
        decoded.push(msg);
        rest = &rest[n..];
    }

    // Assert
    assert_eq!(decoded, frames);
}
