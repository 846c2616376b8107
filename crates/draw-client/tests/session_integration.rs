//! Integration tests for the draw session.
//!
//! These tests exercise the application layer of draw-client end-to-end:
//! `Display` + resource allocation + input endpoints over the recording
//! `MockTransport`.

use draw_client::application::resources::SCREEN_ALLOC_ATTEMPTS;
use draw_client::infrastructure::transport::mock::MockTransport;
use draw_client::{Display, DrawError, SessionOptions};
use draw_core::protocol::commands::{
    ALLOC_IMAGE_LEN, ALLOC_SCREEN_LEN, FREE_IMAGE_LEN, OP_ALLOC_IMAGE, OP_ALLOC_SCREEN,
    OP_FREE_IMAGE, OP_FREE_SCREEN, OP_VISIBLE,
};
use draw_core::{Color, Mouse, MouseEvent, Pix, Point, Rect, Refresh};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn open(mock: &MockTransport) -> Display {
    Display::init(Box::new(mock.clone()), "test", 640, 480).expect("setup must succeed")
}

/// The id field of an encoded allocate or free command.
fn id_of(cmd: &[u8]) -> u32 {
    u32::from_le_bytes([cmd[1], cmd[2], cmd[3], cmd[4]])
}

fn opcodes(writes: &[Vec<u8>]) -> Vec<u8> {
    writes.iter().map(|w| w[0]).collect()
}

// ── Setup ─────────────────────────────────────────────────────────────────────

#[test]
fn test_setup_negotiates_window_with_title_bar() {
    let mock = MockTransport::new();
    let _display = open(&mock);

    let negotiated = mock.state().negotiated.clone();
    assert_eq!(negotiated, Some(("test".to_string(), "640x502".to_string())));
}

#[test]
fn test_setup_writes_stock_images_screen_window_then_visible() {
    // Arrange
    let mock = MockTransport::new();

    // Act
    let _display = open(&mock);

    // Assert
    let writes = mock.writes();
    assert_eq!(
        opcodes(&writes),
        vec![OP_ALLOC_IMAGE, OP_ALLOC_IMAGE, OP_ALLOC_SCREEN, OP_ALLOC_IMAGE, OP_VISIBLE]
    );
    assert_eq!(writes[0].len(), ALLOC_IMAGE_LEN);
    assert_eq!(writes[2].len(), ALLOC_SCREEN_LEN);
    assert_eq!(writes[4], vec![OP_VISIBLE]);
    // Ids follow the root image (0 on the socket backend).
    let ids: Vec<u32> = writes[..4].iter().map(|w| id_of(w)).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[test]
fn test_socket_backend_root_image_is_zero_and_not_inset() {
    let mock = MockTransport::new();
    let display = open(&mock);

    let root = display.image().unwrap();
    assert_eq!(root.id(), 0);
    assert_eq!(root.r, Rect::new(0, 0, 640, 480));
    assert_eq!(root.pix, Pix::XRGB32);
    assert_eq!(root.depth, 32);
}

#[test]
fn test_device_backend_root_image_is_one_and_inset_by_border() {
    // Arrange
    let mock = MockTransport::device_files();

    // Act
    let display = open(&mock);

    // Assert
    let root = display.image().unwrap();
    assert_eq!(root.id(), 1);
    assert_eq!(root.r, Rect::new(4, 4, 636, 476));
    assert_eq!(root.clipr, Rect::new(4, 4, 636, 476));
    assert_eq!(display.white().unwrap().id(), 2);
}

#[test]
fn test_stock_images_are_replicated_grey1() {
    let mock = MockTransport::new();
    let display = open(&mock);

    let white = display.white().unwrap();
    let black = display.black().unwrap();
    assert!(white.repl && black.repl);
    assert_eq!(white.pix, Pix::GREY1);
    assert_eq!(display.opaque().unwrap(), white);
    assert_eq!(display.transparent().unwrap(), black);
}

#[test]
fn test_default_window_covers_root_and_is_on_default_screen() {
    let mock = MockTransport::new();
    let display = open(&mock);

    let screen = display.screen().unwrap();
    let window = display.screen_image().unwrap();
    assert_eq!(window.screen_id(), Some(screen.id()));
    assert_eq!(window.r, display.image().unwrap().r);
    assert_eq!(window.pix, Pix::XRGB32);
    assert_eq!(screen.fill_id(), display.white().unwrap().id());
    assert_eq!(display.windows(&screen).unwrap(), vec![window.id()]);
}

#[test]
fn test_setup_failure_closes_transport() {
    // Arrange: a 10-byte info reply
    let mock = MockTransport::new();
    mock.set_info(vec![b' '; 10]);

    // Act
    let result = Display::init(Box::new(mock.clone()), "test", 640, 480);

    // Assert
    match result {
        Err(DrawError::Setup(inner)) => {
            assert!(matches!(*inner, DrawError::ShortRead { expected: 144, got: 10 }))
        }
        other => panic!("expected Setup error, got {other:?}"),
    }
    assert_eq!(mock.state().close_calls, 1);
    assert!(mock.writes().is_empty());
}

// ── Buffering ─────────────────────────────────────────────────────────────────

#[test]
fn test_buffered_command_under_threshold_is_not_written() {
    // Arrange
    let mock = MockTransport::new();
    let display = open(&mock);
    mock.clear_writes();

    // Act
    display.buffer_command(&[b'x'; 100]).unwrap();

    // Assert
    assert!(mock.writes().is_empty());
    assert_eq!(display.buffered().unwrap(), 100);
}

#[test]
fn test_flush_writes_buffer_with_visible_marker() {
    // Arrange
    let mock = MockTransport::new();
    let display = open(&mock);
    mock.clear_writes();
    display.buffer_command(b"abc").unwrap();

    // Act
    display.flush().unwrap();

    // Assert
    assert_eq!(mock.writes(), vec![b"abcv".to_vec()]);
    assert_eq!(display.buffered().unwrap(), 0);
}

#[test]
fn test_small_buffer_flushes_before_overflowing() {
    // Arrange
    let mock = MockTransport::new();
    let options = SessionOptions {
        buffer_size: ALLOC_IMAGE_LEN,
        dpi: 0,
    };
    let display =
        Display::init_with_options(Box::new(mock.clone()), "test", 640, 480, &options).unwrap();
    mock.clear_writes();

    // Act
    display.buffer_command(&[b'x'; 40]).unwrap();
    display.buffer_command(&[b'y'; 40]).unwrap();

    // Assert
    assert_eq!(display.buffer_size().unwrap(), ALLOC_IMAGE_LEN);
    assert_eq!(mock.writes(), vec![vec![b'x'; 40]]);
    assert_eq!(display.buffered().unwrap(), 40);
}

// ── Images, screens and windows ───────────────────────────────────────────────

#[test]
fn test_alloc_image_writes_without_visible_marker() {
    // Arrange
    let mock = MockTransport::new();
    let display = open(&mock);
    mock.clear_writes();

    // Act
    let image = display
        .alloc_image(Rect::new(0, 0, 10, 10), Pix::RGB24, false, Color::BLACK)
        .unwrap();

    // Assert
    let writes = mock.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0][0], OP_ALLOC_IMAGE);
    assert_eq!(id_of(&writes[0]), image.id());
    assert_eq!(image.clipr, image.r);
    assert!(!image.is_window());
}

#[test]
fn test_free_plain_image_is_not_made_visible_and_second_free_is_noop() {
    // Arrange
    let mock = MockTransport::new();
    let display = open(&mock);
    let image = display
        .alloc_image(Rect::new(0, 0, 4, 4), Pix::GREY8, false, Color::WHITE)
        .unwrap();
    mock.clear_writes();

    // Act
    display.free_image(&image).unwrap();
    display.free_image(&image).unwrap();

    // Assert
    let writes = mock.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].len(), FREE_IMAGE_LEN);
    assert_eq!(writes[0][0], OP_FREE_IMAGE);
    assert_eq!(id_of(&writes[0]), image.id());
}

#[test]
fn test_alloc_window_prepends_to_screen_list() {
    // Arrange
    let mock = MockTransport::new();
    let display = open(&mock);
    let screen = display.screen().unwrap();
    let first = display.screen_image().unwrap();

    // Act
    let second = display
        .alloc_window(None, &screen, Rect::new(10, 10, 100, 100), Refresh::None, Color::WHITE)
        .unwrap();

    // Assert
    assert_eq!(display.windows(&screen).unwrap(), vec![second.id(), first.id()]);
    assert_eq!(second.pix, first.pix);
}

#[test]
fn test_alloc_window_overwrites_reused_handle() {
    // Arrange
    let mock = MockTransport::new();
    let display = open(&mock);
    let screen = display.screen().unwrap();
    let mut handle = display
        .alloc_window(None, &screen, Rect::new(0, 0, 20, 20), Refresh::Backup, Color::WHITE)
        .unwrap();
    let old_id = handle.id();
    display.free_image(&handle).unwrap();

    // Act
    let window = display
        .alloc_window(Some(&mut handle), &screen, Rect::new(5, 5, 40, 40), Refresh::None, Color::BLACK)
        .unwrap();

    // Assert
    assert_eq!(handle, window);
    assert_ne!(handle.id(), old_id);
    assert_eq!(handle.r, Rect::new(5, 5, 40, 40));
    assert_eq!(handle.screen_id(), Some(screen.id()));
}

#[test]
fn test_free_window_unlinks_it_and_flushes_visibly() {
    // Arrange
    let mock = MockTransport::new();
    let display = open(&mock);
    let screen = display.screen().unwrap();
    let window = display
        .alloc_window(None, &screen, Rect::new(0, 0, 50, 50), Refresh::Backup, Color::WHITE)
        .unwrap();
    mock.clear_writes();

    // Act
    display.free_image(&window).unwrap();

    // Assert
    let writes = mock.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0][0], OP_FREE_IMAGE);
    assert_eq!(*writes[0].last().unwrap(), OP_VISIBLE);
    assert!(!display.windows(&screen).unwrap().contains(&window.id()));
}

#[test]
fn test_free_screen_is_made_visible_and_second_free_is_noop() {
    // Arrange
    let mock = MockTransport::new();
    let display = open(&mock);
    let root = display.image().unwrap();
    let fill = display.black().unwrap();
    let screen = display.alloc_screen(&root, &fill, true).unwrap();
    mock.clear_writes();

    // Act
    display.free_screen(&screen).unwrap();
    display.free_screen(&screen).unwrap();

    // Assert
    let writes = mock.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0][0], OP_FREE_SCREEN);
    assert_eq!(id_of(&writes[0]), screen.id());
    assert_eq!(*writes[0].last().unwrap(), OP_VISIBLE);
}

#[test]
fn test_alloc_screen_retries_rejected_ids() {
    // Arrange: the server rejects the first two ids
    let mock = MockTransport::new();
    let display = open(&mock);
    let root = display.image().unwrap();
    let fill = display.white().unwrap();
    mock.clear_writes();
    mock.fail_next_writes(2);

    // Act
    let screen = display.alloc_screen(&root, &fill, false).unwrap();

    // Assert: the accepted command carries the third id tried
    let writes = mock.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0][0], OP_ALLOC_SCREEN);
    assert_eq!(id_of(&writes[0]), screen.id());
    assert_eq!(screen.id(), 7);
}

#[test]
fn test_alloc_screen_gives_up_after_all_attempts() {
    // Arrange
    let mock = MockTransport::new();
    let display = open(&mock);
    let root = display.image().unwrap();
    let fill = display.white().unwrap();
    mock.clear_writes();
    mock.set_writes_broken(true);

    // Act
    let result = display.alloc_screen(&root, &fill, false);

    // Assert
    assert!(matches!(
        result,
        Err(DrawError::AllocationExhausted { op: "allocscreen", attempts })
            if attempts == SCREEN_ALLOC_ATTEMPTS
    ));
    assert!(mock.writes().is_empty());
}

#[test]
fn test_alloc_screen_across_sessions_is_rejected_before_writing() {
    // Arrange
    let mock_a = MockTransport::new();
    let mock_b = MockTransport::new();
    let a = open(&mock_a);
    let b = open(&mock_b);
    let foreign_fill = b.white().unwrap();
    mock_a.clear_writes();

    // Act
    let result = a.alloc_screen(&a.image().unwrap(), &foreign_fill, false);

    // Assert
    assert!(matches!(result, Err(DrawError::DomainMismatch { op: "allocscreen" })));
    assert_eq!(mock_a.bytes_written(), 0);
    assert_ne!(a.session_id(), b.session_id());
}

#[test]
fn test_free_foreign_image_is_rejected() {
    let mock_a = MockTransport::new();
    let mock_b = MockTransport::new();
    let a = open(&mock_a);
    let b = open(&mock_b);

    let result = a.free_image(&b.white().unwrap());

    assert!(matches!(result, Err(DrawError::DomainMismatch { op: "freeimage" })));
}

// ── Attach ────────────────────────────────────────────────────────────────────

#[test]
fn test_attach_replaces_root_screen_and_window() {
    // Arrange
    let mock = MockTransport::new();
    let display = open(&mock);
    let old_screen = display.screen().unwrap();
    let old_window = display.screen_image().unwrap();
    mock.clear_writes();

    // Act
    display.attach(Refresh::Backup).unwrap();

    // Assert
    let writes = mock.writes();
    assert_eq!(
        opcodes(&writes),
        vec![OP_FREE_IMAGE, OP_FREE_SCREEN, OP_ALLOC_SCREEN, OP_FREE_IMAGE, OP_ALLOC_IMAGE]
    );
    assert_eq!(id_of(&writes[0]), 0);
    assert_eq!(id_of(&writes[1]), old_screen.id());
    assert_eq!(id_of(&writes[3]), old_window.id());
    assert_eq!(mock.state().attach_calls, 2);

    let screen = display.screen().unwrap();
    let window = display.screen_image().unwrap();
    assert_ne!(screen.id(), old_screen.id());
    assert_ne!(window.id(), old_window.id());
    assert_eq!(window.screen_id(), Some(screen.id()));
    assert_eq!(id_of(&writes[4]), window.id());
    assert_eq!(display.windows(&screen).unwrap(), vec![window.id()]);
}

#[test]
fn test_failed_attach_makes_display_unusable_but_closable() {
    // Arrange
    let mock = MockTransport::new();
    let display = open(&mock);
    mock.set_writes_broken(true);

    // Act
    let attach = display.attach(Refresh::Backup);

    // Assert
    assert!(attach.is_err());
    assert!(matches!(display.flush(), Err(DrawError::Unusable)));
    assert!(matches!(display.image(), Err(DrawError::Unusable)));
    display.close().unwrap();
    display.close().unwrap();
    assert_eq!(mock.state().close_calls, 1);
}

// ── Scale, clipboard and label ────────────────────────────────────────────────

#[test]
fn test_scale_is_identity_without_high_dpi() {
    let mock = MockTransport::new();
    let display = open(&mock);

    assert_eq!(display.dpi(), 0);
    assert_eq!(display.scale(100), 100);

    display.set_dpi(133);
    assert_eq!(display.scale(100), 100);
}

#[test]
fn test_scale_doubles_at_twice_default_dpi() {
    let mock = MockTransport::new();
    let options = SessionOptions {
        dpi: 266,
        ..SessionOptions::default()
    };
    let display =
        Display::init_with_options(Box::new(mock.clone()), "test", 640, 480, &options).unwrap();

    assert_eq!(display.scale(100), 200);
    assert_eq!(display.scale(7), 14);
}

#[test]
fn test_scale_saturates_instead_of_wrapping() {
    let mock = MockTransport::new();
    let display = open(&mock);
    display.set_dpi(266);

    assert_eq!(display.scale(i32::MAX), i32::MAX);
    assert_eq!(display.scale(i32::MIN), i32::MIN);
}

#[test]
fn test_snarf_and_label_pass_through_to_transport() {
    // Arrange
    let mock = MockTransport::new();
    let display = open(&mock);

    // Act
    display.write_snarf(b"hello").unwrap();
    display.set_label("editor").unwrap();

    // Assert
    assert_eq!(display.read_snarf().unwrap(), b"hello".to_vec());
    assert_eq!(mock.state().label.as_deref(), Some("editor"));
}

#[test]
fn test_close_is_idempotent() {
    let mock = MockTransport::new();
    let display = open(&mock);

    display.close().unwrap();
    display.close().unwrap();

    assert_eq!(mock.state().close_calls, 1);
}

// ── Input ─────────────────────────────────────────────────────────────────────

#[test]
fn test_keyboard_delivers_keys_then_signals_exit_once() {
    // Arrange
    let mock = MockTransport::new();
    mock.push_keys("hé!");
    let display = open(&mock);
    let mut exit = display.take_exit_receiver().expect("first take succeeds");

    // Act
    let mut keyboard = display.init_keyboard().unwrap();
    let mut keys = String::new();
    while let Some(c) = keyboard.blocking_recv() {
        keys.push(c);
    }

    // Assert
    assert_eq!(keys, "hé!");
    assert_eq!(exit.try_recv(), Ok(()));
    assert!(exit.try_recv().is_err());
    assert!(display.take_exit_receiver().is_none());
    assert!(keyboard.join().is_ok());
}

#[test]
fn test_keyboard_fault_stops_pump_without_exit_signal() {
    // Arrange: one key, then a read error that is not end of stream
    let mock = MockTransport::new();
    mock.push_keys("a");
    mock.set_keyboard_fault(true);
    let display = open(&mock);
    let mut exit = display.take_exit_receiver().expect("first take succeeds");

    // Act
    let mut keyboard = display.init_keyboard().unwrap();
    let first = keyboard.blocking_recv();
    let after = keyboard.blocking_recv();

    // Assert
    assert_eq!(first, Some('a'));
    assert_eq!(after, None);
    assert!(keyboard.join().is_err(), "a fatal read error must panic the pump");
    assert!(exit.try_recv().is_err());
}

#[test]
fn test_mouse_reads_scripted_events_in_order() {
    // Arrange
    let mock = MockTransport::new();
    let first = MouseEvent {
        mouse: Mouse {
            point: Point::new(10, 20),
            buttons: 1,
            msec: 1500,
        },
        resized: false,
    };
    let second = MouseEvent {
        mouse: Mouse {
            point: Point::new(11, 21),
            buttons: 0,
            msec: 1510,
        },
        resized: true,
    };
    mock.push_mouse(first);
    mock.push_mouse(second);
    let display = open(&mock);

    // Act
    let mut mouse = display.init_mouse().unwrap();
    let a = mouse.read().unwrap();
    let b = mouse.read().unwrap();
    let end = mouse.read();

    // Assert
    assert_eq!(a, first);
    assert!(b.resized);
    assert_eq!(mouse.last(), second.mouse);
    assert!(end.is_err());
}
