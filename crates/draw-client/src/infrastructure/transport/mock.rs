//! Mock transport for unit and integration testing.
//!
//! The real backends need a draw server on the other end.  The
//! `MockTransport` replaces it with in-memory recording: every command-stream
//! write is pushed into a shared log so test assertions can inspect exactly
//! what the session sent and in what order.  Replies (the info block, mouse
//! events, keystrokes, the clipboard) are scripted up front.
//!
//! The transport is handed to the session as a `Box<dyn Transport>`, so the
//! recording state lives behind an `Arc`: keep a clone of the mock and
//! inspect it after the session has taken ownership of the original.
//!
//! # Usage in tests
//!
//! ```ignore
//! let mock = MockTransport::new();
//! let display = Display::init(Box::new(mock.clone()), "test", 640, 480)?;
//!
//! display.flush()?;
//! assert_eq!(mock.writes().last().unwrap(), b"v");
//! ```
//!
//! # Failure injection
//!
//! [`MockTransport::fail_next_writes`] makes the next `n` command-stream
//! writes fail, which is how a server rejecting an id looks to the session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use draw_core::{InfoBlock, MouseEvent, Pix, Rect, INFO_SIZE};

use crate::application::transport::{Backend, KeySource, MouseSource, Transport, TransportError};

/// Everything the mock has recorded or been scripted with.
#[derive(Debug)]
pub struct MockState {
    pub backend: Backend,
    /// Each command-stream write, in order.
    pub writes: Vec<Vec<u8>>,
    /// `(label, winsize)` from the last negotiation.
    pub negotiated: Option<(String, String)>,
    pub attach_calls: usize,
    pub query_calls: usize,
    /// Reply to the next queries.  Shorter than 144 bytes to simulate a
    /// short read.
    pub info: Vec<u8>,
    /// Number of upcoming writes that fail.
    pub failing_writes: usize,
    /// When set, every write fails.
    pub writes_broken: bool,
    pub snarf: Vec<u8>,
    pub label: Option<String>,
    pub mouse_events: VecDeque<MouseEvent>,
    pub keys: VecDeque<char>,
    /// When set, the keyboard fails with an I/O error instead of reaching
    /// end of stream once `keys` is exhausted.
    pub keyboard_fault: bool,
    pub close_calls: usize,
    pub closed: bool,
}

/// A recording, scriptable [`Transport`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// The info block a mock replies with by default: a 640x480 XRGB32 window.
pub fn default_info(root_id: u32) -> Vec<u8> {
    InfoBlock {
        id: root_id as i32,
        chan: Pix::XRGB32.0 as i32,
        pix_text: "x8r8g8b8".into(),
        pix: Pix::XRGB32,
        repl: false,
        r: Rect::new(0, 0, 640, 480),
        clipr: Rect::new(0, 0, 640, 480),
    }
    .encode()
    .to_vec()
}

impl MockTransport {
    /// A mock of the socket backend.
    pub fn new() -> Self {
        Self::with_backend(Backend::Socket)
    }

    /// A mock of the device-file backend.
    pub fn device_files() -> Self {
        Self::with_backend(Backend::DeviceFiles)
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                backend,
                writes: Vec::new(),
                negotiated: None,
                attach_calls: 0,
                query_calls: 0,
                info: default_info(backend.root_image_id()),
                failing_writes: 0,
                writes_broken: false,
                snarf: Vec::new(),
                label: None,
                mouse_events: VecDeque::new(),
                keys: VecDeque::new(),
                keyboard_fault: false,
                close_calls: 0,
                closed: false,
            })),
        }
    }

    /// Locks the recorded state for inspection or scripting.
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of every write so far.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// Total bytes written so far.
    pub fn bytes_written(&self) -> usize {
        self.state().writes.iter().map(Vec::len).sum()
    }

    /// Forgets the writes recorded so far.
    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.state().failing_writes = n;
    }

    pub fn set_writes_broken(&self, broken: bool) {
        self.state().writes_broken = broken;
    }

    pub fn set_info(&self, info: Vec<u8>) {
        self.state().info = info;
    }

    pub fn push_mouse(&self, event: MouseEvent) {
        self.state().mouse_events.push_back(event);
    }

    pub fn push_keys(&self, keys: &str) {
        self.state().keys.extend(keys.chars());
    }

    pub fn set_keyboard_fault(&self, fault: bool) {
        self.state().keyboard_fault = fault;
    }
}

impl Transport for MockTransport {
    fn backend(&self) -> Backend {
        self.state().backend
    }

    fn negotiate(&mut self, label: &str, winsize: &str) -> Result<(), TransportError> {
        self.state().negotiated = Some((label.to_string(), winsize.to_string()));
        Ok(())
    }

    fn attach_window(&mut self) -> Result<(), TransportError> {
        self.state().attach_calls += 1;
        Ok(())
    }

    fn query(&mut self) -> Result<[u8; INFO_SIZE], TransportError> {
        let mut state = self.state();
        state.query_calls += 1;
        if state.info.len() < INFO_SIZE {
            return Err(TransportError::ShortRead {
                expected: INFO_SIZE,
                got: state.info.len(),
            });
        }
        let mut block = [0u8; INFO_SIZE];
        block.copy_from_slice(&state.info[..INFO_SIZE]);
        Ok(block)
    }

    fn write_draw(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.writes_broken {
            return Err(TransportError::Server("mock write failure".into()));
        }
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(TransportError::Server("mock write failure".into()));
        }
        state.writes.push(data.to_vec());
        Ok(data.len())
    }

    fn read_draw(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let state = self.state();
        let n = state.info.len().min(buf.len());
        buf[..n].copy_from_slice(&state.info[..n]);
        Ok(n)
    }

    fn read_snarf(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(self.state().snarf.clone())
    }

    fn write_snarf(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.state().snarf = data.to_vec();
        Ok(())
    }

    fn set_label(&mut self, label: &str) -> Result<(), TransportError> {
        self.state().label = Some(label.to_string());
        Ok(())
    }

    fn mouse(&mut self) -> Result<Box<dyn MouseSource>, TransportError> {
        Ok(Box::new(MockInput {
            state: Arc::clone(&self.state),
        }))
    }

    fn keyboard(&mut self) -> Result<Box<dyn KeySource>, TransportError> {
        Ok(Box::new(MockInput {
            state: Arc::clone(&self.state),
        }))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.close_calls += 1;
        state.closed = true;
        Ok(())
    }
}

/// Replays scripted mouse events and keystrokes, then reaches end of stream.
struct MockInput {
    state: Arc<Mutex<MockState>>,
}

impl MockInput {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MouseSource for MockInput {
    fn read_mouse(&mut self) -> Result<MouseEvent, TransportError> {
        self.state().mouse_events.pop_front().ok_or(TransportError::Eof)
    }
}

impl KeySource for MockInput {
    fn read_key(&mut self) -> Result<char, TransportError> {
        let mut state = self.state();
        match state.keys.pop_front() {
            Some(c) => Ok(c),
            None if state.keyboard_fault => Err(TransportError::Io(std::io::Error::other(
                "mock keyboard fault",
            ))),
            None => Err(TransportError::Eof),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failing_writes_are_counted_down() {
        // Arrange
        let mut mock = MockTransport::new();
        mock.fail_next_writes(2);

        // Act
        let results: Vec<bool> = (0..3).map(|_| mock.write_draw(b"x").is_ok()).collect();

        // Assert
        assert_eq!(results, vec![false, false, true]);
        assert_eq!(mock.writes(), vec![b"x".to_vec()]);
    }

    #[test]
    fn test_short_info_is_short_read() {
        let mut mock = MockTransport::new();
        mock.set_info(vec![b' '; 10]);
        assert!(matches!(
            mock.query(),
            Err(TransportError::ShortRead { expected: INFO_SIZE, got: 10 })
        ));
    }

    #[test]
    fn test_clones_share_recorded_state() {
        let mock = MockTransport::new();
        let mut boxed: Box<dyn Transport> = Box::new(mock.clone());
        boxed.write_draw(b"abc").unwrap();
        assert_eq!(mock.bytes_written(), 3);
    }
}
