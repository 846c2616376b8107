//! Keyboard event pump.
//!
//! A dedicated thread reads characters from the transport's keyboard
//! endpoint and forwards them onto a bounded queue.  The pump blocks when the
//! queue is full, so no keystroke is dropped.
//!
//! ```text
//! KeySource ──read_key──> pump thread ──blocking_send──> Keyboardctl::recv
//!                              │
//!                              └── end of stream ──try_send──> exit notification
//! ```
//!
//! End of stream (or the transport being closed under the pump) stops the
//! pump and signals the session's exit notification once.  Any other read
//! error is fatal: it is logged and the pump thread panics, which
//! [`Keyboardctl::join`] reports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::application::display::{Display, DrawError};
use crate::application::transport::{KeySource, TransportError};

/// Capacity of the keyboard delivery queue.
pub const KEYBOARD_QUEUE_CAPACITY: usize = 20;

/// Lifecycle of an input pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Running,
    Stopped,
}

/// The consumer side of the keyboard pump.
pub struct Keyboardctl {
    rx: mpsc::Receiver<char>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Keyboardctl {
    /// Starts a pump reading from `source`.  `exit` is signalled once when
    /// the source reaches end of stream.
    pub fn spawn(source: Box<dyn KeySource>, exit: mpsc::Sender<()>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel(KEYBOARD_QUEUE_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("draw-keyboard".into())
            .spawn(move || kbdproc(source, tx, exit, flag))?;
        Ok(Self {
            rx,
            running,
            handle: Some(handle),
        })
    }

    /// Waits for the next character.  Returns `None` once the pump has
    /// stopped and the queue is drained.
    pub async fn recv(&mut self) -> Option<char> {
        self.rx.recv().await
    }

    /// Blocking variant of [`recv`](Keyboardctl::recv) for callers outside
    /// an async runtime.
    pub fn blocking_recv(&mut self) -> Option<char> {
        self.rx.blocking_recv()
    }

    pub fn state(&self) -> PumpState {
        if self.running.load(Ordering::Acquire) {
            PumpState::Running
        } else {
            PumpState::Stopped
        }
    }

    /// Waits for the pump thread to finish.
    ///
    /// # Errors
    ///
    /// Returns the panic payload if the pump hit a fatal read error.
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

fn kbdproc(
    mut source: Box<dyn KeySource>,
    tx: mpsc::Sender<char>,
    exit: mpsc::Sender<()>,
    running: Arc<AtomicBool>,
) {
    loop {
        match source.read_key() {
            Ok(c) => {
                if tx.blocking_send(c).is_err() {
                    debug!("keyboard queue dropped; stopping pump");
                    break;
                }
            }
            Err(TransportError::Eof | TransportError::Closed) => {
                info!("keyboard reached end of stream");
                running.store(false, Ordering::Release);
                if exit.try_send(()).is_err() {
                    debug!("exit notification already pending");
                }
                return;
            }
            Err(e) => {
                error!("keyboard read failed: {e}");
                running.store(false, Ordering::Release);
                panic!("keyboard read failed: {e}");
            }
        }
    }
    running.store(false, Ordering::Release);
}

impl Display {
    /// Starts the keyboard pump.
    pub fn init_keyboard(&self) -> Result<Keyboardctl, DrawError> {
        let source = self.lock()?.transport.keyboard()?;
        Keyboardctl::spawn(source, self.shared.exit_tx.clone())
            .map_err(|e| DrawError::Transport(TransportError::Io(e)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    struct ScriptedKeys {
        keys: VecDeque<char>,
        tail: fn() -> TransportError,
    }

    impl KeySource for ScriptedKeys {
        fn read_key(&mut self) -> Result<char, TransportError> {
            self.keys.pop_front().ok_or_else(self.tail)
        }
    }

    fn scripted(keys: &str, tail: fn() -> TransportError) -> Box<dyn KeySource> {
        Box::new(ScriptedKeys {
            keys: keys.chars().collect(),
            tail,
        })
    }

    #[test]
    fn test_pump_forwards_keys_then_signals_exit_once() {
        // Arrange
        let (exit_tx, mut exit_rx) = mpsc::channel(1);

        // Act
        let mut kbd = Keyboardctl::spawn(scripted("héllo", || TransportError::Eof), exit_tx).unwrap();
        let mut got = String::new();
        while let Some(c) = kbd.blocking_recv() {
            got.push(c);
        }

        // Assert
        assert_eq!(got, "héllo");
        assert_eq!(kbd.state(), PumpState::Stopped);
        assert!(exit_rx.try_recv().is_ok());
        assert!(exit_rx.try_recv().is_err());
        assert!(kbd.join().is_ok());
    }

    #[test]
    fn test_pump_applies_backpressure_without_dropping() {
        // Arrange: more keys than the queue holds
        let keys: String = std::iter::repeat('k').take(KEYBOARD_QUEUE_CAPACITY * 3).collect();
        let (exit_tx, _exit_rx) = mpsc::channel(1);
        let mut kbd = Keyboardctl::spawn(scripted(&keys, || TransportError::Eof), exit_tx).unwrap();

        // Act
        let mut count = 0;
        while kbd.blocking_recv().is_some() {
            count += 1;
        }

        // Assert
        assert_eq!(count, KEYBOARD_QUEUE_CAPACITY * 3);
    }

    #[test]
    fn test_pump_read_error_is_fatal() {
        // Arrange
        let (exit_tx, mut exit_rx) = mpsc::channel(1);
        let fault = || TransportError::Io(std::io::Error::other("device gone"));

        // Act
        let mut kbd = Keyboardctl::spawn(scripted("a", fault), exit_tx).unwrap();
        assert_eq!(kbd.blocking_recv(), Some('a'));
        assert_eq!(kbd.blocking_recv(), None);

        // Assert
        assert!(kbd.join().is_err());
        assert!(exit_rx.try_recv().is_err());
    }
}
