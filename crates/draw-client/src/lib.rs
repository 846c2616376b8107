//! draw-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the demo binary in `main.rs` share the same module tree.
//!
//! # What does draw-client do? (for beginners)
//!
//! A draw server owns a window and every pixel in it.  A client never
//! touches pixels; it sends the server a compact command stream ("allocate
//! image 7 on screen 3", "make it visible") and reads back small replies.
//! Keyboard and mouse input and the clipboard travel over separate channels.
//!
//! This crate is the client half:
//!
//! 1. Connects to the server through one of two backends: a device-file
//!    tree or a Unix socket.
//! 2. Sets up a session ([`Display`]): discovers the root image, allocates
//!    stock colors, a screen, and a window.
//! 3. Batches commands into a buffer and flushes them, optionally making
//!    the result visible.
//! 4. Allocates and frees images, screens, and windows, retrying screen ids
//!    the server rejects.
//! 5. Pumps keystrokes onto a bounded queue and serves mouse reads on demand.

/// Application layer: the session and its use cases.
pub mod application;

/// Infrastructure layer: transport backends and configuration.
pub mod infrastructure;

pub use application::display::{Display, DrawError, SessionOptions};
pub use application::keyboard::Keyboardctl;
pub use application::mouse::Mousectl;
pub use application::resources::{Image, Screen};
pub use application::transport::{Backend, Transport, TransportError};
pub use infrastructure::transport::NativeTransport;

use infrastructure::config::DrawConfig;

/// Establishes the backend this build uses and sets up a session on it.
///
/// # Errors
///
/// [`DrawError::Connection`] if the server cannot be reached, otherwise
/// whatever [`Display::init_with_options`] returns.
pub fn connect(config: &DrawConfig) -> Result<Display, DrawError> {
    let transport = establish(config).map_err(DrawError::Connection)?;
    let session = &config.session;
    Display::init_with_options(
        Box::new(transport),
        &session.label,
        session.width,
        session.height,
        &SessionOptions::from(session),
    )
}

#[cfg(feature = "devfs")]
fn establish(config: &DrawConfig) -> Result<NativeTransport, TransportError> {
    NativeTransport::establish(&config.backend.dev_root)
}

#[cfg(not(feature = "devfs"))]
fn establish(config: &DrawConfig) -> Result<NativeTransport, TransportError> {
    match &config.backend.socket_path {
        Some(path) => NativeTransport::establish(path),
        None => NativeTransport::establish(infrastructure::transport::socket::default_socket_path()),
    }
}
