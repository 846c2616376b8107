//! The seam between the session engine and the draw server.
//!
//! A [`Transport`] carries everything the session exchanges with the server:
//! the buffered command stream, the 144-byte info query, clipboard traffic,
//! and the window label.  Two implementations live in the infrastructure
//! layer, one per way of reaching a server:
//!
//! | Backend | Reached through | Root image id | Border inset |
//! |---------|-----------------|---------------|--------------|
//! | [`Backend::DeviceFiles`] | `/dev/draw`, `/dev/mouse`, `/dev/cons` | 1 | 4 |
//! | [`Backend::Socket`] | tagged messages over a Unix socket | 0 | 0 |
//!
//! Mouse and keyboard input are handed out as separate endpoints
//! ([`MouseSource`], [`KeySource`]) so that a reader blocked waiting for the
//! next event never holds the session lock.

use std::io;
use std::path::PathBuf;

use draw_core::protocol::wsysmsg::MessageType;
use draw_core::{MouseEvent, ProtocolError, INFO_SIZE};
use thiserror::Error;

/// Errors raised by a transport backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An endpoint could not be opened while establishing the connection.
    #[error("failed to connect to draw server at {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A fixed-size reply came back shorter than required.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// The endpoint reached end of stream.
    #[error("end of stream")]
    Eof,

    /// The transport was closed locally.
    #[error("transport closed")]
    Closed,

    /// The server answered a request with an error message.
    #[error("draw server error: {0}")]
    Server(String),

    /// An I/O error on an established endpoint.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// A reply could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered with a reply of the wrong type.
    #[error("unexpected reply: expected {expected:?}, got {got:?}")]
    UnexpectedReply {
        expected: MessageType,
        got: MessageType,
    },
}

/// Which kind of server a transport talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// A device-file tree (`/dev/draw/...`), as exported by a windowing
    /// system that draws window borders itself.
    DeviceFiles,
    /// A display server process reached over a Unix socket.
    Socket,
}

impl Backend {
    /// The id the server gives the root image of a freshly attached window.
    pub fn root_image_id(self) -> u32 {
        match self {
            Backend::DeviceFiles => 1,
            Backend::Socket => 0,
        }
    }

    /// Width of the window border that the reported rectangles include.
    pub fn border_inset(self) -> i32 {
        match self {
            Backend::DeviceFiles => 4,
            Backend::Socket => 0,
        }
    }
}

/// A blocking source of mouse events.
pub trait MouseSource: Send {
    /// Blocks until the next mouse event arrives.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Eof`] once the source is exhausted.
    fn read_mouse(&mut self) -> Result<MouseEvent, TransportError>;
}

/// A blocking source of keyboard characters.
pub trait KeySource: Send {
    /// Blocks until the next character arrives.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Eof`] once the source is exhausted.
    fn read_key(&mut self) -> Result<char, TransportError>;
}

/// Connection to a draw server.
///
/// Methods take `&mut self`: the session serialises every call behind its
/// own lock, and command-stream writes must reach the server in the order
/// the session buffered them.
pub trait Transport: Send {
    /// The kind of server on the other end.
    fn backend(&self) -> Backend;

    /// Announces the client's label and preferred window size (`"<w>x<h>"`).
    fn negotiate(&mut self, label: &str, winsize: &str) -> Result<(), TransportError>;

    /// Binds the connection to the window the client runs in.
    fn attach_window(&mut self) -> Result<(), TransportError>;

    /// Fetches the info block describing the current root image.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ShortRead`] when fewer than [`INFO_SIZE`]
    /// bytes arrive.
    fn query(&mut self) -> Result<[u8; INFO_SIZE], TransportError>;

    /// Writes a batch of commands.  Returns the number of bytes accepted.
    fn write_draw(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Reads a reply from the command stream into `buf`.
    fn read_draw(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Reads the whole clipboard.
    fn read_snarf(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Replaces the whole clipboard.
    fn write_snarf(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Sets the window label.
    fn set_label(&mut self, label: &str) -> Result<(), TransportError>;

    /// Opens an independent mouse endpoint.
    fn mouse(&mut self) -> Result<Box<dyn MouseSource>, TransportError>;

    /// Opens an independent keyboard endpoint.
    fn keyboard(&mut self) -> Result<Box<dyn KeySource>, TransportError>;

    /// Releases every endpoint.  Calling it again is a no-op.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Converts an error from a mouse-record reader into a [`TransportError`],
/// unwrapping the [`ProtocolError`] a malformed record carries.
pub(crate) fn mouse_read_error(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => TransportError::Eof,
        io::ErrorKind::InvalidData => {
            let kind = e.kind();
            match e.into_inner().map(|inner| inner.downcast::<ProtocolError>()) {
                Some(Ok(protocol)) => TransportError::Protocol(*protocol),
                Some(Err(other)) => TransportError::Io(io::Error::new(kind, other)),
                None => TransportError::Io(kind.into()),
            }
        }
        _ => TransportError::Io(e),
    }
}
