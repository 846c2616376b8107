//! Socket backend.
//!
//! The draw server runs as its own process and listens on a Unix socket in
//! the user's namespace directory.  Every interaction is a tagged
//! request/reply pair framed by [`draw_core::protocol::wsysmsg`].
//!
//! # Multiplexing
//!
//! The session, the mouse reader, and the keyboard pump all issue requests
//! concurrently over the one socket.  A reader thread owns the receiving half
//! and routes each reply to the caller waiting on its tag:
//!
//! ```text
//! caller ──rpc──> [tag 7 registered] ──frame──> socket
//!                                                  │
//! caller <──channel── reader thread <──reply tag 7─┘
//! ```
//!
//! When the connection drops, the reader thread releases every waiting
//! caller, and later calls fail straight away.

use std::collections::HashMap;
use std::env;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use draw_core::protocol::commands::OP_INFO;
use draw_core::protocol::wsysmsg::{
    decode_wsysmsg, encode_wsysmsg, Body, MessageType, Wsysmsg, FRAME_HEADER_SIZE, MAX_FRAME_SIZE,
};
use draw_core::{MouseEvent, ProtocolError, INFO_SIZE};
use tracing::{debug, info, trace, warn};

use crate::application::transport::{Backend, KeySource, MouseSource, Transport, TransportError};

/// File name of the server socket inside the namespace directory.
pub const SOCKET_NAME: &str = "devdraw";

/// Returns the namespace directory: `$NAMESPACE`, else
/// `/tmp/ns.$USER.$DISPLAY`.
pub fn namespace_dir() -> PathBuf {
    if let Some(ns) = env::var_os("NAMESPACE").filter(|v| !v.is_empty()) {
        return PathBuf::from(ns);
    }
    let user = env::var("USER").unwrap_or_else(|_| "none".to_string());
    let display = env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_string());
    PathBuf::from(format!("/tmp/ns.{user}.{display}"))
}

/// Default socket path: `<namespace>/devdraw`.
pub fn default_socket_path() -> PathBuf {
    namespace_dir().join(SOCKET_NAME)
}

type Reply = Result<Wsysmsg, TransportError>;

#[derive(Default)]
struct Pending {
    waiting: HashMap<u8, mpsc::Sender<Reply>>,
    next_tag: u8,
    closed: bool,
}

impl Pending {
    /// Finds a tag with no request in flight.  Tag 0 is never used.
    fn free_tag(&mut self) -> Option<u8> {
        for _ in 0..u8::MAX {
            self.next_tag = self.next_tag.wrapping_add(1).max(1);
            if !self.waiting.contains_key(&self.next_tag) {
                return Some(self.next_tag);
            }
        }
        None
    }
}

/// Request/reply multiplexer shared by the transport and its input sources.
struct Mux {
    writer: Mutex<UnixStream>,
    pending: Mutex<Pending>,
    tag_freed: Condvar,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Mux {
    /// Sends `body` and blocks until its reply arrives.
    fn rpc(&self, body: Body) -> Result<Body, TransportError> {
        let Some(expected) = body.reply_type() else {
            return Err(ProtocolError::MalformedPayload(format!(
                "{:?} is not a request",
                body.message_type()
            ))
            .into());
        };

        let (tx, rx) = mpsc::channel();
        let tag = {
            let mut pending = lock(&self.pending);
            loop {
                if pending.closed {
                    return Err(TransportError::Closed);
                }
                if let Some(tag) = pending.free_tag() {
                    pending.waiting.insert(tag, tx);
                    break tag;
                }
                pending = self
                    .tag_freed
                    .wait(pending)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let frame = encode_wsysmsg(&Wsysmsg::new(tag, body));
        trace!(tag, ?expected, bytes = frame.len(), "rpc request");
        if let Err(e) = lock(&self.writer).write_all(&frame) {
            self.release(tag);
            return Err(e.into());
        }

        let reply = match rx.recv() {
            Ok(reply) => reply?,
            // The reader thread dropped every waiter: connection lost.
            Err(_) => return Err(TransportError::Eof),
        };
        match reply.body {
            Body::Rerror(msg) => Err(TransportError::Server(msg)),
            body if body.message_type() == expected => Ok(body),
            body => Err(TransportError::UnexpectedReply {
                expected,
                got: body.message_type(),
            }),
        }
    }

    fn release(&self, tag: u8) {
        lock(&self.pending).waiting.remove(&tag);
        self.tag_freed.notify_one();
    }

    /// Delivers one reply to the caller waiting on `tag`.
    fn route(&self, tag: u8, reply: Reply) {
        let waiter = lock(&self.pending).waiting.remove(&tag);
        self.tag_freed.notify_one();
        match waiter {
            Some(tx) => {
                // The caller may have given up; nothing to do then.
                let _ = tx.send(reply);
            }
            None => warn!(tag, "reply for a tag with no request in flight"),
        }
    }

    /// Fails every waiting and future call.
    fn shut(&self) {
        let mut pending = lock(&self.pending);
        pending.closed = true;
        pending.waiting.clear();
        self.tag_freed.notify_all();
    }
}

/// Reads one frame.  Returns `Ok(None)` at a clean end of stream.
fn read_frame(stream: &mut UnixStream) -> io::Result<Option<Vec<u8>>> {
    let mut size = [0u8; 4];
    match stream.read_exact(&mut size) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(size) as usize;
    if !(FRAME_HEADER_SIZE..=MAX_FRAME_SIZE).contains(&len) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame size {len} out of range"),
        ));
    }
    let mut frame = vec![0u8; len];
    frame[..4].copy_from_slice(&size);
    stream.read_exact(&mut frame[4..])?;
    Ok(Some(frame))
}

fn reader_loop(mux: Arc<Mux>, mut stream: UnixStream) {
    loop {
        match read_frame(&mut stream) {
            Ok(Some(frame)) => {
                // The tag is at a fixed offset even when the body is bad.
                let tag = frame[5];
                let reply = decode_wsysmsg(&frame)
                    .map(|(msg, _)| msg)
                    .map_err(TransportError::from);
                mux.route(tag, reply);
            }
            Ok(None) => {
                debug!("draw server closed the connection");
                break;
            }
            Err(e) => {
                debug!("draw connection read failed: {e}");
                break;
            }
        }
    }
    mux.shut();
}

/// A connection to a draw server process over a Unix socket.
pub struct SocketTransport {
    mux: Arc<Mux>,
    stream: UnixStream,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

impl SocketTransport {
    /// Connects to the server socket at `path`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Connect`] if the socket cannot be reached.
    pub fn establish(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "connected to draw server");
        Self::from_stream(stream)
    }

    /// Wraps an already connected stream and starts the reply reader.
    pub fn from_stream(stream: UnixStream) -> Result<Self, TransportError> {
        let reader_half = stream.try_clone()?;
        let writer_half = stream.try_clone()?;
        let mux = Arc::new(Mux {
            writer: Mutex::new(writer_half),
            pending: Mutex::new(Pending::default()),
            tag_freed: Condvar::new(),
        });
        let reader_mux = Arc::clone(&mux);
        let reader = thread::Builder::new()
            .name("draw-mux".into())
            .spawn(move || reader_loop(reader_mux, reader_half))?;
        Ok(Self {
            mux,
            stream,
            reader: Some(reader),
            closed: false,
        })
    }
}

impl Transport for SocketTransport {
    fn backend(&self) -> Backend {
        Backend::Socket
    }

    fn negotiate(&mut self, label: &str, winsize: &str) -> Result<(), TransportError> {
        self.mux.rpc(Body::Tinit {
            winsize: winsize.to_string(),
            label: label.to_string(),
        })?;
        Ok(())
    }

    fn attach_window(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn query(&mut self) -> Result<[u8; INFO_SIZE], TransportError> {
        self.write_draw(&OP_INFO)?;
        let mut block = [0u8; INFO_SIZE];
        let got = self.read_draw(&mut block)?;
        if got < INFO_SIZE {
            return Err(TransportError::ShortRead {
                expected: INFO_SIZE,
                got,
            });
        }
        Ok(block)
    }

    fn write_draw(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        match self.mux.rpc(Body::Twrdraw(data.to_vec()))? {
            Body::Rwrdraw { count } => Ok(count as usize),
            other => Err(unexpected(MessageType::Rwrdraw, &other)),
        }
    }

    fn read_draw(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let count = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        match self.mux.rpc(Body::Trddraw { count })? {
            Body::Rrddraw(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            other => Err(unexpected(MessageType::Rrddraw, &other)),
        }
    }

    fn read_snarf(&mut self) -> Result<Vec<u8>, TransportError> {
        match self.mux.rpc(Body::Trdsnarf)? {
            Body::Rrdsnarf(data) => Ok(data),
            other => Err(unexpected(MessageType::Rrdsnarf, &other)),
        }
    }

    fn write_snarf(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.mux.rpc(Body::Twrsnarf(data.to_vec()))?;
        Ok(())
    }

    fn set_label(&mut self, label: &str) -> Result<(), TransportError> {
        self.mux.rpc(Body::Tlabel(label.to_string()))?;
        Ok(())
    }

    fn mouse(&mut self) -> Result<Box<dyn MouseSource>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(Box::new(SocketMouse {
            mux: Arc::clone(&self.mux),
        }))
    }

    fn keyboard(&mut self) -> Result<Box<dyn KeySource>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(Box::new(SocketKeys {
            mux: Arc::clone(&self.mux),
        }))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.mux.shut();
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("draw reply reader panicked");
            }
        }
        debug!("closed draw socket");
        Ok(())
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("closing draw socket on drop: {e}");
        }
    }
}

fn unexpected(expected: MessageType, got: &Body) -> TransportError {
    TransportError::UnexpectedReply {
        expected,
        got: got.message_type(),
    }
}

struct SocketMouse {
    mux: Arc<Mux>,
}

impl MouseSource for SocketMouse {
    fn read_mouse(&mut self) -> Result<MouseEvent, TransportError> {
        match self.mux.rpc(Body::Trdmouse)? {
            Body::Rrdmouse { mouse, resized } => Ok(MouseEvent { mouse, resized }),
            other => Err(unexpected(MessageType::Rrdmouse, &other)),
        }
    }
}

struct SocketKeys {
    mux: Arc<Mux>,
}

impl KeySource for SocketKeys {
    fn read_key(&mut self) -> Result<char, TransportError> {
        match self.mux.rpc(Body::Trdkbd)? {
            Body::Rrdkbd(rune) => {
                Ok(char::from_u32(u32::from(rune)).unwrap_or(char::REPLACEMENT_CHARACTER))
            }
            other => Err(unexpected(MessageType::Rrdkbd, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use draw_core::{InfoBlock, Mouse, Pix, Point, Rect};

    use super::*;

    /// Serves requests on the far end of a socket pair with `handler` until
    /// it returns `None`, then hangs up.
    fn serve<F>(mut handler: F) -> (SocketTransport, thread::JoinHandle<Vec<Body>>)
    where
        F: FnMut(&Body) -> Option<Body> + Send + 'static,
    {
        let (client, mut server) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            while let Ok(Some(frame)) = read_frame(&mut server) {
                let (msg, _) = decode_wsysmsg(&frame).unwrap();
                let reply = handler(&msg.body);
                seen.push(msg.body);
                match reply {
                    Some(body) => {
                        let out = encode_wsysmsg(&Wsysmsg::new(msg.tag, body));
                        server.write_all(&out).unwrap();
                    }
                    None => break,
                }
            }
            seen
        });
        (SocketTransport::from_stream(client).unwrap(), handle)
    }

    fn info_block() -> [u8; INFO_SIZE] {
        InfoBlock {
            id: 0,
            chan: Pix::XRGB32.0 as i32,
            pix_text: "x8r8g8b8".into(),
            pix: Pix::XRGB32,
            repl: false,
            r: Rect::new(0, 0, 640, 480),
            clipr: Rect::new(0, 0, 640, 480),
        }
        .encode()
    }

    // ── Requests ──────────────────────────────────────────────────────────

    #[test]
    fn test_negotiate_sends_tinit() {
        // Arrange
        let (mut transport, server) = serve(|body| match body {
            Body::Tinit { .. } => Some(Body::Rinit),
            _ => None,
        });

        // Act
        transport.negotiate("demo", "640x502").unwrap();
        transport.close().unwrap();

        // Assert
        let seen = server.join().unwrap();
        assert_eq!(
            seen[0],
            Body::Tinit {
                winsize: "640x502".into(),
                label: "demo".into()
            }
        );
    }

    #[test]
    fn test_query_writes_info_request_then_reads_block() {
        // Arrange
        let (mut transport, server) = serve(|body| match body {
            Body::Twrdraw(data) => Some(Body::Rwrdraw {
                count: data.len() as u32,
            }),
            Body::Trddraw { .. } => Some(Body::Rrddraw(info_block().to_vec())),
            _ => None,
        });

        // Act
        let block = transport.query().unwrap();
        transport.close().unwrap();

        // Assert
        assert_eq!(block, info_block());
        let seen = server.join().unwrap();
        assert_eq!(seen[0], Body::Twrdraw(b"JI".to_vec()));
        assert_eq!(seen[1], Body::Trddraw { count: INFO_SIZE as u32 });
    }

    #[test]
    fn test_short_info_reply_is_short_read() {
        let (mut transport, _server) = serve(|body| match body {
            Body::Twrdraw(data) => Some(Body::Rwrdraw {
                count: data.len() as u32,
            }),
            Body::Trddraw { .. } => Some(Body::Rrddraw(vec![b' '; 100])),
            _ => None,
        });
        assert!(matches!(
            transport.query(),
            Err(TransportError::ShortRead { expected: INFO_SIZE, got: 100 })
        ));
    }

    #[test]
    fn test_server_error_is_reported() {
        let (mut transport, _server) = serve(|_| Some(Body::Rerror("no such label".into())));
        match transport.set_label("x") {
            Err(TransportError::Server(msg)) => assert_eq!(msg, "no such label"),
            other => panic!("expected Server error, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_reply_type_is_rejected() {
        let (mut transport, _server) = serve(|_| Some(Body::Rlabel));
        assert!(matches!(
            transport.read_snarf(),
            Err(TransportError::UnexpectedReply {
                expected: MessageType::Rrdsnarf,
                got: MessageType::Rlabel
            })
        ));
    }

    // ── Input sources ─────────────────────────────────────────────────────

    #[test]
    fn test_mouse_and_keyboard_requests() {
        // Arrange
        let (mut transport, _server) = serve(|body| match body {
            Body::Trdmouse => Some(Body::Rrdmouse {
                mouse: Mouse {
                    point: Point::new(3, 4),
                    buttons: 1,
                    msec: 99,
                },
                resized: true,
            }),
            Body::Trdkbd => Some(Body::Rrdkbd(0x263A)),
            _ => None,
        });
        let mut mouse = transport.mouse().unwrap();
        let mut keys = transport.keyboard().unwrap();

        // Act
        let event = mouse.read_mouse().unwrap();
        let key = keys.read_key().unwrap();

        // Assert
        assert_eq!(event.mouse.point, Point::new(3, 4));
        assert!(event.resized);
        assert_eq!(key, '\u{263A}');
    }

    #[test]
    fn test_hangup_fails_pending_and_later_calls() {
        // Arrange: the server hangs up on the first request
        let (mut transport, server) = serve(|_| None);
        let mut keys = transport.keyboard().unwrap();

        // Act
        let first = keys.read_key();
        server.join().unwrap();
        let later = transport.read_snarf();

        // Assert: a later call may also see the broken pipe before the
        // reader notices the hangup
        assert!(matches!(first, Err(TransportError::Eof)));
        assert!(later.is_err());
    }

    #[test]
    fn test_close_unblocks_waiting_reader() {
        // Arrange: the server never answers keyboard requests
        let (client, _server) = UnixStream::pair().unwrap();
        let mut transport = SocketTransport::from_stream(client).unwrap();
        let mut keys = transport.keyboard().unwrap();
        let waiter = thread::spawn(move || keys.read_key());

        // Act
        thread::sleep(std::time::Duration::from_millis(50));
        transport.close().unwrap();
        transport.close().unwrap();

        // Assert
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(TransportError::Eof | TransportError::Closed)));
    }

    #[test]
    fn test_concurrent_requests_get_their_own_replies() {
        // Arrange
        let (mut transport, _server) = serve(|body| match body {
            Body::Trdkbd => Some(Body::Rrdkbd(u16::from(b'k'))),
            Body::Trdsnarf => Some(Body::Rrdsnarf(b"clip".to_vec())),
            _ => None,
        });
        let mut keys = transport.keyboard().unwrap();
        let typist = thread::spawn(move || (0..20).map(|_| keys.read_key().unwrap()).collect::<String>());

        // Act
        let clips: Vec<Vec<u8>> = (0..20).map(|_| transport.read_snarf().unwrap()).collect();

        // Assert
        assert_eq!(typist.join().unwrap(), "k".repeat(20));
        assert!(clips.iter().all(|c| c == b"clip"));
    }

    #[test]
    fn test_namespace_socket_path_ends_with_devdraw() {
        assert!(default_socket_path().ends_with(SOCKET_NAME));
    }

    #[test]
    fn test_free_tag_skips_zero_and_busy_tags() {
        // Arrange
        let mut pending = Pending::default();
        let (tx, _rx) = mpsc::channel();
        pending.waiting.insert(1, tx);

        // Act
        let tag = pending.free_tag();

        // Assert
        assert_eq!(tag, Some(2));
    }
}
