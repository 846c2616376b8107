//! The draw session: command buffering, flushing, setup, and re-attach.
//!
//! # Locking
//!
//! A [`Display`] is a cheap, cloneable handle onto one session.  Every public
//! method locks the session mutex for its whole duration; the internal
//! [`SessionState`] methods take `&mut self` and never lock.  Commands are
//! only appended to the buffer while the lock is held, so they reach the
//! server in the order they were buffered.
//!
//! # Buffering
//!
//! Commands accumulate in a byte buffer of `buffer_size` bytes (plus a few
//! bytes of slack for the trailing visibility marker).  A reservation that
//! would overflow the buffer flushes it first.  A visible flush appends `'v'`
//! so the server makes the changes visible; a non-visible flush only writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use draw_core::protocol::commands::OP_VISIBLE;
use draw_core::protocol::ResourceIds;
use draw_core::{Color, InfoBlock, Pix, ProtocolError, Rect, Refresh};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::application::resources::{Image, Screen};
use crate::application::transport::{Backend, Transport, TransportError};

/// Default command buffer threshold in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 10_000;

/// Extra buffer capacity reserved for the visibility marker.
const BUFFER_SLACK: usize = 5;

/// DPI at or below which [`Display::scale`] is the identity.
pub const DEFAULT_DPI: i32 = 133;

/// Height the window manager adds for the title bar when sizing a new window.
const TITLE_BAR_HEIGHT: u32 = 22;

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum DrawError {
    /// The transport could not be established.
    #[error("cannot connect to draw server: {0}")]
    Connection(#[source] TransportError),

    /// The server's info reply was shorter than an info block.
    #[error("short info from draw server: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// Two resources from different sessions were combined.
    #[error("{op}: resources belong to different displays")]
    DomainMismatch { op: &'static str },

    /// Every id tried for a new resource was rejected by the server.
    #[error("{op}: cannot find free id after {attempts} attempts")]
    AllocationExhausted { op: &'static str, attempts: u32 },

    /// Setting up the session failed; the transport has been closed.
    #[error("display setup failed: {0}")]
    Setup(#[source] Box<DrawError>),

    /// A previous attach failed and left the session inconsistent.
    #[error("display is unusable after a failed attach")]
    Unusable,

    /// The transport failed during an operation.
    #[error("draw transport: {0}")]
    Transport(#[source] TransportError),

    /// A reply could not be decoded.
    #[error("draw protocol: {0}")]
    Protocol(#[source] ProtocolError),
}

impl From<TransportError> for DrawError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::ShortRead { expected, got } => DrawError::ShortRead { expected, got },
            TransportError::Protocol(p) => DrawError::Protocol(p),
            other => DrawError::Transport(other),
        }
    }
}

impl From<ProtocolError> for DrawError {
    fn from(e: ProtocolError) -> Self {
        DrawError::Protocol(e)
    }
}

/// Identity of one session.  Resources remember the session that allocated
/// them so they cannot be combined across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    fn next() -> Self {
        SessionId(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }
}

/// Tunables applied when a session is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Command buffer threshold in bytes.
    pub buffer_size: usize,
    /// Screen resolution used by [`Display::scale`]; 0 when unknown.
    pub dpi: i32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            dpi: 0,
        }
    }
}

/// Mutable session state, guarded by the session mutex.
pub(crate) struct SessionState {
    pub(crate) session: SessionId,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) backend: Backend,
    pub(crate) buf: Vec<u8>,
    pub(crate) buffer_size: usize,
    pub(crate) ids: ResourceIds,
    pub(crate) image: Option<Image>,
    pub(crate) screen: Option<Screen>,
    pub(crate) screen_image: Option<Image>,
    pub(crate) white: Option<Image>,
    pub(crate) black: Option<Image>,
    /// Live image ids, mapped to the owning screen for windows.
    pub(crate) images: HashMap<u32, Option<u32>>,
    /// Window ids per screen, most recently allocated first.
    pub(crate) windows: HashMap<u32, Vec<u32>>,
    pub(crate) poisoned: bool,
    pub(crate) closed: bool,
}

impl SessionState {
    fn new(session: SessionId, transport: Box<dyn Transport>, buffer_size: usize) -> Self {
        let backend = transport.backend();
        Self {
            session,
            transport,
            backend,
            buf: Vec::with_capacity(buffer_size + BUFFER_SLACK),
            buffer_size,
            ids: ResourceIds::new(),
            image: None,
            screen: None,
            screen_image: None,
            white: None,
            black: None,
            images: HashMap::new(),
            windows: HashMap::new(),
            poisoned: false,
            closed: false,
        }
    }

    /// Reserves `n` bytes at the end of the buffer and returns their offset,
    /// flushing first when they would not fit.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the buffer threshold: no flush can make room.
    fn reserve(&mut self, n: usize) -> Result<usize, DrawError> {
        assert!(
            n <= self.buffer_size,
            "bad count in buffer reservation: {n} > {}",
            self.buffer_size
        );
        if self.buf.len() + n > self.buffer_size {
            self.flush_buffer()?;
        }
        let at = self.buf.len();
        self.buf.resize(at + n, 0);
        Ok(at)
    }

    /// Returns a writable slice of `n` freshly reserved buffer bytes.
    pub(crate) fn buf_image(&mut self, n: usize) -> Result<&mut [u8], DrawError> {
        let at = self.reserve(n)?;
        Ok(&mut self.buf[at..at + n])
    }

    /// Writes out the buffer.  The buffer is empty afterwards whether or not
    /// the write succeeded.
    pub(crate) fn flush_buffer(&mut self) -> Result<(), DrawError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let result = self.transport.write_draw(&self.buf);
        let len = self.buf.len();
        self.buf.clear();
        match result {
            Ok(_) => {
                debug!(bytes = len, "flushed command buffer");
                Ok(())
            }
            Err(e) => {
                error!("draw flush: {e}");
                Err(e.into())
            }
        }
    }

    pub(crate) fn flush(&mut self, visible: bool) -> Result<(), DrawError> {
        if visible {
            // The marker may use the slack beyond the threshold.
            self.buffer_size += 1;
            let reserved = self.reserve(1);
            self.buffer_size -= 1;
            let at = reserved?;
            self.buf[at] = OP_VISIBLE;
        }
        self.flush_buffer()
    }

    /// Attaches to the window and reads back the root image.
    fn query_root(&mut self) -> Result<Image, DrawError> {
        self.flush_buffer()?;
        self.transport.attach_window()?;
        let block = self.transport.query()?;
        let info = InfoBlock::parse(&block)?;
        let inset = self.backend.border_inset();
        let id = self.backend.root_image_id();
        self.ids.reserve_through(id);
        self.images.insert(id, None);
        debug!(id, r = %info.r, pix = %info.pix, "root image");
        Ok(Image {
            session: self.session,
            id,
            pix: info.pix,
            depth: info.pix.depth(),
            repl: info.repl,
            r: info.r.inset(inset),
            clipr: info.clipr.inset(inset),
            screen: None,
        })
    }

    /// Pixel format for new windows: that of the current screen image, or of
    /// the root image while the first window is being created.
    pub(crate) fn window_pix(&self) -> Pix {
        self.screen_image
            .as_ref()
            .or(self.image.as_ref())
            .map(|i| i.pix)
            .unwrap_or_default()
    }

    fn setup(&mut self, label: &str, width: u32, height: u32) -> Result<(), DrawError> {
        let winsize = format!("{}x{}", width, height.saturating_add(TITLE_BAR_HEIGHT));
        self.transport.negotiate(label, &winsize)?;

        let root = self.query_root()?;
        self.image = Some(root.clone());

        let unit = Rect::new(0, 0, 1, 1);
        let white = self.alloc_image(unit, Pix::GREY1, true, Color::WHITE, None, Refresh::Backup)?;
        let black = self.alloc_image(unit, Pix::GREY1, true, Color::BLACK, None, Refresh::Backup)?;

        let screen = self.alloc_screen(&root, &white, false)?;
        let window = self.alloc_window(None, &screen, root.r, Refresh::Backup, Color::WHITE)?;
        self.white = Some(white);
        self.black = Some(black);
        self.screen = Some(screen);
        self.screen_image = Some(window);

        self.flush(true)
    }

    fn attach(&mut self, refresh: Refresh) -> Result<(), DrawError> {
        if let Some(old) = self.image.take() {
            self.free_image(&old)?;
        }
        let root = self.query_root()?;
        self.image = Some(root.clone());

        if let Some(old) = self.screen.take() {
            self.free_screen(&old)?;
        }
        let fill = self.white.clone().ok_or(DrawError::Unusable)?;
        let screen = self.alloc_screen(&root, &fill, false)?;
        self.screen = Some(screen.clone());

        let mut window = self.screen_image.take().ok_or(DrawError::Unusable)?;
        self.free_image(&window)?;
        self.alloc_window(Some(&mut window), &screen, root.r, refresh, Color::WHITE)?;
        self.screen_image = Some(window);
        Ok(())
    }
}

pub(crate) struct Shared {
    pub(crate) session: SessionId,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) dpi: AtomicI32,
    pub(crate) exit_tx: mpsc::Sender<()>,
    exit_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

/// A connection to a draw server through which all graphics are mediated.
#[derive(Clone)]
pub struct Display {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Display {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Display")
            .field("session", &self.shared.session)
            .finish_non_exhaustive()
    }
}

impl Display {
    /// Sets up a session over `transport` with default options.
    ///
    /// See [`Display::init_with_options`].
    pub fn init(
        transport: Box<dyn Transport>,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<Display, DrawError> {
        Self::init_with_options(transport, label, width, height, &SessionOptions::default())
    }

    /// Sets up a session: negotiates the window, reads the root image,
    /// allocates the stock white and black images, the default screen, and
    /// the default window, then makes everything visible.
    ///
    /// # Errors
    ///
    /// Returns [`DrawError::Setup`] wrapping the first failure.  The
    /// transport is closed before returning.
    pub fn init_with_options(
        transport: Box<dyn Transport>,
        label: &str,
        width: u32,
        height: u32,
        options: &SessionOptions,
    ) -> Result<Display, DrawError> {
        let session = SessionId::next();
        let mut state = SessionState::new(session, transport, options.buffer_size);

        if let Err(e) = state.setup(label, width, height) {
            error!("display setup failed: {e}");
            if let Err(close_err) = state.transport.close() {
                debug!("closing transport after failed setup: {close_err}");
            }
            return Err(DrawError::Setup(Box::new(e)));
        }
        info!(
            ?session,
            backend = ?state.backend,
            r = %state.image.as_ref().map(|i| i.r).unwrap_or_default(),
            "display ready"
        );

        let (exit_tx, exit_rx) = mpsc::channel(1);
        Ok(Display {
            shared: Arc::new(Shared {
                session,
                state: Mutex::new(state),
                dpi: AtomicI32::new(options.dpi),
                exit_tx,
                exit_rx: Mutex::new(Some(exit_rx)),
            }),
        })
    }

    /// Locks the session, refusing if a previous attach failed.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, SessionState>, DrawError> {
        let guard = self.shared.state.lock().map_err(|_| DrawError::Unusable)?;
        if guard.poisoned {
            return Err(DrawError::Unusable);
        }
        Ok(guard)
    }

    /// The identity resources allocated by this session carry.
    pub fn session_id(&self) -> SessionId {
        self.shared.session
    }

    /// Appends a raw command to the buffer, flushing first if it would not
    /// fit.
    ///
    /// # Panics
    ///
    /// Panics if the command is longer than the buffer threshold.
    pub fn buffer_command(&self, cmd: &[u8]) -> Result<(), DrawError> {
        let mut state = self.lock()?;
        state.buf_image(cmd.len())?.copy_from_slice(cmd);
        Ok(())
    }

    /// Number of bytes waiting in the buffer.
    pub fn buffered(&self) -> Result<usize, DrawError> {
        Ok(self.lock()?.buf.len())
    }

    /// Flushes pending commands to the server, making any drawing changes
    /// visible.
    pub fn flush(&self) -> Result<(), DrawError> {
        self.lock()?.flush(true)
    }

    /// Re-attaches after the server reports a resize, replacing the root
    /// image, the default screen, and the default window.  The session's
    /// window handle is reused in place; copies taken earlier with
    /// [`Display::screen_image`] name the freed window and must be re-read.
    ///
    /// # Errors
    ///
    /// Any failure leaves the session unusable: this and every later call
    /// returns an error.
    pub fn attach(&self, refresh: Refresh) -> Result<(), DrawError> {
        let mut state = self.lock()?;
        match state.attach(refresh) {
            Ok(()) => {
                info!(
                    r = %state.image.as_ref().map(|i| i.r).unwrap_or_default(),
                    "re-attached display"
                );
                Ok(())
            }
            Err(e) => {
                error!("attach failed, display is no longer usable: {e}");
                state.poisoned = true;
                Err(e)
            }
        }
    }

    /// Closes the connection.  Closing twice is a no-op, and closing is
    /// permitted after a failed attach.
    pub fn close(&self) -> Result<(), DrawError> {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.transport.close()?;
        info!(session = ?self.shared.session, "display closed");
        Ok(())
    }

    /// Scales a pixel count for the display's resolution.  Results beyond
    /// the range of `i32` saturate.
    pub fn scale(&self, n: i32) -> i32 {
        let dpi = self.dpi();
        if dpi <= DEFAULT_DPI {
            return n;
        }
        let scaled =
            (i64::from(n) * i64::from(dpi) + i64::from(DEFAULT_DPI / 2)) / i64::from(DEFAULT_DPI);
        i32::try_from(scaled).unwrap_or(if scaled < 0 { i32::MIN } else { i32::MAX })
    }

    pub fn dpi(&self) -> i32 {
        self.shared.dpi.load(Ordering::Relaxed)
    }

    pub fn set_dpi(&self, dpi: i32) {
        self.shared.dpi.store(dpi, Ordering::Relaxed);
    }

    /// Buffer threshold in bytes.
    pub fn buffer_size(&self) -> Result<usize, DrawError> {
        Ok(self.lock()?.buffer_size)
    }

    /// Reads the clipboard.
    pub fn read_snarf(&self) -> Result<Vec<u8>, DrawError> {
        Ok(self.lock()?.transport.read_snarf()?)
    }

    /// Replaces the clipboard.
    pub fn write_snarf(&self, data: &[u8]) -> Result<(), DrawError> {
        Ok(self.lock()?.transport.write_snarf(data)?)
    }

    /// Sets the window label.
    pub fn set_label(&self, label: &str) -> Result<(), DrawError> {
        Ok(self.lock()?.transport.set_label(label)?)
    }

    /// Takes the receiving end of the exit notification.  The keyboard pump
    /// signals it once when the keyboard reaches end of stream.  Returns
    /// `None` after the first call.
    pub fn take_exit_receiver(&self) -> Option<mpsc::Receiver<()>> {
        self.shared
            .exit_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    // ── Well-known resources ──────────────────────────────────────────────

    /// The root image of the window.
    pub fn image(&self) -> Result<Image, DrawError> {
        self.lock()?.image.clone().ok_or(DrawError::Unusable)
    }

    /// The default screen.
    pub fn screen(&self) -> Result<Screen, DrawError> {
        self.lock()?.screen.clone().ok_or(DrawError::Unusable)
    }

    /// The default window, covering the root image.
    pub fn screen_image(&self) -> Result<Image, DrawError> {
        self.lock()?.screen_image.clone().ok_or(DrawError::Unusable)
    }

    pub fn white(&self) -> Result<Image, DrawError> {
        self.lock()?.white.clone().ok_or(DrawError::Unusable)
    }

    pub fn black(&self) -> Result<Image, DrawError> {
        self.lock()?.black.clone().ok_or(DrawError::Unusable)
    }

    /// Alias for [`Display::white`].
    pub fn opaque(&self) -> Result<Image, DrawError> {
        self.white()
    }

    /// Alias for [`Display::black`].
    pub fn transparent(&self) -> Result<Image, DrawError> {
        self.black()
    }

    /// Ids of the windows on `screen`, most recently allocated first.
    pub fn windows(&self, screen: &Screen) -> Result<Vec<u32>, DrawError> {
        let state = self.lock()?;
        Ok(state.windows.get(&screen.id()).cloned().unwrap_or_default())
    }
}
