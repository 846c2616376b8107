//! Server-side resources: images, screens, and windows.
//!
//! Ids come from the session's [`ResourceIds`](draw_core::protocol::ResourceIds)
//! counter, shared by every kind of resource.  Handles are plain values that
//! remember the session that allocated them; all operations go through the
//! [`Display`] so they run under the session lock.
//!
//! A window is an image allocated on a screen.  The session keeps the window
//! list of every screen (most recent first) and unlinks a window from it when
//! the window is freed.

use draw_core::protocol::commands::{
    encode_alloc_image, encode_alloc_screen, encode_free_image, encode_free_screen, AllocImage,
    ALLOC_IMAGE_LEN, ALLOC_SCREEN_LEN, FREE_IMAGE_LEN, FREE_SCREEN_LEN, REPL_CLIP,
};
use draw_core::{Color, Pix, Rect, Refresh};
use tracing::debug;

use crate::application::display::{Display, DrawError, SessionId, SessionState};

/// How many fresh ids a screen allocation tries before giving up.
pub const SCREEN_ALLOC_ATTEMPTS: u32 = 25;

/// An image on the server, possibly visible on the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub(crate) session: SessionId,
    pub(crate) id: u32,
    /// Pixel format.
    pub pix: Pix,
    /// Bits per pixel.
    pub depth: u32,
    /// Whether the image tiles its rectangle.
    pub repl: bool,
    pub r: Rect,
    pub clipr: Rect,
    pub(crate) screen: Option<u32>,
}

impl Image {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Id of the screen this window lives on, or `None` for a plain image.
    pub fn screen_id(&self) -> Option<u32> {
        self.screen
    }

    pub fn is_window(&self) -> bool {
        self.screen.is_some()
    }
}

/// A collection of windows that are visible on an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    pub(crate) session: SessionId,
    pub(crate) id: u32,
    pub(crate) fill_id: u32,
}

impl Screen {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Id of the image painted behind the windows.
    pub fn fill_id(&self) -> u32 {
        self.fill_id
    }
}

impl SessionState {
    fn check_session(&self, session: SessionId, op: &'static str) -> Result<(), DrawError> {
        if session != self.session {
            return Err(DrawError::DomainMismatch { op });
        }
        Ok(())
    }

    /// Allocates an image and writes the command out without making it
    /// visible.
    pub(crate) fn alloc_image(
        &mut self,
        r: Rect,
        pix: Pix,
        repl: bool,
        color: Color,
        screen: Option<u32>,
        refresh: Refresh,
    ) -> Result<Image, DrawError> {
        let id = self.ids.next();
        let clipr = if repl { REPL_CLIP } else { r };
        let cmd = AllocImage {
            id,
            screen_id: screen.unwrap_or(0),
            refresh,
            pix,
            repl,
            r,
            clipr,
            color,
        };
        encode_alloc_image(self.buf_image(ALLOC_IMAGE_LEN)?, &cmd);
        self.flush(false)?;
        self.images.insert(id, screen);
        debug!(id, %r, %pix, ?screen, "allocated image");
        Ok(Image {
            session: self.session,
            id,
            pix,
            depth: pix.depth(),
            repl,
            r,
            clipr,
            screen,
        })
    }

    pub(crate) fn free_image(&mut self, image: &Image) -> Result<(), DrawError> {
        self.check_session(image.session, "freeimage")?;
        let Some(owner) = self.images.remove(&image.id) else {
            debug!(id = image.id, "image already freed");
            return Ok(());
        };
        encode_free_image(self.buf_image(FREE_IMAGE_LEN)?, image.id);
        if let Some(screen_id) = owner {
            if let Some(list) = self.windows.get_mut(&screen_id) {
                list.retain(|&w| w != image.id);
            }
        }
        // A freed window must disappear at once.
        self.flush(owner.is_some())
    }

    pub(crate) fn alloc_screen(
        &mut self,
        image: &Image,
        fill: &Image,
        public: bool,
    ) -> Result<Screen, DrawError> {
        self.check_session(image.session, "allocscreen")?;
        self.check_session(fill.session, "allocscreen")?;
        for attempt in 1..=SCREEN_ALLOC_ATTEMPTS {
            let id = self.ids.next();
            encode_alloc_screen(self.buf_image(ALLOC_SCREEN_LEN)?, id, image.id, fill.id, public);
            match self.flush(false) {
                Ok(()) => {
                    self.windows.entry(id).or_default();
                    debug!(id, image = image.id, fill = fill.id, attempt, "allocated screen");
                    return Ok(Screen {
                        session: self.session,
                        id,
                        fill_id: fill.id,
                    });
                }
                Err(e) => debug!(id, attempt, "screen id rejected: {e}"),
            }
        }
        Err(DrawError::AllocationExhausted {
            op: "allocscreen",
            attempts: SCREEN_ALLOC_ATTEMPTS,
        })
    }

    pub(crate) fn free_screen(&mut self, screen: &Screen) -> Result<(), DrawError> {
        self.check_session(screen.session, "freescreen")?;
        if self.windows.remove(&screen.id).is_none() {
            debug!(id = screen.id, "screen already freed");
            return Ok(());
        }
        encode_free_screen(self.buf_image(FREE_SCREEN_LEN)?, screen.id);
        // The screen may hold the last reference to a window, which must
        // disappear at once.
        self.flush(true)
    }

    pub(crate) fn alloc_window(
        &mut self,
        reuse: Option<&mut Image>,
        screen: &Screen,
        r: Rect,
        refresh: Refresh,
        color: Color,
    ) -> Result<Image, DrawError> {
        self.check_session(screen.session, "allocwindow")?;
        if let Some(handle) = reuse.as_deref() {
            self.check_session(handle.session, "allocwindow")?;
        }
        let pix = self.window_pix();
        let window = self.alloc_image(r, pix, false, color, Some(screen.id), refresh)?;
        self.windows.entry(screen.id).or_default().insert(0, window.id);
        if let Some(handle) = reuse {
            *handle = window.clone();
        }
        Ok(window)
    }
}

impl Display {
    /// Allocates an off-screen image.  Replicated images are clipped to an
    /// effectively unbounded rectangle.
    pub fn alloc_image(&self, r: Rect, pix: Pix, repl: bool, color: Color) -> Result<Image, DrawError> {
        self.lock()?
            .alloc_image(r, pix, repl, color, None, Refresh::Backup)
    }

    /// Frees an image.  Freeing a window unlinks it from its screen and makes
    /// the change visible.  Freeing an image twice is a no-op.
    pub fn free_image(&self, image: &Image) -> Result<(), DrawError> {
        self.lock()?.free_image(image)
    }

    /// Allocates a screen on `image`, with `fill` painted behind its windows.
    ///
    /// A rejected id is retried with a fresh one, up to
    /// [`SCREEN_ALLOC_ATTEMPTS`] times.
    ///
    /// # Errors
    ///
    /// - [`DrawError::DomainMismatch`] if either image belongs to another
    ///   session.  Nothing is written.
    /// - [`DrawError::AllocationExhausted`] once every attempt was rejected.
    pub fn alloc_screen(&self, image: &Image, fill: &Image, public: bool) -> Result<Screen, DrawError> {
        self.lock()?.alloc_screen(image, fill, public)
    }

    /// Frees a screen and makes the change visible.  Freeing a screen twice
    /// is a no-op.
    pub fn free_screen(&self, screen: &Screen) -> Result<(), DrawError> {
        self.lock()?.free_screen(screen)
    }

    /// Allocates a window on `screen`, in the pixel format of the screen
    /// image.
    ///
    /// When `reuse` is given, that handle is overwritten with the new window,
    /// so a caller can keep one handle across a free and reallocation.
    pub fn alloc_window(
        &self,
        reuse: Option<&mut Image>,
        screen: &Screen,
        r: Rect,
        refresh: Refresh,
        color: Color,
    ) -> Result<Image, DrawError> {
        self.lock()?.alloc_window(reuse, screen, r, refresh, color)
    }
}
