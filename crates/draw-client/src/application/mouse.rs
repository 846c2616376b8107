//! Mouse control.  Unlike the keyboard there is no pump: callers pull one
//! event at a time and block until it arrives.

use draw_core::{Mouse, MouseEvent};

use crate::application::display::{Display, DrawError};
use crate::application::transport::MouseSource;

/// The consumer side of the mouse.
pub struct Mousectl {
    source: Box<dyn MouseSource>,
    last: Mouse,
}

impl Mousectl {
    pub fn new(source: Box<dyn MouseSource>) -> Self {
        Self {
            source,
            last: Mouse::default(),
        }
    }

    /// Blocks until the next mouse event.  `resized` is set when the server
    /// reports that the window changed size; the caller should then
    /// [`attach`](Display::attach).
    pub fn read(&mut self) -> Result<MouseEvent, DrawError> {
        let event = self.source.read_mouse()?;
        self.last = event.mouse;
        Ok(event)
    }

    /// The most recently read mouse state.
    pub fn last(&self) -> Mouse {
        self.last
    }
}

impl Display {
    /// Opens the mouse.
    pub fn init_mouse(&self) -> Result<Mousectl, DrawError> {
        let source = self.lock()?.transport.mouse()?;
        Ok(Mousectl::new(source))
    }
}
