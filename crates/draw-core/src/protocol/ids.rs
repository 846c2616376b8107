//! Client-side generator for server resource identifiers.
//!
//! # Who picks resource ids? (for beginners)
//!
//! Images, screens and windows live on the server, but the *client* chooses
//! their numeric names.  An allocate command says "create object 7"; if the
//! server already has an object 7 it refuses, and the client simply asks
//! again with a fresh number.
//!
//! One counter is shared by every resource kind, so an id is unique across
//! images, screens and windows of a session.  The counter belongs to the
//! session that owns it; two sessions never share one.
//!
//! # Thread safety
//!
//! The counter is a plain integer.  It is only ever touched while the
//! session lock is held, so it needs no atomics of its own.

/// A monotonically increasing resource id generator.
///
/// The first call to [`next`](ResourceIds::next) returns 1; 0 is left for the
/// root image on backends that name it that way.
#[derive(Debug, Default, Clone)]
pub struct ResourceIds {
    last: u32,
}

impl ResourceIds {
    /// Creates a generator whose first id will be 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh id.
    ///
    /// Wraps from `u32::MAX` to 1, skipping 0.
    pub fn next(&mut self) -> u32 {
        self.last = self.last.wrapping_add(1);
        if self.last == 0 {
            self.last = 1;
        }
        self.last
    }

    /// Returns the most recently issued id (0 before the first call).
    pub fn current(&self) -> u32 {
        self.last
    }

    /// Ensures no future id is `<= id`.  Used once the server has told the
    /// client which id its root image occupies.
    pub fn reserve_through(&mut self, id: u32) {
        if self.last < id {
            self.last = id;
        }
    }
}
