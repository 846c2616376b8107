//! Value types shared by every layer of the draw engine.
//!
//! Nothing in here performs I/O.  The types mirror what the display server
//! understands: integer rectangles, pixel channel descriptors, packed colors
//! and the refresh policies a window can ask for.
//!
//! # Why a separate domain module? (for beginners)
//!
//! The session engine in `draw-client` talks to a server process, and the
//! protocol codec in [`crate::protocol`] turns values into bytes.  Both need
//! to agree on what a rectangle or a pixel format *is*.  Keeping those
//! definitions here, free of I/O, means they can be unit-tested on any
//! machine and reused by both sides of the wire.

/// Integer points and rectangles.
pub mod geometry;

/// Pixel channel descriptors, packed colors, and refresh policies.
pub mod pix;
