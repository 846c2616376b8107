//! # draw-core
//!
//! Wire formats and value types for a client that drives an out-of-process
//! display server ("draw device").
//!
//! This crate is used by the session engine in `draw-client`.  It performs
//! no I/O of its own; the only reader it touches is a caller-supplied
//! [`std::io::BufRead`] for mouse records.
//!
//! # Architecture overview (for beginners)
//!
//! The server owns every pixel.  A client sends it a compact binary command
//! stream ("allocate image 7", "free screen 3", "make changes visible") and
//! reads back small fixed-format replies.  This crate defines both halves:
//!
//! - **`domain`** – Points, rectangles, pixel channel descriptors, colors,
//!   and refresh policies.  Pure values.
//!
//! - **`protocol`** – How those values become bytes: the single-byte command
//!   opcodes and their encoders, the 144-byte info block, the textual mouse
//!   record, the tagged message codec used when the server is reached over a
//!   socket, and the per-session resource id generator.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `draw_core::Rect` instead of `draw_core::domain::geometry::Rect`.
pub use domain::geometry::{Point, Rect};
pub use domain::pix::{Color, Pix, PixError, Refresh};
pub use protocol::codec::ProtocolError;
pub use protocol::info::{InfoBlock, INFO_SIZE};
pub use protocol::mouse::{Mouse, MouseEvent};
