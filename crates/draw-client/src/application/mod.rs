//! Application layer: the draw session and its use cases.
//!
//! - **`transport`** – The [`Transport`](transport::Transport) trait every
//!   backend implements, plus the mouse and keyboard endpoint traits.
//!
//! - **`display`** – The session itself: command buffering, flushing, setup,
//!   re-attach after a resize, and the well-known resources.
//!
//! - **`resources`** – Allocation and release of images, screens, and
//!   windows, with the retry loop for screen ids.
//!
//! - **`keyboard`** – The keyboard pump thread and its bounded queue.
//!
//! - **`mouse`** – Pull-based mouse reads.
//!
//! Nothing here performs I/O directly; every byte goes through a
//! `Transport` injected at construction time.

pub mod display;
pub mod keyboard;
pub mod mouse;
pub mod resources;
pub mod transport;
