//! Infrastructure layer for draw clients.
//!
//! Contains the OS-facing adapters: the transport backends and configuration
//! persistence.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `draw_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`transport`** – The device-file backend (`/dev/draw` and friends), the
//!   socket backend with its reply multiplexer, and a recording mock for
//!   tests.  The `devfs` cargo feature picks the backend [`crate::connect`]
//!   uses.
//!
//! - **`config`** – `DrawConfig` loading and saving as TOML.

pub mod config;
pub mod transport;
