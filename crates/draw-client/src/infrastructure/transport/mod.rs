//! Transport backends.
//!
//! Both production backends always compile.  Which one [`NativeTransport`]
//! names, and therefore which one [`crate::connect`] uses, is fixed at build
//! time by the `devfs` cargo feature.

pub mod devfs;
pub mod mock;
pub mod socket;

/// The backend this build connects through.
#[cfg(feature = "devfs")]
pub type NativeTransport = devfs::DevTransport;

/// The backend this build connects through.
#[cfg(not(feature = "devfs"))]
pub type NativeTransport = socket::SocketTransport;
