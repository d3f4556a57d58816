//! Transport helpers.
//!
//! TCP needs nothing beyond `tokio::net`. On Unix, [`UnixSocketListener`]
//! wraps a Unix domain socket listener and removes its socket file on drop.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::{generate_socket_path, UnixSocketListener};
