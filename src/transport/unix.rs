//! Unix domain socket listener.
//!
//! # Example
//!
//! ```ignore
//! use seqwire::transport::{generate_socket_path, UnixSocketListener};
//!
//! let path = generate_socket_path();
//! let listener = UnixSocketListener::bind(&path)?;
//! server.accept_unix(listener).await;
//! ```

use std::path::Path;

use tokio::net::{UnixListener, UnixStream};

use crate::error::Result;

/// Pick a fresh socket path under the system temp directory.
///
/// A convenience for tests and ad-hoc servers that do not care where the
/// socket lives. Paths look like `{tmp}/seqwire-{pid}-{suffix}.sock`.
pub fn generate_socket_path() -> String {
    let name = format!("seqwire-{}-{:x}.sock", std::process::id(), unique_suffix());
    std::env::temp_dir().join(name).to_string_lossy().into_owned()
}

/// Per-call suffix: a process-wide counter mixed through a randomly keyed
/// hasher, so concurrent processes and repeated calls do not collide.
fn unique_suffix() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::BuildHasher;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT: AtomicU64 = AtomicU64::new(0);
    RandomState::new().hash_one(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Unix domain socket listener that owns its socket file.
pub struct UnixSocketListener {
    listener: UnixListener,
    path: String,
}

impl UnixSocketListener {
    /// Bind to a Unix socket path.
    ///
    /// Removes any stale socket file at the path before binding. Must be
    /// called inside a tokio runtime.
    pub fn bind(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;

        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Get the socket path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
