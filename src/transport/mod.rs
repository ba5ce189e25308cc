//! Opening the byte stream a client runs over.
//!
//! The client itself accepts any `AsyncRead + AsyncWrite` stream. These
//! helpers cover the common cases:
//! - TCP (`connect_tcp`)
//! - Unix domain sockets (`connect_unix`, Unix only)
//!
//! Both fail with `Timeout` when the connection is not established in time.

use std::time::Duration;

use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::{Result, RoutewireError};

/// Connect to a TCP endpoint with Nagle disabled.
pub async fn connect_tcp<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| RoutewireError::Timeout)??;
    stream.set_nodelay(true)?;
    tracing::debug!(peer = ?stream.peer_addr().ok(), "tcp connected");
    Ok(stream)
}

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::path::Path;
    use tokio::net::UnixStream;

    /// Connect to a Unix domain socket.
    pub async fn connect_unix<P: AsRef<Path>>(path: P, timeout: Duration) -> Result<UnixStream> {
        let path = path.as_ref();
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| RoutewireError::Timeout)??;
        tracing::debug!(path = %path.display(), "unix socket connected");
        Ok(stream)
    }
}

#[cfg(unix)]
pub use unix_impl::connect_unix;
