// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Uniform non-blocking byte streams.
//!
//! Every transport (plain TCP, TLS over any transport, in-memory pipes)
//! implements [`ByteStream`], so the multiplexer and the TLS layer never care
//! what sits underneath.
//!
//! # Result conventions
//!
//! | Call | Progress | Nothing possible now | Peer closed |
//! |------|----------|----------------------|-------------|
//! | `read` | `Ok(n)` | `Ok(0)` | `Err(StreamError::Closed)` |
//! | `write` | `Ok(n)` (may be partial) | `Ok(0)` | `Err(StreamError::ConnectionReset)` |
//! | `accept` | `Ok(Some(_))` | `Ok(None)` | n/a |
//!
//! Buffered output only leaves the process when `flush` is called.
//!
//! # Example
//!
//! ```no_run
//! use netshim::stream::{ByteStream, OpenFlags};
//! use netshim::stream::socket::TcpSocket;
//!
//! let mut stream = TcpSocket::open("127.0.0.1:6368", OpenFlags::connect())?;
//! let sent = stream.write(b"hello")?;
//! stream.flush()?;
//! # let _ = sent;
//! # Ok::<(), netshim::StreamError>(())
//! ```

pub mod address;
pub mod memory;
pub mod socket;

use std::net::SocketAddr;

#[cfg(unix)]
use std::os::unix::io::RawFd;

use crate::error::StreamError;

/// Which backend implements a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamInterface {
    /// Plain TCP socket or listener.
    Socket,
    /// TLS on top of another stream.
    SecureSocket,
    /// In-process pipe.
    Memory,
}

/// Whether a stream initiates or accepts connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamRole {
    #[default]
    Connect,
    Listen,
}

/// Options given when opening a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub role: StreamRole,
    /// The stream will be waited on with `select`.
    pub select: bool,
    /// Disable Nagle and batch output until `flush` (cork on Linux).
    pub nodelay: bool,
    /// Set `SO_REUSEADDR` on listeners.
    pub reuse_addr: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            role: StreamRole::Connect,
            select: true,
            nodelay: false,
            reuse_addr: true,
        }
    }
}

impl OpenFlags {
    pub fn connect() -> Self {
        Self::default()
    }

    pub fn listen() -> Self {
        Self {
            role: StreamRole::Listen,
            ..Self::default()
        }
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn without_select(mut self) -> Self {
        self.select = false;
        self
    }

    pub fn without_reuse_addr(mut self) -> Self {
        self.reuse_addr = false;
        self
    }

    pub fn is_listen(&self) -> bool {
        self.role == StreamRole::Listen
    }
}

/// Readiness reported by `select` for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEvent {
    /// Data (or a TLS record) can be read.
    Read,
    /// A previously blocked write can make progress.
    Write,
    /// A listener has a connection waiting.
    Accept,
    /// A non-blocking connect finished.
    Connect,
    /// Error or hang-up condition on the stream.
    Close,
}

/// Result of a successful accept.
pub struct Accepted {
    pub stream: BoxedByteStream,
    pub remote_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepted")
            .field("interface", &self.stream.interface())
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

/// Non-blocking byte stream.
///
/// # Implementation Notes
///
/// - Every operation returns promptly; "would block" is `Ok(0)` / `Ok(None)`
/// - `close` releases the underlying resources exactly once; calling any
///   operation afterwards is a usage error (asserted in debug builds)
/// - The select hooks default to "not selectable"; backends override them
pub trait ByteStream: Send {
    fn interface(&self) -> StreamInterface;

    fn is_secure(&self) -> bool {
        self.interface() == StreamInterface::SecureSocket
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` means nothing is available now.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Write up to `buf.len()` bytes. `Ok(0)` means the write would block.
    fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError>;

    /// Push buffered output to the network.
    fn flush(&mut self) -> Result<(), StreamError>;

    /// Accept a pending connection on a listening stream.
    fn accept(&mut self) -> Result<Option<Accepted>, StreamError> {
        Err(StreamError::Unsupported)
    }

    /// Release the stream.
    fn close(&mut self);

    fn is_closed(&self) -> bool;

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    // ------------------------------------------------------------------
    // Select support
    // ------------------------------------------------------------------

    /// Stream was opened for use with `select`.
    fn select_enabled(&self) -> bool {
        true
    }

    /// OS handle waited on by the native multiplexer.
    #[cfg(unix)]
    fn select_fd(&self) -> Option<RawFd> {
        None
    }

    /// Write readiness is of interest (write blocked or connect pending).
    fn wants_write_event(&self) -> bool {
        false
    }

    fn is_listening(&self) -> bool {
        false
    }

    /// Input is already buffered above the OS handle (e.g. decrypted TLS
    /// data), so the stream is readable even if the handle is not.
    fn has_buffered_input(&mut self) -> bool {
        false
    }

    /// Cooperative readiness check used by the polling multiplexer.
    fn poll_ready(&mut self) -> Option<StreamEvent> {
        None
    }

    /// Called by the native multiplexer when the handle became writable.
    /// Returns the event to report (`Connect` for a completed connect).
    fn on_writable(&mut self) -> StreamEvent {
        StreamEvent::Write
    }
}

// ============================================================================
// Boxed ByteStream
// ============================================================================

/// A boxed ByteStream for dynamic dispatch.
pub type BoxedByteStream = Box<dyn ByteStream>;

impl ByteStream for BoxedByteStream {
    fn interface(&self) -> StreamInterface {
        (**self).interface()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        (**self).flush()
    }

    fn accept(&mut self) -> Result<Option<Accepted>, StreamError> {
        (**self).accept()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        (**self).local_addr()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        (**self).peer_addr()
    }

    fn select_enabled(&self) -> bool {
        (**self).select_enabled()
    }

    #[cfg(unix)]
    fn select_fd(&self) -> Option<RawFd> {
        (**self).select_fd()
    }

    fn wants_write_event(&self) -> bool {
        (**self).wants_write_event()
    }

    fn is_listening(&self) -> bool {
        (**self).is_listening()
    }

    fn has_buffered_input(&mut self) -> bool {
        (**self).has_buffered_input()
    }

    fn poll_ready(&mut self) -> Option<StreamEvent> {
        (**self).poll_ready()
    }

    fn on_writable(&mut self) -> StreamEvent {
        (**self).on_writable()
    }
}

/// Report use of a closed stream: panics in debug builds, logs otherwise.
pub(crate) fn use_after_close(what: &str) -> StreamError {
    if cfg!(debug_assertions) {
        panic!("{what} used after close (closed twice?)");
    }
    log::error!("{} used after close", what);
    StreamError::UseAfterClose
}

/// Write as much of the buffer as possible, returning how much was accepted before the
/// stream would block.
pub fn write_some(stream: &mut dyn ByteStream, mut buf: &[u8]) -> Result<usize, StreamError> {
    let mut total = 0;
    while !buf.is_empty() {
        let n = stream.write(buf)?;
        if n == 0 {
            break;
        }
        total += n;
        buf = &buf[n..];
    }
    Ok(total)
}
