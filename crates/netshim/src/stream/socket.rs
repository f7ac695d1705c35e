// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP sockets and listeners.
//!
//! Sockets are non-blocking from creation (mio). Connect does not wait: a new
//! [`TcpSocket`] starts "not connected" and asks the multiplexer for write
//! readiness; the first writable report is delivered as
//! [`StreamEvent::Connect`]. After that, write interest is only registered
//! while a write is blocked. Listener options (reuse address, backlog) are set
//! through socket2 before the socket is handed to mio.
//!
//! With [`OpenFlags::nodelay`] the socket disables Nagle and, on Linux, stays
//! corked so small writes coalesce; [`ByteStream::flush`] pulls the cork.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};

use super::address::{HostPort, DEFAULT_SOCKET_PORT};
use super::{use_after_close, Accepted, ByteStream, OpenFlags, StreamEvent, StreamInterface};
use crate::config::SocketConfig;
use crate::error::StreamError;

/// Listen backlog used by [`TcpListenerSocket::open`].
pub const DEFAULT_LISTEN_BACKLOG: i32 = 20;

// ============================================================================
// Connected socket
// ============================================================================

/// Non-blocking TCP connection.
pub struct TcpSocket {
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    flags: OpenFlags,
    connected: bool,
    write_blocked: bool,
    unflushed: bool,
    /// "Network busy" was already logged for the current blocked episode.
    reported_busy: bool,
    /// Error recorded when a pending connect failed.
    connect_error: Option<io::Error>,
}

impl TcpSocket {
    /// Open a client connection from a parameter string such as
    /// `"192.168.1.10:6368"`.
    pub fn open(parameters: &str, flags: OpenFlags) -> Result<Self, StreamError> {
        if flags.is_listen() {
            return Err(StreamError::invalid(
                "listen flag given to TcpSocket::open, use TcpListenerSocket",
            ));
        }
        let addr = HostPort::parse(parameters, DEFAULT_SOCKET_PORT)?.resolve()?;
        Self::connect(addr, flags)
    }

    /// Start a non-blocking connect to `addr`.
    pub fn connect(addr: SocketAddr, flags: OpenFlags) -> Result<Self, StreamError> {
        let stream = TcpStream::connect(addr)?;
        log::debug!("[tcp] connecting to {}", addr);
        Self::from_stream(stream, Some(addr), flags, false)
    }

    fn from_stream(
        stream: TcpStream,
        peer: Option<SocketAddr>,
        flags: OpenFlags,
        connected: bool,
    ) -> Result<Self, StreamError> {
        if flags.nodelay {
            stream.set_nodelay(true)?;
            set_cork(&stream, true);
        }
        Ok(Self {
            stream: Some(stream),
            peer,
            flags,
            connected,
            write_blocked: false,
            unflushed: false,
            reported_busy: false,
            connect_error: None,
        })
    }

    /// The connect has completed.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, StreamError> {
        match self.stream.as_mut() {
            Some(stream) => Ok(stream),
            None => Err(use_after_close("tcp socket")),
        }
    }

    fn take_connect_error(&mut self) -> Result<(), StreamError> {
        match self.connect_error.take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Check whether a pending connect finished. `Err` carries the connect
    /// failure.
    fn poll_connect(&mut self) -> Result<bool, io::Error> {
        let Some(stream) = self.stream.as_ref() else {
            return Ok(false);
        };
        if let Some(err) = stream.take_error()? {
            return Err(err);
        }
        match stream.peer_addr() {
            Ok(addr) => {
                self.peer = Some(addr);
                self.connected = true;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl ByteStream for TcpSocket {
    fn interface(&self) -> StreamInterface {
        StreamInterface::Socket
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.take_connect_error()?;
        let stream = self.stream_mut()?;
        match stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(StreamError::Closed),
            Ok(n) => {
                self.connected = true;
                Ok(n)
            }
            Err(e) if is_transient(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        self.take_connect_error()?;
        let stream = self.stream_mut()?;
        match stream.write(buf) {
            Ok(n) => {
                if n > 0 {
                    self.connected = true;
                    self.unflushed = true;
                    self.reported_busy = false;
                }
                self.write_blocked = n < buf.len();
                Ok(n)
            }
            Err(e) if is_transient(&e) => {
                self.write_blocked = true;
                if !self.reported_busy {
                    log::debug!("[tcp] write delayed, network busy");
                    self.reported_busy = true;
                }
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        let nodelay = self.flags.nodelay;
        let unflushed = self.unflushed;
        let stream = self.stream_mut()?;
        if nodelay && unflushed {
            set_cork(stream, false);
            set_cork(stream, true);
        }
        self.unflushed = false;
        Ok(())
    }

    fn close(&mut self) {
        match self.stream.take() {
            Some(stream) => {
                // Peer may already be gone.
                let _ = stream.shutdown(Shutdown::Both);
                log::trace!("[tcp] closed connection to {:?}", self.peer);
            }
            None => {
                use_after_close("tcp socket");
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn select_enabled(&self) -> bool {
        self.flags.select
    }

    #[cfg(unix)]
    fn select_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn wants_write_event(&self) -> bool {
        self.write_blocked || !self.connected
    }

    fn poll_ready(&mut self) -> Option<StreamEvent> {
        self.stream.as_ref()?;
        if !self.connected {
            return match self.poll_connect() {
                Ok(true) => Some(StreamEvent::Connect),
                Ok(false) => None,
                Err(err) => {
                    self.connect_error = Some(err);
                    Some(StreamEvent::Close)
                }
            };
        }

        let stream = self.stream.as_ref()?;
        let mut probe = [0u8; 1];
        match stream.peek(&mut probe) {
            Ok(0) => Some(StreamEvent::Close),
            Ok(_) => Some(StreamEvent::Read),
            Err(e) if is_transient(&e) => {
                if self.write_blocked {
                    self.write_blocked = false;
                    Some(StreamEvent::Write)
                } else {
                    None
                }
            }
            Err(_) => Some(StreamEvent::Close),
        }
    }

    fn on_writable(&mut self) -> StreamEvent {
        if self.connected {
            self.write_blocked = false;
            return StreamEvent::Write;
        }
        match self.poll_connect() {
            Ok(_) => {
                // write_blocked stays set if a write was refused before connect.
                self.connected = true;
                log::debug!("[tcp] connected to {:?}", self.peer);
                StreamEvent::Connect
            }
            Err(err) => {
                log::debug!("[tcp] connect to {:?} failed: {}", self.peer, err);
                self.connect_error = Some(err);
                StreamEvent::Close
            }
        }
    }
}

impl std::fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSocket")
            .field("peer", &self.peer)
            .field("connected", &self.connected)
            .field("write_blocked", &self.write_blocked)
            .field("closed", &self.stream.is_none())
            .finish()
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Non-blocking TCP listener.
pub struct TcpListenerSocket {
    listener: Option<TcpListener>,
    local: SocketAddr,
    flags: OpenFlags,
    backlog: i32,
    /// Connection taken by `poll_ready` and not yet handed out.
    pending: Option<(TcpStream, SocketAddr)>,
}

impl TcpListenerSocket {
    /// Listen on a parameter string such as `":6368"`.
    pub fn open(parameters: &str, flags: OpenFlags) -> Result<Self, StreamError> {
        let addr = HostPort::parse(parameters, DEFAULT_SOCKET_PORT)?.resolve()?;
        Self::bind(addr, flags, DEFAULT_LISTEN_BACKLOG)
    }

    /// Listen with backlog, nodelay and reuse-address taken from `config`.
    pub fn open_with(parameters: &str, config: &SocketConfig) -> Result<Self, StreamError> {
        let addr = HostPort::parse(parameters, DEFAULT_SOCKET_PORT)?.resolve()?;
        Self::bind(addr, config.listen_flags(), config.listen_backlog)
    }

    pub fn bind(addr: SocketAddr, flags: OpenFlags, backlog: i32) -> Result<Self, StreamError> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        if flags.reuse_addr {
            socket.set_reuse_address(true)?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener);
        let local = listener.local_addr()?;
        log::debug!("[tcp] listening on {} (backlog {})", local, backlog);

        Ok(Self {
            listener: Some(listener),
            local,
            flags,
            backlog,
            pending: None,
        })
    }

    /// Bound address (useful with port 0).
    pub fn bound_addr(&self) -> SocketAddr {
        self.local
    }

    /// Backlog passed to `listen(2)`.
    pub fn backlog(&self) -> i32 {
        self.backlog
    }

    /// Typed accept returning the concrete socket.
    pub fn accept_socket(&mut self) -> Result<Option<(TcpSocket, SocketAddr)>, StreamError> {
        let (stream, addr) = match self.pending.take() {
            Some(pending) => pending,
            None => {
                let listener = match self.listener.as_ref() {
                    Some(listener) => listener,
                    None => return Err(use_after_close("tcp listener")),
                };
                match listener.accept() {
                    Ok(accepted) => accepted,
                    Err(e) if is_transient(&e) => return Ok(None),
                    // Connection dropped between SYN and accept.
                    Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => return Ok(None),
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let flags = OpenFlags {
            role: super::StreamRole::Connect,
            ..self.flags
        };
        log::debug!("[tcp] accepted connection from {}", addr);
        let socket = TcpSocket::from_stream(stream, Some(addr), flags, true)?;
        Ok(Some((socket, addr)))
    }
}

impl ByteStream for TcpListenerSocket {
    fn interface(&self) -> StreamInterface {
        StreamInterface::Socket
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, StreamError> {
        Err(StreamError::Unsupported)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, StreamError> {
        Err(StreamError::Unsupported)
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        Ok(())
    }

    fn accept(&mut self) -> Result<Option<Accepted>, StreamError> {
        Ok(self.accept_socket()?.map(|(socket, addr)| Accepted {
            stream: Box::new(socket),
            remote_addr: Some(addr),
        }))
    }

    fn close(&mut self) {
        if self.listener.take().is_none() {
            use_after_close("tcp listener");
            return;
        }
        self.pending = None;
        log::trace!("[tcp] listener {} closed", self.local);
    }

    fn is_closed(&self) -> bool {
        self.listener.is_none()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local)
    }

    fn select_enabled(&self) -> bool {
        self.flags.select
    }

    #[cfg(unix)]
    fn select_fd(&self) -> Option<RawFd> {
        self.listener.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn is_listening(&self) -> bool {
        true
    }

    fn poll_ready(&mut self) -> Option<StreamEvent> {
        if self.pending.is_some() {
            return Some(StreamEvent::Accept);
        }
        match self.listener.as_ref()?.accept() {
            Ok(accepted) => {
                self.pending = Some(accepted);
                Some(StreamEvent::Accept)
            }
            Err(_) => None,
        }
    }
}

impl std::fmt::Debug for TcpListenerSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListenerSocket")
            .field("local", &self.local)
            .field("backlog", &self.backlog)
            .field("pending", &self.pending.is_some())
            .field("closed", &self.listener.is_none())
            .finish()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::NotConnected | io::ErrorKind::Interrupted
    )
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_cork(stream: &TcpStream, cork: bool) {
    if let Err(e) = socket2::SockRef::from(stream).set_cork(cork) {
        log::trace!("[tcp] TCP_CORK={} failed: {}", cork, e);
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_cork(_stream: &TcpStream, _cork: bool) {}
