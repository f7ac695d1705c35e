// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Secure stream: TLS session driven incrementally over any [`ByteStream`].
//!
//! # Lifecycle
//!
//! ```text
//!   connect / accept_from
//!            |
//!            v
//!     +-------------+  handshake() -> Pending
//!     | Handshaking |<----------------+
//!     +-------------+-----------------+
//!        |        |
//!        |        +--> Failed(reason)   sticky: every later call returns it
//!        v
//!     +-------------+
//!     | Established |--> Failed(PeerClosed | ConnectionReset | ...)
//!     +-------------+
//!            |
//!          close()  (close_notify if the peer is still there)
//!            v
//!         Closed
//! ```
//!
//! Each call makes at most one transport read, so a non-blocking caller never
//! stalls inside the TLS layer. Outgoing ciphertext is bounded by
//! [`SEND_BUFFER_LIMIT`]; a write that cannot be buffered returns `Ok(0)`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::io::RawFd;

use rustls::pki_types::CertificateDer;
use rustls::ProtocolVersion;

use super::context::TlsContext;
use super::session::{PeerTrust, TlsRole, TlsSession};
use super::transport_io::TransportIo;
use crate::config::SocketConfig;
use crate::error::{FailureReason, SecurityFailure, StreamError};
use crate::stream::address::{HostPort, DEFAULT_TLS_PORT};
use crate::stream::socket::{TcpListenerSocket, TcpSocket, DEFAULT_LISTEN_BACKLOG};
use crate::stream::{
    use_after_close, Accepted, BoxedByteStream, ByteStream, OpenFlags, StreamEvent, StreamInterface,
};

/// Session state of a [`SecureStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Established,
    /// Terminal. The reason is reported by every later operation.
    Failed(FailureReason),
    Closed,
}

/// Progress of [`SecureStream::handshake`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    Complete,
    /// More transport I/O is needed; call again when the stream is ready.
    Pending,
}

/// TLS stream over a transport `S`.
pub struct SecureStream<S: ByteStream = BoxedByteStream> {
    transport: S,
    session: Option<TlsSession>,
    state: SessionState,
    role: TlsRole,
    trust: PeerTrust,
    /// The peer can still receive a close_notify.
    peer_connected: bool,
    /// Counted in the context's active sessions.
    counted_active: bool,
    flags: OpenFlags,
    context: Arc<TlsContext>,
    reported_busy: bool,
}

impl SecureStream<TcpSocket> {
    /// Connect over TCP to `host:port` (default port 6369) and start the
    /// handshake. The host name is used to verify the server certificate.
    pub fn open(context: &Arc<TlsContext>, parameters: &str, flags: OpenFlags) -> Result<Self, StreamError> {
        if flags.is_listen() {
            return Err(StreamError::invalid("listening secure streams are opened with SecureListener"));
        }
        let target = HostPort::parse(parameters, DEFAULT_TLS_PORT)?;
        let server_name = target
            .server_name()
            .ok_or_else(|| StreamError::invalid("secure connect requires a host"))?
            .to_string();
        let socket = TcpSocket::connect(target.resolve()?, flags)?;
        Self::connect(context, socket, &server_name, flags)
    }
}

impl<S: ByteStream> SecureStream<S> {
    /// Start a client session over an already opened transport.
    ///
    /// The first handshake flight is sent before returning; completion is
    /// driven by [`handshake`](Self::handshake), `read` or `write`.
    pub fn connect(
        context: &Arc<TlsContext>,
        transport: S,
        server_name: &str,
        flags: OpenFlags,
    ) -> Result<Self, StreamError> {
        let (session, trust) = context.new_client_session(server_name)?;
        let mut stream = Self::new(context, transport, session, trust, flags);
        log::debug!("[tls] client session started for {}", server_name);

        if let Err(err) = stream.handshake() {
            stream.close();
            return Err(err);
        }
        Ok(stream)
    }

    /// Start a server session over an accepted transport. The handshake is
    /// deferred until the first operation.
    pub fn accept_from(context: &Arc<TlsContext>, transport: S, flags: OpenFlags) -> Result<Self, StreamError> {
        let session = context.new_server_session()?;
        Ok(Self::new(context, transport, session, PeerTrust::NotApplicable, flags))
    }

    fn new(context: &Arc<TlsContext>, transport: S, session: TlsSession, trust: PeerTrust, flags: OpenFlags) -> Self {
        context.metrics().record_handshake_started();
        Self {
            transport,
            role: session.role(),
            session: Some(session),
            state: SessionState::Handshaking,
            trust,
            peer_connected: false,
            counted_active: false,
            flags,
            context: Arc::clone(context),
            reported_busy: false,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn role(&self) -> TlsRole {
        self.role
    }

    pub fn peer_trust(&self) -> PeerTrust {
        self.trust
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn context(&self) -> &Arc<TlsContext> {
        &self.context
    }

    pub fn transport(&self) -> &S {
        &self.transport
    }

    /// Certificates presented by the peer, leaf first.
    pub fn peer_certificates(&self) -> Option<Vec<CertificateDer<'static>>> {
        self.session.as_ref()?.peer_certificates().map(<[_]>::to_vec)
    }

    pub fn alpn_protocol(&self) -> Option<Vec<u8>> {
        self.session.as_ref()?.alpn_protocol().map(<[u8]>::to_vec)
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.session.as_ref()?.protocol_version()
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// Advance the handshake by one round of transport I/O.
    pub fn handshake(&mut self) -> Result<HandshakeStatus, StreamError> {
        match &self.state {
            SessionState::Established => return Ok(HandshakeStatus::Complete),
            SessionState::Failed(reason) => return Err(reason.to_error()),
            SessionState::Closed => return Err(use_after_close("secure stream")),
            SessionState::Handshaking => {}
        }

        match self.handshake_round() {
            Ok(true) => {
                self.on_established();
                Ok(HandshakeStatus::Complete)
            }
            Ok(false) => Ok(HandshakeStatus::Pending),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn handshake_round(&mut self) -> Result<bool, StreamError> {
        let Some(session) = self.session.as_mut() else {
            return Err(StreamError::UseAfterClose);
        };
        let mut io = TransportIo::new(&mut self.transport);

        drain_records(session, &mut io)?;
        if session.wants_read() {
            match session.read_tls(&mut io) {
                Ok(0) => return Err(StreamError::Closed),
                Ok(_) => {
                    if let Err(err) = session.process_new_packets() {
                        // Deliver our alert, if any, before giving up.
                        let _ = drain_records(session, &mut io);
                        return Err(handshake_error(err));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
        drain_records(session, &mut io)?;
        let done = !session.is_handshaking();
        self.transport.flush()?;
        Ok(done)
    }

    fn on_established(&mut self) {
        self.state = SessionState::Established;
        self.peer_connected = true;
        self.counted_active = true;

        let metrics = self.context.metrics();
        metrics.record_handshake_completed();
        if self.trust == PeerTrust::Unverified {
            metrics.record_unverified_handshake();
            self.context.network_state().record_unverified_connection();
            log::warn!(
                "[tls] connected to {:?} without verifying the server certificate",
                self.transport.peer_addr()
            );
        }
        log::info!(
            "[tls] {:?} handshake complete ({:?}, peer {:?})",
            self.role,
            self.protocol_version(),
            self.transport.peer_addr()
        );
    }

    /// Record a terminal failure. Returns the error every later call reports.
    fn fail(&mut self, err: StreamError) -> StreamError {
        let reason = FailureReason::from_error(&err);
        let metrics = self.context.metrics();
        if self.state == SessionState::Handshaking {
            match &reason {
                FailureReason::Security(SecurityFailure::CertificateRejected(msg)) => {
                    metrics.record_certificate_rejected();
                    log::error!("[tls] server certificate rejected: {}", msg);
                }
                other => {
                    metrics.record_handshake_failed();
                    log::warn!("[tls] {:?} handshake failed: {:?}", self.role, other);
                }
            }
        } else {
            log::debug!("[tls] session ended: {:?}", reason);
        }
        self.peer_connected = false;
        let reported = reason.to_error();
        self.state = SessionState::Failed(reason);
        reported
    }

    /// Handshake first; `Ok(false)` while it is still pending.
    fn ensure_established(&mut self) -> Result<bool, StreamError> {
        Ok(self.handshake()? == HandshakeStatus::Complete)
    }

    // ========================================================================
    // Record I/O
    // ========================================================================

    /// Write queued records to the transport. `Ok(false)` if some remain.
    fn flush_records(&mut self) -> Result<bool, StreamError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(true);
        };
        let mut io = TransportIo::new(&mut self.transport);
        match drain_records(session, &mut io) {
            Ok(done) => Ok(done),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Decrypted data already held by the session.
    fn read_plaintext(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StreamError> {
        let Some(session) = self.session.as_mut() else {
            return Err(StreamError::UseAfterClose);
        };
        match session.read_plaintext(buf) {
            Ok(0) => {
                log::debug!("[tls] close_notify received");
                Err(self.fail(StreamError::Closed))
            }
            Ok(n) => {
                self.context.metrics().record_bytes_received(n);
                Ok(Some(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // Transport ended without close_notify.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(self.fail(StreamError::Closed)),
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// One transport read, then process whatever records arrived.
    fn receive_records(&mut self) -> Result<(), StreamError> {
        let Some(session) = self.session.as_mut() else {
            return Err(StreamError::UseAfterClose);
        };
        let mut io = TransportIo::new(&mut self.transport);
        let result = match session.read_tls(&mut io) {
            Ok(_) => session.process_new_packets().map(|_| ()).map_err(|err| {
                let _ = drain_records(session, &mut io);
                StreamError::Transport(format!("corrupt TLS record: {err}"))
            }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        };
        result.map_err(|err| self.fail(err))
    }
}

impl<S: ByteStream> ByteStream for SecureStream<S> {
    fn interface(&self) -> StreamInterface {
        StreamInterface::SecureSocket
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if !self.ensure_established()? || buf.is_empty() {
            return Ok(0);
        }
        if let Some(n) = self.read_plaintext(buf)? {
            return Ok(n);
        }

        self.receive_records()?;
        // Key updates and alerts produced while reading.
        self.flush_records()?;
        Ok(self.read_plaintext(buf)?.unwrap_or(0))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        if !self.ensure_established()? || buf.is_empty() {
            return Ok(0);
        }
        self.flush_records()?;

        let written = match self.session.as_mut() {
            Some(session) => session.write_plaintext(buf),
            None => return Err(StreamError::UseAfterClose),
        };
        let written = written.map_err(|e| self.fail(e.into()))?;
        self.flush_records()?;

        let metrics = self.context.metrics();
        if written == 0 {
            metrics.record_write_blocked();
            if !self.reported_busy {
                log::debug!("[tls] write delayed, send buffer full");
                self.reported_busy = true;
            }
        } else {
            metrics.record_bytes_sent(written);
            self.reported_busy = false;
        }
        Ok(written)
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        match &self.state {
            SessionState::Closed => return Err(use_after_close("secure stream")),
            SessionState::Failed(reason) => return Err(reason.to_error()),
            SessionState::Handshaking => {
                self.handshake()?;
            }
            SessionState::Established => {}
        }
        self.flush_records()?;
        self.transport.flush()
    }

    fn close(&mut self) {
        if self.state == SessionState::Closed {
            use_after_close("secure stream");
            return;
        }

        if self.peer_connected {
            if let Some(session) = self.session.as_mut() {
                session.send_close_notify();
                let mut io = TransportIo::new(&mut self.transport);
                match drain_records(session, &mut io) {
                    Ok(true) => self.context.metrics().record_close_notify_sent(),
                    Ok(false) => log::debug!("[tls] close_notify not fully sent, transport busy"),
                    Err(e) => log::debug!("[tls] close_notify not sent: {}", e),
                }
            }
            let _ = self.transport.flush();
        }

        if self.session.take().is_some() {
            self.context.metrics().record_session_released(self.counted_active);
        }
        self.transport.close();
        self.peer_connected = false;
        self.counted_active = false;
        self.state = SessionState::Closed;
        log::debug!("[tls] {:?} stream closed", self.role);
    }

    fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.transport.peer_addr()
    }

    fn select_enabled(&self) -> bool {
        self.flags.select && self.transport.select_enabled()
    }

    #[cfg(unix)]
    fn select_fd(&self) -> Option<RawFd> {
        self.transport.select_fd()
    }

    fn wants_write_event(&self) -> bool {
        self.transport.wants_write_event() || self.session.as_ref().is_some_and(TlsSession::wants_write)
    }

    fn has_buffered_input(&mut self) -> bool {
        if self.state != SessionState::Established {
            return false;
        }
        match self.session.as_mut() {
            // An error is reported by the next read.
            Some(session) => session.process_new_packets().map_or(true, |pending| pending > 0),
            None => false,
        }
    }

    fn poll_ready(&mut self) -> Option<StreamEvent> {
        if self.state == SessionState::Closed {
            return None;
        }
        if self.has_buffered_input() {
            return Some(StreamEvent::Read);
        }
        self.transport.poll_ready()
    }

    fn on_writable(&mut self) -> StreamEvent {
        self.transport.on_writable()
    }
}

impl<S: ByteStream> Drop for SecureStream<S> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            self.close();
        }
    }
}

impl<S: ByteStream> std::fmt::Debug for SecureStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStream")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("trust", &self.trust)
            .field("peer", &self.transport.peer_addr())
            .finish()
    }
}

/// Write queued records until the session is empty or the transport pushes
/// back. Returns `Ok(true)` when everything was handed to the transport.
fn drain_records(session: &mut TlsSession, io: &mut dyn io::Write) -> Result<bool, StreamError> {
    while session.wants_write() {
        match session.write_tls(io) {
            Ok(0) => return Ok(false),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn handshake_error(err: rustls::Error) -> StreamError {
    let message = err.to_string();
    let failure = match err {
        rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented => {
            SecurityFailure::CertificateRejected(message)
        }
        _ => SecurityFailure::HandshakeFailed(message),
    };
    StreamError::Security(failure)
}

// ============================================================================
// Listener
// ============================================================================

/// Listening stream producing server-side [`SecureStream`]s.
pub struct SecureListener<L: ByteStream = TcpListenerSocket> {
    listener: L,
    context: Arc<TlsContext>,
    flags: OpenFlags,
}

impl SecureListener<TcpListenerSocket> {
    /// Listen on `[host]:port` (default port 6369).
    pub fn open(context: &Arc<TlsContext>, parameters: &str, flags: OpenFlags) -> Result<Self, StreamError> {
        if !context.is_server_capable() {
            return Err(StreamError::NotConfigured("server certificate and key"));
        }
        let addr = HostPort::parse(parameters, DEFAULT_TLS_PORT)?.resolve()?;
        let listener = TcpListenerSocket::bind(addr, flags, DEFAULT_LISTEN_BACKLOG)?;
        Self::new(context, listener, flags)
    }

    /// Listen with socket options from `config`.
    pub fn open_with(
        context: &Arc<TlsContext>,
        parameters: &str,
        config: &SocketConfig,
    ) -> Result<Self, StreamError> {
        if !context.is_server_capable() {
            return Err(StreamError::NotConfigured("server certificate and key"));
        }
        let addr = HostPort::parse(parameters, DEFAULT_TLS_PORT)?.resolve()?;
        let flags = config.listen_flags();
        let listener = TcpListenerSocket::bind(addr, flags, config.listen_backlog)?;
        Self::new(context, listener, flags)
    }

    pub fn bound_addr(&self) -> SocketAddr {
        self.listener.bound_addr()
    }

    pub fn backlog(&self) -> i32 {
        self.listener.backlog()
    }
}

impl<L: ByteStream> SecureListener<L> {
    /// Wrap an already listening transport.
    pub fn new(context: &Arc<TlsContext>, listener: L, flags: OpenFlags) -> Result<Self, StreamError> {
        if !context.is_server_capable() {
            return Err(StreamError::NotConfigured("server certificate and key"));
        }
        if !listener.is_listening() {
            return Err(StreamError::invalid("transport is not listening"));
        }
        Ok(Self {
            listener,
            context: Arc::clone(context),
            flags,
        })
    }

    /// Accept a pending connection. The returned stream is still handshaking.
    pub fn accept_secure(&mut self) -> Result<Option<(SecureStream, Option<SocketAddr>)>, StreamError> {
        let Some(accepted) = self.listener.accept()? else {
            return Ok(None);
        };
        let flags = OpenFlags {
            role: crate::stream::StreamRole::Connect,
            ..self.flags
        };
        let stream = SecureStream::accept_from(&self.context, accepted.stream, flags)?;
        log::debug!("[tls] accepted connection from {:?}", accepted.remote_addr);
        Ok(Some((stream, accepted.remote_addr)))
    }
}

impl<L: ByteStream> ByteStream for SecureListener<L> {
    fn interface(&self) -> StreamInterface {
        StreamInterface::SecureSocket
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
        Ok(self.accept_secure()?.map(|(stream, remote_addr)| Accepted {
            stream: Box::new(stream),
            remote_addr,
        }))
    }

    fn close(&mut self) {
        self.listener.close();
    }

    fn is_closed(&self) -> bool {
        self.listener.is_closed()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    fn select_enabled(&self) -> bool {
        self.listener.select_enabled()
    }

    #[cfg(unix)]
    fn select_fd(&self) -> Option<RawFd> {
        self.listener.select_fd()
    }

    fn is_listening(&self) -> bool {
        true
    }

    fn poll_ready(&mut self) -> Option<StreamEvent> {
        self.listener.poll_ready()
    }
}
