// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client/server TLS session wrapper.

use std::io::{self, Read, Write};

use rustls::pki_types::CertificateDer;
use rustls::{ClientConnection, ProtocolVersion, ServerConnection};

/// Side of the handshake a stream plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsRole {
    Client,
    Server,
}

/// How far the peer's identity was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerTrust {
    /// Server certificate validated against the trusted chain.
    Verified,
    /// No trusted chain was provisioned; the server was accepted as-is.
    Unverified,
    /// Server side: clients are not authenticated.
    NotApplicable,
}

/// TLS session (client or server).
pub(crate) enum TlsSession {
    Client(ClientConnection),
    Server(ServerConnection),
}

impl TlsSession {
    pub(crate) fn role(&self) -> TlsRole {
        match self {
            TlsSession::Client(_) => TlsRole::Client,
            TlsSession::Server(_) => TlsRole::Server,
        }
    }

    pub(crate) fn is_handshaking(&self) -> bool {
        match self {
            TlsSession::Client(c) => c.is_handshaking(),
            TlsSession::Server(s) => s.is_handshaking(),
        }
    }

    pub(crate) fn wants_read(&self) -> bool {
        match self {
            TlsSession::Client(c) => c.wants_read(),
            TlsSession::Server(s) => s.wants_read(),
        }
    }

    pub(crate) fn wants_write(&self) -> bool {
        match self {
            TlsSession::Client(c) => c.wants_write(),
            TlsSession::Server(s) => s.wants_write(),
        }
    }

    pub(crate) fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
        match self {
            TlsSession::Client(c) => c.read_tls(rd),
            TlsSession::Server(s) => s.read_tls(rd),
        }
    }

    pub(crate) fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize> {
        match self {
            TlsSession::Client(c) => c.write_tls(wr),
            TlsSession::Server(s) => s.write_tls(wr),
        }
    }

    /// Process received records. Returns the decrypted bytes ready to read.
    pub(crate) fn process_new_packets(&mut self) -> Result<usize, rustls::Error> {
        let state = match self {
            TlsSession::Client(c) => c.process_new_packets()?,
            TlsSession::Server(s) => s.process_new_packets()?,
        };
        Ok(state.plaintext_bytes_to_read())
    }

    pub(crate) fn read_plaintext(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TlsSession::Client(c) => c.reader().read(buf),
            TlsSession::Server(s) => s.reader().read(buf),
        }
    }

    pub(crate) fn write_plaintext(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TlsSession::Client(c) => c.writer().write(buf),
            TlsSession::Server(s) => s.writer().write(buf),
        }
    }

    pub(crate) fn send_close_notify(&mut self) {
        match self {
            TlsSession::Client(c) => c.send_close_notify(),
            TlsSession::Server(s) => s.send_close_notify(),
        }
    }

    pub(crate) fn set_buffer_limit(&mut self, limit: Option<usize>) {
        match self {
            TlsSession::Client(c) => c.set_buffer_limit(limit),
            TlsSession::Server(s) => s.set_buffer_limit(limit),
        }
    }

    pub(crate) fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        match self {
            TlsSession::Client(c) => c.peer_certificates(),
            TlsSession::Server(s) => s.peer_certificates(),
        }
    }

    pub(crate) fn alpn_protocol(&self) -> Option<&[u8]> {
        match self {
            TlsSession::Client(c) => c.alpn_protocol(),
            TlsSession::Server(s) => s.alpn_protocol(),
        }
    }

    pub(crate) fn protocol_version(&self) -> Option<ProtocolVersion> {
        match self {
            TlsSession::Client(c) => c.protocol_version(),
            TlsSession::Server(s) => s.protocol_version(),
        }
    }
}
