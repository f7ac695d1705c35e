// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy shared by streams, select and the TLS layer.
//!
//! Transient conditions are never errors: a read or write that cannot make
//! progress returns `Ok(0)`, an accept with nothing pending returns
//! `Ok(None)` and a handshake still in flight reports
//! [`HandshakeStatus::Pending`](crate::tls::HandshakeStatus). Everything in
//! this module is terminal for the operation that produced it.
//!
//! | Kind | Variants | Caller reaction |
//! |------|----------|-----------------|
//! | [`ErrorKind::PeerClosed`] | `Closed`, `ConnectionReset` | close and reconnect |
//! | [`ErrorKind::Io`] | `ConnectionRefused`, `Transport`, `Io` | close, maybe retry later |
//! | [`ErrorKind::Security`] | `Security` | close, do not retry blindly |
//! | [`ErrorKind::Usage`] | `InvalidArgument`, `Unsupported`, `UseAfterClose` | fix the caller |
//! | [`ErrorKind::Configuration`] | `NotConfigured`, `Provision` | provision credentials |

use std::io;

use thiserror::Error;

use crate::provision::CertRole;

/// Coarse classification of a [`StreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The peer closed the stream or reset the connection.
    PeerClosed,
    /// Hard transport failure.
    Io,
    /// TLS handshake failure or certificate rejection.
    Security,
    /// Invalid input or API misuse.
    Usage,
    /// Missing or broken credentials/configuration.
    Configuration,
}

/// Reason a secure connection was refused.
///
/// Kept separate from I/O failures so callers can tell "the network broke"
/// apart from "the peer could not be trusted".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityFailure {
    /// The handshake itself failed (protocol error, alert, bad signature).
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// The handshake completed far enough to see the server certificate,
    /// and the certificate did not validate against the trusted chain.
    #[error("server certificate rejected: {0}")]
    CertificateRejected(String),
}

/// Terminal reason stored by a failed secure stream.
///
/// Every operation on the stream after the failure reports the same error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Security(SecurityFailure),
    PeerClosed,
    ConnectionReset,
    Transport(String),
}

impl FailureReason {
    /// Rebuild the error reported for this failure.
    pub fn to_error(&self) -> StreamError {
        match self {
            FailureReason::Security(failure) => StreamError::Security(failure.clone()),
            FailureReason::PeerClosed => StreamError::Closed,
            FailureReason::ConnectionReset => StreamError::ConnectionReset,
            FailureReason::Transport(msg) => StreamError::Transport(msg.clone()),
        }
    }

    /// Classify a stream error that ended a handshake or session.
    pub(crate) fn from_error(err: &StreamError) -> Self {
        match err {
            StreamError::Closed => FailureReason::PeerClosed,
            StreamError::ConnectionReset => FailureReason::ConnectionReset,
            StreamError::Security(failure) => FailureReason::Security(failure.clone()),
            StreamError::Transport(msg) => FailureReason::Transport(msg.clone()),
            other => FailureReason::Transport(other.to_string()),
        }
    }
}

/// Failure to obtain a certificate, chain or private key.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Nothing stored under the reference.
    #[error("{role} not available at {reference}")]
    NotAvailable { role: CertRole, reference: String },

    /// The reference exists but could not be read.
    #[error("{role} could not be read from {reference}: {source}")]
    Unreadable {
        role: CertRole,
        reference: String,
        #[source]
        source: io::Error,
    },

    /// The bytes were read but are not a valid certificate/key.
    #[error("{role} from {reference} could not be parsed: {reason}")]
    ParseFailed {
        role: CertRole,
        reference: String,
        reason: String,
    },
}

impl ProvisionError {
    pub fn role(&self) -> CertRole {
        match self {
            ProvisionError::NotAvailable { role, .. }
            | ProvisionError::Unreadable { role, .. }
            | ProvisionError::ParseFailed { role, .. } => *role,
        }
    }
}

/// Error returned by stream, select and TLS operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Graceful close by the peer (end of stream or TLS close-notify).
    #[error("stream closed by peer")]
    Closed,

    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("connection refused")]
    ConnectionRefused,

    /// Secure connection refused: handshake failure or untrusted certificate.
    #[error("connection rejected: {0}")]
    Security(#[from] SecurityFailure),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// A required credential or configuration item is missing.
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation not supported by this stream")]
    Unsupported,

    /// Operation on a stream that was already closed.
    #[error("stream used after close")]
    UseAfterClose,

    /// Sticky transport failure recorded by a secure stream.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Closed | StreamError::ConnectionReset => ErrorKind::PeerClosed,
            StreamError::ConnectionRefused | StreamError::Transport(_) | StreamError::Io(_) => {
                ErrorKind::Io
            }
            StreamError::Security(_) => ErrorKind::Security,
            StreamError::InvalidArgument(_)
            | StreamError::Unsupported
            | StreamError::UseAfterClose => ErrorKind::Usage,
            StreamError::Provision(_) | StreamError::NotConfigured(_) => ErrorKind::Configuration,
        }
    }

    /// `true` for a graceful close or reset by the peer.
    pub fn is_peer_closed(&self) -> bool {
        self.kind() == ErrorKind::PeerClosed
    }

    pub fn is_security(&self) -> bool {
        matches!(self, StreamError::Security(_))
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        StreamError::InvalidArgument(msg.into())
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => StreamError::ConnectionReset,
            io::ErrorKind::ConnectionRefused => StreamError::ConnectionRefused,
            io::ErrorKind::UnexpectedEof => StreamError::Closed,
            io::ErrorKind::InvalidInput => StreamError::InvalidArgument(err.to_string()),
            _ => StreamError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let reset: StreamError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert!(matches!(reset, StreamError::ConnectionReset));
        assert!(reset.is_peer_closed());

        let pipe: StreamError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(pipe, StreamError::ConnectionReset));

        let refused: StreamError = io::Error::from(io::ErrorKind::ConnectionRefused).into();
        assert_eq!(refused.kind(), ErrorKind::Io);

        let other: StreamError = io::Error::other("boom").into();
        assert!(matches!(other, StreamError::Io(_)));
    }

    #[test]
    fn test_security_distinct_from_io() {
        let rejected = StreamError::Security(SecurityFailure::CertificateRejected(
            "unknown issuer".into(),
        ));
        assert_eq!(rejected.kind(), ErrorKind::Security);
        assert!(rejected.is_security());
        assert!(!rejected.is_peer_closed());
        assert!(rejected.to_string().contains("unknown issuer"));
    }

    #[test]
    fn test_failure_reason_is_sticky_and_stable() {
        let reason = FailureReason::Security(SecurityFailure::HandshakeFailed("alert".into()));
        let first = reason.to_error();
        let second = reason.to_error();
        assert_eq!(first.to_string(), second.to_string());
        assert!(first.is_security());

        let reason = FailureReason::from_error(&StreamError::ConnectionReset);
        assert_eq!(reason, FailureReason::ConnectionReset);
        assert!(matches!(reason.to_error(), StreamError::ConnectionReset));

        let original = StreamError::Transport("corrupt TLS record".into());
        let replayed = FailureReason::from_error(&original).to_error();
        assert_eq!(replayed.to_string(), original.to_string());
    }

    #[test]
    fn test_provision_error_role() {
        let err = ProvisionError::NotAvailable {
            role: CertRole::ServerKey,
            reference: "block 6".into(),
        };
        assert_eq!(err.role(), CertRole::ServerKey);
        let stream_err: StreamError = err.into();
        assert_eq!(stream_err.kind(), ErrorKind::Configuration);
    }
}
