// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # netshim - portable network streams for embedded devices
//!
//! Non-blocking byte streams (TCP, in-memory pipes), a select-style
//! multiplexer over up to eight streams with a cross-thread wake event, and a
//! TLS layer driven incrementally on top of any stream, with certificate and
//! key provisioning from files or numbered persistent blocks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netshim::select::{select, SelectOutcome, SelectSlot, WakeEvent};
//! use netshim::stream::socket::TcpSocket;
//! use netshim::stream::{ByteStream, OpenFlags};
//!
//! fn main() -> Result<(), netshim::StreamError> {
//!     let mut stream = TcpSocket::open("192.168.1.20:6368", OpenFlags::connect())?;
//!     let wake = WakeEvent::new()?;
//!
//!     let mut slots: [SelectSlot<'_>; 1] = [Some(&mut stream)];
//!     match select(&mut slots, Some(&wake), 1000)? {
//!         SelectOutcome::Ready { index, event } => println!("stream {index}: {event:?}"),
//!         SelectOutcome::Wake => println!("woken"),
//!         other => println!("{other:?}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                          Application                                |
//! |      select(slots, wake, timeout) -> Ready{index,event} | Wake      |
//! +---------------------------------------------------------------------+
//! |                          Select Layer                               |
//! |   NativeMultiplexer (pselect) | PollingMultiplexer | WakeEvent      |
//! +---------------------------------------------------------------------+
//! |                           TLS Layer                                 |
//! |   TlsContext | SecureStream | SecureListener | verifiers            |
//! +---------------------------------------------------------------------+
//! |                         Stream Layer                                |
//! |   TcpSocket | TcpListenerSocket | MemoryStream     (ByteStream)     |
//! +---------------------------------------------------------------------+
//! |          Provisioning / NetworkState / Config / Metrics             |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ByteStream`] | Uniform non-blocking stream interface |
//! | [`SecureStream`] | TLS session over any `ByteStream` |
//! | [`TlsContext`] | Credentials and verification policy |
//! | [`WakeEvent`] | Cross-thread wake-up for `select` |
//! | [`NetworkState`] | Observable credential/trust status |
//! | [`StreamError`] | Error taxonomy (see [`ErrorKind`]) |

/// Configuration (YAML or programmatic).
pub mod config;
/// Error types shared by every layer.
pub mod error;
/// TLS counters.
pub mod metrics;
/// Observable network/security status.
pub mod net_state;
/// Certificate and key loading from files or persistent blocks.
pub mod provision;
/// Multiplexing over up to eight streams.
pub mod select;
/// Byte stream interface and plain transports.
pub mod stream;
/// TLS over byte streams.
pub mod tls;

pub use config::{NetshimConfig, SecurityConfig, VerificationPolicy};
pub use error::{ErrorKind, FailureReason, ProvisionError, SecurityFailure, StreamError};
pub use metrics::{TlsMetrics, TlsMetricsSnapshot};
pub use net_state::{NetStateItem, NetworkState, NetworkStatus};
pub use provision::{CertRole, DirectoryStore, MemoryStore, PersistentStore, Provisioner};
pub use select::{select, Multiplexer, SelectOutcome, SelectSlot, WakeEvent};
pub use stream::{BoxedByteStream, ByteStream, OpenFlags, StreamEvent, StreamInterface};
pub use tls::{HandshakeStatus, PeerTrust, SecureListener, SecureStream, SessionState, TlsContext};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
