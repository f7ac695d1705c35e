// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TLS over non-blocking byte streams.
//!
//! # Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                      TlsContext (Arc)                         |
//! |  trusted chain | server identity | policy | metrics | net state|
//! +---------------------------------------------------------------+
//!          |                                     |
//!          v                                     v
//! +-------------------+                 +-------------------+
//! |   SecureStream    |   TLS records   |   SecureListener  |
//! |  (rustls session) |<--------------->| accept -> server  |
//! +-------------------+                 |   SecureStream    |
//!          |                            +-------------------+
//!          v
//! +-------------------+
//! | ByteStream (TCP,  |
//! |  memory pipe, ...)|
//! +-------------------+
//! ```
//!
//! # Server verification
//!
//! | Situation | Result |
//! |-----------|--------|
//! | chain valid, name matches | [`PeerTrust::Verified`] |
//! | chain valid but expired, `check_expiration` off | accepted with a warning |
//! | unknown issuer / bad signature / wrong name | [`SecurityFailure::CertificateRejected`](crate::SecurityFailure) |
//! | no trusted chain, bootstrap allowed | [`PeerTrust::Unverified`] |
//! | no trusted chain, bootstrap disabled | `NotConfigured` on connect |
//!
//! # Example
//!
//! ```no_run
//! use netshim::stream::{ByteStream, OpenFlags};
//! use netshim::tls::{HandshakeStatus, SecureStream, TlsContext};
//!
//! let ctx = TlsContext::builder()
//!     .with_trusted_pem(&std::fs::read("certs/myhome-bundle.crt")?)?
//!     .build()?;
//! let mut stream = SecureStream::open(&ctx, "device.local:6369", OpenFlags::connect())?;
//! while stream.handshake()? == HandshakeStatus::Pending {
//!     std::thread::sleep(std::time::Duration::from_millis(5));
//! }
//! stream.write(b"hello")?;
//! stream.flush()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod context;
pub mod session;
pub mod stream;
mod transport_io;
mod verifier;

pub use context::{TlsContext, TlsContextBuilder};
pub use session::{PeerTrust, TlsRole};
pub use stream::{HandshakeStatus, SecureListener, SecureStream, SessionState};

/// Upper bound on ciphertext queued inside a session before writes report
/// backpressure.
pub const SEND_BUFFER_LIMIT: usize = 64 * 1024;
