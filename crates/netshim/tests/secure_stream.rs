// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::too_many_lines)] // Scenario tests

//! Secure streams over in-memory pipes.
//!
//! Every scenario builds a throwaway PKI with rcgen (CA + leaf for
//! `device.local`) and drives client and server sessions by hand, the way an
//! event loop would after each `select`.

use std::sync::Arc;

use netshim::config::{SecurityConfig, VerificationPolicy};
use netshim::provision::{DirectoryStore, PersistentStore, BLOCK_TRUSTED_CHAIN};
use netshim::stream::memory::{MemoryPipeConfig, MemoryStream};
use netshim::stream::{ByteStream, OpenFlags};
use netshim::tls::{HandshakeStatus, PeerTrust, SecureStream, SessionState, TlsContext};
use netshim::{ErrorKind, NetworkState, SecurityFailure, StreamError};
use rcgen::{
    date_time_ymd, BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose,
};

const SERVER_NAME: &str = "device.local";

/// Test PKI: one CA, one leaf signed by it.
struct Pki {
    ca_pem: String,
    leaf_pem: String,
    leaf_key_pem: String,
}

impl Pki {
    fn new() -> Self {
        Self::with_leaf_validity(None)
    }

    fn expired() -> Self {
        Self::with_leaf_validity(Some(((2000, 1, 1), (2001, 1, 1))))
    }

    /// Leaf issued in the future, as seen by a device whose clock was never set.
    fn not_yet_valid() -> Self {
        Self::with_leaf_validity(Some(((2090, 1, 1), (2091, 1, 1))))
    }

    fn with_leaf_validity(validity: Option<((i32, u8, u8), (i32, u8, u8))>) -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "netshim test CA");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::new(vec![SERVER_NAME.to_string()]).unwrap();
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, SERVER_NAME);
        if let Some((from, to)) = validity {
            leaf_params.not_before = date_time_ymd(from.0, from.1, from.2);
            leaf_params.not_after = date_time_ymd(to.0, to.1, to.2);
        }
        let leaf = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        Self {
            ca_pem: ca_cert.pem(),
            leaf_pem: leaf.pem(),
            leaf_key_pem: leaf_key.serialize_pem(),
        }
    }

    fn server_context(&self) -> Arc<TlsContext> {
        TlsContext::builder()
            .with_server_pem(self.leaf_pem.as_bytes(), self.leaf_key_pem.as_bytes())
            .unwrap()
            .build()
            .unwrap()
    }

    fn client_context(&self, policy: VerificationPolicy) -> Arc<TlsContext> {
        TlsContext::builder()
            .with_trusted_pem(self.ca_pem.as_bytes())
            .unwrap()
            .with_policy(policy)
            .build()
            .unwrap()
    }
}

type Pair = (SecureStream<MemoryStream>, SecureStream<MemoryStream>);

fn open_pair(
    client_ctx: &Arc<TlsContext>,
    server_ctx: &Arc<TlsContext>,
    server_name: &str,
    pipe: MemoryPipeConfig,
) -> Pair {
    let (a, b) = MemoryStream::pair(pipe);
    let client = SecureStream::connect(client_ctx, a, server_name, OpenFlags::connect()).unwrap();
    let server = SecureStream::accept_from(server_ctx, b, OpenFlags::connect()).unwrap();
    (client, server)
}

/// Drive both handshakes until they settle. Returns the client's result.
fn drive(client: &mut SecureStream<MemoryStream>, server: &mut SecureStream<MemoryStream>) -> Result<(), StreamError> {
    for _ in 0..200 {
        let c = client.handshake()?;
        // Server errors surface on the client as alerts.
        let s = server.handshake().unwrap_or(HandshakeStatus::Pending);
        if c == HandshakeStatus::Complete && s == HandshakeStatus::Complete {
            return Ok(());
        }
    }
    panic!("handshake did not settle");
}

fn read_exact(stream: &mut SecureStream<MemoryStream>, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut buf = [0u8; 4096];
    for _ in 0..10_000 {
        if out.len() >= len {
            break;
        }
        let n = stream.read(&mut buf).unwrap();
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[test]
fn established_exchange_both_directions() {
    let pki = Pki::new();
    let server_ctx = pki.server_context();
    let client_ctx = pki.client_context(VerificationPolicy::default());
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, MemoryPipeConfig::default());

    drive(&mut client, &mut server).unwrap();
    assert!(client.is_established());
    assert!(server.is_established());
    assert_eq!(client.peer_trust(), PeerTrust::Verified);
    assert!(client.protocol_version().is_some());

    assert_eq!(client.write(b"GET /status").unwrap(), 11);
    client.flush().unwrap();
    assert_eq!(read_exact(&mut server, 11), b"GET /status");

    assert_eq!(server.write(b"200 OK").unwrap(), 6);
    server.flush().unwrap();
    assert_eq!(read_exact(&mut client, 6), b"200 OK");

    let snapshot = client_ctx.metrics().snapshot();
    assert_eq!(snapshot.handshakes_completed, 1);
    assert_eq!(snapshot.bytes_sent, 11);
    assert_eq!(snapshot.bytes_received, 6);
    assert_eq!(snapshot.active_sessions, 1);
}

#[test]
fn chunked_transport_still_completes() {
    let pki = Pki::new();
    let server_ctx = pki.server_context();
    let client_ctx = pki.client_context(VerificationPolicy::default());
    let pipe = MemoryPipeConfig {
        capacity: 64 * 1024,
        max_write_per_call: Some(40),
    };
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, pipe);
    drive(&mut client, &mut server).unwrap();

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let mut sent = 0;
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    for _ in 0..100_000 {
        if sent < payload.len() {
            sent += client.write(&payload[sent..]).unwrap();
        } else {
            client.flush().unwrap();
        }
        let n = server.read(&mut buf).unwrap();
        received.extend_from_slice(&buf[..n]);
        if received.len() == payload.len() {
            break;
        }
    }
    assert_eq!(received, payload);
}

#[test]
fn hundred_bytes_over_forty_byte_transport() {
    let pki = Pki::new();
    let server_ctx = pki.server_context();
    let client_ctx = pki.client_context(VerificationPolicy::default());
    let pipe = MemoryPipeConfig {
        capacity: 64 * 1024,
        max_write_per_call: Some(40),
    };
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, pipe);
    drive(&mut client, &mut server).unwrap();

    let payload = [0xa5u8; 100];
    let mut reported = 0;
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    for _ in 0..1000 {
        if reported < payload.len() {
            reported += client.write(&payload[reported..]).unwrap();
        }
        client.flush().unwrap();
        let n = server.read(&mut buf).unwrap();
        received.extend_from_slice(&buf[..n]);
        if received.len() == payload.len() {
            break;
        }
    }
    assert_eq!(reported, 100);
    assert_eq!(received, payload);
}

#[test]
fn write_backpressure_reports_zero_then_drains() {
    let pki = Pki::new();
    let server_ctx = pki.server_context();
    let client_ctx = pki.client_context(VerificationPolicy::default());
    let pipe = MemoryPipeConfig {
        capacity: 4096,
        max_write_per_call: None,
    };
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, pipe);
    drive(&mut client, &mut server).unwrap();

    let chunk = [0x5au8; 1024];
    let mut total = 0;
    let mut blocked = false;
    for _ in 0..1000 {
        let n = client.write(&chunk).unwrap();
        if n == 0 {
            blocked = true;
            break;
        }
        total += n;
    }
    assert!(blocked, "writes never reported backpressure");
    assert!(client_ctx.metrics().snapshot().writes_blocked >= 1);

    let mut received = 0;
    let mut buf = [0u8; 8192];
    for _ in 0..100_000 {
        client.flush().unwrap();
        received += server.read(&mut buf).unwrap();
        if received == total {
            break;
        }
    }
    assert_eq!(received, total);
    assert!(client.write(&chunk).unwrap() > 0);
}

#[test]
fn bootstrap_without_chain_marks_connection_unverified() {
    let pki = Pki::new();
    let server_ctx = pki.server_context();
    let net_state = Arc::new(NetworkState::new());
    let client_ctx = TlsContext::builder()
        .with_network_state(Arc::clone(&net_state))
        .build()
        .unwrap();
    assert!(net_state.no_cert_chain());

    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, MemoryPipeConfig::default());
    drive(&mut client, &mut server).unwrap();

    assert_eq!(client.peer_trust(), PeerTrust::Unverified);
    let status = net_state.snapshot();
    assert_eq!(status.unverified_connections, 1);
    assert_eq!(client_ctx.metrics().snapshot().unverified_handshakes, 1);

    // The bootstrap channel is still encrypted and usable.
    client.write(b"fetch chain").unwrap();
    client.flush().unwrap();
    assert_eq!(read_exact(&mut server, 11), b"fetch chain");
}

#[test]
fn bootstrap_disabled_refuses_connect() {
    let policy = VerificationPolicy {
        bootstrap_without_trust_chain: false,
        ..Default::default()
    };
    let client_ctx = TlsContext::builder().with_policy(policy).build().unwrap();
    let (a, _b) = MemoryStream::pair(MemoryPipeConfig::default());
    let err = SecureStream::connect(&client_ctx, a, SERVER_NAME, OpenFlags::connect()).unwrap_err();
    assert!(matches!(err, StreamError::NotConfigured(_)));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn untrusted_root_rejected_and_failure_is_sticky() {
    let server_pki = Pki::new();
    let other_pki = Pki::new();
    let server_ctx = server_pki.server_context();
    let client_ctx = other_pki.client_context(VerificationPolicy::default());
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, MemoryPipeConfig::default());

    let err = drive(&mut client, &mut server).unwrap_err();
    assert!(matches!(err, StreamError::Security(SecurityFailure::CertificateRejected(_))));
    assert!(matches!(client.state(), SessionState::Failed(_)));

    let mut buf = [0u8; 8];
    let again = client.read(&mut buf).unwrap_err();
    assert_eq!(again.to_string(), err.to_string());
    assert!(client.write(b"x").unwrap_err().is_security());
    assert!(client.handshake().unwrap_err().is_security());

    // The server sees the client's alert as a handshake failure.
    let server_err = server.handshake().unwrap_err();
    assert_eq!(server_err.kind(), ErrorKind::Security);

    let snapshot = client_ctx.metrics().snapshot();
    assert_eq!(snapshot.certificates_rejected, 1);
    assert_eq!(snapshot.handshakes_completed, 0);
}

#[test]
fn wrong_server_name_rejected() {
    let pki = Pki::new();
    let server_ctx = pki.server_context();
    let client_ctx = pki.client_context(VerificationPolicy::default());
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, "gateway.local", MemoryPipeConfig::default());

    let err = drive(&mut client, &mut server).unwrap_err();
    assert!(matches!(err, StreamError::Security(SecurityFailure::CertificateRejected(_))));
}

#[test]
fn expired_certificate_accepted_without_expiration_check() {
    let pki = Pki::expired();
    let server_ctx = pki.server_context();
    let client_ctx = pki.client_context(VerificationPolicy::default());
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, MemoryPipeConfig::default());

    drive(&mut client, &mut server).unwrap();
    assert_eq!(client.peer_trust(), PeerTrust::Verified);
}

#[test]
fn expired_certificate_rejected_with_expiration_check() {
    let pki = Pki::expired();
    let server_ctx = pki.server_context();
    let policy = VerificationPolicy {
        check_expiration: true,
        ..Default::default()
    };
    let client_ctx = pki.client_context(policy);
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, MemoryPipeConfig::default());

    let err = drive(&mut client, &mut server).unwrap_err();
    assert!(matches!(err, StreamError::Security(SecurityFailure::CertificateRejected(_))));
}

#[test]
fn not_yet_valid_certificate_accepted_without_expiration_check() {
    let pki = Pki::not_yet_valid();
    let server_ctx = pki.server_context();
    let client_ctx = pki.client_context(VerificationPolicy::default());
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, MemoryPipeConfig::default());

    drive(&mut client, &mut server).unwrap();
    assert_eq!(client.peer_trust(), PeerTrust::Verified);
    assert!(client.is_established());
}

#[test]
fn not_yet_valid_certificate_rejected_with_expiration_check() {
    let pki = Pki::not_yet_valid();
    let server_ctx = pki.server_context();
    let policy = VerificationPolicy {
        check_expiration: true,
        ..Default::default()
    };
    let client_ctx = pki.client_context(policy);
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, MemoryPipeConfig::default());

    let err = drive(&mut client, &mut server).unwrap_err();
    assert!(matches!(err, StreamError::Security(SecurityFailure::CertificateRejected(_))));
    assert_eq!(client_ctx.metrics().snapshot().certificates_rejected, 1);
}

#[test]
fn corrupt_record_fails_with_the_same_error_every_time() {
    let pki = Pki::new();
    let server_ctx = pki.server_context();
    let client_ctx = pki.client_context(VerificationPolicy::default());
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, MemoryPipeConfig::default());
    drive(&mut client, &mut server).unwrap();

    // Application data record whose payload cannot decrypt.
    let mut record = vec![0x17, 0x03, 0x03, 0x00, 0x20];
    record.extend_from_slice(&[0u8; 32]);
    server.transport().inject_bytes(&record);

    let mut buf = [0u8; 16];
    let first = client.read(&mut buf).unwrap_err();
    assert_eq!(first.kind(), ErrorKind::Io);
    assert!(matches!(client.state(), SessionState::Failed(_)));

    let second = client.read(&mut buf).unwrap_err();
    let third = client.write(b"x").unwrap_err();
    assert!(matches!(first, StreamError::Transport(_)), "{first}");
    assert_eq!(second.to_string(), first.to_string());
    assert_eq!(third.to_string(), first.to_string());
}

#[test]
fn peer_reset_is_reported_as_peer_closed() {
    let pki = Pki::new();
    let server_ctx = pki.server_context();
    let client_ctx = pki.client_context(VerificationPolicy::default());
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, MemoryPipeConfig::default());
    drive(&mut client, &mut server).unwrap();

    server.transport().inject_reset();
    let mut buf = [0u8; 8];
    let err = client.read(&mut buf).unwrap_err();
    assert!(matches!(err, StreamError::ConnectionReset));
    assert!(err.is_peer_closed());
    assert!(matches!(client.read(&mut buf), Err(StreamError::ConnectionReset)));
}

#[test]
fn close_ordering_and_session_release() {
    let pki = Pki::new();
    let server_ctx = pki.server_context();
    let client_ctx = pki.client_context(VerificationPolicy::default());
    let (mut client, mut server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, MemoryPipeConfig::default());
    drive(&mut client, &mut server).unwrap();

    let before = client.transport().bytes_written();
    client.close();
    // close_notify went out before the transport was released.
    assert!(client.transport().bytes_written() > before);
    assert!(client.transport().is_closed());
    assert_eq!(client.state(), &SessionState::Closed);

    let mut buf = [0u8; 8];
    assert!(matches!(server.read(&mut buf), Err(StreamError::Closed)));
    server.close();

    let client_metrics = client_ctx.metrics().snapshot();
    assert_eq!(client_metrics.close_notify_sent, 1);
    assert_eq!(client_metrics.sessions_released, 1);
    assert_eq!(client_metrics.active_sessions, 0);
    assert_eq!(server_ctx.metrics().snapshot().active_sessions, 0);
}

#[test]
fn close_during_handshake_sends_nothing() {
    let pki = Pki::new();
    let server_ctx = pki.server_context();
    let client_ctx = pki.client_context(VerificationPolicy::default());
    let (mut client, server) = open_pair(&client_ctx, &server_ctx, SERVER_NAME, MemoryPipeConfig::default());

    let before = client.transport().bytes_written();
    client.close();
    assert_eq!(client.transport().bytes_written(), before);
    assert_eq!(client_ctx.metrics().snapshot().close_notify_sent, 0);
    assert_eq!(client_ctx.metrics().sessions_released(), 1);
    drop(server);
}

#[test]
fn context_from_directory_store_and_files() {
    let pki = Pki::new();
    let dir = tempfile::tempdir().unwrap();
    let certs_dir = dir.path().join("certs");
    std::fs::create_dir_all(&certs_dir).unwrap();
    std::fs::write(certs_dir.join("server.crt"), &pki.leaf_pem).unwrap();
    std::fs::write(certs_dir.join("server.key"), &pki.leaf_key_pem).unwrap();

    let store = DirectoryStore::new(dir.path().join("persistent"));
    store.save_block(BLOCK_TRUSTED_CHAIN, pki.ca_pem.as_bytes()).unwrap();

    let config = SecurityConfig {
        certs_dir,
        server_cert: Some("server.crt".into()),
        server_key: Some("server.key".into()),
        ..Default::default()
    };
    let net_state = Arc::new(NetworkState::new());
    let ctx = TlsContext::from_config(&config, &store, Arc::clone(&net_state)).unwrap();
    assert!(ctx.has_trusted_chain());
    assert!(ctx.is_server_capable());
    assert!(net_state.snapshot().security_conf_error.is_none());

    // One context can serve both sides.
    let (mut client, mut server) = open_pair(&ctx, &ctx, SERVER_NAME, MemoryPipeConfig::default());
    drive(&mut client, &mut server).unwrap();
    assert_eq!(client.peer_trust(), PeerTrust::Verified);
}
