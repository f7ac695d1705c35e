// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![cfg(unix)]
#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Native select over loopback TCP, plain and TLS.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use netshim::select::native::NativeMultiplexer;
use netshim::select::{Multiplexer, SelectOutcome, SelectSlot, WakeEvent, WAIT_INFINITE};
use netshim::stream::socket::{TcpListenerSocket, TcpSocket};
use netshim::stream::{ByteStream, OpenFlags, StreamEvent};
use netshim::tls::{HandshakeStatus, SecureListener, SecureStream, TlsContext};
use netshim::config::SocketConfig;
use netshim::StreamError;
use rcgen::{CertificateParams, KeyPair};

const WAIT_MS: u32 = 2000;

/// Wait on a single stream until `wanted` (or give up).
fn wait_for(mux: &NativeMultiplexer, stream: &mut dyn ByteStream, wanted: StreamEvent) {
    for _ in 0..50 {
        let mut slots: [SelectSlot<'_>; 1] = [Some(&mut *stream)];
        match mux.select(&mut slots, None, WAIT_MS).unwrap() {
            SelectOutcome::Ready { event, .. } if event == wanted => return,
            _ => {}
        }
    }
    panic!("never saw {:?}", wanted);
}

fn accept_one(mux: &NativeMultiplexer, listener: &mut TcpListenerSocket) -> TcpSocket {
    wait_for(mux, listener, StreamEvent::Accept);
    let (socket, _addr) = listener.accept_socket().unwrap().expect("pending connection");
    socket
}

#[test]
fn accept_connect_and_read_events() {
    let mux = NativeMultiplexer::new();
    let mut listener = TcpListenerSocket::open("127.0.0.1:0", OpenFlags::listen()).unwrap();
    let mut client = TcpSocket::connect(listener.bound_addr(), OpenFlags::connect()).unwrap();

    let mut server = accept_one(&mux, &mut listener);
    wait_for(&mux, &mut client, StreamEvent::Connect);
    assert!(client.is_connected());

    assert_eq!(server.write(b"hello").unwrap(), 5);
    server.flush().unwrap();

    // Connected and not blocked: no write interest left.
    assert!(!client.wants_write_event());
    let mut slots: [SelectSlot<'_>; 2] = [Some(&mut listener), Some(&mut client)];
    assert_eq!(
        mux.select(&mut slots, None, WAIT_MS).unwrap(),
        SelectOutcome::Ready {
            index: 1,
            event: StreamEvent::Read
        }
    );

    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
}

#[test]
fn lowest_ready_index_wins() {
    let mux = NativeMultiplexer::new();
    let mut listener = TcpListenerSocket::open("127.0.0.1:0", OpenFlags::listen()).unwrap();

    let mut clients = Vec::new();
    let mut servers = Vec::new();
    for _ in 0..3 {
        let mut client = TcpSocket::connect(listener.bound_addr(), OpenFlags::connect()).unwrap();
        servers.push(accept_one(&mux, &mut listener));
        wait_for(&mux, &mut client, StreamEvent::Connect);
        clients.push(client);
    }

    servers[2].write(b"two").unwrap();
    servers[0].write(b"zero").unwrap();
    thread::sleep(Duration::from_millis(20));

    let [c0, c1, c2] = &mut clients[..] else {
        unreachable!()
    };
    for _ in 0..3 {
        let mut slots: [SelectSlot<'_>; 3] = [Some(&mut *c0), Some(&mut *c1), Some(&mut *c2)];
        assert_eq!(
            mux.select(&mut slots, None, WAIT_MS).unwrap(),
            SelectOutcome::Ready {
                index: 0,
                event: StreamEvent::Read
            }
        );
    }
}

#[test]
fn idle_streams_time_out() {
    let mux = NativeMultiplexer::new();
    let mut listener = TcpListenerSocket::open("127.0.0.1:0", OpenFlags::listen()).unwrap();

    let start = Instant::now();
    let mut slots: [SelectSlot<'_>; 1] = [Some(&mut listener)];
    assert_eq!(mux.select(&mut slots, None, 50).unwrap(), SelectOutcome::Timeout);
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn wake_from_another_thread_interrupts_infinite_wait() {
    let mux = NativeMultiplexer::new();
    let mut listener = TcpListenerSocket::open("127.0.0.1:0", OpenFlags::listen()).unwrap();
    let wake = WakeEvent::new().unwrap();
    let remote = wake.clone();

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        remote.signal();
    });

    let mut slots: [SelectSlot<'_>; 1] = [Some(&mut listener)];
    let outcome = mux.select(&mut slots, Some(&wake), WAIT_INFINITE).unwrap();
    assert_eq!(outcome, SelectOutcome::Wake);
    assert!(!wake.is_signaled());
    handle.join().unwrap();
}

#[test]
fn wake_reported_first_and_pending_accept_survives() {
    let mux = NativeMultiplexer::new();
    let mut listener = TcpListenerSocket::open("127.0.0.1:0", OpenFlags::listen()).unwrap();
    let _client = TcpSocket::connect(listener.bound_addr(), OpenFlags::connect()).unwrap();
    thread::sleep(Duration::from_millis(20));

    let wake = WakeEvent::new().unwrap();
    wake.signal();

    let mut slots: [SelectSlot<'_>; 1] = [Some(&mut listener)];
    assert_eq!(
        mux.select(&mut slots, Some(&wake), WAIT_INFINITE).unwrap(),
        SelectOutcome::Wake
    );
    assert_eq!(
        mux.select(&mut slots, Some(&wake), WAIT_MS).unwrap(),
        SelectOutcome::Ready {
            index: 0,
            event: StreamEvent::Accept
        }
    );
}

#[test]
fn peer_close_reported_then_read_fails() {
    let mux = NativeMultiplexer::new();
    let mut listener = TcpListenerSocket::open("127.0.0.1:0", OpenFlags::listen()).unwrap();
    let mut client = TcpSocket::connect(listener.bound_addr(), OpenFlags::connect()).unwrap();
    let mut server = accept_one(&mux, &mut listener);
    wait_for(&mux, &mut client, StreamEvent::Connect);

    server.close();
    wait_for(&mux, &mut client, StreamEvent::Read);
    let mut buf = [0u8; 8];
    let err = client.read(&mut buf).unwrap_err();
    assert!(err.is_peer_closed(), "{err}");
}

#[test]
fn closed_stream_rejected_by_select() {
    let mux = NativeMultiplexer::new();
    let mut listener = TcpListenerSocket::open("127.0.0.1:0", OpenFlags::listen()).unwrap();
    listener.close();
    let mut slots: [SelectSlot<'_>; 1] = [Some(&mut listener)];
    assert!(matches!(
        mux.select(&mut slots, None, 10),
        Err(StreamError::InvalidArgument(_))
    ));
}

#[test]
fn tls_session_over_tcp_driven_by_select() {
    let key = KeyPair::generate().unwrap();
    let cert = CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap();
    let server_ctx = TlsContext::builder()
        .with_server_pem(cert.pem().as_bytes(), key.serialize_pem().as_bytes())
        .unwrap()
        .build()
        .unwrap();
    let client_ctx: Arc<TlsContext> = TlsContext::builder()
        .with_trusted_pem(cert.pem().as_bytes())
        .unwrap()
        .build()
        .unwrap();

    let socket_config = SocketConfig {
        listen_backlog: 4,
        ..SocketConfig::default()
    };
    let mux = NativeMultiplexer::new();
    let mut listener = SecureListener::open_with(&server_ctx, "127.0.0.1:0", &socket_config).unwrap();
    assert_eq!(listener.backlog(), 4);
    let socket = TcpSocket::connect(listener.bound_addr(), OpenFlags::connect()).unwrap();
    let mut client = SecureStream::connect(&client_ctx, socket, "localhost", OpenFlags::connect()).unwrap();

    wait_for(&mux, &mut listener, StreamEvent::Accept);
    let (mut server, _) = listener.accept_secure().unwrap().expect("pending connection");

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let c = client.handshake().unwrap();
        let s = server.handshake().unwrap();
        if c == HandshakeStatus::Complete && s == HandshakeStatus::Complete {
            break;
        }
        assert!(Instant::now() < deadline, "handshake timed out");
        let mut slots: [SelectSlot<'_>; 2] = [Some(&mut client), Some(&mut server)];
        mux.select(&mut slots, None, 100).unwrap();
    }

    assert_eq!(client.write(b"telemetry").unwrap(), 9);
    client.flush().unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 64];
    while received.len() < 9 {
        assert!(Instant::now() < deadline, "data never arrived");
        let mut slots: [SelectSlot<'_>; 1] = [Some(&mut server)];
        if let SelectOutcome::Ready { event: StreamEvent::Read, .. } = mux.select(&mut slots, None, 100).unwrap() {
            let n = server.read(&mut buf).unwrap();
            received.extend_from_slice(&buf[..n]);
        }
    }
    assert_eq!(received, b"telemetry");
}
