// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Secure stream metrics.
//!
//! One [`TlsMetrics`] instance lives in each [`TlsContext`](crate::tls::TlsContext)
//! and is shared by every stream created from it:
//! - Handshake outcomes (completed, failed, rejected, unverified)
//! - Plaintext throughput
//! - Write backpressure
//! - Session teardown (close-notify, released sessions)
//!
//! # Example
//!
//! ```
//! use netshim::metrics::TlsMetrics;
//!
//! let metrics = TlsMetrics::new();
//! metrics.record_handshake_started();
//! metrics.record_handshake_completed();
//! metrics.record_bytes_sent(512);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.handshakes_completed, 1);
//! assert_eq!(snapshot.active_sessions, 1);
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

// ============================================================================
// Context-level metrics
// ============================================================================

/// Counters for all secure streams of one TLS context.
#[derive(Debug)]
pub struct TlsMetrics {
    // Handshakes
    handshakes_started: AtomicU64,
    handshakes_completed: AtomicU64,
    handshakes_failed: AtomicU64,
    /// Subset of failures where the server certificate was rejected
    certificates_rejected: AtomicU64,
    /// Completed client handshakes without a trust chain
    unverified_handshakes: AtomicU64,

    // Sessions
    active_sessions: AtomicUsize,
    sessions_released: AtomicU64,
    close_notify_sent: AtomicU64,

    // Throughput (plaintext)
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,

    /// Writes that made no progress because ciphertext could not drain
    writes_blocked: AtomicU64,

    start_time: Instant,
}

impl TlsMetrics {
    pub fn new() -> Self {
        Self {
            handshakes_started: AtomicU64::new(0),
            handshakes_completed: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            certificates_rejected: AtomicU64::new(0),
            unverified_handshakes: AtomicU64::new(0),
            active_sessions: AtomicUsize::new(0),
            sessions_released: AtomicU64::new(0),
            close_notify_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            writes_blocked: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    // ========================================================================
    // Handshake recording
    // ========================================================================

    pub fn record_handshake_started(&self) {
        self.handshakes_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed handshake; the session becomes active.
    pub fn record_handshake_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected server certificate (also counted as a failure).
    pub fn record_certificate_rejected(&self) {
        self.certificates_rejected.fetch_add(1, Ordering::Relaxed);
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unverified_handshake(&self) {
        self.unverified_handshakes.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Session teardown
    // ========================================================================

    pub fn record_close_notify_sent(&self) {
        self.close_notify_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a released session. `was_active` is true if the session had
    /// completed its handshake.
    pub fn record_session_released(&self, was_active: bool) {
        self.sessions_released.fetch_add(1, Ordering::Relaxed);
        if was_active {
            self.active_sessions.fetch_sub(1, Ordering::Relaxed);
        }
    }

    // ========================================================================
    // Throughput
    // ========================================================================

    pub fn record_bytes_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_bytes_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_write_blocked(&self) {
        self.writes_blocked.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    pub fn sessions_released(&self) -> u64 {
        self.sessions_released.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> TlsMetricsSnapshot {
        TlsMetricsSnapshot {
            handshakes_started: self.handshakes_started.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            certificates_rejected: self.certificates_rejected.load(Ordering::Relaxed),
            unverified_handshakes: self.unverified_handshakes.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            sessions_released: self.sessions_released.load(Ordering::Relaxed),
            close_notify_sent: self.close_notify_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            writes_blocked: self.writes_blocked.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for TlsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`TlsMetrics`].
#[derive(Clone, Debug, Default)]
pub struct TlsMetricsSnapshot {
    pub handshakes_started: u64,
    pub handshakes_completed: u64,
    pub handshakes_failed: u64,
    pub certificates_rejected: u64,
    pub unverified_handshakes: u64,
    pub active_sessions: usize,
    pub sessions_released: u64,
    pub close_notify_sent: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub writes_blocked: u64,
    pub uptime_secs: f64,
}

impl TlsMetricsSnapshot {
    /// Fraction of finished handshakes that failed (0.0 when none finished).
    pub fn failure_rate(&self) -> f64 {
        let finished = self.handshakes_completed + self.handshakes_failed;
        if finished == 0 {
            0.0
        } else {
            self.handshakes_failed as f64 / finished as f64
        }
    }
}
