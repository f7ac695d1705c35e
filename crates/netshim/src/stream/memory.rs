// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process duplex byte pipe.
//!
//! Two [`MemoryStream`] ends share a pair of bounded byte queues. The pipe
//! honours the same non-blocking conventions as sockets (`Ok(0)` when full
//! or empty, `Closed` after the peer closed and its data was drained), and
//! can be told to accept only a few bytes per write call or to reset, which
//! makes it the transport of choice for exercising the TLS layer.
//!
//! It also serves platforms without sockets: the polling multiplexer sees
//! readiness through [`ByteStream::poll_ready`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{use_after_close, ByteStream, StreamEvent, StreamInterface};
use crate::error::StreamError;

/// Pipe sizing and throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPipeConfig {
    /// Bytes buffered per direction before writes return `Ok(0)`.
    pub capacity: usize,
    /// Upper bound on bytes accepted by a single `write` call.
    pub max_write_per_call: Option<usize>,
}

impl Default for MemoryPipeConfig {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024,
            max_write_per_call: None,
        }
    }
}

#[derive(Debug)]
struct Channel {
    data: VecDeque<u8>,
    capacity: usize,
    writer_closed: bool,
    reader_closed: bool,
    reset: bool,
    total_written: u64,
}

impl Channel {
    fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::new(),
            capacity,
            writer_closed: false,
            reader_closed: false,
            reset: false,
            total_written: 0,
        }
    }

    fn space(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }
}

/// One end of an in-memory pipe.
pub struct MemoryStream {
    outgoing: Arc<Mutex<Channel>>,
    incoming: Arc<Mutex<Channel>>,
    max_write_per_call: Option<usize>,
    write_blocked: bool,
    closed: bool,
}

impl MemoryStream {
    /// Create both ends of a pipe.
    pub fn pair(config: MemoryPipeConfig) -> (MemoryStream, MemoryStream) {
        let a_to_b = Arc::new(Mutex::new(Channel::new(config.capacity)));
        let b_to_a = Arc::new(Mutex::new(Channel::new(config.capacity)));
        let a = MemoryStream {
            outgoing: Arc::clone(&a_to_b),
            incoming: Arc::clone(&b_to_a),
            max_write_per_call: config.max_write_per_call,
            write_blocked: false,
            closed: false,
        };
        let b = MemoryStream {
            outgoing: b_to_a,
            incoming: a_to_b,
            max_write_per_call: config.max_write_per_call,
            write_blocked: false,
            closed: false,
        };
        (a, b)
    }

    /// Simulate a connection reset seen by both ends.
    pub fn inject_reset(&self) {
        self.outgoing.lock().reset = true;
        self.incoming.lock().reset = true;
    }

    /// Push raw bytes to the peer, bypassing capacity and write limits.
    pub fn inject_bytes(&self, bytes: &[u8]) {
        self.outgoing.lock().data.extend(bytes.iter().copied());
    }

    /// Total bytes this end has written into the pipe.
    pub fn bytes_written(&self) -> u64 {
        self.outgoing.lock().total_written
    }

    /// Bytes waiting to be read by this end.
    pub fn pending_input(&self) -> usize {
        self.incoming.lock().data.len()
    }

    /// Change the per-call write limit.
    pub fn set_max_write_per_call(&mut self, limit: Option<usize>) {
        self.max_write_per_call = limit;
    }

    fn check_open(&self) -> Result<(), StreamError> {
        if self.closed {
            return Err(use_after_close("memory stream"));
        }
        Ok(())
    }
}

impl ByteStream for MemoryStream {
    fn interface(&self) -> StreamInterface {
        StreamInterface::Memory
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.check_open()?;
        let mut channel = self.incoming.lock();
        if channel.reset {
            return Err(StreamError::ConnectionReset);
        }
        if channel.data.is_empty() {
            if channel.writer_closed {
                return Err(StreamError::Closed);
            }
            return Ok(0);
        }

        let n = buf.len().min(channel.data.len());
        for (slot, byte) in buf.iter_mut().zip(channel.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        self.check_open()?;
        let mut channel = self.outgoing.lock();
        if channel.reset || channel.reader_closed {
            return Err(StreamError::ConnectionReset);
        }

        let mut n = buf.len().min(channel.space());
        if let Some(limit) = self.max_write_per_call {
            n = n.min(limit);
        }
        channel.data.extend(&buf[..n]);
        channel.total_written += n as u64;
        self.write_blocked = n < buf.len();
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        self.check_open()
    }

    fn close(&mut self) {
        if self.closed {
            use_after_close("memory stream");
            return;
        }
        self.closed = true;
        self.outgoing.lock().writer_closed = true;
        self.incoming.lock().reader_closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn wants_write_event(&self) -> bool {
        self.write_blocked
    }

    fn poll_ready(&mut self) -> Option<StreamEvent> {
        if self.closed {
            return None;
        }
        {
            let incoming = self.incoming.lock();
            if incoming.reset {
                return Some(StreamEvent::Close);
            }
            if !incoming.data.is_empty() {
                return Some(StreamEvent::Read);
            }
            if incoming.writer_closed {
                return Some(StreamEvent::Close);
            }
        }
        if self.write_blocked && self.outgoing.lock().space() > 0 {
            self.write_blocked = false;
            return Some(StreamEvent::Write);
        }
        None
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.outgoing.lock().writer_closed = true;
            self.incoming.lock().reader_closed = true;
        }
    }
}

impl std::fmt::Debug for MemoryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStream")
            .field("pending_input", &self.pending_input())
            .field("write_blocked", &self.write_blocked)
            .field("closed", &self.closed)
            .finish()
    }
}
