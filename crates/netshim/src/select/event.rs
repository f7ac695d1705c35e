// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-thread wake signal for a thread blocked in select.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(unix)]
use std::io::{Read, Write};
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::error::StreamError;

/// Wake signal. Clones share the same underlying event.
///
/// On unix the signal is mirrored into a non-blocking socket pair so the
/// native multiplexer can wait on it together with the streams.
#[derive(Clone)]
pub struct WakeEvent {
    inner: Arc<Inner>,
}

struct Inner {
    signaled: AtomicBool,
    #[cfg(unix)]
    reader: UnixStream,
    #[cfg(unix)]
    writer: UnixStream,
}

impl WakeEvent {
    pub fn new() -> Result<Self, StreamError> {
        #[cfg(unix)]
        let inner = {
            let (reader, writer) = UnixStream::pair()?;
            reader.set_nonblocking(true)?;
            writer.set_nonblocking(true)?;
            Inner {
                signaled: AtomicBool::new(false),
                reader,
                writer,
            }
        };
        #[cfg(not(unix))]
        let inner = Inner {
            signaled: AtomicBool::new(false),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Wake the select call waiting on this event. Safe from any thread.
    pub fn signal(&self) {
        if self.inner.signaled.swap(true, Ordering::AcqRel) {
            return;
        }
        #[cfg(unix)]
        {
            // A full socket buffer already means "readable".
            if let Err(e) = (&self.inner.writer).write(&[1]) {
                if e.kind() != std::io::ErrorKind::WouldBlock {
                    log::warn!("[select] wake event write failed: {}", e);
                }
            }
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.inner.signaled.load(Ordering::Acquire)
    }

    /// Reset the event. Select calls this before reporting a wake.
    pub fn clear(&self) {
        // Flag first: a signal racing with the drain stays visible.
        self.inner.signaled.store(false, Ordering::Release);
        #[cfg(unix)]
        {
            let mut buf = [0u8; 64];
            while let Ok(n) = (&self.inner.reader).read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
        }
    }

    /// Consume a pending signal. Returns `true` if one was pending.
    pub fn take(&self) -> bool {
        if self.is_signaled() {
            self.clear();
            true
        } else {
            false
        }
    }

    #[cfg(unix)]
    pub(crate) fn fd(&self) -> RawFd {
        self.inner.reader.as_raw_fd()
    }
}

impl std::fmt::Debug for WakeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeEvent")
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_and_clear() {
        let event = WakeEvent::new().unwrap();
        assert!(!event.is_signaled());
        event.signal();
        event.signal();
        assert!(event.is_signaled());
        assert!(event.take());
        assert!(!event.is_signaled());
        assert!(!event.take());
    }

    #[test]
    fn test_clones_share_state() {
        let event = WakeEvent::new().unwrap();
        let remote = event.clone();
        std::thread::spawn(move || remote.signal()).join().unwrap();
        assert!(event.is_signaled());
    }
}
