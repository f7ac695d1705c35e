// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cooperative polling multiplexer.
//!
//! For transports that have no OS handle (memory pipes, platforms without a
//! kernel wait primitive). Each round checks the wake event and then asks
//! every stream through [`ByteStream::poll_ready`](crate::stream::ByteStream::poll_ready);
//! between rounds the thread sleeps for the poll interval. Latency is bounded
//! by that interval and an idle wait still wakes up periodically.

use std::time::{Duration, Instant};

use super::{validate_slots, Multiplexer, SelectOutcome, SelectSlot, WakeEvent, WAIT_INFINITE};
use crate::error::StreamError;
use crate::stream::StreamEvent;

/// Default sleep between polling rounds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polling multiplexer.
#[derive(Debug, Clone, Copy)]
pub struct PollingMultiplexer {
    interval: Duration,
}

impl PollingMultiplexer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn poll_once(streams: &mut [SelectSlot<'_>]) -> Option<SelectOutcome> {
        for (index, slot) in streams.iter_mut().enumerate() {
            let Some(stream) = slot else { continue };
            if stream.has_buffered_input() {
                return Some(SelectOutcome::Ready {
                    index,
                    event: StreamEvent::Read,
                });
            }
            if let Some(event) = stream.poll_ready() {
                return Some(SelectOutcome::Ready { index, event });
            }
        }
        None
    }
}

impl Default for PollingMultiplexer {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Multiplexer for PollingMultiplexer {
    fn select(
        &self,
        streams: &mut [SelectSlot<'_>],
        wake: Option<&WakeEvent>,
        timeout_ms: u32,
    ) -> Result<SelectOutcome, StreamError> {
        validate_slots(streams)?;

        let deadline = if timeout_ms == WAIT_INFINITE {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(u64::from(timeout_ms)))
        };

        loop {
            if let Some(wake) = wake {
                if wake.take() {
                    return Ok(SelectOutcome::Wake);
                }
            }
            if let Some(outcome) = Self::poll_once(streams) {
                return Ok(outcome);
            }

            let sleep_for = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(SelectOutcome::Timeout);
                    }
                    self.interval.min(deadline - now)
                }
                None => self.interval,
            };
            std::thread::sleep(sleep_for);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::memory::{MemoryPipeConfig, MemoryStream};
    use crate::stream::ByteStream;

    #[test]
    fn test_timeout_when_idle() {
        let (mut a, _b) = MemoryStream::pair(MemoryPipeConfig::default());
        let mux = PollingMultiplexer::new(Duration::from_millis(2));
        let mut slots: [SelectSlot<'_>; 1] = [Some(&mut a as &mut dyn ByteStream)];

        let start = Instant::now();
        let outcome = mux.select(&mut slots, None, 20).unwrap();
        assert_eq!(outcome, SelectOutcome::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_lowest_index_wins() {
        let (mut a, mut a_peer) = MemoryStream::pair(MemoryPipeConfig::default());
        let (mut b, mut b_peer) = MemoryStream::pair(MemoryPipeConfig::default());
        a_peer.write(b"1").unwrap();
        b_peer.write(b"2").unwrap();

        let mux = PollingMultiplexer::default();
        let mut slots: [SelectSlot<'_>; 3] = [
            None,
            Some(&mut b as &mut dyn ByteStream),
            Some(&mut a as &mut dyn ByteStream),
        ];
        let outcome = mux.select(&mut slots, None, 100).unwrap();
        assert_eq!(
            outcome,
            SelectOutcome::Ready {
                index: 1,
                event: StreamEvent::Read
            }
        );
    }

    #[test]
    fn test_only_empty_slots_rejected() {
        let mux = PollingMultiplexer::default();
        let mut slots: [SelectSlot<'_>; 3] = [None, None, None];
        assert!(matches!(
            mux.select(&mut slots, None, WAIT_INFINITE),
            Err(StreamError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_wake_beats_ready_stream() {
        let (mut a, mut peer) = MemoryStream::pair(MemoryPipeConfig::default());
        peer.write(b"data").unwrap();
        let wake = WakeEvent::new().unwrap();
        wake.signal();

        let mux = PollingMultiplexer::default();
        let mut slots: [SelectSlot<'_>; 1] = [Some(&mut a as &mut dyn ByteStream)];
        assert_eq!(
            mux.select(&mut slots, Some(&wake), WAIT_INFINITE).unwrap(),
            SelectOutcome::Wake
        );
        // Next call sees the stream.
        assert_eq!(
            mux.select(&mut slots, Some(&wake), WAIT_INFINITE)
                .unwrap()
                .event(),
            Some(StreamEvent::Read)
        );
    }

    #[test]
    fn test_wake_from_other_thread() {
        let (mut a, _peer) = MemoryStream::pair(MemoryPipeConfig::default());
        let wake = WakeEvent::new().unwrap();
        let remote = wake.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.signal();
        });

        let mux = PollingMultiplexer::new(Duration::from_millis(2));
        let mut slots: [SelectSlot<'_>; 1] = [Some(&mut a as &mut dyn ByteStream)];
        let outcome = mux.select(&mut slots, Some(&wake), WAIT_INFINITE).unwrap();
        assert_eq!(outcome, SelectOutcome::Wake);
        handle.join().unwrap();
    }
}
