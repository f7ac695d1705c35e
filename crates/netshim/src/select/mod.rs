// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Waiting on several streams at once.
//!
//! A single call blocks until one of up to [`MAX_SELECT_STREAMS`] streams
//! becomes ready, a [`WakeEvent`] fires, or the timeout expires. Exactly one
//! outcome is reported per call, so the caller's loop looks like:
//!
//! ```text
//!   loop {
//!       match select(&mut slots, Some(&wake), 100)? {
//!           Ready { index, Read }    -> drain stream `index`
//!           Ready { index, Accept }  -> accept on listener `index`
//!           Ready { index, Connect } -> connect finished, start writing
//!           Ready { index, Write }   -> resume a blocked write
//!           Ready { index, Close }   -> close stream `index`
//!           Wake                     -> another thread wants attention
//!           Timeout | Unknown        -> periodic work, loop again
//!       }
//!   }
//! ```
//!
//! Priority when several conditions hold: wake event first, then the lowest
//! stream index, and for one stream close before read before write.
//!
//! Two multiplexers are provided. [`native::NativeMultiplexer`] (unix) waits
//! in the kernel with `pselect(2)`. [`polling::PollingMultiplexer`] asks each
//! stream in turn and sleeps between rounds; it is a weaker substitute for
//! transports without an OS handle and burns a little CPU while waiting.

pub mod event;
#[cfg(unix)]
pub mod native;
pub mod polling;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use event::WakeEvent;

use crate::error::StreamError;
use crate::stream::{ByteStream, StreamEvent};

/// Most streams one select call can wait on.
pub const MAX_SELECT_STREAMS: usize = 8;

/// Timeout value meaning "wait without limit".
pub const WAIT_INFINITE: u32 = 0;

/// One entry of the stream list; `None` entries are skipped but keep their
/// index so results map back to the caller's table.
pub type SelectSlot<'a> = Option<&'a mut dyn ByteStream>;

/// Result of one select call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Stream at `index` is ready.
    Ready { index: usize, event: StreamEvent },
    /// The wake event was signaled (and has been cleared).
    Wake,
    /// Nothing happened before the timeout.
    Timeout,
    /// The wait ended without an attributable cause (e.g. signal interruption).
    Unknown,
}

impl SelectOutcome {
    pub fn index(&self) -> Option<usize> {
        match self {
            SelectOutcome::Ready { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn event(&self) -> Option<StreamEvent> {
        match self {
            SelectOutcome::Ready { event, .. } => Some(*event),
            _ => None,
        }
    }
}

/// Readiness multiplexer.
pub trait Multiplexer: Send + Sync {
    /// Wait for the first ready stream. `timeout_ms == WAIT_INFINITE` waits
    /// until a stream or the wake event becomes ready.
    fn select(
        &self,
        streams: &mut [SelectSlot<'_>],
        wake: Option<&WakeEvent>,
        timeout_ms: u32,
    ) -> Result<SelectOutcome, StreamError>;
}

/// Which multiplexer to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiplexerKind {
    /// Kernel wait (`pselect`); falls back to polling where unavailable.
    #[default]
    Native,
    /// Cooperative polling loop.
    Polling,
}

/// Build a multiplexer of the requested kind.
pub fn multiplexer(kind: MultiplexerKind, poll_interval: Duration) -> Box<dyn Multiplexer> {
    match kind {
        #[cfg(unix)]
        MultiplexerKind::Native => Box::new(native::NativeMultiplexer::new()),
        #[cfg(not(unix))]
        MultiplexerKind::Native => Box::new(polling::PollingMultiplexer::new(poll_interval)),
        MultiplexerKind::Polling => Box::new(polling::PollingMultiplexer::new(poll_interval)),
    }
}

/// Select with the platform default multiplexer.
pub fn select(
    streams: &mut [SelectSlot<'_>],
    wake: Option<&WakeEvent>,
    timeout_ms: u32,
) -> Result<SelectOutcome, StreamError> {
    #[cfg(unix)]
    {
        native::NativeMultiplexer::new().select(streams, wake, timeout_ms)
    }
    #[cfg(not(unix))]
    {
        polling::PollingMultiplexer::default().select(streams, wake, timeout_ms)
    }
}

/// Reject stream lists the multiplexers cannot handle.
pub(crate) fn validate_slots(streams: &[SelectSlot<'_>]) -> Result<(), StreamError> {
    if streams.is_empty() || streams.len() > MAX_SELECT_STREAMS {
        return Err(StreamError::invalid(format!(
            "select needs 1..={} streams, got {}",
            MAX_SELECT_STREAMS,
            streams.len()
        )));
    }
    if streams.iter().all(Option::is_none) {
        return Err(StreamError::invalid("select needs at least one stream"));
    }
    for (index, stream) in streams.iter().enumerate() {
        let Some(stream) = stream else { continue };
        if stream.is_closed() {
            return Err(StreamError::invalid(format!("stream {index} is closed")));
        }
        if !stream.select_enabled() {
            return Err(StreamError::invalid(format!(
                "stream {index} was opened without select support"
            )));
        }
    }
    Ok(())
}
