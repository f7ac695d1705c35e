// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kernel-level multiplexer built on `pselect(2)`.
//!
//! Every stream handle goes into the read and exception sets; the write set
//! only gets streams that asked for it (blocked write or pending connect), so
//! an idle connected socket does not wake the caller continuously. The wake
//! event's socket is added to the read set.

use std::io;
use std::mem::MaybeUninit;
use std::ptr;

use super::{validate_slots, Multiplexer, SelectOutcome, SelectSlot, WakeEvent, MAX_SELECT_STREAMS};
use crate::error::StreamError;
use crate::stream::StreamEvent;

/// `pselect` based multiplexer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeMultiplexer;

impl NativeMultiplexer {
    pub fn new() -> Self {
        Self
    }
}

struct FdSet(libc::fd_set);

impl FdSet {
    fn new() -> Self {
        let mut raw = MaybeUninit::<libc::fd_set>::uninit();
        // SAFETY: FD_ZERO initializes the whole set.
        unsafe {
            libc::FD_ZERO(raw.as_mut_ptr());
            FdSet(raw.assume_init())
        }
    }

    fn insert(&mut self, fd: libc::c_int) {
        // SAFETY: fd was checked against FD_SETSIZE by the caller.
        unsafe { libc::FD_SET(fd, &mut self.0) }
    }

    fn contains(&self, fd: libc::c_int) -> bool {
        // SAFETY: same bound as insert.
        unsafe { libc::FD_ISSET(fd, &self.0) }
    }

    fn as_mut_ptr(&mut self) -> *mut libc::fd_set {
        &mut self.0
    }
}

#[derive(Clone, Copy, Default)]
struct SlotInfo {
    fd: libc::c_int,
    active: bool,
    want_write: bool,
    buffered: bool,
}

fn check_fd(fd: libc::c_int) -> Result<libc::c_int, StreamError> {
    if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
        return Err(StreamError::invalid(format!(
            "descriptor {fd} cannot be used with select"
        )));
    }
    Ok(fd)
}

impl Multiplexer for NativeMultiplexer {
    fn select(
        &self,
        streams: &mut [SelectSlot<'_>],
        wake: Option<&WakeEvent>,
        timeout_ms: u32,
    ) -> Result<SelectOutcome, StreamError> {
        validate_slots(streams)?;

        if let Some(wake) = wake {
            if wake.take() {
                return Ok(SelectOutcome::Wake);
            }
        }

        let mut read_set = FdSet::new();
        let mut write_set = FdSet::new();
        let mut except_set = FdSet::new();
        let mut info = [SlotInfo::default(); MAX_SELECT_STREAMS];
        let mut max_fd: libc::c_int = -1;
        let mut any_buffered = false;

        for (index, slot) in streams.iter_mut().enumerate() {
            let Some(stream) = slot else { continue };
            let fd = stream.select_fd().ok_or_else(|| {
                StreamError::invalid(format!("stream {index} has no OS handle to wait on"))
            })?;
            let fd = check_fd(fd)?;

            read_set.insert(fd);
            except_set.insert(fd);
            let want_write = stream.wants_write_event();
            if want_write {
                write_set.insert(fd);
            }
            let buffered = stream.has_buffered_input();
            any_buffered |= buffered;

            info[index] = SlotInfo {
                fd,
                active: true,
                want_write,
                buffered,
            };
            max_fd = max_fd.max(fd);
        }

        let wake_fd = match wake {
            Some(wake) => {
                let fd = check_fd(wake.fd())?;
                read_set.insert(fd);
                max_fd = max_fd.max(fd);
                Some(fd)
            }
            None => None,
        };

        // Buffered input is ready now: poll instead of waiting.
        // SAFETY: timespec is plain old data; all-zero is a valid value.
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        let ts_ptr: *const libc::timespec = if any_buffered {
            &ts
        } else if timeout_ms == super::WAIT_INFINITE {
            ptr::null()
        } else {
            ts.tv_sec = (timeout_ms / 1000) as _;
            ts.tv_nsec = ((timeout_ms % 1000) as i64 * 1_000_000) as _;
            &ts
        };

        // SAFETY: all sets are initialized, max_fd + 1 bounds them, and the
        // timespec outlives the call.
        let rc = unsafe {
            libc::pselect(
                max_fd + 1,
                read_set.as_mut_ptr(),
                write_set.as_mut_ptr(),
                except_set.as_mut_ptr(),
                ts_ptr,
                ptr::null(),
            )
        };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(SelectOutcome::Unknown);
            }
            return Err(err.into());
        }
        if rc == 0 && !any_buffered {
            return Ok(SelectOutcome::Timeout);
        }

        if let (Some(fd), Some(wake)) = (wake_fd, wake) {
            if read_set.contains(fd) || wake.is_signaled() {
                wake.clear();
                return Ok(SelectOutcome::Wake);
            }
        }

        for (index, slot) in streams.iter_mut().enumerate() {
            let Some(stream) = slot else { continue };
            let slot_info = info[index];
            if !slot_info.active {
                continue;
            }
            let fd = slot_info.fd;

            if except_set.contains(fd) {
                return Ok(SelectOutcome::Ready {
                    index,
                    event: StreamEvent::Close,
                });
            }
            if read_set.contains(fd) || slot_info.buffered {
                let event = if stream.is_listening() {
                    StreamEvent::Accept
                } else {
                    StreamEvent::Read
                };
                return Ok(SelectOutcome::Ready { index, event });
            }
            if slot_info.want_write && write_set.contains(fd) {
                let event = stream.on_writable();
                return Ok(SelectOutcome::Ready { index, event });
            }
        }

        log::trace!("[select] pselect returned {} with no attributable event", rc);
        Ok(SelectOutcome::Unknown)
    }
}
