// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `std::io` view of a [`ByteStream`] for rustls record I/O.
//!
//! rustls expects `WouldBlock` for "no progress" and `Ok(0)` for end of
//! stream, while streams report `Ok(0)` and `Err(Closed)` respectively.
//! Each call maps to exactly one stream operation.

use std::io::{self, Read, Write};

use crate::error::StreamError;
use crate::stream::ByteStream;

pub(crate) struct TransportIo<'a, S: ByteStream + ?Sized> {
    stream: &'a mut S,
}

impl<'a, S: ByteStream + ?Sized> TransportIo<'a, S> {
    pub(crate) fn new(stream: &'a mut S) -> Self {
        Self { stream }
    }
}

impl<S: ByteStream + ?Sized> Read for TransportIo<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(io::ErrorKind::WouldBlock.into()),
            Ok(n) => Ok(n),
            Err(StreamError::Closed) => Ok(0),
            Err(err) => Err(to_io_error(err)),
        }
    }
}

impl<S: ByteStream + ?Sized> Write for TransportIo<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.write(buf) {
            Ok(0) if !buf.is_empty() => Err(io::ErrorKind::WouldBlock.into()),
            Ok(n) => Ok(n),
            Err(err) => Err(to_io_error(err)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().map_err(to_io_error)
    }
}

fn to_io_error(err: StreamError) -> io::Error {
    match err {
        StreamError::Io(e) => e,
        StreamError::Closed => io::ErrorKind::UnexpectedEof.into(),
        StreamError::ConnectionReset => io::ErrorKind::ConnectionReset.into(),
        StreamError::ConnectionRefused => io::ErrorKind::ConnectionRefused.into(),
        other => io::Error::other(other),
    }
}
