// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection parameter strings.
//!
//! Streams are opened with a compact address string:
//!
//! | Input | Host | Port |
//! |-------|------|------|
//! | `"10.0.0.5:7000"` | `10.0.0.5` | 7000 |
//! | `":7000"` | any interface | 7000 |
//! | `"[fe80::1]:7000"` | `fe80::1` | 7000 |
//! | `"fe80::1"` | `fe80::1` | default |
//! | `"device.local"` | `device.local` | default |
//!
//! The default port depends on the transport: [`DEFAULT_SOCKET_PORT`] for
//! plain TCP and [`DEFAULT_TLS_PORT`] for TLS.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use crate::error::StreamError;

/// Default port for plain socket connections.
pub const DEFAULT_SOCKET_PORT: u16 = 6368;

/// Default port for TLS connections.
pub const DEFAULT_TLS_PORT: u16 = 6369;

/// Parsed "host:port" parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    /// Host name or numeric address; empty means "any interface".
    pub host: String,
    pub port: u16,
    /// The host was written as an IPv6 literal.
    pub ipv6: bool,
}

impl HostPort {
    /// Parse a parameter string, filling in `default_port` when absent.
    pub fn parse(parameters: &str, default_port: u16) -> Result<Self, StreamError> {
        let s = parameters.trim();

        if let Some(rest) = s.strip_prefix('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| StreamError::invalid(format!("unterminated '[' in {s:?}")))?;
            let host = &rest[..close];
            let tail = &rest[close + 1..];
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(p, default_port)?,
                None if tail.is_empty() => default_port,
                None => return Err(StreamError::invalid(format!("garbage after ']' in {s:?}"))),
            };
            return Ok(Self {
                host: host.to_string(),
                port,
                ipv6: true,
            });
        }

        // More than one colon and no brackets: bare IPv6 literal.
        if s.matches(':').count() > 1 {
            return Ok(Self {
                host: s.to_string(),
                port: default_port,
                ipv6: true,
            });
        }

        match s.rsplit_once(':') {
            Some((host, port)) => Ok(Self {
                host: host.to_string(),
                port: parse_port(port, default_port)?,
                ipv6: false,
            }),
            None => Ok(Self {
                host: s.to_string(),
                port: default_port,
                ipv6: false,
            }),
        }
    }

    /// Host name for TLS server-name checks (`None` for "any interface").
    pub fn server_name(&self) -> Option<&str> {
        if self.host.is_empty() {
            None
        } else {
            Some(&self.host)
        }
    }

    /// Resolve to a socket address. An empty host resolves to the
    /// unspecified address of the requested family.
    pub fn resolve(&self) -> Result<SocketAddr, StreamError> {
        if self.host.is_empty() {
            let ip = if self.ipv6 {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            } else {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            };
            return Ok(SocketAddr::new(ip, self.port));
        }
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        let mut addrs = (self.host.as_str(), self.port).to_socket_addrs()?;
        addrs
            .next()
            .ok_or_else(|| StreamError::invalid(format!("no address for host {:?}", self.host)))
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ipv6 {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(s: &str, default_port: u16) -> Result<u16, StreamError> {
    if s.is_empty() {
        return Ok(default_port);
    }
    s.parse::<u16>()
        .map_err(|_| StreamError::invalid(format!("invalid port {s:?}")))
}
