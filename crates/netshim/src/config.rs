// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration.
//!
//! Supports both programmatic and file-based configuration:
//! - [`NetshimConfig`] - top-level struct, one section per subsystem
//! - [`SecurityConfig`] - credential references and verification policy
//! - [`SocketConfig`] / [`SelectConfig`] / [`PersistentConfig`]
//!
//! # Example
//!
//! ```
//! use netshim::config::{NetshimConfig, SecurityConfig};
//!
//! let config = NetshimConfig {
//!     security: SecurityConfig {
//!         trusted_cert: Some("myhome-bundle.crt".into()),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! assert!(!config.security.verification.check_expiration);
//! ```
//!
//! The same configuration as YAML (feature `config-loaders`):
//!
//! ```yaml
//! security:
//!   certs_dir: /coderoot/secret/certs
//!   trusted_cert: myhome-bundle.crt
//!   verification:
//!     check_expiration: false
//! select:
//!   multiplexer: native
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provision::DirectoryStore;
use crate::select::{self, Multiplexer, MultiplexerKind};
use crate::stream::socket::DEFAULT_LISTEN_BACKLOG;
use crate::stream::OpenFlags;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "config-loaders")]
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetshimConfig {
    pub security: SecurityConfig,
    pub socket: SocketConfig,
    pub select: SelectConfig,
    pub persistent: PersistentConfig,
}

impl NetshimConfig {
    /// Parse configuration from a YAML string.
    #[cfg(feature = "config-loaders")]
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    #[cfg(feature = "config-loaders")]
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.min_version > self.security.max_version {
            return Err(ConfigError::Invalid(format!(
                "min TLS version {:?} is above max {:?}",
                self.security.min_version, self.security.max_version
            )));
        }
        if self.select.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("select.poll_interval_ms must be > 0".into()));
        }
        if self.socket.listen_backlog <= 0 {
            return Err(ConfigError::Invalid("socket.listen_backlog must be > 0".into()));
        }
        if self.security.alpn_protocols.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid("empty ALPN protocol name".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Security
// ============================================================================

/// TLS protocol version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TlsVersion {
    /// TLS 1.2
    #[default]
    Tls12,
    /// TLS 1.3
    Tls13,
}

/// How strictly a client verifies the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationPolicy {
    /// Reject certificates outside their validity window. Off by default:
    /// embedded devices often run without a trustworthy clock.
    pub check_expiration: bool,
    /// Without a trusted chain, accept any server and mark the stream
    /// unverified, so a new device can fetch its chain from the server.
    pub bootstrap_without_trust_chain: bool,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            check_expiration: false,
            bootstrap_without_trust_chain: true,
        }
    }
}

/// Credential references and TLS parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    // === Credentials ===
    /// Directory for file references.
    pub certs_dir: PathBuf,
    /// Trusted chain: file name or block number (None = default block).
    pub trusted_cert: Option<String>,
    /// Server certificate (chain), same reference syntax.
    pub server_cert: Option<String>,
    /// Server private key, same reference syntax.
    pub server_key: Option<String>,

    // === Verification ===
    pub verification: VerificationPolicy,

    // === Protocol ===
    pub alpn_protocols: Vec<String>,
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            certs_dir: PathBuf::from("certs"),
            trusted_cert: None,
            server_cert: None,
            server_key: None,
            verification: VerificationPolicy::default(),
            alpn_protocols: Vec::new(),
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
        }
    }
}

// ============================================================================
// Sockets, select, persistent storage
// ============================================================================

/// Socket defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// TCP listen backlog (pending connection queue size).
    pub listen_backlog: i32,
    /// Open streams with TCP_NODELAY (and cork until flush on Linux).
    pub nodelay: bool,
    /// Set SO_REUSEADDR on listeners.
    pub reuse_addr: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            nodelay: false,
            reuse_addr: true,
        }
    }
}

impl SocketConfig {
    /// Flags for a client stream.
    pub fn connect_flags(&self) -> OpenFlags {
        OpenFlags::connect().with_nodelay(self.nodelay)
    }

    /// Flags for a listener.
    pub fn listen_flags(&self) -> OpenFlags {
        let flags = OpenFlags::listen().with_nodelay(self.nodelay);
        if self.reuse_addr {
            flags
        } else {
            flags.without_reuse_addr()
        }
    }
}

/// Multiplexer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectConfig {
    pub multiplexer: MultiplexerKind,
    /// Sleep between rounds of the polling multiplexer.
    pub poll_interval_ms: u64,
}

impl Default for SelectConfig {
    fn default() -> Self {
        Self {
            multiplexer: MultiplexerKind::Native,
            poll_interval_ms: 10,
        }
    }
}

impl SelectConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn build(&self) -> Box<dyn Multiplexer> {
        select::multiplexer(self.multiplexer, self.poll_interval())
    }
}

/// Persistent block storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    pub root: PathBuf,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("persistent"),
        }
    }
}

impl PersistentConfig {
    pub fn open_store(&self) -> DirectoryStore {
        DirectoryStore::new(&self.root)
    }
}
