// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Certificate and key provisioning.
//!
//! Each credential is named by a short reference string from configuration:
//!
//! - empty, absent, or starting with a digit: a persistent block number
//!   (`"0"` or absent selects the role's default block)
//! - anything else: a file name relative to the certificate directory
//!
//! Both PEM and DER encodings are accepted. Failures are reported once
//! through [`NetworkState`]: a reference that was never configured and is
//! simply missing stays quiet (the device may not be provisioned yet),
//! anything else is a configuration error worth a warning.

pub mod store;

use std::fmt;
use std::path::{Path, PathBuf};

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use zeroize::Zeroizing;

use crate::error::ProvisionError;
use crate::net_state::{NetworkState, SecurityConfError};

pub use store::{BlockNr, DirectoryStore, MemoryStore, PersistentStore};

/// Default block holding the server private key.
pub const BLOCK_SERVER_KEY: BlockNr = 6;
/// Default block holding the server certificate (chain).
pub const BLOCK_SERVER_CERT: BlockNr = 7;
/// Default block holding the client's trusted certificate chain.
pub const BLOCK_TRUSTED_CHAIN: BlockNr = 9;

/// What a credential is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertRole {
    /// Certificates a client trusts when verifying servers.
    TrustedChain,
    /// Certificate (chain) a server presents.
    ServerCert,
    /// Private key matching the server certificate.
    ServerKey,
}

impl CertRole {
    pub fn default_block(self) -> BlockNr {
        match self {
            CertRole::TrustedChain => BLOCK_TRUSTED_CHAIN,
            CertRole::ServerCert => BLOCK_SERVER_CERT,
            CertRole::ServerKey => BLOCK_SERVER_KEY,
        }
    }
}

impl fmt::Display for CertRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CertRole::TrustedChain => "trusted certificate chain",
            CertRole::ServerCert => "server certificate",
            CertRole::ServerKey => "server private key",
        })
    }
}

/// Where a credential comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertReference {
    Block(BlockNr),
    File(PathBuf),
}

impl CertReference {
    /// Interpret a configured reference string for `role`.
    ///
    /// Numbers that do not fit a block number fall back to the default block.
    pub fn resolve(raw: Option<&str>, role: CertRole, certs_dir: &Path) -> Self {
        let raw = raw.map(str::trim).unwrap_or("");
        let numeric = raw.is_empty() || raw.starts_with(|c: char| c.is_ascii_digit());
        if !numeric {
            return CertReference::File(certs_dir.join(raw));
        }
        match raw.parse::<BlockNr>() {
            Ok(nr) if nr != 0 => CertReference::Block(nr),
            _ => CertReference::Block(role.default_block()),
        }
    }
}

impl fmt::Display for CertReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertReference::Block(nr) => write!(f, "persistent block {nr}"),
            CertReference::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

/// Loads and parses credentials, reporting failures to the network state.
pub struct Provisioner<'a> {
    certs_dir: &'a Path,
    store: &'a dyn PersistentStore,
    net_state: Option<&'a NetworkState>,
}

impl<'a> Provisioner<'a> {
    pub fn new(certs_dir: &'a Path, store: &'a dyn PersistentStore) -> Self {
        Self {
            certs_dir,
            store,
            net_state: None,
        }
    }

    pub fn with_network_state(mut self, net_state: &'a NetworkState) -> Self {
        self.net_state = Some(net_state);
        self
    }

    /// Load a certificate or certificate chain (leaf first).
    pub fn load_certificates(
        &self,
        role: CertRole,
        raw: Option<&str>,
    ) -> Result<Vec<CertificateDer<'static>>, ProvisionError> {
        let reference = CertReference::resolve(raw, role, self.certs_dir);
        let result = self.read(role, &reference).and_then(|bytes| {
            parse_certificates(&bytes).map_err(|reason| ProvisionError::ParseFailed {
                role,
                reference: reference.to_string(),
                reason,
            })
        });
        if let Ok(certs) = &result {
            log::debug!("[provision] {} loaded from {} ({} certs)", role, reference, certs.len());
        }
        self.report(role, raw, result)
    }

    /// Load the server private key. Raw key bytes are wiped after parsing.
    pub fn load_private_key(&self, raw: Option<&str>) -> Result<PrivateKeyDer<'static>, ProvisionError> {
        let role = CertRole::ServerKey;
        let reference = CertReference::resolve(raw, role, self.certs_dir);
        let result = self.read(role, &reference).and_then(|bytes| {
            parse_private_key(&bytes).map_err(|reason| ProvisionError::ParseFailed {
                role,
                reference: reference.to_string(),
                reason,
            })
        });
        if result.is_ok() {
            log::debug!("[provision] {} loaded from {}", role, reference);
        }
        self.report(role, raw, result)
    }

    fn read(
        &self,
        role: CertRole,
        reference: &CertReference,
    ) -> Result<Zeroizing<Vec<u8>>, ProvisionError> {
        let loaded = match reference {
            CertReference::Block(nr) => self.store.load_block(*nr),
            CertReference::File(path) => match std::fs::read(path) {
                Ok(data) => Ok(Some(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            },
        };
        match loaded {
            Ok(Some(data)) if !data.is_empty() => Ok(Zeroizing::new(data)),
            Ok(_) => Err(ProvisionError::NotAvailable {
                role,
                reference: reference.to_string(),
            }),
            Err(source) => Err(ProvisionError::Unreadable {
                role,
                reference: reference.to_string(),
                source,
            }),
        }
    }

    fn report<T>(
        &self,
        role: CertRole,
        raw: Option<&str>,
        result: Result<T, ProvisionError>,
    ) -> Result<T, ProvisionError> {
        let Err(err) = &result else {
            return result;
        };
        let configured = raw.is_some_and(|r| !r.trim().is_empty());
        let quiet = !configured && matches!(err, ProvisionError::NotAvailable { .. });
        if quiet {
            log::debug!("[provision] {} not loaded: {}", role, err);
        } else {
            log::warn!("[provision] {}", err);
            if let Some(net_state) = self.net_state {
                net_state.set_security_conf_error(Some(SecurityConfError {
                    role,
                    message: err.to_string(),
                }));
            }
        }
        result
    }
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    bytes.windows(11).any(|w| w == b"-----BEGIN ")
}

/// Parse PEM (any number of CERTIFICATE blocks) or a single DER certificate.
pub fn parse_certificates(bytes: &[u8]) -> Result<Vec<CertificateDer<'static>>, String> {
    let certs: Vec<CertificateDer<'static>> = if looks_like_pem(bytes) {
        CertificateDer::pem_slice_iter(bytes)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid PEM: {e:?}"))?
    } else {
        vec![CertificateDer::from(bytes.to_vec())]
    };
    if certs.is_empty() {
        return Err("no certificate found".to_string());
    }
    for cert in &certs {
        x509_parser::parse_x509_certificate(cert.as_ref())
            .map_err(|e| format!("invalid X.509 certificate: {e:?}"))?;
    }
    Ok(certs)
}

/// Parse a PEM or DER private key (PKCS#8, PKCS#1 or SEC1).
pub fn parse_private_key(bytes: &[u8]) -> Result<PrivateKeyDer<'static>, String> {
    let key = if looks_like_pem(bytes) {
        PrivateKeyDer::from_pem_slice(bytes).map_err(|e| format!("invalid PEM key: {e:?}"))?
    } else {
        PrivateKeyDer::try_from(bytes)
            .map(|key| key.clone_key())
            .map_err(|e| format!("invalid DER key: {e}"))?
    };
    // The encoding checks above do not look inside the key.
    rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|e| format!("unusable private key: {e}"))?;
    Ok(key)
}
