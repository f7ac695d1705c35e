// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TLS context: credentials, verification policy and rustls configs shared
//! by every secure stream created from it.
//!
//! A context is built once (from explicit certificates or from
//! [`SecurityConfig`] references) and handed out as `Arc<TlsContext>`.
//! The client side is in one of three trust modes:
//!
//! | Trusted chain | Bootstrap allowed | Client connections |
//! |---------------|-------------------|--------------------|
//! | present | any | verified against the chain |
//! | absent | yes | accepted, marked [`PeerTrust::Unverified`] |
//! | absent | no | refused with `NotConfigured` |

use std::sync::Arc;

use rustls::client::Resumption;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::NoServerSessionStorage;
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection, SupportedProtocolVersion};

use super::session::{PeerTrust, TlsSession};
use super::verifier::{BootstrapVerifier, ChainVerifier};
use super::SEND_BUFFER_LIMIT;
use crate::config::{SecurityConfig, TlsVersion, VerificationPolicy};
use crate::error::StreamError;
use crate::metrics::TlsMetrics;
use crate::net_state::NetworkState;
use crate::provision::{parse_certificates, parse_private_key, CertRole, PersistentStore, Provisioner};

enum ClientTrust {
    Verified(Arc<ClientConfig>),
    Bootstrap(Arc<ClientConfig>),
}

/// Shared TLS configuration.
pub struct TlsContext {
    client: Option<ClientTrust>,
    server: Option<Arc<ServerConfig>>,
    policy: VerificationPolicy,
    net_state: Arc<NetworkState>,
    metrics: Arc<TlsMetrics>,
}

impl TlsContext {
    pub fn builder() -> TlsContextBuilder {
        TlsContextBuilder::default()
    }

    /// Build a context from configured credential references.
    ///
    /// Missing or broken credentials do not fail the call: they are logged,
    /// reported to `net_state`, and the matching capability is left out
    /// (no trusted chain, or no server identity).
    pub fn from_config(
        config: &SecurityConfig,
        store: &dyn PersistentStore,
        net_state: Arc<NetworkState>,
    ) -> Result<Arc<Self>, StreamError> {
        let provisioner = Provisioner::new(&config.certs_dir, store).with_network_state(&net_state);

        let mut builder = Self::builder()
            .with_policy(config.verification)
            .with_alpn_protocols(config.alpn_protocols.iter().map(|p| p.as_bytes().to_vec()).collect())
            .with_versions(config.min_version, config.max_version);

        if let Ok(chain) = provisioner.load_certificates(CertRole::TrustedChain, config.trusted_cert.as_deref()) {
            builder = builder.with_trusted_certificates(chain);
        }

        let server_cert = provisioner.load_certificates(CertRole::ServerCert, config.server_cert.as_deref());
        let server_key = provisioner.load_private_key(config.server_key.as_deref());
        if let (Ok(chain), Ok(key)) = (server_cert, server_key) {
            builder = builder.with_server_identity(chain, key);
        }

        builder.with_network_state(net_state).build()
    }

    /// Client connections verify the server against a trusted chain.
    pub fn has_trusted_chain(&self) -> bool {
        matches!(self.client, Some(ClientTrust::Verified(_)))
    }

    /// A server identity is configured, so listeners can be opened.
    pub fn is_server_capable(&self) -> bool {
        self.server.is_some()
    }

    pub fn policy(&self) -> VerificationPolicy {
        self.policy
    }

    pub fn network_state(&self) -> &Arc<NetworkState> {
        &self.net_state
    }

    pub fn metrics(&self) -> &Arc<TlsMetrics> {
        &self.metrics
    }

    pub(crate) fn new_client_session(&self, server_name: &str) -> Result<(TlsSession, PeerTrust), StreamError> {
        let (config, trust) = match &self.client {
            Some(ClientTrust::Verified(config)) => (config, PeerTrust::Verified),
            Some(ClientTrust::Bootstrap(config)) => (config, PeerTrust::Unverified),
            None => return Err(StreamError::NotConfigured("trusted certificate chain")),
        };

        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| StreamError::invalid(format!("invalid server name {server_name:?}: {e}")))?;
        let mut conn = ClientConnection::new(Arc::clone(config), name)
            .map_err(|e| StreamError::invalid(format!("cannot start TLS client session: {e}")))?;
        conn.set_buffer_limit(Some(SEND_BUFFER_LIMIT));
        Ok((TlsSession::Client(conn), trust))
    }

    pub(crate) fn new_server_session(&self) -> Result<TlsSession, StreamError> {
        let config = self
            .server
            .as_ref()
            .ok_or(StreamError::NotConfigured("server certificate and key"))?;
        let mut conn = ServerConnection::new(Arc::clone(config))
            .map_err(|e| StreamError::invalid(format!("cannot start TLS server session: {e}")))?;
        conn.set_buffer_limit(Some(SEND_BUFFER_LIMIT));
        Ok(TlsSession::Server(conn))
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let client = match &self.client {
            Some(ClientTrust::Verified(_)) => "verified",
            Some(ClientTrust::Bootstrap(_)) => "bootstrap",
            None => "unavailable",
        };
        f.debug_struct("TlsContext")
            .field("client", &client)
            .field("server", &self.server.is_some())
            .field("policy", &self.policy)
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`TlsContext`].
pub struct TlsContextBuilder {
    trusted: Vec<CertificateDer<'static>>,
    server_chain: Vec<CertificateDer<'static>>,
    server_key: Option<PrivateKeyDer<'static>>,
    policy: VerificationPolicy,
    alpn_protocols: Vec<Vec<u8>>,
    min_version: TlsVersion,
    max_version: TlsVersion,
    net_state: Option<Arc<NetworkState>>,
    metrics: Option<Arc<TlsMetrics>>,
}

impl Default for TlsContextBuilder {
    fn default() -> Self {
        Self {
            trusted: Vec::new(),
            server_chain: Vec::new(),
            server_key: None,
            policy: VerificationPolicy::default(),
            alpn_protocols: Vec::new(),
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            net_state: None,
            metrics: None,
        }
    }
}

impl TlsContextBuilder {
    /// Trusted chain (CA certificates) used to verify servers.
    pub fn with_trusted_certificates(mut self, certs: Vec<CertificateDer<'static>>) -> Self {
        self.trusted = certs;
        self
    }

    /// Trusted chain from PEM or DER bytes.
    pub fn with_trusted_pem(self, bytes: &[u8]) -> Result<Self, StreamError> {
        let certs = parse_certificates(bytes).map_err(|e| StreamError::invalid(format!("trusted chain: {e}")))?;
        Ok(self.with_trusted_certificates(certs))
    }

    /// Server certificate chain (leaf first) and its private key.
    pub fn with_server_identity(mut self, chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        self.server_chain = chain;
        self.server_key = Some(key);
        self
    }

    /// Server identity from PEM or DER bytes.
    pub fn with_server_pem(self, cert: &[u8], key: &[u8]) -> Result<Self, StreamError> {
        let chain = parse_certificates(cert).map_err(|e| StreamError::invalid(format!("server certificate: {e}")))?;
        let key = parse_private_key(key).map_err(|e| StreamError::invalid(format!("server key: {e}")))?;
        Ok(self.with_server_identity(chain, key))
    }

    pub fn with_policy(mut self, policy: VerificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_alpn_protocols(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    pub fn with_versions(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = min;
        self.max_version = max;
        self
    }

    /// Share a network state (default: a private one).
    pub fn with_network_state(mut self, net_state: Arc<NetworkState>) -> Self {
        self.net_state = Some(net_state);
        self
    }

    /// Share metrics between contexts (default: fresh counters).
    pub fn with_metrics(mut self, metrics: Arc<TlsMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Arc<TlsContext>, StreamError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let versions = protocol_versions(self.min_version, self.max_version)?;
        let net_state = self.net_state.unwrap_or_default();

        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(self.trusted);
        if ignored > 0 {
            log::warn!("[tls] {} trusted certificates could not be used", ignored);
        }

        let client = if added > 0 {
            net_state.set_no_cert_chain(false);
            let verifier = ChainVerifier::new(Arc::new(roots), Arc::clone(&provider), self.policy.check_expiration)?;
            log::debug!("[tls] client trust: {} anchors", added);
            Some(ClientTrust::Verified(client_config(
                &provider,
                &versions,
                Arc::new(verifier),
                &self.alpn_protocols,
            )?))
        } else {
            net_state.set_no_cert_chain(true);
            if self.policy.bootstrap_without_trust_chain {
                log::warn!("[tls] no trusted certificate chain, servers will not be verified");
                Some(ClientTrust::Bootstrap(client_config(
                    &provider,
                    &versions,
                    Arc::new(BootstrapVerifier::new(&provider)),
                    &self.alpn_protocols,
                )?))
            } else {
                log::warn!("[tls] no trusted certificate chain, client connections disabled");
                None
            }
        };

        let server = match (self.server_chain.is_empty(), self.server_key) {
            (false, Some(key)) => Some(server_config(&provider, &versions, self.server_chain, key, &self.alpn_protocols)?),
            (true, None) => None,
            _ => {
                log::warn!("[tls] server certificate and key must be provided together, server side disabled");
                None
            }
        };

        Ok(Arc::new(TlsContext {
            client,
            server,
            policy: self.policy,
            net_state,
            metrics: self.metrics.unwrap_or_default(),
        }))
    }
}

fn protocol_versions(
    min: TlsVersion,
    max: TlsVersion,
) -> Result<Vec<&'static SupportedProtocolVersion>, StreamError> {
    let mut versions = Vec::with_capacity(2);
    if (min..=max).contains(&TlsVersion::Tls13) {
        versions.push(&rustls::version::TLS13);
    }
    if (min..=max).contains(&TlsVersion::Tls12) {
        versions.push(&rustls::version::TLS12);
    }
    if versions.is_empty() {
        return Err(StreamError::invalid(format!("no TLS version between {min:?} and {max:?}")));
    }
    Ok(versions)
}

fn client_config(
    provider: &Arc<CryptoProvider>,
    versions: &[&'static SupportedProtocolVersion],
    verifier: Arc<dyn rustls::client::danger::ServerCertVerifier>,
    alpn_protocols: &[Vec<u8>],
) -> Result<Arc<ClientConfig>, StreamError> {
    let mut config = ClientConfig::builder_with_provider(Arc::clone(provider))
        .with_protocol_versions(versions)
        .map_err(config_error)?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    config.alpn_protocols = alpn_protocols.to_vec();
    config.resumption = Resumption::disabled();
    Ok(Arc::new(config))
}

fn server_config(
    provider: &Arc<CryptoProvider>,
    versions: &[&'static SupportedProtocolVersion],
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    alpn_protocols: &[Vec<u8>],
) -> Result<Arc<ServerConfig>, StreamError> {
    let mut config = ServerConfig::builder_with_provider(Arc::clone(provider))
        .with_protocol_versions(versions)
        .map_err(config_error)?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(config_error)?;
    config.alpn_protocols = alpn_protocols.to_vec();
    config.session_storage = Arc::new(NoServerSessionStorage {});
    config.send_tls13_tickets = 0;
    Ok(Arc::new(config))
}

fn config_error(err: rustls::Error) -> StreamError {
    StreamError::invalid(format!("TLS configuration rejected: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::{MemoryStore, BLOCK_SERVER_CERT, BLOCK_SERVER_KEY, BLOCK_TRUSTED_CHAIN};
    use rcgen::{CertificateParams, KeyPair};

    fn self_signed() -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn test_versions() {
        assert_eq!(protocol_versions(TlsVersion::Tls12, TlsVersion::Tls13).unwrap().len(), 2);
        assert_eq!(protocol_versions(TlsVersion::Tls13, TlsVersion::Tls13).unwrap().len(), 1);
        assert!(protocol_versions(TlsVersion::Tls13, TlsVersion::Tls12).is_err());
    }

    #[test]
    fn test_bootstrap_context_without_chain() {
        let ctx = TlsContext::builder().build().unwrap();
        assert!(!ctx.has_trusted_chain());
        assert!(!ctx.is_server_capable());
        assert!(ctx.network_state().no_cert_chain());

        let (_, trust) = ctx.new_client_session("device.local").unwrap();
        assert_eq!(trust, PeerTrust::Unverified);
        assert!(matches!(
            ctx.new_server_session(),
            Err(StreamError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_bootstrap_disabled_refuses_clients() {
        let policy = VerificationPolicy {
            bootstrap_without_trust_chain: false,
            ..Default::default()
        };
        let ctx = TlsContext::builder().with_policy(policy).build().unwrap();
        assert!(matches!(
            ctx.new_client_session("device.local"),
            Err(StreamError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_invalid_server_name() {
        let ctx = TlsContext::builder().build().unwrap();
        assert!(matches!(
            ctx.new_client_session("not a host name"),
            Err(StreamError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_from_config_uses_default_blocks() {
        let (ca_pem, _) = self_signed();
        let (server_pem, server_key) = self_signed();
        let store = MemoryStore::new()
            .with_block(BLOCK_TRUSTED_CHAIN, ca_pem.into_bytes())
            .with_block(BLOCK_SERVER_CERT, server_pem.into_bytes())
            .with_block(BLOCK_SERVER_KEY, server_key.into_bytes());
        let net_state = Arc::new(NetworkState::new());

        let ctx = TlsContext::from_config(&SecurityConfig::default(), &store, Arc::clone(&net_state)).unwrap();
        assert!(ctx.has_trusted_chain());
        assert!(ctx.is_server_capable());
        assert!(!net_state.no_cert_chain());
        assert!(net_state.snapshot().security_conf_error.is_none());
    }

    #[test]
    fn test_from_config_reports_missing_configured_chain() {
        let config = SecurityConfig {
            trusted_cert: Some("missing-bundle.crt".into()),
            ..Default::default()
        };
        let net_state = Arc::new(NetworkState::new());
        let ctx = TlsContext::from_config(&config, &MemoryStore::new(), Arc::clone(&net_state)).unwrap();

        assert!(!ctx.has_trusted_chain());
        let status = net_state.snapshot();
        assert!(status.no_cert_chain);
        assert_eq!(
            status.security_conf_error.map(|e| e.role),
            Some(CertRole::TrustedChain)
        );
    }
}
