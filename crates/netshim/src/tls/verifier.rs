// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server certificate verifiers.
//!
//! - [`ChainVerifier`]: full WebPKI validation against the trusted chain.
//!   With expiration checks disabled, a chain rejected at the current time
//!   is validated again at the latest `notBefore` of the presented
//!   certificates. Signatures, issuers and names are still checked, only
//!   the clock is taken out of the decision.
//! - [`BootstrapVerifier`]: used when no trusted chain is provisioned. Any
//!   certificate is accepted, but handshake signatures must still match the
//!   presented certificate so the session keys are bound to it.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::StreamError;

// ============================================================================
// Chain verifier
// ============================================================================

#[derive(Debug)]
pub(crate) struct ChainVerifier {
    inner: Arc<WebPkiServerVerifier>,
    check_expiration: bool,
}

impl ChainVerifier {
    pub(crate) fn new(
        roots: Arc<RootCertStore>,
        provider: Arc<CryptoProvider>,
        check_expiration: bool,
    ) -> Result<Self, StreamError> {
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(|e| StreamError::invalid(format!("trusted chain unusable: {e}")))?;
        Ok(Self {
            inner,
            check_expiration,
        })
    }
}

impl ServerCertVerifier for ChainVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let err = match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => return Ok(verified),
            Err(err) => err,
        };

        if self.check_expiration || !matches!(err, rustls::Error::InvalidCertificate(_)) {
            return Err(err);
        }
        let Some(at) = validity_anchor(end_entity, intermediates) else {
            return Err(err);
        };
        if at == now {
            return Err(err);
        }

        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, at)
        {
            Ok(verified) => {
                log::warn!(
                    "[tls] accepting server certificate outside its validity period ({}): {}",
                    err,
                    describe_certificate(end_entity)
                );
                Ok(verified)
            }
            // Not a clock problem: report the original reason.
            Err(_) => Err(err),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Latest `notBefore` of the presented chain, as a verification time.
fn validity_anchor(
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
) -> Option<UnixTime> {
    let mut latest: Option<i64> = None;
    for der in std::iter::once(end_entity).chain(intermediates) {
        let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref()).ok()?;
        let not_before = cert.validity().not_before.timestamp();
        latest = Some(latest.map_or(not_before, |l| l.max(not_before)));
    }
    let secs = u64::try_from(latest?).ok()?;
    Some(UnixTime::since_unix_epoch(Duration::from_secs(secs)))
}

// ============================================================================
// Bootstrap verifier
// ============================================================================

#[derive(Debug)]
pub(crate) struct BootstrapVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl BootstrapVerifier {
    pub(crate) fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for BootstrapVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        log::debug!(
            "[tls] no trusted chain, accepting server certificate {}",
            describe_certificate(end_entity)
        );
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Short human description ("subject, valid until ...") for logs.
pub(crate) fn describe_certificate(der: &CertificateDer<'_>) -> String {
    match x509_parser::parse_x509_certificate(der.as_ref()) {
        Ok((_, cert)) => format!(
            "subject \"{}\", issuer \"{}\", valid {} .. {}",
            cert.subject(),
            cert.issuer(),
            cert.validity().not_before,
            cert.validity().not_after
        ),
        Err(_) => format!("<unparseable certificate, {} bytes>", der.as_ref().len()),
    }
}
