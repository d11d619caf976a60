//! Mutual TLS credentials for the broker connection
//!
//! Loading is split in two steps so that credential problems are reported
//! before any network activity:
//!
//! 1. [`TlsCredentials::load`] reads the CA bundle, the client certificate
//!    chain and the private key, checks that the key belongs to the leaf
//!    certificate and parses the leaf.
//! 2. [`TlsCredentials::into_client_config`] assembles the rustls client
//!    configuration handed to rumqttc.
//!
//! A missing or unreadable CA bundle is tolerated and yields an empty trust
//! store. Everything else is fatal.

use crate::config::TlsSection;
use chrono::{DateTime, Utc};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING,
    ECDSA_P384_SHA384_ASN1_SIGNING,
};
use rumqttc::tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rumqttc::tokio_rustls::rustls::crypto::{
    ring as ring_provider, verify_tls12_signature, verify_tls13_signature,
    WebPkiSupportedAlgorithms,
};
use rumqttc::tokio_rustls::rustls::pki_types::{
    CertificateDer, PrivateKeyDer, ServerName, UnixTime,
};
use rumqttc::tokio_rustls::rustls::{
    ClientConfig, DigitallySignedStruct, Error as RustlsError, RootCertStore, SignatureScheme,
};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Credential errors, all fatal at startup
#[derive(Debug, Error)]
pub enum TlsError {
    #[error(
        "cert file mismatch. clientCertificate: {certificate}, privateKey: {private_key}: {reason}"
    )]
    KeyPair {
        certificate: String,
        private_key: String,
        reason: String,
    },
    #[error("private key {private_key} does not belong to certificate {certificate}")]
    KeyMismatch {
        certificate: String,
        private_key: String,
    },
    #[error("failed to parse leaf certificate {certificate}: {reason}")]
    LeafParse { certificate: String, reason: String },
    #[error("broker verification requested but no trust anchors were loaded from {0}")]
    NoTrustAnchors(String),
    #[error("failed to build TLS client configuration: {0}")]
    ClientConfig(#[from] RustlsError),
}

/// Fields of the leaf certificate worth logging
#[derive(Debug, Clone, PartialEq)]
pub struct LeafCertificate {
    pub subject: String,
    pub issuer: String,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl LeafCertificate {
    /// Parse the DER-encoded leaf
    pub fn parse(der: &[u8]) -> Result<Self, String> {
        let (_, cert) = x509_parser::parse_x509_certificate(der).map_err(|e| e.to_string())?;
        let validity = cert.validity();

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before: DateTime::from_timestamp(validity.not_before.timestamp(), 0),
            not_after: DateTime::from_timestamp(validity.not_after.timestamp(), 0),
        })
    }

    /// Whether `now` falls inside the validity window
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let after_start = self.not_before.map_or(true, |start| now >= start);
        let before_end = self.not_after.map_or(true, |end| now <= end);
        after_start && before_end
    }
}

/// Trust roots plus the client identity presented to the broker
#[derive(Debug)]
pub struct TlsCredentials {
    roots: RootCertStore,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    leaf: LeafCertificate,
    ca_path: String,
}

impl TlsCredentials {
    /// Load and cross-check the certificate material named by `section`
    pub fn load(section: &TlsSection) -> Result<Self, TlsError> {
        let roots = load_trust_roots(&section.ca_certificate);

        let key_pair_error = |reason: String| TlsError::KeyPair {
            certificate: section.client_certificate.clone(),
            private_key: section.private_key.clone(),
            reason,
        };

        let chain = read_certificates(&section.client_certificate)
            .map_err(|e| key_pair_error(format!("reading certificate: {e}")))?;
        let leaf_der = chain
            .first()
            .cloned()
            .ok_or_else(|| key_pair_error("no certificate found".to_string()))?;

        let key = read_private_key(&section.private_key).map_err(key_pair_error)?;

        match key_matches_certificate(&key, &leaf_der) {
            Some(true) => {}
            Some(false) => {
                return Err(TlsError::KeyMismatch {
                    certificate: section.client_certificate.clone(),
                    private_key: section.private_key.clone(),
                })
            }
            None => warn!(
                private_key = %section.private_key,
                "Private key type not checked against certificate; handshake will catch a mismatch"
            ),
        }

        let leaf = LeafCertificate::parse(leaf_der.as_ref()).map_err(|reason| TlsError::LeafParse {
            certificate: section.client_certificate.clone(),
            reason,
        })?;

        if !leaf.is_valid_at(Utc::now()) {
            warn!(
                subject = %leaf.subject,
                not_after = ?leaf.not_after,
                "Client certificate is outside its validity window"
            );
        }

        info!(
            subject = %leaf.subject,
            issuer = %leaf.issuer,
            trust_anchors = roots.len(),
            "Loaded client certificate"
        );

        Ok(Self {
            roots,
            chain,
            key,
            leaf,
            ca_path: section.ca_certificate.clone(),
        })
    }

    pub fn leaf(&self) -> &LeafCertificate {
        &self.leaf
    }

    /// Number of CA certificates that made it into the trust store
    pub fn trust_anchor_count(&self) -> usize {
        self.roots.len()
    }

    /// Assemble the rustls configuration presenting the client certificate.
    ///
    /// With `verify_broker == false` the broker's certificate chain is not
    /// verified; handshake signatures still are.
    pub fn into_client_config(self, verify_broker: bool) -> Result<ClientConfig, TlsError> {
        let config = if verify_broker {
            if self.roots.is_empty() {
                return Err(TlsError::NoTrustAnchors(self.ca_path));
            }
            ClientConfig::builder()
                .with_root_certificates(self.roots)
                .with_client_auth_cert(self.chain, self.key)?
        } else {
            warn!("Broker certificate verification is disabled; pass --verify-broker to enable it");
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoBrokerVerification::new()))
                .with_client_auth_cert(self.chain, self.key)?
        };

        Ok(config)
    }
}

/// Read the CA bundle into a trust store, degrading to an empty store
fn load_trust_roots(path: &str) -> RootCertStore {
    let mut roots = RootCertStore::empty();

    match read_certificates(path) {
        Ok(certs) => {
            let (added, ignored) = roots.add_parsable_certificates(certs);
            debug!(path, added, ignored, "Loaded CA bundle");
        }
        Err(e) => {
            debug!(path, error = %e, "CA bundle unavailable, continuing with empty trust store");
        }
    }

    roots
}

fn read_certificates(path: &str) -> std::io::Result<Vec<CertificateDer<'static>>> {
    let file = File::open(Path::new(path))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader).collect()
}

fn read_private_key(path: &str) -> Result<PrivateKeyDer<'static>, String> {
    let file = File::open(Path::new(path)).map_err(|e| format!("reading private key: {e}"))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| format!("reading private key: {e}"))?
        .ok_or_else(|| "no private key found".to_string())
}

/// Compare the key's public half against the certificate's SubjectPublicKeyInfo.
///
/// Returns `None` for key encodings ring cannot load (SEC1 EC keys).
fn key_matches_certificate(key: &PrivateKeyDer<'_>, cert: &CertificateDer<'_>) -> Option<bool> {
    let public_key = public_key_of(key)?;

    let Ok((_, parsed)) = x509_parser::parse_x509_certificate(cert.as_ref()) else {
        // Reported as a leaf parse error by the caller
        return Some(true);
    };

    // The SPKI DER ends with the BIT STRING holding the raw public key
    Some(!public_key.is_empty() && parsed.public_key().raw.ends_with(&public_key))
}

fn public_key_of(key: &PrivateKeyDer<'_>) -> Option<Vec<u8>> {
    match key {
        PrivateKeyDer::Pkcs1(der) => RsaKeyPair::from_der(der.secret_pkcs1_der())
            .ok()
            .map(|pair| pair.public_key().as_ref().to_vec()),
        PrivateKeyDer::Pkcs8(der) => {
            let pkcs8 = der.secret_pkcs8_der();
            let rng = SystemRandom::new();

            if let Ok(pair) = RsaKeyPair::from_pkcs8(pkcs8) {
                return Some(pair.public_key().as_ref().to_vec());
            }
            for alg in [&ECDSA_P256_SHA256_ASN1_SIGNING, &ECDSA_P384_SHA384_ASN1_SIGNING] {
                if let Ok(pair) = EcdsaKeyPair::from_pkcs8(alg, pkcs8, &rng) {
                    return Some(pair.public_key().as_ref().to_vec());
                }
            }
            Ed25519KeyPair::from_pkcs8_maybe_unchecked(pkcs8)
                .ok()
                .map(|pair| pair.public_key().as_ref().to_vec())
        }
        _ => None,
    }
}

/// Accepts any broker certificate chain while still checking that the
/// handshake was signed by the key in the presented certificate.
#[derive(Debug)]
pub struct NoBrokerVerification {
    algorithms: WebPkiSupportedAlgorithms,
}

impl NoBrokerVerification {
    pub fn new() -> Self {
        Self {
            algorithms: ring_provider::default_provider().signature_verification_algorithms,
        }
    }
}

impl Default for NoBrokerVerification {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerCertVerifier for NoBrokerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
