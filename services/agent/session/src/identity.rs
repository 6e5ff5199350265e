//! Mesh identity and trust material.
//!
//! The CA certificate, agent certificate and agent key are parsed once at
//! startup. A slot that is absent or malformed is reported as a mesh error
//! and left empty; hub connections then fail until the configuration is
//! corrected.

use crate::diagnostics::Diagnostics;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Why a piece of trust material was rejected
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Nothing usable in the PEM text
    #[error("no PEM items found")]
    Empty,
    /// PEM framing could not be read
    #[error("PEM: {0}")]
    Pem(#[from] std::io::Error),
    /// DER content is not a valid X.509 certificate
    #[error("X.509: {0}")]
    X509(String),
    /// rustls refused the material
    #[error("TLS: {0}")]
    Tls(#[from] rustls::Error),
}

/// Parsed identity and trust material of one mesh membership
pub struct TrustStore {
    ca: Option<CertificateDer<'static>>,
    certificate: Option<Vec<CertificateDer<'static>>>,
    key: Option<PrivateKeyDer<'static>>,
    client_config: Option<Arc<ClientConfig>>,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("trusted", &self.ca.is_some())
            .field("certificate", &self.certificate.is_some())
            .field("key", &self.key.is_some())
            .finish()
    }
}

impl TrustStore {
    /// Parse trust material, reporting every problem to `diagnostics`
    pub fn load(
        ca_pem: Option<&str>,
        certificate_pem: Option<&str>,
        key_pem: Option<&str>,
        diagnostics: &Diagnostics,
    ) -> Self {
        let ca = load_slot(ca_pem, "CA certificate", diagnostics, |pem| {
            parse_certificates(pem).map(|mut certs| certs.remove(0))
        });
        let certificate = load_slot(
            certificate_pem,
            "agent certificate",
            diagnostics,
            parse_certificates,
        );
        let key = load_slot(key_pem, "agent private key", diagnostics, parse_private_key);

        let mut store = Self {
            ca,
            certificate,
            key,
            client_config: None,
        };

        if store.ca.is_some() {
            match store.build_client_config() {
                Ok(config) => store.client_config = Some(Arc::new(config)),
                Err(e) => diagnostics.mesh_error(format!("Invalid TLS configuration: {}", e)),
            }
        }

        info!("Trust store loaded: {:?}", store);
        store
    }

    /// Whether a client certificate and key pair is available
    pub fn has_certificate(&self) -> bool {
        self.certificate.is_some() && self.key.is_some()
    }

    /// Whether a trusted root is available
    pub fn has_trusted(&self) -> bool {
        self.ca.is_some()
    }

    /// Client configuration for hub connections, when trust is established
    pub fn client_config(&self) -> Option<Arc<ClientConfig>> {
        self.client_config.clone()
    }

    fn build_client_config(&self) -> Result<ClientConfig, IdentityError> {
        // Install default crypto provider if not already set
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut roots = RootCertStore::empty();
        if let Some(ca) = &self.ca {
            roots.add(ca.clone())?;
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);
        let mut config = match (&self.certificate, &self.key) {
            (Some(chain), Some(key)) => builder.with_client_auth_cert(chain.clone(), key.clone_key())?,
            _ => {
                debug!("No agent certificate pair, connecting without client authentication");
                builder.with_no_client_auth()
            }
        };

        config.alpn_protocols = vec![b"h2".to_vec()];
        Ok(config)
    }
}

fn load_slot<T>(
    pem: Option<&str>,
    what: &str,
    diagnostics: &Diagnostics,
    parse: impl FnOnce(&str) -> Result<T, IdentityError>,
) -> Option<T> {
    let pem = match pem.map(str::trim).filter(|p| !p.is_empty()) {
        Some(pem) => pem,
        None => {
            diagnostics.mesh_error(format!("Missing {}", what));
            return None;
        }
    };

    match parse(pem) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Rejected {}: {}", what, e);
            diagnostics.mesh_error(format!("Invalid {}", what));
            None
        }
    }
}

/// Parse a PEM certificate chain, validating every certificate
pub fn parse_certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>, IdentityError> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes()).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(IdentityError::Empty);
    }

    for cert in &certs {
        x509_parser::parse_x509_certificate(cert.as_ref())
            .map_err(|e| IdentityError::X509(format!("{:?}", e)))?;
    }
    Ok(certs)
}

/// Parse the first private key of a PEM document
pub fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, IdentityError> {
    rustls_pemfile::private_key(&mut pem.as_bytes())?.ok_or(IdentityError::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestPki;

    fn messages(diagnostics: &Diagnostics) -> Vec<String> {
        diagnostics.errors().into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn test_missing_material_is_reported() {
        let diagnostics = Diagnostics::new();
        let store = TrustStore::load(None, Some("  "), None, &diagnostics);

        assert!(!store.has_trusted());
        assert!(!store.has_certificate());
        assert!(store.client_config().is_none());
        assert_eq!(
            messages(&diagnostics),
            vec![
                "Missing CA certificate",
                "Missing agent certificate",
                "Missing agent private key",
            ]
        );
    }

    #[test]
    fn test_malformed_material_is_reported() {
        let diagnostics = Diagnostics::new();
        let garbage = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        let store = TrustStore::load(
            Some(garbage),
            Some("not a certificate"),
            Some("not a key"),
            &diagnostics,
        );

        assert!(!store.has_trusted());
        assert!(!store.has_certificate());
        assert_eq!(
            messages(&diagnostics),
            vec![
                "Invalid CA certificate",
                "Invalid agent certificate",
                "Invalid agent private key",
            ]
        );
    }

    #[test]
    fn test_valid_material_enables_client_authentication() {
        let pki = TestPki::new();
        let diagnostics = Diagnostics::new();
        let store = TrustStore::load(
            Some(&pki.ca),
            Some(&pki.agent_certificate),
            Some(&pki.agent_key),
            &diagnostics,
        );

        assert!(store.has_trusted());
        assert!(store.has_certificate());
        assert!(messages(&diagnostics).is_empty());

        let config = store.client_config().unwrap();
        assert!(config.client_auth_cert_resolver.has_certs());
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }

    #[test]
    fn test_certificate_without_key_is_not_presented() {
        let pki = TestPki::new();
        let diagnostics = Diagnostics::new();
        let store = TrustStore::load(
            Some(&pki.ca),
            Some(&pki.agent_certificate),
            None,
            &diagnostics,
        );

        assert!(store.has_trusted());
        assert!(!store.has_certificate());
        assert_eq!(messages(&diagnostics), vec!["Missing agent private key"]);

        let config = store.client_config().unwrap();
        assert!(!config.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_parse_certificates_rejects_empty_input() {
        assert!(matches!(parse_certificates(""), Err(IdentityError::Empty)));
        assert!(matches!(parse_private_key(""), Err(IdentityError::Empty)));
    }
}
