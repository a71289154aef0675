//! rustls config builders
//!
//! One CA pool serves both directions: the relay requires and verifies
//! client certificates against it, and clients verify the relay against
//! it while presenting their own certificate.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::CertError;

/// Server-side config with mandatory client certificate verification.
pub fn server_config(
    ca_pem: &[u8],
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<ServerConfig, CertError> {
    let roots = root_store(ca_pem)?;
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build()?;
    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(load_certs(cert_pem)?, load_key(key_pem)?)?;
    Ok(config)
}

/// Client-side config presenting a certificate for mutual authentication.
pub fn client_config(
    ca_pem: &[u8],
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<ClientConfig, CertError> {
    let roots = root_store(ca_pem)?;
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(load_certs(cert_pem)?, load_key(key_pem)?)?;
    Ok(config)
}

pub fn server_config_from_files(
    ca: &Path,
    cert: &Path,
    key: &Path,
) -> Result<ServerConfig, CertError> {
    server_config(
        &std::fs::read(ca)?,
        &std::fs::read(cert)?,
        &std::fs::read(key)?,
    )
}

pub fn client_config_from_files(
    ca: &Path,
    cert: &Path,
    key: &Path,
) -> Result<ClientConfig, CertError> {
    client_config(
        &std::fs::read(ca)?,
        &std::fs::read(cert)?,
        &std::fs::read(key)?,
    )
}

fn load_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, CertError> {
    let certs = rustls_pemfile::certs(&mut Cursor::new(pem)).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(CertError::NoCertificate);
    }
    Ok(certs)
}

fn load_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, CertError> {
    rustls_pemfile::private_key(&mut Cursor::new(pem))?.ok_or(CertError::NoPrivateKey)
}

fn root_store(ca_pem: &[u8]) -> Result<RootCertStore, CertError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_pem)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::generate_cert_suite;

    #[test]
    fn test_configs_build_from_generated_suite() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let suite = generate_cert_suite("relay.test").unwrap();

        server_config(
            suite.ca_cert_pem.as_bytes(),
            suite.server_cert_pem.as_bytes(),
            suite.server_key_pem.as_bytes(),
        )
        .unwrap();

        client_config(
            suite.ca_cert_pem.as_bytes(),
            suite.client_cert_pem.as_bytes(),
            suite.client_key_pem.as_bytes(),
        )
        .unwrap();
    }

    #[test]
    fn test_missing_material_is_rejected() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let suite = generate_cert_suite("relay.test").unwrap();

        let err = client_config(
            b"not a certificate",
            suite.client_cert_pem.as_bytes(),
            suite.client_key_pem.as_bytes(),
        )
        .unwrap_err();
        assert!(matches!(err, CertError::NoCertificate));

        let err = client_config(
            suite.ca_cert_pem.as_bytes(),
            suite.client_cert_pem.as_bytes(),
            b"not a key",
        )
        .unwrap_err();
        assert!(matches!(err, CertError::NoPrivateKey));
    }
}
