//! TLS material for the rendez relay.
//!
//! The relay and its clients consume prebuilt rustls configs; this crate
//! builds them from PEM files (mutual authentication against a single CA)
//! and can generate a self-signed CA plus server/client certificates for
//! tests and development setups.

pub mod suite;
pub mod tls;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("client verifier error: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("no certificate found in PEM input")]
    NoCertificate,

    #[error("no private key found in PEM input")]
    NoPrivateKey,
}

pub use suite::{generate_cert_suite, CertSuite};
pub use tls::{
    client_config, client_config_from_files, server_config, server_config_from_files,
};
