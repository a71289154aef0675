//! Relay configuration file
//!
//! JSON, loaded once at startup. TLS is all-or-nothing: when `tls` is
//! true the CA, certificate, and key files must all be present.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rendez_keystore::KeyStore;
use serde::{Deserialize, Serialize};
use tokio_rustls::TlsAcceptor;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address the relay listens on, e.g. "0.0.0.0:4500".
    #[serde(rename = "router-address")]
    pub router_address: String,

    /// Whether the relay terminates TLS and authenticates peers.
    #[serde(rename = "tls", default)]
    pub enable_tls: bool,

    /// PEM CA bundle that client certificates must chain to.
    #[serde(rename = "ca-file", default)]
    pub ca_file: Option<PathBuf>,

    /// The relay's own PEM certificate.
    #[serde(rename = "cert-file", default)]
    pub cert_file: Option<PathBuf>,

    /// The relay's PEM private key.
    #[serde(rename = "key-file", default)]
    pub key_file: Option<PathBuf>,

    /// Key store path; when set, every frame is checked against its ACLs.
    #[serde(rename = "token-file", default)]
    pub token_file: Option<PathBuf>,
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<RelayConfig> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Build the TLS acceptor when enabled; `None` runs plaintext.
    pub fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>> {
        if !self.enable_tls {
            return Ok(None);
        }
        let (Some(ca), Some(cert), Some(key)) = (&self.ca_file, &self.cert_file, &self.key_file)
        else {
            bail!("tls is enabled but ca-file, cert-file, or key-file is missing");
        };
        let config = rendez_cert::server_config_from_files(ca, cert, key)
            .context("failed to load TLS material")?;
        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

/// Load the key store named by the config, creating an empty one on
/// first use so operators can add keys to it afterwards.
pub fn create_or_load_keystore(path: &Path) -> Result<KeyStore> {
    if path.exists() {
        KeyStore::load(path)
            .with_context(|| format!("failed to load key store: {}", path.display()))
    } else {
        info!(path = %path.display(), "creating empty key store");
        let store = KeyStore::new();
        store
            .save(path)
            .with_context(|| format!("failed to create key store: {}", path.display()))?;
        Ok(store)
    }
}
