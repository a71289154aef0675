//! Access control for the rendez relay.
//!
//! Credentials are never stored raw: the persisted table maps their
//! SHA-512 digests to session keys, each carrying an expiry and a list of
//! regex-scoped ACL rules. [`KeyStoreAuthority`] adapts the store to the
//! router's `Authority` seam.

pub mod authority;
pub mod store;

use thiserror::Error;

pub use authority::KeyStoreAuthority;
pub use store::{AclAction, AclDecision, AclRule, KeyStore, SessionKey};

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key store file is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("key is already registered")]
    DuplicateKey,

    #[error("key id `{0}` is already registered")]
    DuplicateId(String),
}
