//! Permission oracle consulted for every greeting frame
//!
//! The router never interprets credentials itself; it derives an opaque
//! credential from the TLS peer certificate (empty when TLS is off) and
//! hands it to an [`Authority`] together with the parsed frame.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rendez_proto::Frame;
use sha2::{Digest, Sha256, Sha512};

/// Access-control policy applied to every inbound frame.
///
/// Implementations must be pure policy: no I/O on the hot path, cheap
/// enough to call once per accepted transport.
pub trait Authority: Send + Sync {
    /// Whether `frame` is permitted for the peer holding `credential`.
    fn check_permission(&self, frame: &Frame, credential: &[u8]) -> bool;

    /// Expiration of the credential; the router bounds a registration's
    /// lifetime by this instant.
    fn expiration(&self, credential: &[u8]) -> DateTime<Utc>;
}

/// Default authority: permits everything, sessions capped at 24 hours.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authority for AllowAll {
    fn check_permission(&self, _frame: &Frame, _credential: &[u8]) -> bool {
        true
    }

    fn expiration(&self, _credential: &[u8]) -> DateTime<Utc> {
        Utc::now() + Duration::hours(24)
    }
}

/// Derive the credential for a TLS peer: the SHA-256 digest of its leaf
/// certificate in DER form. Stable for a given certificate across
/// connections, which is all the key store needs.
pub fn credential_digest(cert_der: &[u8]) -> Vec<u8> {
    Sha256::digest(cert_der).to_vec()
}

/// Operator-facing fingerprint of a credential, safe to log. The raw
/// credential is what the key store accepts, so logs only ever carry its
/// hash.
pub fn credential_fingerprint(credential: &[u8]) -> String {
    if credential.is_empty() {
        return "anonymous".to_string();
    }
    STANDARD_NO_PAD.encode(Sha512::digest(credential))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let authority = AllowAll;
        assert!(authority.check_permission(&Frame::dial("any"), b""));
        assert!(authority.check_permission(&Frame::listen("any"), b"cred"));
        assert!(authority.expiration(b"") > Utc::now());
    }

    #[test]
    fn test_credential_digest_is_stable() {
        assert_eq!(credential_digest(b"cert"), credential_digest(b"cert"));
        assert_ne!(credential_digest(b"cert"), credential_digest(b"other"));
        assert_eq!(credential_digest(b"cert").len(), 32);
    }

    #[test]
    fn test_fingerprint_never_echoes_credential() {
        let credential = credential_digest(b"cert");
        let fingerprint = credential_fingerprint(&credential);
        assert!(!fingerprint.contains(&STANDARD_NO_PAD.encode(&credential)));
        assert_eq!(credential_fingerprint(b""), "anonymous");
    }
}
