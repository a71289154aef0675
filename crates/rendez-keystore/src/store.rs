//! Persisted key table and ACL evaluation

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tracing::warn;

use crate::KeyStoreError;

/// Outcome of one ACL rule for one action. When every matching rule
/// leaves an action undefined, the request is denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclDecision {
    #[default]
    Undefined,
    Allow,
    Deny,
}

/// The two controllable actions. Dialing a channel is an invoke; holding
/// a registration (and answering its bridges) is a listen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclAction {
    Listen,
    Invoke,
}

/// One rule, scoped to the channels its regex matches. When several rules
/// match a channel, the later one in the list wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclRule {
    #[serde(default)]
    pub listen: AclDecision,
    #[serde(default)]
    pub invoke: AclDecision,
    pub channel_regexp: String,
}

impl AclRule {
    fn decision(&self, action: AclAction) -> AclDecision {
        match action {
            AclAction::Listen => self.listen,
            AclAction::Invoke => self.invoke,
        }
    }
}

/// Properties of one registered credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionKey {
    pub expire: DateTime<Utc>,
    pub rules: Vec<AclRule>,
    pub id: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Default, Serialize, Deserialize)]
struct Inner {
    table: HashMap<String, SessionKey>,
    /// Memoized credential digests; rebuilt lazily, never persisted.
    #[serde(skip)]
    cache: HashMap<Vec<u8>, String>,
}

/// Thread-safe key table. Only digests of credentials ever touch the disk.
pub struct KeyStore {
    inner: RwLock<Inner>,
}

/// Digest form of a credential, as stored on disk and in operator logs.
pub fn hash_key(key: &[u8]) -> String {
    STANDARD_NO_PAD.encode(Sha512::digest(key))
}

impl KeyStore {
    pub fn new() -> KeyStore {
        KeyStore {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Load a store previously written by [`KeyStore::save`].
    pub fn load(path: &Path) -> Result<KeyStore, KeyStoreError> {
        let data = std::fs::read(path)?;
        let inner: Inner = serde_json::from_slice(&data)?;
        Ok(KeyStore {
            inner: RwLock::new(inner),
        })
    }

    /// Persist the table as JSON. The file holds digests and rules only,
    /// so it needs no encryption, but rules are tamper-sensitive.
    pub fn save(&self, path: &Path) -> Result<(), KeyStoreError> {
        let inner = self.inner.read().unwrap();
        let data = serde_json::to_vec_pretty(&*inner)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Register a new credential. Fails if the credential or its id is
    /// already present; use [`KeyStore::update_key`] to replace.
    pub fn register_key(&self, key: &[u8], session: SessionKey) -> Result<(), KeyStoreError> {
        let hashed = hash_key(key);
        let mut inner = self.inner.write().unwrap();
        if inner.table.contains_key(&hashed) {
            return Err(KeyStoreError::DuplicateKey);
        }
        if inner.table.values().any(|existing| existing.id == session.id) {
            return Err(KeyStoreError::DuplicateId(session.id));
        }
        inner.table.insert(hashed, session);
        Ok(())
    }

    /// Insert or replace the session for a credential.
    pub fn update_key(&self, key: &[u8], session: SessionKey) {
        let hashed = hash_key(key);
        let mut inner = self.inner.write().unwrap();
        inner.table.insert(hashed, session);
    }

    /// Drop every expired key and reset the digest cache.
    pub fn cleanup(&self) {
        let now = Utc::now();
        let mut inner = self.inner.write().unwrap();
        inner.table.retain(|_, session| session.expire > now);
        inner.cache.clear();
    }

    /// Generate a 64-byte credential, register it under `id`, and return
    /// it base64-encoded. The raw credential is only ever returned here.
    pub fn generate_key(
        &self,
        id: &str,
        rules: Vec<AclRule>,
        ttl: Duration,
    ) -> Result<String, KeyStoreError> {
        let mut key = vec![0u8; 64];
        rand::thread_rng().fill_bytes(&mut key);
        self.register_key(
            &key,
            SessionKey {
                expire: Utc::now() + ttl,
                rules,
                id: id.to_string(),
                description: String::new(),
            },
        )?;
        Ok(STANDARD_NO_PAD.encode(&key))
    }

    /// Look up the live session for a credential. Expired keys are
    /// treated as absent.
    pub fn session_key(&self, key: &[u8]) -> Option<SessionKey> {
        let mut inner = self.inner.write().unwrap();
        let hashed = match inner.cache.get(key) {
            Some(hashed) => hashed.clone(),
            None => {
                let hashed = hash_key(key);
                inner.cache.insert(key.to_vec(), hashed.clone());
                hashed
            }
        };
        let session = inner.table.get(&hashed)?;
        if session.expire <= Utc::now() {
            return None;
        }
        Some(session.clone())
    }

    /// Whether `key` may perform `action` on `channel`.
    pub fn check_permission(&self, action: AclAction, channel: &str, key: &[u8]) -> bool {
        match self.session_key(key) {
            Some(session) => should_allow(action, channel, &session.rules),
            None => false,
        }
    }

    /// Expiry of the credential; a past instant for unknown keys.
    pub fn expire_time(&self, key: &[u8]) -> DateTime<Utc> {
        match self.session_key(key) {
            Some(session) => session.expire,
            None => Utc::now() - Duration::seconds(1),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn should_allow(action: AclAction, channel: &str, rules: &[AclRule]) -> bool {
    let mut decision = AclDecision::Undefined;
    for rule in rules {
        let matched = match regex::Regex::new(&rule.channel_regexp) {
            Ok(pattern) => pattern.is_match(channel),
            Err(err) => {
                warn!(rule = %rule.channel_regexp, error = %err, "skipping malformed ACL rule");
                continue;
            }
        };
        if matched {
            decision = rule.decision(action);
        }
    }
    decision == AclDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_rule(pattern: &str) -> AclRule {
        AclRule {
            listen: AclDecision::Allow,
            invoke: AclDecision::Allow,
            channel_regexp: pattern.to_string(),
        }
    }

    fn session(id: &str, rules: Vec<AclRule>) -> SessionKey {
        SessionKey {
            expire: Utc::now() + Duration::hours(1),
            rules,
            id: id.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_register_and_check() {
        let store = KeyStore::new();
        store
            .register_key(b"secret", session("ops", vec![allow_rule("^jobs$")]))
            .unwrap();

        assert!(store.check_permission(AclAction::Listen, "jobs", b"secret"));
        assert!(store.check_permission(AclAction::Invoke, "jobs", b"secret"));
        assert!(!store.check_permission(AclAction::Listen, "other", b"secret"));
        assert!(!store.check_permission(AclAction::Listen, "jobs", b"wrong"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let store = KeyStore::new();
        store.register_key(b"secret", session("ops", vec![])).unwrap();

        let err = store
            .register_key(b"secret", session("other", vec![]))
            .unwrap_err();
        assert!(matches!(err, KeyStoreError::DuplicateKey));

        let err = store
            .register_key(b"second", session("ops", vec![]))
            .unwrap_err();
        assert!(matches!(err, KeyStoreError::DuplicateId(id) if id == "ops"));
    }

    #[test]
    fn test_later_rule_wins() {
        let store = KeyStore::new();
        let rules = vec![
            allow_rule(".*"),
            AclRule {
                listen: AclDecision::Deny,
                invoke: AclDecision::Undefined,
                channel_regexp: "^admin".to_string(),
            },
        ];
        store.register_key(b"secret", session("ops", rules)).unwrap();

        assert!(store.check_permission(AclAction::Listen, "jobs", b"secret"));
        assert!(!store.check_permission(AclAction::Listen, "admin-tasks", b"secret"));
        // The later rule leaves invoke undefined, overriding the earlier allow.
        assert!(!store.check_permission(AclAction::Invoke, "admin-tasks", b"secret"));
    }

    #[test]
    fn test_no_matching_rule_denies() {
        let store = KeyStore::new();
        store
            .register_key(b"secret", session("ops", vec![allow_rule("^a$")]))
            .unwrap();
        assert!(!store.check_permission(AclAction::Listen, "b", b"secret"));
    }

    #[test]
    fn test_malformed_rule_is_skipped() {
        let store = KeyStore::new();
        let rules = vec![
            AclRule {
                listen: AclDecision::Deny,
                invoke: AclDecision::Deny,
                channel_regexp: "(unclosed".to_string(),
            },
            allow_rule(".*"),
        ];
        store.register_key(b"secret", session("ops", rules)).unwrap();
        assert!(store.check_permission(AclAction::Listen, "jobs", b"secret"));
    }

    #[test]
    fn test_expired_key_is_absent() {
        let store = KeyStore::new();
        store.update_key(
            b"secret",
            SessionKey {
                expire: Utc::now() - Duration::seconds(1),
                rules: vec![allow_rule(".*")],
                id: "ops".to_string(),
                description: String::new(),
            },
        );

        assert!(store.session_key(b"secret").is_none());
        assert!(!store.check_permission(AclAction::Listen, "jobs", b"secret"));
        assert!(store.expire_time(b"secret") < Utc::now());

        store.cleanup();
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_key_expiry_is_past() {
        let store = KeyStore::new();
        assert!(store.expire_time(b"nobody") < Utc::now());
    }

    #[test]
    fn test_generate_key_round_trips() {
        let store = KeyStore::new();
        let token = store
            .generate_key("ops", vec![allow_rule(".*")], Duration::days(30))
            .unwrap();
        let key = STANDARD_NO_PAD.decode(&token).unwrap();
        assert_eq!(key.len(), 64);
        assert!(store.check_permission(AclAction::Listen, "jobs", &key));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        let store = KeyStore::new();
        store
            .register_key(b"secret", session("ops", vec![allow_rule("^jobs$")]))
            .unwrap();
        store.save(&path).unwrap();

        let reloaded = KeyStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.check_permission(AclAction::Listen, "jobs", b"secret"));

        // The raw credential never appears in the persisted file.
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("secret"));
    }
}
