//! Session key derivation for CSRF tokens.

use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier the CSRF store keys tokens by.
///
/// Authenticated callers are keyed by identity; anonymous callers by a hash
/// of their origin and a client-supplied identifying header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn for_identity(identity_id: i64) -> Self {
        Self(format!("user_{}", identity_id))
    }

    pub fn anonymous(origin: &str, fingerprint: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(origin.as_bytes());
        hasher.update(b"|");
        hasher.update(fingerprint.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(format!("anon_{}", &digest[..32]))
    }

    /// Derive the key for a caller, preferring its identity.
    pub fn derive(identity_id: Option<i64>, origin: &str, fingerprint: &str) -> Self {
        match identity_id {
            Some(id) => Self::for_identity(id),
            None => Self::anonymous(origin, fingerprint),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_key() {
        assert_eq!(SessionKey::for_identity(7).as_str(), "user_7");
        assert_eq!(SessionKey::derive(Some(7), "10.0.0.1", "ua"), SessionKey::from("user_7"));
    }

    #[test]
    fn test_anonymous_key_is_stable() {
        let a = SessionKey::anonymous("10.0.0.1", "Mozilla/5.0");
        let b = SessionKey::derive(None, "10.0.0.1", "Mozilla/5.0");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("anon_"));
        assert_eq!(a.as_str().len(), 5 + 32);
    }

    #[test]
    fn test_anonymous_key_depends_on_both_parts() {
        let base = SessionKey::anonymous("10.0.0.1", "ua");
        assert_ne!(base, SessionKey::anonymous("10.0.0.2", "ua"));
        assert_ne!(base, SessionKey::anonymous("10.0.0.1", "other"));
    }
}
