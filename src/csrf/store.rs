//! Per-session CSRF token store.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::session_key::SessionKey;
use super::token::{generate_token, tokens_match};
use crate::config::{CsrfConfig, MIN_TOKEN_BYTES};
use crate::error::{Result, TurnstileError};
use crate::sweep::Sweep;

/// The live token for one session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfTokenRecord {
    pub token: String,
    pub expires_at: Instant,
}

impl CsrfTokenRecord {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Store holding at most one live token per session key.
pub struct CsrfTokenStore {
    tokens: RwLock<HashMap<SessionKey, CsrfTokenRecord>>,
    lifetime: Duration,
    token_bytes: usize,
}

impl CsrfTokenStore {
    /// Create a store issuing 256-bit tokens valid for `lifetime`.
    pub fn new(lifetime: Duration) -> Self {
        Self::with_token_bytes(lifetime, MIN_TOKEN_BYTES)
    }

    /// Token size is clamped to at least 256 bits.
    pub fn with_token_bytes(lifetime: Duration, token_bytes: usize) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            lifetime,
            token_bytes: token_bytes.max(MIN_TOKEN_BYTES),
        }
    }

    pub fn from_config(config: &CsrfConfig) -> Self {
        Self::with_token_bytes(config.token_lifetime(), config.token_bytes)
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Issue a fresh token for `session_key`, replacing any previous one.
    pub fn issue(&self, session_key: &SessionKey) -> String {
        let token = generate_token(self.token_bytes);
        let record = CsrfTokenRecord {
            token: token.clone(),
            expires_at: Instant::now() + self.lifetime,
        };

        self.tokens.write().insert(session_key.clone(), record);
        debug!(session_key = %session_key, "Issued CSRF token");

        token
    }

    /// Whether `token` is the live token for `session_key`.
    pub fn validate(&self, session_key: &SessionKey, token: &str) -> bool {
        let now = Instant::now();
        let tokens = self.tokens.read();

        let valid = match tokens.get(session_key) {
            Some(record) => !record.is_expired(now) && tokens_match(token, &record.token),
            None => false,
        };

        trace!(session_key = %session_key, valid, "Validated CSRF token");
        valid
    }

    /// Validate an optional header value, distinguishing missing from invalid.
    pub fn verify(&self, session_key: &SessionKey, token: Option<&str>) -> Result<()> {
        match token {
            None | Some("") => Err(TurnstileError::CsrfTokenMissing),
            Some(token) if self.validate(session_key, token) => Ok(()),
            Some(_) => {
                debug!(session_key = %session_key, "Rejected CSRF token");
                Err(TurnstileError::CsrfTokenInvalid)
            }
        }
    }

    /// Remove the token for `session_key`, e.g. on logout.
    pub fn revoke(&self, session_key: &SessionKey) {
        if self.tokens.write().remove(session_key).is_some() {
            debug!(session_key = %session_key, "Revoked CSRF token");
        }
    }

    /// Snapshot of the record for `session_key`.
    pub fn get(&self, session_key: &SessionKey) -> Option<CsrfTokenRecord> {
        self.tokens.read().get(session_key).cloned()
    }

    /// Number of stored records, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sweep for CsrfTokenStore {
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, record| !record.is_expired(now));
        before - tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn test_issued_token_validates() {
        let store = CsrfTokenStore::new(HOUR);
        let key = SessionKey::for_identity(7);

        let token = store.issue(&key);
        assert!(store.validate(&key, &token));
        // Tokens are reusable until expiry.
        assert!(store.validate(&key, &token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_expires_after_lifetime() {
        let store = CsrfTokenStore::new(HOUR);
        let key = SessionKey::from("user_7");
        let token = store.issue(&key);

        advance(HOUR).await;
        assert!(store.validate(&key, &token));

        advance(Duration::from_secs(1)).await;
        assert!(!store.validate(&key, &token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke() {
        let store = CsrfTokenStore::new(HOUR);
        let key = SessionKey::for_identity(1);
        let token = store.issue(&key);

        store.revoke(&key);
        assert!(!store.validate(&key, &token));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reissue_replaces_previous_token() {
        let store = CsrfTokenStore::new(HOUR);
        let key = SessionKey::for_identity(1);

        let first = store.issue(&key);
        let second = store.issue(&key);

        assert!(!store.validate(&key, &first));
        assert!(store.validate(&key, &second));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_other_strings_and_keys() {
        let store = CsrfTokenStore::new(HOUR);
        let key = SessionKey::for_identity(1);
        let token = store.issue(&key);

        assert!(!store.validate(&key, &token[..token.len() - 1]));
        assert!(!store.validate(&key, &format!("{}x", token)));
        assert!(!store.validate(&key, ""));
        assert!(!store.validate(&SessionKey::for_identity(2), &token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_distinguishes_missing_and_invalid() {
        let store = CsrfTokenStore::new(HOUR);
        let key = SessionKey::for_identity(1);
        let token = store.issue(&key);

        assert!(store.verify(&key, Some(&token)).is_ok());
        assert!(matches!(
            store.verify(&key, None),
            Err(TurnstileError::CsrfTokenMissing)
        ));
        assert!(matches!(
            store.verify(&key, Some("")),
            Err(TurnstileError::CsrfTokenMissing)
        ));
        assert!(matches!(
            store.verify(&key, Some("forged")),
            Err(TurnstileError::CsrfTokenInvalid)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired_tokens() {
        let store = CsrfTokenStore::new(HOUR);
        store.issue(&SessionKey::for_identity(1));
        advance(Duration::from_secs(1800)).await;
        let fresh = SessionKey::for_identity(2);
        let token = store.issue(&fresh);
        advance(Duration::from_secs(1801)).await;

        assert_eq!(store.sweep(), 1);
        assert!(store.get(&SessionKey::for_identity(1)).is_none());
        assert!(store.validate(&fresh, &token));
    }

    #[test]
    fn test_token_size_is_clamped() {
        let store = CsrfTokenStore::with_token_bytes(HOUR, 8);
        let token = store.issue(&SessionKey::from("anon"));
        assert_eq!(token.len(), 43);
    }
}
