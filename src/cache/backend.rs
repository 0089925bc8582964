//! Cache backend protocol.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a cache backend.
///
/// A missing key is not an error; `get` returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not be reached or rejected the command
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    /// A key holds a value of the wrong kind for the command
    #[error("Wrong value type at key {key}")]
    WrongType { key: String },

    /// Values could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The primitives the tag index and cache service rely on.
///
/// Any key/value store with sets and per-key expiry can implement this.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read the value at `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Write `value` at `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Delete `keys` and return how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// List keys matching a glob `pattern` (`*` and `?`).
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Add `member` to the set at `set_key`, creating it if needed.
    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), CacheError>;

    /// Make an existing `key` live at least `ttl` from now.
    ///
    /// A key without an expiry gets one; an expiry already further out is
    /// kept. Never shortens a key's lifetime.
    async fn extend_expiry(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Members of the set at `set_key`, empty if absent.
    async fn members_of(&self, set_key: &str) -> Result<Vec<String>, CacheError>;
}
