//! Secondary index from invalidation tags to cache keys.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::backend::{CacheBackend, CacheError};

/// Keys under this prefix are tag sets; application keys must not use it.
pub const TAG_PREFIX: &str = "tag:";

/// Tag sets stored in the backend itself under `tag:<name>`.
///
/// Invalidation is eager: dropping any tag deletes the key even if other
/// tags still reference it.
#[derive(Clone)]
pub struct CacheTagIndex {
    backend: Arc<dyn CacheBackend>,
    /// Tag sets outlive the entries they reference by this much
    margin: Duration,
}

impl CacheTagIndex {
    pub fn new(backend: Arc<dyn CacheBackend>, margin: Duration) -> Self {
        Self { backend, margin }
    }

    /// Backend key holding the members of `tag`.
    pub fn tag_key(tag: &str) -> String {
        format!("{}{}", TAG_PREFIX, tag)
    }

    /// Whether `key` lies in the namespace reserved for tag sets.
    pub fn is_reserved(key: &str) -> bool {
        key.starts_with(TAG_PREFIX)
    }

    /// Associate `key` with each of `tags` for at least `ttl`.
    ///
    /// A set's expiry is only ever pushed out, so a short-lived key joining
    /// a tag cannot cut the set short under a long-lived one.
    pub async fn tag(&self, key: &str, tags: &[&str], ttl: Duration) -> Result<(), CacheError> {
        let set_ttl = ttl + self.margin;
        for tag in tags {
            let tag_key = Self::tag_key(tag);
            self.backend.add_to_set(&tag_key, key).await?;
            self.backend.extend_expiry(&tag_key, set_ttl).await?;
        }
        Ok(())
    }

    /// Keys currently associated with `tag`.
    pub async fn keys_for(&self, tag: &str) -> Result<Vec<String>, CacheError> {
        self.backend.members_of(&Self::tag_key(tag)).await
    }

    /// Delete every key tagged with `tag`, then the tag set itself.
    ///
    /// Returns the number of cache entries removed. If the second delete
    /// fails the stale set is harmless and is cleared on the next pass.
    pub async fn invalidate_tag(&self, tag: &str) -> Result<u64, CacheError> {
        let keys = self.keys_for(tag).await?;
        let removed = self.backend.delete(&keys).await?;
        self.backend.delete(&[Self::tag_key(tag)]).await?;

        debug!(tag, tagged = keys.len(), removed, "Invalidated cache tag");
        Ok(removed)
    }
}
