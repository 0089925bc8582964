//! Domain-level cache service.
//!
//! Caching is an optimization only: every backend failure is logged and
//! turned into a miss or a no-op, never into a request failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::backend::{CacheBackend, CacheError};
use super::keys::tags;
use super::tags::CacheTagIndex;
use crate::config::{CacheConfig, TtlTiers};

/// Read-through and write-through helpers with tag invalidation.
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    index: CacheTagIndex,
    ttl: TtlTiers,
    enabled: bool,
}

impl CacheService {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig, enabled: bool) -> Self {
        Self {
            index: CacheTagIndex::new(backend.clone(), config.tag_margin()),
            backend,
            ttl: config.ttl,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Named lifetimes for call sites.
    pub fn ttl(&self) -> &TtlTiers {
        &self.ttl
    }

    pub fn tag_index(&self) -> &CacheTagIndex {
        &self.index
    }

    /// Read and decode `key`; `None` on miss, on backend failure or when disabled.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let bytes = match self.backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                trace!(key, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                trace!(key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "Cached value could not be decoded, treating as miss");
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl` and associate it with `tags`.
    ///
    /// Keys under the `tag:` prefix are refused. If tagging fails the value
    /// is removed again so it cannot outlive an invalidation.
    pub async fn set_with_tags<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        tags: &[&str],
        ttl: Duration,
    ) {
        if !self.enabled {
            return;
        }

        if CacheTagIndex::is_reserved(key) {
            warn!(key, "Refusing to cache under the reserved tag prefix");
            return;
        }

        if let Err(e) = self.try_set_with_tags(key, value, tags, ttl).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    async fn try_set_with_tags<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        tags: &[&str],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.set(key, bytes, ttl).await?;

        if let Err(e) = self.index.tag(key, tags, ttl).await {
            if let Err(cleanup) = self.backend.delete(&[key.to_string()]).await {
                warn!(key, error = %cleanup, "Could not remove untagged cache entry");
            }
            return Err(e);
        }

        debug!(key, ?tags, ttl_secs = ttl.as_secs(), "Cached value");
        Ok(())
    }

    /// Return the cached value or compute, cache and return a fresh one.
    ///
    /// Errors from `compute` are returned unchanged and nothing is cached.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        tags: &[&str],
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(key).await {
            return Ok(cached);
        }

        let value = compute().await?;
        self.set_with_tags(key, &value, tags, ttl).await;
        Ok(value)
    }

    /// Drop every entry tagged with `tag`. Returns entries removed.
    pub async fn invalidate_tag(&self, tag: &str) -> u64 {
        if !self.enabled {
            return 0;
        }

        match self.index.invalidate_tag(tag).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(tag, error = %e, "Cache tag invalidation failed");
                0
            }
        }
    }

    pub async fn invalidate_tags(&self, tags: &[&str]) -> u64 {
        let mut removed = 0;
        for tag in tags {
            removed += self.invalidate_tag(tag).await;
        }
        removed
    }

    /// Drop a single entry. Tag sets still naming it are left to expire.
    pub async fn invalidate_key(&self, key: &str) -> u64 {
        if !self.enabled {
            return 0;
        }

        match self.backend.delete(&[key.to_string()]).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key, error = %e, "Cache key invalidation failed");
                0
            }
        }
    }

    /// Drop every entry whose key matches a glob `pattern`.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        if !self.enabled {
            return 0;
        }

        let result = async {
            let keys = self.backend.keys_matching(pattern).await?;
            self.backend.delete(&keys).await
        }
        .await;

        match result {
            Ok(removed) => {
                debug!(pattern, removed, "Invalidated cache pattern");
                removed
            }
            Err(e) => {
                warn!(pattern, error = %e, "Cache pattern invalidation failed");
                0
            }
        }
    }

    /// Menu or recipe change.
    pub async fn invalidate_menu(&self) -> u64 {
        self.invalidate_tags(&[tags::MENU, tags::RECIPES, tags::DASHBOARD])
            .await
    }

    /// Stock level change.
    pub async fn invalidate_inventory(&self) -> u64 {
        self.invalidate_tags(&[tags::INVENTORY, tags::DASHBOARD]).await
    }

    /// Order, payment or cost change.
    pub async fn invalidate_financial(&self) -> u64 {
        self.invalidate_tags(&[tags::FINANCIAL, tags::REPORTS, tags::DASHBOARD])
            .await
    }

    pub async fn invalidate_dashboard(&self) -> u64 {
        self.invalidate_tag(tags::DASHBOARD).await
    }
}
