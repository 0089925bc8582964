//! Redis-compatible cache backend (Redis, Dragonfly, Valkey).

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, error};

use super::backend::{CacheBackend, CacheError};

/// Backend speaking the Redis protocol through a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisBackend {
    connection_manager: ConnectionManager,
}

impl RedisBackend {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`) and verify with PING.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(|e| {
            error!(error = %e, "Failed to create Redis client");
            unavailable("open", e)
        })?;

        let connection_manager = ConnectionManager::new(client).await.map_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            unavailable("connect", e)
        })?;

        let mut conn = connection_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| unavailable("PING", e))?;

        debug!(url = %url, "Connected to Redis cache backend");

        Ok(Self { connection_manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection_manager.clone()
    }
}

fn unavailable(command: &str, err: redis::RedisError) -> CacheError {
    CacheError::Unavailable(format!("Redis {} error: {}", command, err))
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<Vec<u8>>>(&mut self.conn())
            .await
            .map_err(|e| unavailable("GET", e))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async::<()>(&mut self.conn())
            .await
            .map_err(|e| unavailable("SET", e))
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        cmd.query_async::<u64>(&mut self.conn())
            .await
            .map_err(|e| unavailable("DEL", e))
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        redis::cmd("KEYS")
            .arg(pattern)
            .query_async::<Vec<String>>(&mut self.conn())
            .await
            .map_err(|e| unavailable("KEYS", e))
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), CacheError> {
        redis::cmd("SADD")
            .arg(set_key)
            .arg(member)
            .query_async::<i64>(&mut self.conn())
            .await
            .map(|_| ())
            .map_err(|e| unavailable("SADD", e))
    }

    async fn extend_expiry(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let ms = millis(ttl);
        let mut conn = self.conn();

        // NX covers keys without a TTL, which GT treats as never expiring.
        // Both flags need Redis 7 or Dragonfly.
        for flag in ["NX", "GT"] {
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(ms)
                .arg(flag)
                .query_async::<i64>(&mut conn)
                .await
                .map_err(|e| unavailable("PEXPIRE", e))?;
        }
        Ok(())
    }

    async fn members_of(&self, set_key: &str) -> Result<Vec<String>, CacheError> {
        redis::cmd("SMEMBERS")
            .arg(set_key)
            .query_async::<Vec<String>>(&mut self.conn())
            .await
            .map_err(|e| unavailable("SMEMBERS", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_never_zero() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2000);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = RedisBackend::connect("not-a-url").await;
        assert!(matches!(result, Err(CacheError::Unavailable(_))));
    }
}
