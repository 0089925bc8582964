//! Configuration management for Turnstile.
//!
//! Configuration is assembled from defaults, an optional YAML file and
//! `TURNSTILE_*` environment variables, in that order of precedence.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};

/// Prefix for environment overrides, e.g. `TURNSTILE_SESSION__IDLE_TIMEOUT_MINUTES`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Minimum CSRF token size in bytes (256 bits).
pub const MIN_TOKEN_BYTES: usize = 32;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Feature switches
    #[serde(default)]
    pub features: FeatureFlags,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Session idle tracking
    #[serde(default)]
    pub session: SessionConfig,

    /// CSRF protection
    #[serde(default)]
    pub csrf: CsrfConfig,

    /// Response caching
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// Independent switches for each protection layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub rate_limiting: bool,
    #[serde(default = "default_true")]
    pub csrf: bool,
    #[serde(default = "default_true")]
    pub caching: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            rate_limiting: true,
            csrf: true,
            caching: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Limit and window for one limiter tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Maximum requests allowed per window
    pub max_requests: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

impl TierConfig {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Origin-keyed tier for authentication endpoints
    #[serde(default = "default_auth_tier")]
    pub auth: TierConfig,

    /// Origin-keyed tier for everything else
    #[serde(default = "default_api_tier")]
    pub api: TierConfig,

    /// Identity-keyed tier applied once the caller is authenticated
    #[serde(default = "default_identity_tier")]
    pub identity: TierConfig,

    /// Paths routed to the auth tier
    #[serde(default = "default_auth_paths")]
    pub auth_paths: Vec<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            auth: default_auth_tier(),
            api: default_api_tier(),
            identity: default_identity_tier(),
            auth_paths: default_auth_paths(),
        }
    }
}

fn default_auth_tier() -> TierConfig {
    TierConfig::new(10, 60)
}

fn default_api_tier() -> TierConfig {
    TierConfig::new(100, 60)
}

fn default_identity_tier() -> TierConfig {
    TierConfig::new(60, 60)
}

fn default_auth_paths() -> Vec<String> {
    vec![
        "/api/auth/login".to_string(),
        "/api/auth/register".to_string(),
        "/api/auth/refresh".to_string(),
    ]
}

/// Session idle tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity allowed before a session expires
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_minutes: u64,

    /// How often expired sessions are swept
    #[serde(default = "default_session_sweep")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: default_idle_timeout(),
            sweep_interval_secs: default_session_sweep(),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes * 60)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_session_sweep() -> u64 {
    60
}

/// CSRF protection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfConfig {
    /// Absolute token lifetime from issuance
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime_secs: u64,

    /// Random bytes per token before encoding
    #[serde(default = "default_token_bytes")]
    pub token_bytes: usize,

    /// How often expired tokens are swept
    #[serde(default = "default_csrf_sweep")]
    pub sweep_interval_secs: u64,

    /// Unsafe-verb paths that never require a token
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_lifetime_secs: default_token_lifetime(),
            token_bytes: default_token_bytes(),
            sweep_interval_secs: default_csrf_sweep(),
            exempt_paths: default_exempt_paths(),
        }
    }
}

impl CsrfConfig {
    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_token_lifetime() -> u64 {
    3600
}

fn default_token_bytes() -> usize {
    MIN_TOKEN_BYTES
}

fn default_csrf_sweep() -> u64 {
    300
}

fn default_exempt_paths() -> Vec<String> {
    vec![
        "/api/auth/login".to_string(),
        "/api/auth/refresh".to_string(),
        "/api/csrf-token".to_string(),
    ]
}

/// Which cache backend to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Connection URL when `backend` is `redis`
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Extra lifetime given to tag sets beyond the tagged entry's TTL
    #[serde(default = "default_tag_margin")]
    pub tag_margin_secs: u64,

    #[serde(default)]
    pub ttl: TtlTiers,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            redis_url: default_redis_url(),
            tag_margin_secs: default_tag_margin(),
            ttl: TtlTiers::default(),
        }
    }
}

impl CacheConfig {
    pub fn tag_margin(&self) -> Duration {
        Duration::from_secs(self.tag_margin_secs)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_tag_margin() -> u64 {
    3600
}

/// Named cache lifetimes used by call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlTiers {
    #[serde(default = "default_ttl_short")]
    pub short_secs: u64,
    #[serde(default = "default_ttl_medium")]
    pub medium_secs: u64,
    #[serde(default = "default_ttl_long")]
    pub long_secs: u64,
    #[serde(default = "default_ttl_day")]
    pub day_secs: u64,
}

impl Default for TtlTiers {
    fn default() -> Self {
        Self {
            short_secs: default_ttl_short(),
            medium_secs: default_ttl_medium(),
            long_secs: default_ttl_long(),
            day_secs: default_ttl_day(),
        }
    }
}

impl TtlTiers {
    pub fn short(&self) -> Duration {
        Duration::from_secs(self.short_secs)
    }

    pub fn medium(&self) -> Duration {
        Duration::from_secs(self.medium_secs)
    }

    pub fn long(&self) -> Duration {
        Duration::from_secs(self.long_secs)
    }

    pub fn day(&self) -> Duration {
        Duration::from_secs(self.day_secs)
    }
}

fn default_ttl_short() -> u64 {
    300
}

fn default_ttl_medium() -> u64 {
    1800
}

fn default_ttl_long() -> u64 {
    7200
}

fn default_ttl_day() -> u64 {
    86400
}

impl TurnstileConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration file");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load the effective configuration: optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let config = base.with_env_overrides(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("rate_limiting.auth_paths")
                .with_list_parse_key("csrf.exempt_paths"),
        )?;

        config.validate()?;
        Ok(config)
    }

    /// Layer an environment source over this configuration.
    fn with_env_overrides(self, env: config::Environment) -> Result<Self> {
        let layered = config::Config::builder()
            .add_source(config::Config::try_from(&self)?)
            .add_source(env)
            .build()?;

        Ok(layered.try_deserialize()?)
    }

    /// Reject values that would disable a protection by accident.
    pub fn validate(&self) -> Result<()> {
        let tiers = [
            ("auth", &self.rate_limiting.auth),
            ("api", &self.rate_limiting.api),
            ("identity", &self.rate_limiting.identity),
        ];
        for (name, tier) in tiers {
            if tier.max_requests == 0 || tier.window_secs == 0 {
                return Err(TurnstileError::Config(format!(
                    "rate_limiting.{} needs a non-zero max_requests and window_secs",
                    name
                )));
            }
        }

        if self.session.idle_timeout_minutes == 0 || self.session.sweep_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "session idle timeout and sweep interval must be non-zero".to_string(),
            ));
        }

        if self.csrf.token_bytes < MIN_TOKEN_BYTES {
            return Err(TurnstileError::Config(format!(
                "csrf.token_bytes must be at least {}",
                MIN_TOKEN_BYTES
            )));
        }

        if self.csrf.token_lifetime_secs == 0 || self.csrf.sweep_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "csrf token lifetime and sweep interval must be non-zero".to_string(),
            ));
        }

        let ttl = &self.cache.ttl;
        let ttls = [
            ("short", ttl.short_secs),
            ("medium", ttl.medium_secs),
            ("long", ttl.long_secs),
            ("day", ttl.day_secs),
        ];
        for (name, secs) in ttls {
            if secs == 0 {
                return Err(TurnstileError::Config(format!(
                    "cache.ttl.{}_secs must be non-zero",
                    name
                )));
            }
        }

        Ok(())
    }
}
