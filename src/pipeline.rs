//! Middleware pipeline composing the request governance managers.
//!
//! Checks run in a fixed order and the first rejection short-circuits:
//! origin rate limit, identity rate limit, session idle check (then touch),
//! and CSRF validation for unsafe verbs.

use std::sync::Arc;

use futures::future::join_all;
use http::Method;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheBackend, CacheService, MemoryBackend, RedisBackend};
use crate::config::{CacheBackendKind, FeatureFlags, TurnstileConfig};
use crate::csrf::{CsrfPolicy, CsrfTokenStore, SessionKey};
use crate::error::Result;
use crate::ratelimit::{IdentityRateLimiter, RateLimiter};
use crate::session::SessionRegistry;
use crate::sweep::Sweeper;

/// What the pipeline needs to know about one inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    /// Network origin, usually the client IP
    pub origin: String,
    /// Set once credentials have been verified upstream
    pub identity_id: Option<i64>,
    /// Value of the CSRF request header
    pub csrf_token: Option<String>,
    /// Client-supplied identifying header for anonymous session keys
    pub fingerprint: String,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            origin: origin.into(),
            identity_id: None,
            csrf_token: None,
            fingerprint: String::new(),
        }
    }

    pub fn with_identity(mut self, identity_id: i64) -> Self {
        self.identity_id = Some(identity_id);
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    /// Session key the CSRF store uses for this caller.
    pub fn session_key(&self) -> SessionKey {
        SessionKey::derive(self.identity_id, &self.origin, &self.fingerprint)
    }
}

/// A request that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub session_key: SessionKey,
    /// Remaining quota in the strictest limiter consulted
    pub limit_remaining: Option<u64>,
}

/// One instance per process, built at startup and shared by `Arc`.
pub struct Pipeline {
    features: FeatureFlags,
    auth_paths: Vec<String>,
    auth_limiter: Arc<RateLimiter>,
    api_limiter: Arc<RateLimiter>,
    identity_limiter: Arc<IdentityRateLimiter>,
    sessions: Arc<SessionRegistry>,
    csrf: Arc<CsrfTokenStore>,
    csrf_policy: CsrfPolicy,
    cache: CacheService,
    sweepers: Mutex<Vec<Sweeper>>,
}

impl Pipeline {
    /// Build the managers without starting background sweeps.
    pub fn new(config: &TurnstileConfig, backend: Arc<dyn CacheBackend>) -> Self {
        let limits = &config.rate_limiting;

        Self {
            features: config.features.clone(),
            auth_paths: limits.auth_paths.clone(),
            auth_limiter: Arc::new(RateLimiter::from_tier(&limits.auth)),
            api_limiter: Arc::new(RateLimiter::from_tier(&limits.api)),
            identity_limiter: Arc::new(IdentityRateLimiter::from_tier(&limits.identity)),
            sessions: Arc::new(SessionRegistry::new(config.session.idle_timeout())),
            csrf: Arc::new(CsrfTokenStore::from_config(&config.csrf)),
            csrf_policy: CsrfPolicy::new(config.csrf.exempt_paths.clone()),
            cache: CacheService::new(backend, &config.cache, config.features.caching),
            sweepers: Mutex::new(Vec::new()),
        }
    }

    /// Connect the cache backend, build the managers and start their sweeps.
    ///
    /// An unreachable Redis backend degrades to the in-process cache.
    pub async fn start(config: &TurnstileConfig) -> Result<Arc<Self>> {
        let memory = Arc::new(MemoryBackend::new());

        let backend: Arc<dyn CacheBackend> =
            match (config.features.caching, config.cache.backend) {
                (true, CacheBackendKind::Redis) => {
                    match RedisBackend::connect(&config.cache.redis_url).await {
                        Ok(redis) => Arc::new(redis),
                        Err(e) => {
                            warn!(error = %e, "Redis unavailable, falling back to in-process cache");
                            memory.clone()
                        }
                    }
                }
                _ => memory.clone(),
            };

        let pipeline = Arc::new(Self::new(config, backend));

        {
            let mut sweepers = pipeline.sweepers.lock();
            sweepers.push(Sweeper::spawn(
                "auth_rate_limit",
                pipeline.auth_limiter.clone(),
                pipeline.auth_limiter.window(),
            ));
            sweepers.push(Sweeper::spawn(
                "api_rate_limit",
                pipeline.api_limiter.clone(),
                pipeline.api_limiter.window(),
            ));
            sweepers.push(Sweeper::spawn(
                "identity_rate_limit",
                pipeline.identity_limiter.clone(),
                pipeline.identity_limiter.window(),
            ));
            sweepers.push(Sweeper::spawn(
                "sessions",
                pipeline.sessions.clone(),
                config.session.sweep_interval(),
            ));
            sweepers.push(Sweeper::spawn(
                "csrf_tokens",
                pipeline.csrf.clone(),
                config.csrf.sweep_interval(),
            ));
            sweepers.push(Sweeper::spawn("memory_cache", memory, config.cache.ttl.short()));
        }

        info!(
            rate_limiting = config.features.rate_limiting,
            csrf = config.features.csrf,
            caching = config.features.caching,
            "Request pipeline started"
        );

        Ok(pipeline)
    }

    /// Stop every background sweep and wait for them to finish.
    pub async fn shutdown(&self) {
        let sweepers: Vec<Sweeper> = std::mem::take(&mut *self.sweepers.lock());
        let count = sweepers.len();
        join_all(sweepers.into_iter().map(Sweeper::shutdown)).await;
        info!(sweepers = count, "Request pipeline stopped");
    }

    fn is_auth_path(&self, path: &str) -> bool {
        self.auth_paths.iter().any(|p| p == path)
    }

    /// Run every check for `ctx` in order.
    pub fn admit(&self, ctx: &RequestContext) -> Result<Admission> {
        let result = self.run_checks(ctx);
        if let Err(ref e) = result {
            debug!(
                method = %ctx.method,
                path = %ctx.path,
                origin = %ctx.origin,
                identity_id = ?ctx.identity_id,
                code = e.code().unwrap_or("INTERNAL"),
                "Request rejected"
            );
        }
        result
    }

    fn run_checks(&self, ctx: &RequestContext) -> Result<Admission> {
        let mut limit_remaining = None;

        if self.features.rate_limiting {
            let tier = if self.is_auth_path(&ctx.path) {
                &self.auth_limiter
            } else {
                &self.api_limiter
            };
            let decision = tier.check(&ctx.origin).into_result()?;
            limit_remaining = Some(decision.remaining);
        }

        if let Some(identity_id) = ctx.identity_id {
            if self.features.rate_limiting {
                let decision = self.identity_limiter.check(identity_id).into_result()?;
                limit_remaining = limit_remaining
                    .map(|r: u64| r.min(decision.remaining))
                    .or(Some(decision.remaining));
            }

            self.sessions.check_and_touch(identity_id)?;
        }

        let session_key = ctx.session_key();

        if self.features.csrf && self.csrf_policy.requires_token(&ctx.method, &ctx.path) {
            self.csrf.verify(&session_key, ctx.csrf_token.as_deref())?;
        }

        Ok(Admission {
            session_key,
            limit_remaining,
        })
    }

    /// Establish the session for a freshly authenticated identity.
    pub fn begin_session(&self, identity_id: i64) -> SessionKey {
        self.sessions.begin(identity_id);
        SessionKey::for_identity(identity_id)
    }

    /// Drop the session and CSRF token of `identity_id`.
    pub fn end_session(&self, identity_id: i64) {
        self.sessions.invalidate(identity_id);
        self.csrf.revoke(&SessionKey::for_identity(identity_id));
    }

    /// Issue a CSRF token for `session_key`.
    pub fn issue_csrf_token(&self, session_key: &SessionKey) -> String {
        self.csrf.issue(session_key)
    }

    pub fn features(&self) -> &FeatureFlags {
        &self.features
    }

    pub fn auth_limiter(&self) -> &RateLimiter {
        &self.auth_limiter
    }

    pub fn api_limiter(&self) -> &RateLimiter {
        &self.api_limiter
    }

    pub fn identity_limiter(&self) -> &IdentityRateLimiter {
        &self.identity_limiter
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn csrf(&self) -> &CsrfTokenStore {
        &self.csrf
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierConfig;
    use crate::error::TurnstileError;
    use std::time::Duration;
    use tokio::time::advance;

    fn pipeline(config: &TurnstileConfig) -> Pipeline {
        Pipeline::new(config, Arc::new(MemoryBackend::new()))
    }

    fn strict_config() -> TurnstileConfig {
        let mut config = TurnstileConfig::default();
        config.rate_limiting.auth = TierConfig::new(2, 60);
        config.rate_limiting.api = TierConfig::new(5, 60);
        config.rate_limiting.identity = TierConfig::new(3, 60);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_anonymous_get_is_admitted() {
        let pipeline = pipeline(&strict_config());
        let ctx = RequestContext::new(Method::GET, "/api/menu", "10.0.0.1").with_fingerprint("ua");

        let admission = pipeline.admit(&ctx).unwrap();
        assert_eq!(admission.session_key, SessionKey::anonymous("10.0.0.1", "ua"));
        assert_eq!(admission.limit_remaining, Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_paths_use_strict_tier() {
        let pipeline = pipeline(&strict_config());
        let login = RequestContext::new(Method::POST, "/api/auth/login", "10.0.0.1");

        assert!(pipeline.admit(&login).is_ok());
        assert!(pipeline.admit(&login).is_ok());
        let err = pipeline.admit(&login).unwrap_err();
        assert_eq!(err.code(), Some("RATE_LIMIT_EXCEEDED"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));

        // The general tier is tracked separately.
        let menu = RequestContext::new(Method::GET, "/api/menu", "10.0.0.1");
        assert!(pipeline.admit(&menu).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_authenticated_request_requires_session() {
        let pipeline = pipeline(&strict_config());
        let ctx = RequestContext::new(Method::GET, "/api/orders", "10.0.0.1").with_identity(7);

        assert!(matches!(
            pipeline.admit(&ctx),
            Err(TurnstileError::SessionExpired)
        ));

        let key = pipeline.begin_session(7);
        assert_eq!(key.as_str(), "user_7");
        let admission = pipeline.admit(&ctx).unwrap();
        assert_eq!(admission.session_key, key);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_is_not_resurrected() {
        let pipeline = pipeline(&TurnstileConfig::default());
        pipeline.begin_session(7);
        let ctx = RequestContext::new(Method::GET, "/api/orders", "10.0.0.1").with_identity(7);

        advance(Duration::from_secs(31 * 60)).await;
        assert!(matches!(
            pipeline.admit(&ctx),
            Err(TurnstileError::SessionExpired)
        ));
        assert!(!pipeline.sessions().is_valid(7));
        assert!(pipeline.admit(&ctx).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_limit_applies_across_origins() {
        let pipeline = pipeline(&strict_config());
        pipeline.begin_session(9);

        for origin in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            let ctx = RequestContext::new(Method::GET, "/api/orders", origin).with_identity(9);
            assert!(pipeline.admit(&ctx).is_ok());
        }

        let ctx = RequestContext::new(Method::GET, "/api/orders", "10.0.0.4").with_identity(9);
        assert!(matches!(
            pipeline.admit(&ctx),
            Err(TurnstileError::RateLimitExceeded { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsafe_request_needs_csrf_token() {
        let pipeline = pipeline(&TurnstileConfig::default());
        let key = pipeline.begin_session(7);
        let base = RequestContext::new(Method::POST, "/api/orders", "10.0.0.1").with_identity(7);

        assert!(matches!(
            pipeline.admit(&base),
            Err(TurnstileError::CsrfTokenMissing)
        ));
        assert!(matches!(
            pipeline.admit(&base.clone().with_csrf_token("forged")),
            Err(TurnstileError::CsrfTokenInvalid)
        ));

        let token = pipeline.issue_csrf_token(&key);
        assert!(pipeline.admit(&base.clone().with_csrf_token(token.clone())).is_ok());

        pipeline.end_session(7);
        pipeline.begin_session(7);
        assert!(matches!(
            pipeline.admit(&base.with_csrf_token(token)),
            Err(TurnstileError::CsrfTokenInvalid)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exempt_bootstrap_paths() {
        let pipeline = pipeline(&TurnstileConfig::default());
        let ctx = RequestContext::new(Method::POST, "/api/auth/refresh", "10.0.0.1");
        assert!(pipeline.admit(&ctx).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_features_skip_checks() {
        let mut config = strict_config();
        config.features.rate_limiting = false;
        config.features.csrf = false;
        let pipeline = pipeline(&config);

        let ctx = RequestContext::new(Method::DELETE, "/api/auth/login", "10.0.0.1");
        for _ in 0..10 {
            let admission = pipeline.admit(&ctx).unwrap();
            assert_eq!(admission.limit_remaining, None);
        }
        assert_eq!(pipeline.auth_limiter().counter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let pipeline = Pipeline::start(&TurnstileConfig::default()).await.unwrap();
        pipeline.begin_session(1);
        assert!(pipeline.cache().is_enabled());

        advance(Duration::from_secs(40 * 60)).await;
        // Let the session sweeper observe the advanced clock.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(pipeline.sessions().active_count(), 0);

        pipeline.shutdown().await;
    }
}
