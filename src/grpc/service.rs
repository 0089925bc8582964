//! Turnstile gRPC service implementation.

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::proto::turnstile::v1::{
    turnstile_server::Turnstile, AdmitRequest, AdmitResponse, BeginSessionRequest,
    BeginSessionResponse, EndSessionRequest, EndSessionResponse, InvalidateCacheRequest,
    InvalidateCacheResponse, IssueCsrfTokenRequest, IssueCsrfTokenResponse, RejectionCode,
};
use crate::csrf::SessionKey;
use crate::error::TurnstileError;
use crate::pipeline::{Pipeline, RequestContext};

/// Implementation of the `turnstile.v1.Turnstile` gRPC interface.
pub struct TurnstileService {
    pipeline: Arc<Pipeline>,
}

impl TurnstileService {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

fn rejection_code(err: &TurnstileError) -> RejectionCode {
    match err {
        TurnstileError::RateLimitExceeded { .. } => RejectionCode::RateLimitExceeded,
        TurnstileError::SessionExpired => RejectionCode::SessionExpired,
        TurnstileError::CsrfTokenMissing => RejectionCode::CsrfTokenMissing,
        TurnstileError::CsrfTokenInvalid => RejectionCode::CsrfTokenInvalid,
        _ => RejectionCode::Unspecified,
    }
}

fn to_proto_duration(d: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: d.as_secs() as i64,
        nanos: d.subsec_nanos() as i32,
    }
}

fn parse_method(method: &str) -> Result<Method, Status> {
    if method.is_empty() {
        return Err(Status::invalid_argument("method is required"));
    }
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| Status::invalid_argument("method is not a valid HTTP method"))
}

#[tonic::async_trait]
impl Turnstile for TurnstileService {
    /// Run the middleware checks for one request.
    ///
    /// Rejections are returned as a response with `allowed = false`, not as
    /// a gRPC error, so gateways can map codes onto their own status codes.
    #[instrument(
        skip(self, request),
        fields(
            method = %request.get_ref().method,
            path = %request.get_ref().path,
            origin = %request.get_ref().origin
        )
    )]
    async fn admit(
        &self,
        request: Request<AdmitRequest>,
    ) -> Result<Response<AdmitResponse>, Status> {
        let req = request.into_inner();

        let method = parse_method(&req.method)?;
        if req.path.is_empty() {
            warn!("Received admit request with empty path");
            return Err(Status::invalid_argument("path is required"));
        }
        if req.origin.is_empty() {
            warn!("Received admit request with empty origin");
            return Err(Status::invalid_argument("origin is required"));
        }

        let ctx = RequestContext {
            method,
            path: req.path,
            origin: req.origin,
            identity_id: req.identity_id,
            csrf_token: req.csrf_token,
            fingerprint: req.fingerprint,
        };

        let response = match self.pipeline.admit(&ctx) {
            Ok(admission) => AdmitResponse {
                allowed: true,
                code: RejectionCode::Unspecified.into(),
                message: String::new(),
                retry_after: None,
                session_key: admission.session_key.to_string(),
                limit_remaining: admission
                    .limit_remaining
                    .map(|r| r.min(u32::MAX as u64) as u32)
                    .unwrap_or(0),
            },
            Err(e) if e.is_rejection() => AdmitResponse {
                allowed: false,
                code: rejection_code(&e).into(),
                message: e.to_string(),
                retry_after: e.retry_after().map(to_proto_duration),
                session_key: ctx.session_key().to_string(),
                limit_remaining: 0,
            },
            Err(e) => return Err(Status::internal(e.to_string())),
        };

        debug!(allowed = response.allowed, code = ?response.code(), "Admission decision made");

        Ok(Response::new(response))
    }

    #[instrument(skip(self, request))]
    async fn issue_csrf_token(
        &self,
        request: Request<IssueCsrfTokenRequest>,
    ) -> Result<Response<IssueCsrfTokenResponse>, Status> {
        let req = request.into_inner();

        if req.identity_id.is_none() && req.origin.is_empty() {
            return Err(Status::invalid_argument(
                "origin is required for anonymous callers",
            ));
        }

        let session_key = SessionKey::derive(req.identity_id, &req.origin, &req.fingerprint);
        let token = self.pipeline.issue_csrf_token(&session_key);

        let lifetime = chrono::Duration::from_std(self.pipeline.csrf().lifetime())
            .map_err(|e| Status::internal(e.to_string()))?;
        let expires_at = (chrono::Utc::now() + lifetime).to_rfc3339();

        Ok(Response::new(IssueCsrfTokenResponse {
            token,
            session_key: session_key.to_string(),
            expires_at,
        }))
    }

    #[instrument(skip(self, request), fields(identity_id = request.get_ref().identity_id))]
    async fn begin_session(
        &self,
        request: Request<BeginSessionRequest>,
    ) -> Result<Response<BeginSessionResponse>, Status> {
        let identity_id = request.into_inner().identity_id;
        let session_key = self.pipeline.begin_session(identity_id);

        Ok(Response::new(BeginSessionResponse {
            session_key: session_key.to_string(),
        }))
    }

    #[instrument(skip(self, request), fields(identity_id = request.get_ref().identity_id))]
    async fn end_session(
        &self,
        request: Request<EndSessionRequest>,
    ) -> Result<Response<EndSessionResponse>, Status> {
        self.pipeline.end_session(request.into_inner().identity_id);
        Ok(Response::new(EndSessionResponse {}))
    }

    #[instrument(skip(self, request))]
    async fn invalidate_cache(
        &self,
        request: Request<InvalidateCacheRequest>,
    ) -> Result<Response<InvalidateCacheResponse>, Status> {
        let req = request.into_inner();
        let cache = self.pipeline.cache();

        let mut keys_removed = 0;
        for tag in &req.tags {
            keys_removed += cache.invalidate_tag(tag).await;
        }
        for key in &req.keys {
            keys_removed += cache.invalidate_key(key).await;
        }
        for pattern in &req.patterns {
            keys_removed += cache.invalidate_pattern(pattern).await;
        }

        info!(
            tags = req.tags.len(),
            keys = req.keys.len(),
            patterns = req.patterns.len(),
            keys_removed,
            "Cache invalidated"
        );

        Ok(Response::new(InvalidateCacheResponse { keys_removed }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{keys::tags, MemoryBackend};
    use crate::config::{TierConfig, TurnstileConfig};

    fn service_with(config: TurnstileConfig) -> TurnstileService {
        let pipeline = Pipeline::new(&config, Arc::new(MemoryBackend::new()));
        TurnstileService::new(Arc::new(pipeline))
    }

    fn service() -> TurnstileService {
        service_with(TurnstileConfig::default())
    }

    fn admit_request(method: &str, path: &str) -> AdmitRequest {
        AdmitRequest {
            method: method.to_string(),
            path: path.to_string(),
            origin: "10.0.0.1".to_string(),
            identity_id: None,
            csrf_token: None,
            fingerprint: "test-agent".to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_path_rejected() {
        let service = service();
        let result = service.admit(Request::new(admit_request("GET", ""))).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_empty_method_rejected() {
        let service = service();
        let result = service.admit(Request::new(admit_request("", "/api/menu"))).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_safe_request_allowed() {
        let service = service();
        let response = service
            .admit(Request::new(admit_request("get", "/api/menu")))
            .await
            .unwrap()
            .into_inner();

        assert!(response.allowed);
        assert_eq!(response.code(), RejectionCode::Unspecified);
        assert_eq!(response.limit_remaining, 99);
        assert!(response.session_key.starts_with("anon_"));
    }

    #[tokio::test]
    async fn test_rate_limit_rejection_carries_retry_after() {
        let mut config = TurnstileConfig::default();
        config.rate_limiting.api = TierConfig::new(1, 60);
        let service = service_with(config);

        service
            .admit(Request::new(admit_request("GET", "/api/menu")))
            .await
            .unwrap();
        let response = service
            .admit(Request::new(admit_request("GET", "/api/menu")))
            .await
            .unwrap()
            .into_inner();

        assert!(!response.allowed);
        assert_eq!(response.code(), RejectionCode::RateLimitExceeded);
        let retry_after = response.retry_after.unwrap();
        assert!(retry_after.seconds > 0 && retry_after.seconds <= 60);
    }

    #[tokio::test]
    async fn test_csrf_fetch_then_submit() {
        let service = service();

        let rejected = service
            .admit(Request::new(admit_request("POST", "/api/orders")))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(rejected.code(), RejectionCode::CsrfTokenMissing);

        let issued = service
            .issue_csrf_token(Request::new(IssueCsrfTokenRequest {
                origin: "10.0.0.1".to_string(),
                identity_id: None,
                fingerprint: "test-agent".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(issued.session_key, rejected.session_key);
        assert!(chrono::DateTime::parse_from_rfc3339(&issued.expires_at).is_ok());

        let mut request = admit_request("POST", "/api/orders");
        request.csrf_token = Some(issued.token);
        let response = service.admit(Request::new(request)).await.unwrap().into_inner();
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let service = service();
        let mut request = admit_request("GET", "/api/orders");
        request.identity_id = Some(5);

        let response = service
            .admit(Request::new(request.clone()))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.code(), RejectionCode::SessionExpired);

        let begun = service
            .begin_session(Request::new(BeginSessionRequest { identity_id: 5 }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(begun.session_key, "user_5");

        let response = service
            .admit(Request::new(request.clone()))
            .await
            .unwrap()
            .into_inner();
        assert!(response.allowed);

        service
            .end_session(Request::new(EndSessionRequest { identity_id: 5 }))
            .await
            .unwrap();
        let response = service.admit(Request::new(request)).await.unwrap().into_inner();
        assert_eq!(response.code(), RejectionCode::SessionExpired);
    }

    #[tokio::test]
    async fn test_invalidate_cache() {
        let service = service();
        let cache = service.pipeline.cache();
        let ttl = Duration::from_secs(300);
        cache.set_with_tags("menu:1", &1, &[tags::MENU], ttl).await;
        cache.set_with_tags("recipe:1", &2, &[], ttl).await;
        cache.set_with_tags("report:a", &3, &[], ttl).await;

        let response = service
            .invalidate_cache(Request::new(InvalidateCacheRequest {
                tags: vec![tags::MENU.to_string()],
                keys: vec!["recipe:1".to_string()],
                patterns: vec!["report:*".to_string()],
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.keys_removed, 3);
        assert_eq!(cache.get::<i32>("menu:1").await, None);
    }
}
