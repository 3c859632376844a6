//! Request handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error, warn};

use super::protocol::{ErrorResponse, ExecuteResponse, ProvidersResponse};
use super::GatewayState;
use crate::config::AuthMode;
use crate::error::Error;
use crate::orchestrator::Caller;
use crate::sandbox::ExecutionRequest;

const ANONYMOUS_USER: &str = "anonymous";

/// Maps library errors onto HTTP responses
#[derive(Debug)]
pub struct AppError(pub Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            Error::InvalidInput(message) => (StatusCode::BAD_REQUEST, ErrorResponse::new(message)),
            Error::SecurityBlocked { findings } => (
                StatusCode::FORBIDDEN,
                ErrorResponse::new("Execution blocked by security policy").with_warnings(findings),
            ),
            Error::Unauthorized(message) => (StatusCode::UNAUTHORIZED, ErrorResponse::new(message)),
            Error::RateLimit(message) => (StatusCode::TOO_MANY_REQUESTS, ErrorResponse::new(message)),
            other => {
                error!("Request failed: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

pub(super) async fn health_check() -> &'static str {
    "OK"
}

pub(super) async fn list_providers(State(state): State<GatewayState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse::new(state.orchestrator.provider_ids()))
}

pub(super) async fn execute(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, AppError> {
    let caller = authenticate(&state, &headers).await?;
    state.rate_limiter.check(&caller.user_id, caller.tier).await?;

    let Json(request) = body.map_err(|rejection| {
        debug!("Rejected request body: {}", rejection);
        Error::InvalidInput(rejection.body_text())
    })?;

    let result = state.orchestrator.execute(request, &caller).await?;
    Ok(Json(ExecuteResponse::from(result)))
}

async fn authenticate(state: &GatewayState, headers: &HeaderMap) -> Result<Caller, Error> {
    if state.auth_mode == AuthMode::None {
        return Ok(Caller::new(ANONYMOUS_USER, state.anonymous_tier));
    }

    let token = bearer_token(headers)
        .ok_or_else(|| Error::Unauthorized("Missing bearer token".to_string()))?;
    let Some(user_id) = state.identity.authenticate(token).await else {
        warn!("Rejected unknown API token");
        return Err(Error::Unauthorized("Invalid API token".to_string()));
    };
    let tier = state.tiers.tier_for(&user_id).await;

    Ok(Caller::new(user_id, tier))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryLedger;
    use crate::gateway::build_router;
    use crate::identity::{StaticIdentity, TokenEntry};
    use crate::limits::{RateLimitConfig, RateLimiter, ResourceLimitPolicy, Tier};
    use crate::orchestrator::ExecutionOrchestrator;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state_with(rate: RateLimitConfig) -> (GatewayState, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let orchestrator = Arc::new(ExecutionOrchestrator::new(
            ResourceLimitPolicy::default(),
            vec![],
            ledger.clone(),
        ));
        let identity = Arc::new(StaticIdentity::new(&[
            TokenEntry::new("tok-free", "alice", Tier::Free),
            TokenEntry::new("tok-pro", "bob", Tier::Pro),
        ]));
        let state = GatewayState::new(
            orchestrator,
            Arc::new(RateLimiter::new(rate)),
            identity.clone(),
            identity,
        );
        (state, ledger)
    }

    fn app() -> (Router, Arc<MemoryLedger>) {
        let (state, ledger) = state_with(RateLimitConfig::default());
        (build_router(state), ledger)
    }

    fn execute_request(token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/execute")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_providers_lists_fallback() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/v1/providers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: ProvidersResponse = json_body(response).await;
        assert!(body.providers.is_empty());
        assert_eq!(body.fallback, "simulated");
    }

    #[tokio::test]
    async fn test_execute_simulated() {
        let (app, ledger) = app();
        let response = app
            .oneshot(execute_request(
                Some("tok-free"),
                r#"{"code":"print(1+1)","language":"python"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: ExecuteResponse = json_body(response).await;
        assert!(body.success);
        assert_eq!(body.stdout, "2\n");
        assert_eq!(body.sandbox_region, "simulated");
        assert!(!body.truncated);
        assert!(!body.security_warnings.is_empty());
        assert_eq!(ledger.len().await, 1);
        assert_eq!(ledger.records().await[0].user_id, "alice");
    }

    #[tokio::test]
    async fn test_missing_or_unknown_token() {
        let (app, ledger) = app();
        let body = r#"{"code":"print(1)","language":"python"}"#;

        let response = app.clone().oneshot(execute_request(None, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(execute_request(Some("nope"), body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let error: ErrorResponse = json_body(response).await;
        assert_eq!(error.error, "Invalid API token");
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_blocked_request() {
        let (app, ledger) = app();
        let response = app
            .oneshot(execute_request(
                Some("tok-pro"),
                r#"{"code":"rm -rf /","language":"shell"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let error: ErrorResponse = json_body(response).await;
        assert!(!error.security_warnings.is_empty());
        assert!(error.security_warnings[0].starts_with("Critical"));
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (app, ledger) = app();

        let response = app
            .clone()
            .oneshot(execute_request(Some("tok-free"), r#"{"code":"print(1)","language":"cobol"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = json_body(response).await;
        assert!(error.error.contains("cobol"));

        let response = app
            .clone()
            .oneshot(execute_request(Some("tok-free"), r#"{"code":"   ","language":"python"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(execute_request(Some("tok-free"), "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let rate = RateLimitConfig {
            free: 1,
            ..RateLimitConfig::default()
        };
        let (state, _) = state_with(rate);
        let app = build_router(state);
        let body = r#"{"code":"print(1)","language":"python"}"#;

        let first = app.clone().oneshot(execute_request(Some("tok-free"), body)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app.clone().oneshot(execute_request(Some("tok-free"), body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let other_user = app.oneshot(execute_request(Some("tok-pro"), body)).await.unwrap();
        assert_eq!(other_user.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_disabled() {
        let (state, ledger) = state_with(RateLimitConfig::default());
        let app = build_router(state.without_auth(Tier::Pro));
        let response = app
            .oneshot(execute_request(None, r#"{"code":"echo hi","language":"bash"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record = &ledger.records().await[0];
        assert_eq!(record.user_id, "anonymous");
        assert_eq!(record.tier, Tier::Pro);
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "bearer  abc ".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_internal_errors_are_opaque() {
        let response = AppError(Error::Config("secret path /etc/x".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
