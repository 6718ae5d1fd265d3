//! Admission decision HTTP service.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::ratelimit::{AdmissionEngine, Decision, Tier};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Body of a 429 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitErrorBody {
    pub error: String,
    pub message: String,
    pub retry_after: u64,
    pub reset_at: DateTime<Utc>,
}

/// Body of a 4xx response that is not a rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// A request for an admission decision.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub tier: Option<String>,
    pub endpoint: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndpointQuery {
    pub endpoint: Option<String>,
}

/// Set the `X-RateLimit-*` headers for `decision`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at.timestamp().max(0) as u64),
    );
}

/// The 429 response for a denied decision.
pub fn rate_limited_response(decision: &Decision) -> Response {
    let retry_after = decision.retry_after.unwrap_or(0);
    let body = RateLimitErrorBody {
        error: "rate_limit_exceeded".to_string(),
        message: format!("Rate limit exceeded. Retry in {} seconds.", retry_after),
        retry_after,
        reset_at: decision.reset_at,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
    apply_rate_limit_headers(headers, decision);
    response
}

fn bad_request(message: &str) -> Response {
    let body = ErrorBody {
        error: "invalid_request".to_string(),
        message: message.to_string(),
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// Build the decision service router.
pub fn router(engine: Arc<AdmissionEngine>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/admission", post(check_admission))
        .route("/v1/tenants/:tenant/status", get(tenant_status))
        .route("/v1/tenants/:tenant/limits", delete(reset_limits))
        .route("/v1/tenants/:tenant/analytics", get(tenant_analytics))
        .with_state(engine)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Decide whether a tenant's request may proceed.
#[instrument(
    skip(engine, request),
    fields(tenant = %request.tenant_id, endpoint = %request.endpoint)
)]
async fn check_admission(
    State(engine): State<Arc<AdmissionEngine>>,
    Json(request): Json<AdmissionRequest>,
) -> Response {
    if request.tenant_id.is_empty() {
        warn!("Received admission request with empty tenant id");
        return bad_request("tenantId is required");
    }

    let tier = request
        .tier
        .as_deref()
        .map(Tier::parse_or_default)
        .unwrap_or_default();

    let admission = engine.admit(&request.tenant_id, tier, &request.endpoint);

    debug!(
        allowed = admission.decision.allowed,
        policy = %admission.policy,
        "Admission decision made"
    );

    if !admission.decision.allowed {
        return rate_limited_response(&admission.decision);
    }

    let mut response = Json(&admission).into_response();
    apply_rate_limit_headers(response.headers_mut(), &admission.decision);
    response
}

async fn tenant_status(
    State(engine): State<Arc<AdmissionEngine>>,
    Path(tenant): Path<String>,
    Query(query): Query<EndpointQuery>,
) -> Response {
    match engine.get_rate_limit_status(&tenant, query.endpoint.as_deref()) {
        Some(status) => Json(status).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn reset_limits(
    State(engine): State<Arc<AdmissionEngine>>,
    Path(tenant): Path<String>,
    Query(query): Query<EndpointQuery>,
) -> StatusCode {
    engine.reset_rate_limit(&tenant, query.endpoint.as_deref());
    StatusCode::NO_CONTENT
}

async fn tenant_analytics(
    State(engine): State<Arc<AdmissionEngine>>,
    Path(tenant): Path<String>,
) -> Response {
    Json(engine.get_rate_limit_analytics(&tenant)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdmissionConfig;
    use crate::ratelimit::{Category, LimitPolicy, ManualClock, TierPolicyTable};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn engine() -> Arc<AdmissionEngine> {
        let config = AdmissionConfig {
            tiers: Some(TierPolicyTable::from_entries([(
                Tier::Basic,
                Category::Api,
                LimitPolicy::new(2, Duration::from_secs(60)),
            )])),
            ..AdmissionConfig::default()
        };
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        Arc::new(AdmissionEngine::with_clock(&config, clock).unwrap())
    }

    fn admission_request(body: &str) -> Request<Body> {
        Request::post("/v1/admission")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_admission_allowed_then_denied() {
        let app = router(engine());
        let body = r#"{"tenantId":"acme","tier":"basic","endpoint":"/api/users"}"#;

        let response = app.clone().oneshot(admission_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "2");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "1");
        assert_eq!(response.headers()[X_RATELIMIT_RESET], "1700000060");
        let json = body_json(response).await;
        assert_eq!(json["allowed"], true);
        assert_eq!(json["policy"]["kind"], "tier");

        app.clone().oneshot(admission_request(body)).await.unwrap();

        let response = app.oneshot(admission_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[axum::http::header::RETRY_AFTER], "300");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");
        let json = body_json(response).await;
        assert_eq!(json["error"], "rate_limit_exceeded");
        assert_eq!(json["retryAfter"], 300);
        assert!(json["resetAt"].is_string());
    }

    #[tokio::test]
    async fn test_empty_tenant_rejected() {
        let app = router(engine());
        let response = app
            .oneshot(admission_request(r#"{"tenantId":"","endpoint":"/api"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_reset_and_analytics() {
        let engine = engine();
        let app = router(engine.clone());
        engine.admit("acme", Tier::Basic, "/api/users");

        let response = app
            .clone()
            .oneshot(
                Request::get("/v1/tenants/acme/status?endpoint=/api/users")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["key"], "tier:acme:api");
        assert_eq!(json["count"], 1);

        let response = app
            .clone()
            .oneshot(
                Request::delete("/v1/tenants/acme/limits?endpoint=/api/users")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(
                Request::get("/v1/tenants/acme/status?endpoint=/api/users")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::get("/v1/tenants/acme/analytics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["totalRequests"], 1);
        assert_eq!(json["blockedRequests"], 0);
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = router(engine())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
