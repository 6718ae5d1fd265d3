//! Admission middleware for embedding in another service's router.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::trace;

use super::service::{apply_rate_limit_headers, rate_limited_response};
use crate::ratelimit::{AdmissionEngine, Tier};

/// Header carrying the tenant identifier.
pub const TENANT_ID_HEADER: &str = "x-tenant-id";
/// Header carrying the tenant's subscription tier.
pub const TENANT_TIER_HEADER: &str = "x-tenant-tier";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Admit or reject each request by tenant before it reaches the inner service.
///
/// Install with `axum::middleware::from_fn_with_state(engine, enforce)`.
/// Requests without an `X-Tenant-Id` header pass through untouched.
pub async fn enforce(
    State(engine): State<Arc<AdmissionEngine>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(tenant) = header_str(request.headers(), TENANT_ID_HEADER).map(str::to_owned) else {
        trace!(path = %request.uri().path(), "No tenant header, skipping admission");
        return next.run(request).await;
    };

    let tier = header_str(request.headers(), TENANT_TIER_HEADER)
        .map(Tier::parse_or_default)
        .unwrap_or_default();

    let admission = engine.admit(&tenant, tier, request.uri().path());
    if !admission.decision.allowed {
        return rate_limited_response(&admission.decision);
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &admission.decision);
    response
}
