//! HTTP surface for the admission engine.
//!
//! Two ways in: a standalone decision service ([`router`], served by
//! [`HttpServer`]) and a middleware ([`enforce`]) for services that want to
//! guard their own routes.

mod middleware;
mod server;
mod service;

pub use middleware::{enforce, TENANT_ID_HEADER, TENANT_TIER_HEADER};
pub use server::HttpServer;
pub use service::{
    apply_rate_limit_headers, rate_limited_response, router, AdmissionRequest, RateLimitErrorBody,
    X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
