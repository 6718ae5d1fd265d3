//! Quotagate - Per-Tenant Admission Control
//!
//! This crate decides, for every incoming unit of work, whether a tenant may
//! proceed. Decisions are driven by the tenant's subscription tier, the
//! category of the targeted endpoint, optional custom rules and recent
//! traffic history. All state is held in process memory.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
