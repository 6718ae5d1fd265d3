//! Tenant admission engine.
//!
//! Ties the enforcer, policy table, custom rules, burst guard and analytics
//! together. Callers present `(tenant, tier, endpoint)` and get back a
//! [`Decision`]; the engine never touches anything outside process memory.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::analytics::{AnalyticsTracker, RateLimitAnalytics};
use super::clock::{Clock, SystemClock};
use super::key::QuotaKey;
use super::limiter::{CounterStatus, Decision, RateLimiter};
use super::policy::{Category, Tier, TierPolicyTable};
use super::rules::{CustomRule, CustomRuleSet};
use super::store::{CounterStore, InMemoryCounterStore};
use crate::config::{AdmissionConfig, BurstConfig};
use crate::error::Result;

/// Which policy produced a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PolicySource {
    /// The tier policy table
    Tier { tier: Tier, category: Category },
    /// A named custom rule
    Rule { name: String },
    /// The burst guard or a block it left on the tenant
    Burst,
}

impl std::fmt::Display for PolicySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicySource::Tier { tier, category } => write!(f, "tier:{}:{}", tier, category),
            PolicySource::Rule { name } => write!(f, "rule:{}", name),
            PolicySource::Burst => f.write_str("burst"),
        }
    }
}

/// A decision together with the policy that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    #[serde(flatten)]
    pub decision: Decision,
    pub policy: PolicySource,
}

/// Counts from one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Counter entries evicted
    pub counters: usize,
    /// Analytics records evicted
    pub tenants: usize,
}

/// The admission engine.
///
/// Thread-safe; construct once at startup and share behind an `Arc`.
pub struct AdmissionEngine<S = InMemoryCounterStore> {
    limiter: RateLimiter<S>,
    policies: TierPolicyTable,
    rules: CustomRuleSet,
    analytics: AnalyticsTracker,
    block_duration: Duration,
    burst: BurstConfig,
}

impl AdmissionEngine<InMemoryCounterStore> {
    /// Build an engine from configuration using the wall clock and an in-memory store.
    pub fn from_config(config: &AdmissionConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build an engine from configuration with an injected clock.
    pub fn with_clock(config: &AdmissionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_store(config, InMemoryCounterStore::new(), clock)
    }
}

impl<S: CounterStore> AdmissionEngine<S> {
    /// Build an engine over an existing counter store.
    pub fn with_store(config: &AdmissionConfig, store: S, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let rules = CustomRuleSet::compile(&config.custom_rules)?;
        let policies = config.tiers.clone().unwrap_or_default();

        Ok(Self {
            limiter: RateLimiter::with_store(store, clock.clone()),
            policies,
            rules,
            analytics: AnalyticsTracker::new(clock),
            block_duration: config.block_duration(),
            burst: config.burst,
        })
    }

    pub fn limiter(&self) -> &RateLimiter<S> {
        &self.limiter
    }

    pub fn policies(&self) -> &TierPolicyTable {
        &self.policies
    }

    /// Run the full admission pipeline for one request and record the outcome.
    ///
    /// Burst pre-check first, then the first matching custom rule, then the
    /// tenant's tier policy.
    pub fn admit(&self, tenant: &str, tier: Tier, endpoint: &str) -> Admission {
        let admission = self.decide(tenant, tier, endpoint);

        self.analytics.track_request(tenant, admission.decision.allowed);

        if admission.decision.allowed {
            trace!(tenant = %tenant, endpoint = %endpoint, policy = %admission.policy, "Request admitted");
        } else {
            debug!(
                tenant = %tenant,
                endpoint = %endpoint,
                policy = %admission.policy,
                retry_after = ?admission.decision.retry_after,
                "Request denied"
            );
        }

        admission
    }

    fn decide(&self, tenant: &str, tier: Tier, endpoint: &str) -> Admission {
        if self.burst.enabled
            && !self.check_burst_protection(tenant, self.burst.max_requests, self.burst.window())
        {
            let now = self.limiter.now();
            let until = self
                .limiter
                .active_block(&QuotaKey::tenant(tenant).to_string_key())
                .unwrap_or(now);
            return Admission {
                decision: Decision::denied(self.burst.max_requests, until, now),
                policy: PolicySource::Burst,
            };
        }

        if let Some(rule) = self.rules.find(endpoint) {
            return Admission {
                decision: self.check_rule(tenant, rule),
                policy: PolicySource::Rule {
                    name: rule.name.clone(),
                },
            };
        }

        Admission {
            decision: self.check_tenant_rate_limit(tenant, tier, endpoint),
            policy: PolicySource::Tier {
                tier,
                category: Category::classify(endpoint),
            },
        }
    }

    /// Deny with the tenant-wide block, if one is active.
    fn tenant_block(&self, tenant: &str, limit: u64) -> Option<Decision> {
        let until = self
            .limiter
            .active_block(&QuotaKey::tenant(tenant).to_string_key())?;
        Some(Decision::denied(limit, until, self.limiter.now()))
    }

    /// Check `endpoint` against the tenant's tier quota for its category.
    ///
    /// Exceeding the quota always places the category under the configured
    /// cool-down block. A tenant-wide block left by the burst guard denies
    /// regardless of the category's own count.
    pub fn check_tenant_rate_limit(&self, tenant: &str, tier: Tier, endpoint: &str) -> Decision {
        let category = Category::classify(endpoint);
        let policy = self.policies.lookup(tier, category);

        if let Some(denied) = self.tenant_block(tenant, policy.max_requests) {
            return denied;
        }

        let key = QuotaKey::tier(tenant, category).to_string_key();
        self.limiter.check_rate_limit(
            &key,
            policy.max_requests,
            policy.window,
            Some(self.block_duration),
        )
    }

    /// Check `endpoint` against the first matching custom rule.
    ///
    /// Returns `None` when no rule matches; the caller then falls back to
    /// [`check_tenant_rate_limit`](Self::check_tenant_rate_limit). Rule
    /// violations only wait out the window; they never block.
    pub fn check_custom_rate_limit(&self, tenant: &str, endpoint: &str) -> Option<Decision> {
        self.rules
            .find(endpoint)
            .map(|rule| self.check_rule(tenant, rule))
    }

    fn check_rule(&self, tenant: &str, rule: &CustomRule) -> Decision {
        if let Some(denied) = self.tenant_block(tenant, rule.policy.max_requests) {
            return denied;
        }

        let key = QuotaKey::rule(tenant, &rule.name).to_string_key();
        self.limiter
            .check_rate_limit(&key, rule.policy.max_requests, rule.policy.window, None)
    }

    /// Sub-second burst detection. Returns `true` when the request may proceed.
    ///
    /// When more than `max_burst_requests` arrive inside `burst_window`, the
    /// tenant-wide entry is blocked for the configured escalation period,
    /// which denies every category and rule for that tenant.
    pub fn check_burst_protection(
        &self,
        tenant: &str,
        max_burst_requests: u64,
        burst_window: Duration,
    ) -> bool {
        let key = QuotaKey::burst(tenant).to_string_key();
        let decision = self
            .limiter
            .check_rate_limit(&key, max_burst_requests, burst_window, None);

        if decision.allowed {
            return true;
        }

        let until = self
            .limiter
            .block(&QuotaKey::tenant(tenant).to_string_key(), self.burst.block_duration());
        warn!(
            tenant = %tenant,
            limit = max_burst_requests,
            blocked_until = %until,
            "Burst limit exceeded, blocking tenant"
        );
        false
    }

    /// Record a decision made outside [`admit`](Self::admit).
    pub fn track_request(&self, tenant: &str, allowed: bool) {
        self.analytics.track_request(tenant, allowed);
    }

    /// Traffic summary for `tenant` over the trailing hour.
    pub fn get_rate_limit_analytics(&self, tenant: &str) -> RateLimitAnalytics {
        self.analytics.get_rate_limit_analytics(tenant)
    }

    /// The counter key a request for `endpoint` would use.
    ///
    /// Without an endpoint this is the tenant-wide key.
    pub fn key_for(&self, tenant: &str, endpoint: Option<&str>) -> QuotaKey {
        match endpoint {
            None => QuotaKey::tenant(tenant),
            Some(endpoint) => match self.rules.find(endpoint) {
                Some(rule) => QuotaKey::rule(tenant, &rule.name),
                None => QuotaKey::tier(tenant, Category::classify(endpoint)),
            },
        }
    }

    /// Clear one counter. Returns whether an entry existed.
    pub fn reset_rate_limit(&self, tenant: &str, endpoint: Option<&str>) -> bool {
        let key = self.key_for(tenant, endpoint);
        let existed = self.limiter.reset(&key.to_string_key());
        debug!(key = %key, existed = existed, "Rate limit reset");
        existed
    }

    /// Current state of one counter, without counting a request.
    pub fn get_rate_limit_status(&self, tenant: &str, endpoint: Option<&str>) -> Option<CounterStatus> {
        self.limiter
            .status(&self.key_for(tenant, endpoint).to_string_key())
    }

    /// Evict expired, unblocked counters and idle analytics records.
    ///
    /// Maintenance only; the sweeper calls this on its own schedule.
    pub fn cleanup(&self) -> CleanupReport {
        CleanupReport {
            counters: self.limiter.cleanup(),
            tenants: self.analytics.prune_all(),
        }
    }
}
