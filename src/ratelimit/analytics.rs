//! Per-tenant request analytics over a trailing one-hour window.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::clock::{to_delta, Clock};

/// How far back samples are kept.
pub const RETENTION: Duration = Duration::from_secs(3600);

/// Snapshot of a tenant's recent traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitAnalytics {
    /// Requests seen in the trailing hour
    pub total_requests: u64,
    /// Denied requests in the trailing hour
    pub blocked_requests: u64,
    /// Requests per second across the observed span
    pub average_rps: f64,
    /// Most requests inside any one-second window
    pub peak_rps: u64,
    /// Denials since the tenant was first seen
    pub violations: u64,
}

#[derive(Debug, Default)]
struct TenantRecord {
    /// (timestamp in ms, allowed), non-decreasing by timestamp
    samples: VecDeque<(i64, bool)>,
    violations: u64,
}

impl TenantRecord {
    /// Append a sample. A wall clock that steps backwards is clamped to the
    /// newest stored timestamp so pruning and the peak sweep stay ordered.
    fn push(&mut self, ts: i64, allowed: bool) {
        let ts = self.samples.back().map_or(ts, |(last, _)| ts.max(*last));
        self.samples.push_back((ts, allowed));
        if !allowed {
            self.violations += 1;
        }
    }

    fn prune(&mut self, cutoff: i64) {
        while matches!(self.samples.front(), Some((ts, _)) if *ts < cutoff) {
            self.samples.pop_front();
        }
    }

    fn snapshot(&self) -> RateLimitAnalytics {
        let total_requests = self.samples.len() as u64;
        let blocked_requests = self.samples.iter().filter(|(_, allowed)| !allowed).count() as u64;

        let average_rps = match (self.samples.front(), self.samples.back()) {
            (Some((first, _)), Some((last, _))) if total_requests >= 2 && last > first => {
                total_requests as f64 / ((last - first) as f64 / 1000.0)
            }
            _ => 0.0,
        };

        RateLimitAnalytics {
            total_requests,
            blocked_requests,
            average_rps,
            peak_rps: peak_per_second(&self.samples),
            violations: self.violations,
        }
    }
}

/// Largest number of samples inside any window `[t, t + 1000ms]` starting at a sample.
fn peak_per_second(samples: &VecDeque<(i64, bool)>) -> u64 {
    let mut peak = 0;
    let mut end = 0;
    for (start, (ts, _)) in samples.iter().enumerate() {
        end = end.max(start);
        while end < samples.len() && samples[end].0 - ts <= 1000 {
            end += 1;
        }
        peak = peak.max(end - start);
    }
    peak as u64
}

/// Records every admission decision per tenant.
///
/// Samples older than an hour are dropped on every access. Tenants whose
/// sample list empties out are evicted by [`AnalyticsTracker::prune_all`].
pub struct AnalyticsTracker {
    records: DashMap<String, TenantRecord>,
    clock: Arc<dyn Clock>,
}

impl AnalyticsTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> i64 {
        (now - to_delta(RETENTION)).timestamp_millis()
    }

    /// Record one decision for `tenant`.
    pub fn track_request(&self, tenant: &str, allowed: bool) {
        let now = self.clock.now();
        let cutoff = self.cutoff(now);

        let mut record = self.records.entry(tenant.to_string()).or_default();
        record.prune(cutoff);
        record.push(now.timestamp_millis(), allowed);
    }

    /// Traffic summary for `tenant`. Unknown tenants read as all zeros.
    pub fn get_rate_limit_analytics(&self, tenant: &str) -> RateLimitAnalytics {
        let cutoff = self.cutoff(self.clock.now());
        match self.records.get_mut(tenant) {
            Some(mut record) => {
                record.prune(cutoff);
                record.snapshot()
            }
            None => RateLimitAnalytics::default(),
        }
    }

    /// Prune every tenant and evict those with no samples left. Returns the number evicted.
    pub fn prune_all(&self) -> usize {
        let cutoff = self.cutoff(self.clock.now());
        let before = self.records.len();
        self.records.retain(|_, record| {
            record.prune(cutoff);
            !record.samples.is_empty()
        });
        before.saturating_sub(self.records.len())
    }

    /// Number of tenants with a record.
    pub fn tenant_count(&self) -> usize {
        self.records.len()
    }
}
