//! Core quota enforcer.
//!
//! A fixed-window counter: each key counts requests until its window lapses,
//! then starts again from zero. Exceeding the limit can optionally place the
//! key under a block that outlasts the window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::clock::{offset, seconds_until, Clock};
use super::counter::CounterEntry;
use super::store::{CounterStore, InMemoryCounterStore};

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// The limit that was applied
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the governing window or block ends
    pub reset_at: DateTime<Utc>,
    /// Seconds to wait before retrying, set on denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl Decision {
    fn allowed(limit: u64, remaining: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after: None,
        }
    }

    /// A denial that lasts until `reset_at`.
    pub fn denied(limit: u64, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after: Some(seconds_until(now, reset_at)),
        }
    }
}

/// Read-only view of a counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterStatus {
    pub key: String,
    pub count: u64,
    pub reset_at: DateTime<Utc>,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
}

/// The quota enforcer.
///
/// Thread-safe and meant to be shared behind an `Arc`. All state lives in the
/// injected [`CounterStore`]; all time comes from the injected [`Clock`].
pub struct RateLimiter<S = InMemoryCounterStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl RateLimiter<InMemoryCounterStore> {
    /// Create an enforcer backed by an in-memory store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_store(InMemoryCounterStore::new(), clock)
    }
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create an enforcer over an existing store.
    pub fn with_store(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The current time according to the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Count one request against `key` and decide whether to admit it.
    ///
    /// The request that brings the count to exactly `max_requests` is admitted
    /// with nothing remaining; the next one is denied. When `block_duration` is
    /// set, that denial also blocks the key for the given duration.
    pub fn check_rate_limit(
        &self,
        key: &str,
        max_requests: u64,
        window: Duration,
        block_duration: Option<Duration>,
    ) -> Decision {
        let now = self.now();

        trace!(key = %key, limit = max_requests, "Checking rate limit");

        self.store.update(key, |slot| {
            if let Some(until) = slot.and_then(|entry| entry.blocked_until) {
                if until > now {
                    trace!(key = %key, blocked_until = %until, "Key is blocked");
                    return Decision::denied(max_requests, until, now);
                }
            }

            if slot.map_or(true, |entry| entry.window_expired(now)) {
                *slot = Some(CounterEntry::new(now, window));
            }
            let entry = slot.get_or_insert_with(|| CounterEntry::new(now, window));

            entry.count += 1;

            if entry.count > max_requests {
                if let Some(block) = block_duration {
                    entry.blocked_until = Some(offset(now, block));
                }
                debug!(
                    key = %key,
                    count = entry.count,
                    limit = max_requests,
                    blocked_until = ?entry.blocked_until,
                    "Rate limit exceeded"
                );
                return Decision::denied(max_requests, entry.governing_reset(), now);
            }

            Decision::allowed(
                max_requests,
                max_requests - entry.count,
                entry.window_reset_at,
            )
        })
    }

    /// Block `key` for `duration` from now, creating the entry if needed.
    ///
    /// An existing longer block is kept. Returns the effective block end.
    pub fn block(&self, key: &str, duration: Duration) -> DateTime<Utc> {
        let now = self.now();
        let until = offset(now, duration);

        self.store.update(key, |slot| {
            if let Some(entry) = slot.as_mut() {
                let effective = entry.blocked_until.map_or(until, |current| current.max(until));
                entry.blocked_until = Some(effective);
                return effective;
            }
            *slot = Some(CounterEntry::blocked(now, until));
            until
        })
    }

    /// The end of the block on `key`, if one is active.
    pub fn active_block(&self, key: &str) -> Option<DateTime<Utc>> {
        let now = self.now();
        self.store
            .get(key)
            .filter(|entry| entry.is_blocked(now))
            .and_then(|entry| entry.blocked_until)
    }

    /// Current state of `key` without counting a request.
    ///
    /// A lapsed window reads as a count of zero.
    pub fn status(&self, key: &str) -> Option<CounterStatus> {
        let now = self.now();
        self.store.get(key).map(|entry| {
            let blocked = entry.is_blocked(now);
            CounterStatus {
                key: key.to_string(),
                count: if entry.window_expired(now) { 0 } else { entry.count },
                reset_at: entry.window_reset_at,
                blocked,
                blocked_until: entry.blocked_until.filter(|_| blocked),
            }
        })
    }

    /// Forget `key`. Returns whether an entry existed.
    pub fn reset(&self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    /// Evict entries whose window and block have both lapsed.
    pub fn cleanup(&self) -> usize {
        let now = self.now();
        self.store.retain(|_, entry| !entry.is_reclaimable(now))
    }

    /// Get the number of stored counters.
    pub fn counter_count(&self) -> usize {
        self.store.len()
    }
}
