//! Fixed-window counter entries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use super::clock::offset;

/// Counter state for a single quota key.
///
/// `count` is only meaningful while `now < window_reset_at`. Once the window
/// lapses the entry is reset before its next use. A block set through
/// `blocked_until` denies every request for the key until it passes, no
/// matter what `count` says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterEntry {
    /// Requests observed in the current window
    pub count: u64,
    /// When the current window lapses
    pub window_reset_at: DateTime<Utc>,
    /// Requests are denied until this instant, if set
    pub blocked_until: Option<DateTime<Utc>>,
}

impl CounterEntry {
    /// Open a fresh window starting at `now`.
    pub fn new(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            count: 0,
            window_reset_at: offset(now, window),
            blocked_until: None,
        }
    }

    /// An empty, already-lapsed entry that exists only to carry a block.
    pub fn blocked(now: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_reset_at: now,
            blocked_until: Some(until),
        }
    }

    /// Whether a block is active at `now`.
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.blocked_until, Some(until) if until > now)
    }

    /// Whether the counting window has lapsed at `now`.
    pub fn window_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_reset_at
    }

    /// Whether the entry carries no live state and can be evicted.
    pub fn is_reclaimable(&self, now: DateTime<Utc>) -> bool {
        self.window_expired(now) && !self.is_blocked(now)
    }

    /// Start a new window at `now`, keeping any block.
    pub fn reset_window(&mut self, now: DateTime<Utc>, window: Duration) {
        self.count = 0;
        self.window_reset_at = offset(now, window);
    }

    /// The instant after which the key accepts requests again.
    pub fn governing_reset(&self) -> DateTime<Utc> {
        match self.blocked_until {
            Some(until) if until > self.window_reset_at => until,
            _ => self.window_reset_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_new_entry_window() {
        let entry = CounterEntry::new(at(0), Duration::from_secs(60));
        assert_eq!(entry.count, 0);
        assert_eq!(entry.window_reset_at, at(60_000));
        assert!(!entry.window_expired(at(59_999)));
        assert!(entry.window_expired(at(60_000)));
    }

    #[test]
    fn test_block_outlives_window() {
        let mut entry = CounterEntry::new(at(0), Duration::from_secs(60));
        entry.blocked_until = Some(at(300_000));

        assert!(entry.is_blocked(at(120_000)));
        assert!(!entry.is_reclaimable(at(120_000)));
        assert_eq!(entry.governing_reset(), at(300_000));

        assert!(!entry.is_blocked(at(300_000)));
        assert!(entry.is_reclaimable(at(300_000)));
    }

    #[test]
    fn test_reset_window_keeps_block() {
        let mut entry = CounterEntry::new(at(0), Duration::from_secs(1));
        entry.count = 7;
        entry.blocked_until = Some(at(10_000));

        entry.reset_window(at(2_000), Duration::from_secs(1));
        assert_eq!(entry.count, 0);
        assert_eq!(entry.window_reset_at, at(3_000));
        assert_eq!(entry.blocked_until, Some(at(10_000)));
    }
}
