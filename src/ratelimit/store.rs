//! Counter storage.
//!
//! The enforcer owns a `CounterStore` and goes through it for every read and
//! write. Each `update` is one atomic unit for its key: check-or-create,
//! increment, compare and conditionally block all happen under the same lock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::counter::CounterEntry;

/// Keyed registry of counter entries.
pub trait CounterStore: Send + Sync {
    /// Run `f` against the slot for `key` while holding that key's lock.
    ///
    /// The slot is `None` when the key has no entry. Leaving `Some` in the
    /// slot stores the entry; leaving `None` removes it.
    fn update<R, F>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(&mut Option<CounterEntry>) -> R;

    /// A copy of the entry for `key`, if any.
    fn get(&self, key: &str) -> Option<CounterEntry>;

    /// Remove the entry for `key`, returning it.
    fn remove(&self, key: &str) -> Option<CounterEntry>;

    /// Keep only the entries for which `keep` returns true. Returns the number removed.
    fn retain<F>(&self, keep: F) -> usize
    where
        F: FnMut(&str, &CounterEntry) -> bool;

    /// Number of stored entries.
    fn len(&self) -> usize;

    /// Whether the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store sharded by key.
///
/// Locking is per shard, so unrelated tenants rarely contend.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    entries: DashMap<String, CounterEntry>,
}

impl InMemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn update<R, F>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(&mut Option<CounterEntry>) -> R,
    {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let mut slot = Some(*occupied.get());
                let result = f(&mut slot);
                match slot {
                    Some(entry) => *occupied.get_mut() = entry,
                    None => {
                        occupied.remove();
                    }
                }
                result
            }
            Entry::Vacant(vacant) => {
                let mut slot = None;
                let result = f(&mut slot);
                if let Some(entry) = slot {
                    vacant.insert(entry);
                }
                result
            }
        }
    }

    fn get(&self, key: &str) -> Option<CounterEntry> {
        self.entries.get(key).map(|entry| *entry)
    }

    fn remove(&self, key: &str) -> Option<CounterEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&str, &CounterEntry) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|key, entry| keep(key, entry));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_update_inserts_and_removes() {
        let store = InMemoryCounterStore::new();

        store.update("tenant", |slot| {
            assert!(slot.is_none());
            *slot = Some(CounterEntry::new(at(0), Duration::from_secs(60)));
        });
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("tenant").map(|e| e.count), Some(0));

        store.update("tenant", |slot| *slot = None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_returns_closure_result() {
        let store = InMemoryCounterStore::new();
        let count = store.update("k", |slot| {
            let entry = slot.get_or_insert(CounterEntry::new(at(0), Duration::from_secs(1)));
            entry.count += 3;
            entry.count
        });
        assert_eq!(count, 3);
        assert_eq!(store.get("k").unwrap().count, 3);
    }

    #[test]
    fn test_retain_reports_removed() {
        let store = InMemoryCounterStore::new();
        for key in ["a", "b", "c"] {
            store.update(key, |slot| {
                *slot = Some(CounterEntry::new(at(0), Duration::from_secs(1)))
            });
        }

        let removed = store.retain(|key, _| key == "b");
        assert_eq!(removed, 2);
        assert!(store.get("b").is_some());
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(InMemoryCounterStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        store.update("shared", |slot| {
                            slot.get_or_insert(CounterEntry::new(at(0), Duration::from_secs(60)))
                                .count += 1;
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get("shared").unwrap().count, 8_000);
    }
}
