//! Keyed pending-event index
//!
//! Fixed-capacity map from context key to the start timestamp of the one
//! request in flight for that key.
//!
//! # Design
//!
//! - One short-held mutex guards the map, so operations on the same key are
//!   linearizable and a lookup never sees a half-written entry
//! - Insertion order is a generation-stamped queue with lazy deletion; stale
//!   stamps are skipped on eviction and compacted once they outnumber live
//!   entries, keeping every operation O(1) amortized
//! - What happens on a full index and on a duplicate key is decided by two
//!   explicit policies, fixed at construction

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::types::ContextKey;

/// Behaviour when a new key arrives at a full index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the incoming start; existing entries are untouched
    #[default]
    RejectNew,
    /// Drop the least recently stored start to make room
    EvictOldest,
}

/// Behaviour when a start arrives for a key that is already pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Replace the pending start with the newer one
    #[default]
    Overwrite,
    /// Keep the pending start and ignore the newer one
    KeepFirst,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" | "reject-new" => Ok(OverflowPolicy::RejectNew),
            "evict" | "evict-oldest" => Ok(OverflowPolicy::EvictOldest),
            other => Err(format!(
                "unknown overflow policy: {}. Use reject or evict-oldest",
                other
            )),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::RejectNew => f.write_str("reject"),
            OverflowPolicy::EvictOldest => f.write_str("evict-oldest"),
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overwrite" => Ok(DuplicatePolicy::Overwrite),
            "keep-first" | "keep" => Ok(DuplicatePolicy::KeepFirst),
            other => Err(format!(
                "unknown duplicate policy: {}. Use overwrite or keep-first",
                other
            )),
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicatePolicy::Overwrite => f.write_str("overwrite"),
            DuplicatePolicy::KeepFirst => f.write_str("keep-first"),
        }
    }
}

/// Result of a `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// New entry stored
    Inserted,
    /// Pending start replaced (DuplicatePolicy::Overwrite)
    Replaced { previous_ns: u64 },
    /// Pending start kept, new one ignored (DuplicatePolicy::KeepFirst)
    KeptExisting { retained_ns: u64 },
    /// New entry stored after evicting the oldest one (OverflowPolicy::EvictOldest)
    Evicted { key: ContextKey, start_ns: u64 },
    /// Index full, new entry dropped (OverflowPolicy::RejectNew)
    Rejected,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    start_ns: u64,
    generation: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<ContextKey, Slot>,
    order: VecDeque<(ContextKey, u64)>,
    next_generation: u64,
}

impl Inner {
    /// Store `start_ns` as the newest entry for `key`
    fn store(&mut self, key: ContextKey, start_ns: u64) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.order.push_back((key, generation));
        self.entries.insert(key, Slot { start_ns, generation });
    }

    /// Remove the least recently stored live entry
    fn pop_oldest(&mut self) -> Option<(ContextKey, u64)> {
        while let Some((key, generation)) = self.order.pop_front() {
            let live = matches!(self.entries.get(&key), Some(slot) if slot.generation == generation);
            if live {
                return self.entries.remove(&key).map(|slot| (key, slot.start_ns));
            }
        }
        None
    }

    /// Drop stale order stamps once they dominate the queue
    fn compact(&mut self, capacity: usize) {
        if self.order.len() <= capacity.saturating_mul(2).max(16) {
            return;
        }
        let Inner { entries, order, .. } = self;
        order.retain(|(key, generation)| {
            entries
                .get(key)
                .is_some_and(|slot| slot.generation == *generation)
        });
    }
}

/// Fixed-capacity index of pending starts
#[derive(Debug)]
pub struct PendingIndex {
    inner: Mutex<Inner>,
    capacity: usize,
    overflow: OverflowPolicy,
    duplicate: DuplicatePolicy,
}

impl PendingIndex {
    /// Create an index holding at most `capacity` pending starts
    ///
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize, overflow: OverflowPolicy, duplicate: DuplicatePolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
                next_generation: 0,
            }),
            capacity,
            overflow,
            duplicate,
        }
    }

    /// Record or replace the pending start for `key`
    pub fn put(&self, key: ContextKey, start_ns: u64) -> PutOutcome {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.entries.get(&key).map(|slot| slot.start_ns) {
            return match self.duplicate {
                DuplicatePolicy::KeepFirst => PutOutcome::KeptExisting {
                    retained_ns: existing,
                },
                DuplicatePolicy::Overwrite => {
                    inner.store(key, start_ns);
                    inner.compact(self.capacity);
                    PutOutcome::Replaced {
                        previous_ns: existing,
                    }
                }
            };
        }

        let mut outcome = PutOutcome::Inserted;
        if inner.entries.len() >= self.capacity {
            match self.overflow {
                OverflowPolicy::RejectNew => return PutOutcome::Rejected,
                OverflowPolicy::EvictOldest => match inner.pop_oldest() {
                    Some((evicted, evicted_ns)) => {
                        outcome = PutOutcome::Evicted {
                            key: evicted,
                            start_ns: evicted_ns,
                        }
                    }
                    None => return PutOutcome::Rejected,
                },
            }
        }

        inner.store(key, start_ns);
        inner.compact(self.capacity);
        outcome
    }

    /// Remove and return the pending start for `key`
    pub fn take_and_remove(&self, key: ContextKey) -> Option<u64> {
        self.inner.lock().entries.remove(&key).map(|slot| slot.start_ns)
    }

    /// Whether a start is pending for `key`
    pub fn contains(&self, key: ContextKey) -> bool {
        self.inner.lock().entries.contains_key(&key)
    }

    /// Number of pending starts
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if no start is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of pending starts
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Behaviour on a full index
    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Behaviour on a start for an already pending key
    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_take() {
        let index = PendingIndex::new(4, OverflowPolicy::RejectNew, DuplicatePolicy::Overwrite);

        assert_eq!(index.put(1, 100), PutOutcome::Inserted);
        assert!(index.contains(1));
        assert_eq!(index.take_and_remove(1), Some(100));
        assert_eq!(index.take_and_remove(1), None);
        assert!(index.is_empty());
    }

    #[test]
    fn test_reject_new_at_capacity() {
        let index = PendingIndex::new(2, OverflowPolicy::RejectNew, DuplicatePolicy::Overwrite);

        index.put(1, 100);
        index.put(2, 200);
        assert_eq!(index.put(3, 300), PutOutcome::Rejected);

        assert_eq!(index.len(), 2);
        assert!(!index.contains(3));
        assert_eq!(index.take_and_remove(1), Some(100));
        assert_eq!(index.take_and_remove(2), Some(200));
    }

    #[test]
    fn test_evict_oldest_at_capacity() {
        let index = PendingIndex::new(2, OverflowPolicy::EvictOldest, DuplicatePolicy::Overwrite);

        index.put(1, 100);
        index.put(2, 200);
        assert_eq!(
            index.put(3, 300),
            PutOutcome::Evicted {
                key: 1,
                start_ns: 100
            }
        );

        assert_eq!(index.len(), 2);
        assert!(!index.contains(1));
        assert_eq!(index.take_and_remove(2), Some(200));
        assert_eq!(index.take_and_remove(3), Some(300));
    }

    #[test]
    fn test_eviction_skips_taken_entries() {
        let index = PendingIndex::new(2, OverflowPolicy::EvictOldest, DuplicatePolicy::Overwrite);

        index.put(1, 100);
        index.put(2, 200);
        index.take_and_remove(1);
        index.put(3, 300);

        // Key 1 is gone already, so the next eviction must pick key 2
        assert_eq!(
            index.put(4, 400),
            PutOutcome::Evicted {
                key: 2,
                start_ns: 200
            }
        );
    }

    #[test]
    fn test_overwrite_refreshes_age() {
        let index = PendingIndex::new(2, OverflowPolicy::EvictOldest, DuplicatePolicy::Overwrite);

        index.put(1, 100);
        index.put(2, 200);
        assert_eq!(index.put(1, 150), PutOutcome::Replaced { previous_ns: 100 });

        // Key 1 was rewritten after key 2, so key 2 is now the oldest
        assert_eq!(
            index.put(3, 300),
            PutOutcome::Evicted {
                key: 2,
                start_ns: 200
            }
        );
        assert_eq!(index.take_and_remove(1), Some(150));
    }

    #[test]
    fn test_keep_first() {
        let index = PendingIndex::new(2, OverflowPolicy::RejectNew, DuplicatePolicy::KeepFirst);

        index.put(1, 100);
        assert_eq!(index.put(1, 150), PutOutcome::KeptExisting { retained_ns: 100 });
        assert_eq!(index.len(), 1);
        assert_eq!(index.take_and_remove(1), Some(100));
    }

    #[test]
    fn test_duplicate_at_capacity_is_not_overflow() {
        let index = PendingIndex::new(1, OverflowPolicy::RejectNew, DuplicatePolicy::Overwrite);

        index.put(1, 100);
        assert_eq!(index.put(1, 120), PutOutcome::Replaced { previous_ns: 100 });
        assert_eq!(index.take_and_remove(1), Some(120));
    }

    #[test]
    fn test_order_queue_stays_bounded() {
        let index = PendingIndex::new(4, OverflowPolicy::EvictOldest, DuplicatePolicy::Overwrite);

        for i in 0..10_000u64 {
            index.put(7, i);
            index.take_and_remove(7);
            index.put((i % 3) as u32, i);
        }

        let inner = index.inner.lock();
        assert!(inner.order.len() <= 16 + 1);
        assert!(inner.entries.len() <= 4);
    }

    #[test]
    fn test_concurrent_distinct_keys() {
        use std::sync::Arc;
        use std::thread;

        let index = Arc::new(PendingIndex::new(
            1024,
            OverflowPolicy::RejectNew,
            DuplicatePolicy::Overwrite,
        ));

        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for i in 0..200u32 {
                        let key = t * 1_000 + i;
                        index.put(key, u64::from(i));
                        assert_eq!(index.take_and_remove(key), Some(u64::from(i)));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(index.is_empty());
    }

    #[test]
    fn test_concurrent_same_key() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        const KEY: ContextKey = 42;
        let index = Arc::new(PendingIndex::new(
            4,
            OverflowPolicy::RejectNew,
            DuplicatePolicy::Overwrite,
        ));

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    for i in 0..500u64 {
                        // Unique per (thread, iteration) so every value names its put
                        index.put(KEY, t * 1_000_000 + i);
                        taken.extend(index.take_and_remove(KEY));
                    }
                    taken
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                let (thread, iteration) = (value / 1_000_000, value % 1_000_000);
                assert!(thread < 8 && iteration < 500, "value {} was never put", value);
                assert!(seen.insert(value), "value {} taken twice", value);
            }
        }

        assert!(!seen.is_empty());
        assert!(index.len() <= 1);
        if let Some(left) = index.take_and_remove(KEY) {
            assert!(!seen.contains(&left));
        }
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("reject".parse::<OverflowPolicy>(), Ok(OverflowPolicy::RejectNew));
        assert_eq!(
            "evict-oldest".parse::<OverflowPolicy>(),
            Ok(OverflowPolicy::EvictOldest)
        );
        assert_eq!(
            "keep-first".parse::<DuplicatePolicy>(),
            Ok(DuplicatePolicy::KeepFirst)
        );
        assert!("sometimes".parse::<DuplicatePolicy>().is_err());
        assert_eq!(OverflowPolicy::EvictOldest.to_string(), "evict-oldest");
    }
}
