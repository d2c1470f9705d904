//! LRU index with byte budget management
//!
//! Tracks the byte size of every entry and evicts least-recently-used entries
//! when an insertion would exceed the budget. Recency is by access, not by
//! insertion; entries never read since insertion age in insertion order.
//!
//! This type is not synchronised. [`crate::ArtifactCache`] keeps it behind its
//! per-cache lock so every operation here stays O(1) amortised.

use lru::LruCache;
use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

struct Slot<V> {
    value: V,
    byte_size: u64,
    last_access: u64,
}

/// Outcome of [`ByteLru::insert`].
#[derive(Debug)]
pub enum Admission<K, V> {
    /// Stored; `evicted` lists entries dropped to make room (oldest first)
    Admitted {
        evicted: Vec<(K, V)>,
        replaced: Option<V>,
    },
    /// The value alone is larger than the whole budget and was not stored
    Rejected(V),
}

pub struct ByteLru<K: Hash + Eq, V> {
    entries: LruCache<K, Slot<V>>,
    total_bytes: u64,
    max_bytes: u64,
    access_counter: u64,
}

impl<K: Hash + Eq + Clone, V> ByteLru<K, V> {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_bytes: 0,
            max_bytes,
            access_counter: 0,
        }
    }

    /// Look up `key` and promote it to most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.access_counter += 1;
        let counter = self.access_counter;
        let slot = self.entries.get_mut(key)?;
        slot.last_access = counter;
        Some(&slot.value)
    }

    /// Look up `key` without touching recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.peek(key).map(|slot| &slot.value)
    }

    /// Insert or replace `key`, evicting least-recently-used entries (never
    /// the one being inserted) until the budget holds.
    pub fn insert(&mut self, key: K, value: V, byte_size: u64) -> Admission<K, V> {
        if byte_size > self.max_bytes {
            return Admission::Rejected(value);
        }

        let replaced = self.entries.pop(&key).map(|slot| {
            self.total_bytes = self.total_bytes.saturating_sub(slot.byte_size);
            slot.value
        });

        let mut evicted = Vec::new();
        while self.total_bytes + byte_size > self.max_bytes {
            match self.entries.pop_lru() {
                Some((old_key, slot)) => {
                    self.total_bytes = self.total_bytes.saturating_sub(slot.byte_size);
                    evicted.push((old_key, slot.value));
                }
                None => break,
            }
        }

        self.access_counter += 1;
        self.entries.put(
            key,
            Slot {
                value,
                byte_size,
                last_access: self.access_counter,
            },
        );
        self.total_bytes += byte_size;

        Admission::Admitted { evicted, replaced }
    }

    /// Re-insert an entry loaded from a persisted index. Callers restore in
    /// ascending `last_access` order so recency survives a restart.
    pub fn restore(&mut self, key: K, value: V, byte_size: u64, last_access: u64) {
        if let Some(old) = self.entries.put(
            key,
            Slot {
                value,
                byte_size,
                last_access,
            },
        ) {
            self.total_bytes = self.total_bytes.saturating_sub(old.byte_size);
        }
        self.total_bytes += byte_size;
        self.access_counter = self.access_counter.max(last_access);
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.entries.pop(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(slot.byte_size);
        Some(slot.value)
    }

    /// Remove every entry whose value matches `predicate`.
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Vec<(K, V)>
    where
        F: FnMut(&V) -> bool,
    {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, slot)| predicate(&slot.value))
            .map(|(key, _)| key.clone())
            .collect();

        doomed
            .into_iter()
            .filter_map(|key| {
                let slot = self.entries.pop(&key)?;
                self.total_bytes = self.total_bytes.saturating_sub(slot.byte_size);
                Some((key, slot.value))
            })
            .collect()
    }

    /// Evict least-recently-used entries until the budget holds again.
    pub fn evict_to_budget(&mut self) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while self.total_bytes > self.max_bytes {
            match self.entries.pop_lru() {
                Some((key, slot)) => {
                    self.total_bytes = self.total_bytes.saturating_sub(slot.byte_size);
                    evicted.push((key, slot.value));
                }
                None => break,
            }
        }
        evicted
    }

    /// Entries from least to most recently used, with size and access order.
    pub fn iter_lru_first(&self) -> impl Iterator<Item = (&K, &V, u64, u64)> {
        self.entries
            .iter()
            .rev()
            .map(|(key, slot)| (key, &slot.value, slot.byte_size, slot.last_access))
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.total_bytes = 0;
        self.access_counter = 0;
        count
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Hash + Eq, V> fmt::Debug for ByteLru<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteLru")
            .field("len", &self.entries.len())
            .field("total_bytes", &self.total_bytes)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admitted<K, V>(admission: Admission<K, V>) -> Vec<(K, V)> {
        match admission {
            Admission::Admitted { evicted, .. } => evicted,
            Admission::Rejected(_) => panic!("expected admission"),
        }
    }

    fn sum_of_entries(lru: &ByteLru<String, u32>) -> u64 {
        lru.iter_lru_first().map(|(_, _, size, _)| size).sum()
    }

    #[test]
    fn test_basic_operations() {
        let mut lru = ByteLru::new(100);

        admitted(lru.insert("key1".to_string(), 1u32, 10));
        assert_eq!(lru.get("key1"), Some(&1));
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.total_bytes(), 10);
        assert_eq!(lru.get("key2"), None);
    }

    #[test]
    fn test_lru_eviction() {
        let mut lru = ByteLru::new(25);

        admitted(lru.insert("key1".to_string(), 1u32, 10));
        admitted(lru.insert("key2".to_string(), 2, 10));
        admitted(lru.insert("key3".to_string(), 3, 5));
        assert_eq!(lru.len(), 3);
        assert_eq!(lru.total_bytes(), 25);

        let evicted = admitted(lru.insert("key4".to_string(), 4, 10));
        assert_eq!(evicted, vec![("key1".to_string(), 1)]);
        assert_eq!(lru.peek("key1"), None);
        assert_eq!(lru.peek("key2"), Some(&2));
        assert_eq!(lru.peek("key3"), Some(&3));
        assert_eq!(lru.peek("key4"), Some(&4));
        assert!(lru.total_bytes() <= 25);
    }

    #[test]
    fn test_read_promotes_entry() {
        // Room for exactly two entries of size 10
        let mut lru = ByteLru::new(20);

        admitted(lru.insert("a".to_string(), 1u32, 10));
        admitted(lru.insert("b".to_string(), 2, 10));
        assert_eq!(lru.get("a"), Some(&1));

        let evicted = admitted(lru.insert("c".to_string(), 3, 10));
        assert_eq!(evicted, vec![("b".to_string(), 2)]);
        assert!(lru.peek("a").is_some());
        assert!(lru.peek("c").is_some());
    }

    #[test]
    fn test_oversized_value_rejected() {
        let mut lru = ByteLru::new(10);
        admitted(lru.insert("small".to_string(), 1u32, 4));

        match lru.insert("huge".to_string(), 2, 11) {
            Admission::Rejected(value) => assert_eq!(value, 2),
            Admission::Admitted { .. } => panic!("oversized value must be rejected"),
        }
        // Nothing was evicted for the rejected value
        assert_eq!(lru.peek("small"), Some(&1));
        assert_eq!(lru.total_bytes(), 4);
    }

    #[test]
    fn test_update_existing_key() {
        let mut lru = ByteLru::new(50);

        admitted(lru.insert("key1".to_string(), 1u32, 10));
        match lru.insert("key1".to_string(), 2, 20) {
            Admission::Admitted { evicted, replaced } => {
                assert!(evicted.is_empty());
                assert_eq!(replaced, Some(1));
            }
            Admission::Rejected(_) => panic!("expected admission"),
        }
        assert_eq!(lru.total_bytes(), 20);
        assert_eq!(lru.len(), 1);

        admitted(lru.insert("key1".to_string(), 3, 5));
        assert_eq!(lru.total_bytes(), 5);
        assert_eq!(lru.peek("key1"), Some(&3));
    }

    #[test]
    fn test_capacity_invariant_over_insert_sequence() {
        let mut lru = ByteLru::new(64);
        let sizes = [7u64, 30, 1, 64, 12, 33, 20, 2, 50, 9, 64, 3];

        for (i, size) in sizes.iter().enumerate() {
            lru.insert(format!("k{}", i % 5), i as u32, *size);
            assert!(lru.total_bytes() <= lru.max_bytes());
            assert_eq!(lru.total_bytes(), sum_of_entries(&lru));
        }
    }

    #[test]
    fn test_restore_preserves_recency() {
        let mut lru = ByteLru::new(20);
        lru.restore("old".to_string(), 1u32, 10, 3);
        lru.restore("new".to_string(), 2, 10, 7);

        let evicted = admitted(lru.insert("next".to_string(), 3, 10));
        assert_eq!(evicted, vec![("old".to_string(), 1)]);

        let order: Vec<_> = lru.iter_lru_first().map(|(_, _, _, access)| access).collect();
        assert!(order.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_remove_where_and_clear() {
        let mut lru = ByteLru::new(100);
        admitted(lru.insert("key1".to_string(), 1u32, 10));
        admitted(lru.insert("key2".to_string(), 2, 15));
        admitted(lru.insert("key3".to_string(), 1, 5));

        let removed = lru.remove_where(|v| *v == 1);
        assert_eq!(removed.len(), 2);
        assert_eq!(lru.total_bytes(), 15);

        assert_eq!(lru.clear(), 1);
        assert_eq!(lru.total_bytes(), 0);
        assert!(lru.is_empty());
    }

    #[test]
    fn test_evict_to_budget_after_restore() {
        let mut lru = ByteLru::new(15);
        lru.restore("a".to_string(), 1u32, 10, 1);
        lru.restore("b".to_string(), 2, 10, 2);
        assert_eq!(lru.total_bytes(), 20);

        let evicted = lru.evict_to_budget();
        assert_eq!(evicted, vec![("a".to_string(), 1)]);
        assert_eq!(lru.total_bytes(), 10);
    }
}
