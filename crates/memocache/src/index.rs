//! Key to entry mapping with expire-on-read and bulk sweep
//!
//! The index itself is not synchronized; its owner serializes access.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use ahash::RandomState;

use crate::clock::Clock;
use crate::entry::Entry;

/// Outcome of an index lookup
#[derive(Debug)]
pub enum Lookup<V> {
    /// A live entry is stored under the key
    Live(Arc<Entry<V>>),
    /// The stored entry had expired, or was left empty by a failed
    /// initializer, and was removed
    Expired,
    /// Nothing is stored under the key
    Absent,
}

impl<V> Lookup<V> {
    /// The live entry, if any
    #[cfg(test)]
    pub fn live(self) -> Option<Arc<Entry<V>>> {
        match self {
            Lookup::Live(entry) => Some(entry),
            Lookup::Expired | Lookup::Absent => None,
        }
    }
}

/// Mapping from key to the entry currently associated with it
pub struct Index<K, V> {
    store: HashMap<K, Arc<Entry<V>>, RandomState>,
    clock: Arc<dyn Clock>,
}

impl<K, V> Index<K, V>
where
    K: Hash + Eq,
{
    /// Create an empty index reading time from `clock`
    #[cfg(test)]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(0, clock)
    }

    /// Create an empty index with room for `capacity` keys
    pub fn with_capacity(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            clock,
        }
    }

    /// Insert or replace the entry for `key`, returning the previous one
    ///
    /// The previous entry is dropped from the index whether or not it had
    /// expired. Callers still holding it keep a valid reference.
    pub fn set(&mut self, key: K, entry: Arc<Entry<V>>) -> Option<Arc<Entry<V>>> {
        self.store.insert(key, entry)
    }

    /// Look up `key`, removing the entry if it is stale
    ///
    /// An entry is stale once its deadline has passed or when its last
    /// initializer failed with nobody retrying it.
    pub fn get<Q>(&mut self, key: &Q) -> Lookup<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.store.get(key) {
            None => return Lookup::Absent,
            Some(entry) if !stale(entry, self.clock.now()) => {
                return Lookup::Live(Arc::clone(entry));
            }
            Some(_) => {}
        }

        self.store.remove(key);
        Lookup::Expired
    }

    /// Remove `key`, returning whether it was present
    pub fn del<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.store.remove(key).is_some()
    }

    /// Remove every entry stale as of a single `now` snapshot
    ///
    /// Returns the number of entries removed.
    pub fn evict(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.store.len();
        self.store.retain(|_, entry| !stale(entry, now));
        before - self.store.len()
    }

    /// Whether `key` maps to an entry, without checking expiration
    #[cfg(test)]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.store.contains_key(key)
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Remove every entry, returning how many were stored
    pub fn clear(&mut self) -> usize {
        let removed = self.store.len();
        self.store.clear();
        removed
    }
}

fn stale<V>(entry: &Entry<V>, now: Instant) -> bool {
    entry.expired(now) || entry.is_abandoned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn populated(clock: &ManualClock, value: u32, ttl: Duration) -> Arc<Entry<u32>> {
        let entry = Arc::new(Entry::new());
        entry.apply(clock, || (value, ttl));
        entry
    }

    #[test]
    fn test_index_set_get() {
        let clock = Arc::new(ManualClock::new());
        let mut index = Index::new(clock.clone());

        index.set("a".to_string(), populated(&clock, 1, Duration::ZERO));

        let entry = index.get("a").live().unwrap();
        assert_eq!(entry.value(), Some(&1));
        assert!(matches!(index.get("b"), Lookup::Absent));
    }

    #[test]
    fn test_index_set_replaces_live_entry() {
        let clock = Arc::new(ManualClock::new());
        let mut index = Index::new(clock.clone());

        let old = populated(&clock, 1, Duration::from_secs(60));
        index.set("a", Arc::clone(&old));
        index.set("a", populated(&clock, 2, Duration::ZERO));

        assert_eq!(index.get("a").live().unwrap().value(), Some(&2));
        assert_eq!(index.len(), 1);
        // Holders of the replaced entry still read its value
        assert_eq!(old.value(), Some(&1));
    }

    #[test]
    fn test_index_expire_on_read() {
        let clock = Arc::new(ManualClock::new());
        let mut index = Index::new(clock.clone());

        let entry = populated(&clock, 1, Duration::from_millis(10));
        index.set("a", Arc::clone(&entry));

        clock.advance(Duration::from_millis(10));

        assert!(matches!(index.get("a"), Lookup::Expired));
        assert!(!index.contains("a"));
        assert!(matches!(index.get("a"), Lookup::Absent));
        assert_eq!(entry.value(), Some(&1));
    }

    #[test]
    fn test_index_pending_entry_is_live() {
        let clock = Arc::new(ManualClock::new());
        let mut index: Index<&str, u32> = Index::new(clock.clone());

        index.set("a", Arc::new(Entry::new()));
        clock.advance(Duration::from_secs(3600));

        let entry = index.get("a").live().unwrap();
        assert!(!entry.is_initialized());
    }

    #[test]
    fn test_index_del() {
        let clock = Arc::new(ManualClock::new());
        let mut index = Index::new(clock.clone());

        index.set("a", populated(&clock, 1, Duration::ZERO));

        assert!(index.del("a"));
        assert!(!index.del("a"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_index_evict() {
        let clock = Arc::new(ManualClock::new());
        let mut index = Index::new(clock.clone());

        for i in 0..10u32 {
            index.set(i, populated(&clock, i, Duration::from_millis(5)));
        }
        for i in 100..110u32 {
            index.set(i, populated(&clock, i, Duration::from_secs(3600)));
        }
        for i in 200..205u32 {
            index.set(i, populated(&clock, i, Duration::ZERO));
        }

        clock.advance(Duration::from_millis(5));

        assert_eq!(index.evict(), 10);
        assert_eq!(index.len(), 15);
        assert!((0..10u32).all(|i| !index.contains(&i)));
        assert!((100..110u32).chain(200..205).all(|i| index.contains(&i)));

        assert_eq!(index.evict(), 0);
    }

    #[test]
    fn test_index_reclaims_abandoned_entries() {
        let clock = Arc::new(ManualClock::new());
        let mut index: Index<u32, u32> = Index::new(clock.clone());

        for i in 0..4u32 {
            let entry = Arc::new(Entry::new());
            let _ = entry.try_apply(&*clock, || Err::<(u32, Duration), _>("down"));
            index.set(i, entry);
        }
        index.set(10, Arc::new(Entry::new()));
        index.set(11, populated(&clock, 11, Duration::ZERO));

        assert!(matches!(index.get(&0), Lookup::Expired));
        assert_eq!(index.evict(), 3);
        assert_eq!(index.len(), 2);
        assert!(index.contains(&10));
        assert!(index.contains(&11));
    }

    #[test]
    fn test_index_clear() {
        let clock = Arc::new(ManualClock::new());
        let mut index = Index::new(clock.clone());

        index.set(1, populated(&clock, 1, Duration::ZERO));
        index.set(2, populated(&clock, 2, Duration::ZERO));

        assert_eq!(index.clear(), 2);
        assert!(index.is_empty());
    }
}
