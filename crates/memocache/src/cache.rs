//! Cache: key index plus per-entry one-time initialization

use std::borrow::Borrow;
use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::entry::Entry;
use crate::index::{Index, Lookup};
use crate::stats::CacheStats;

/// Concurrent compute-once cache with per-entry expiration
///
/// Two levels of locking are involved. A structural lock guards which
/// entry each key maps to and is only held for short map operations.
/// Initializers run outside it, under the one-shot guard of their own
/// entry, so a slow initializer for one key never stalls other keys.
pub struct Cache<K, V> {
    /// Structural lock around the key index
    index: Mutex<Index<K, V>>,

    /// Time source shared with the index
    clock: Arc<dyn Clock>,

    /// Usage counters
    stats: CacheStats,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq,
{
    /// Create an empty cache using the system clock
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create an empty cache reading time from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(CacheConfig::default().with_clock(clock))
    }

    /// Create an empty cache from `config`
    pub fn with_config(config: CacheConfig) -> Self {
        let index = Index::with_capacity(config.initial_capacity, Arc::clone(&config.clock));

        Self {
            index: Mutex::new(index),
            clock: config.clock,
            stats: CacheStats::new(),
        }
    }

    /// Return the value for `key`, computing it with `init` if needed
    ///
    /// If a live entry exists its value is returned and `init` is never
    /// called. Otherwise a new entry is installed and `init` populates it.
    /// Callers racing on the same entry run `init` once and share the result.
    ///
    /// `init` returns the value and its time to live; `Duration::ZERO`
    /// means the entry never expires.
    ///
    /// # Example
    ///
    /// ```rust
    /// use memocache::Cache;
    /// use std::time::Duration;
    ///
    /// let cache: Cache<&str, u32> = Cache::new();
    ///
    /// assert_eq!(cache.get_or_init("answer", || (42, Duration::ZERO)), 42);
    /// // Already cached: the second initializer is never invoked
    /// assert_eq!(cache.get_or_init("answer", || unreachable!()), 42);
    /// ```
    pub fn get_or_init<F>(&self, key: K, init: F) -> V
    where
        V: Clone,
        F: FnOnce() -> (V, Duration),
    {
        match self.try_get_or_init(key, || Ok::<_, Infallible>(init())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Fallible form of [`Cache::get_or_init`]
    ///
    /// An error from `init` is returned to this caller and nothing is
    /// cached; the next caller for the key runs its own initializer. An
    /// entry left empty by a failure is dropped on the next lookup of its
    /// key or by [`Cache::evict`].
    pub fn try_get_or_init<F, E>(&self, key: K, init: F) -> Result<V, E>
    where
        V: Clone,
        F: FnOnce() -> Result<(V, Duration), E>,
    {
        let entry = self.find_or_insert(key);
        self.initialize(&entry, init)
    }

    /// Replace the entry for `key` with a fresh one populated by `init`
    ///
    /// `init` always runs, even when a live entry already exists. Callers
    /// that obtained the previous entry before the replacement keep reading
    /// its value.
    pub fn put<F>(&self, key: K, init: F) -> V
    where
        V: Clone,
        F: FnOnce() -> (V, Duration),
    {
        match self.try_put(key, || Ok::<_, Infallible>(init())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Fallible form of [`Cache::put`]
    ///
    /// On error the previous entry is still gone. The fresh, empty entry is
    /// dropped on the next lookup of its key or by [`Cache::evict`].
    pub fn try_put<F, E>(&self, key: K, init: F) -> Result<V, E>
    where
        V: Clone,
        F: FnOnce() -> Result<(V, Duration), E>,
    {
        let entry = Arc::new(Entry::new());
        let previous = self.index.lock().set(key, Arc::clone(&entry));
        self.stats.record_insert();

        if previous.is_some() {
            trace!("Replaced existing cache entry");
        }
        drop(previous);

        self.initialize(&entry, init)
    }

    /// Return the cached value for `key`
    ///
    /// Expired entries are removed and reported as missing. Never runs an
    /// initializer and never blocks on one.
    ///
    /// `None` covers two cases: no live entry for `key`, or an entry whose
    /// initializer is still running. Use [`Cache::is_pending`] to tell them
    /// apart.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let mut index = self.index.lock();

        let value = match index.get(key) {
            Lookup::Live(entry) => entry.value().cloned(),
            Lookup::Expired => {
                self.stats.record_expirations(1);
                None
            }
            Lookup::Absent => None,
        };

        match value {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        value
    }

    /// Whether `key` maps to an unexpired entry
    ///
    /// Pending entries count as present. Expired entries are removed.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.index.lock().get(key) {
            Lookup::Live(_) => true,
            Lookup::Expired => {
                self.stats.record_expirations(1);
                false
            }
            Lookup::Absent => false,
        }
    }

    /// Whether `key` maps to an entry whose initializer has not finished
    pub fn is_pending<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.index.lock().get(key) {
            Lookup::Live(entry) => !entry.is_initialized(),
            Lookup::Expired => {
                self.stats.record_expirations(1);
                false
            }
            Lookup::Absent => false,
        }
    }

    /// Remove every key in `keys`; absent keys are ignored
    ///
    /// ```rust
    /// use memocache::Cache;
    /// use std::time::Duration;
    ///
    /// let cache: Cache<String, u32> = Cache::new();
    /// cache.put("a".to_string(), || (1, Duration::ZERO));
    /// cache.put("b".to_string(), || (2, Duration::ZERO));
    ///
    /// cache.remove(["a", "b", "missing"]);
    /// assert!(cache.is_empty());
    /// ```
    pub fn remove<'a, Q, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a Q>,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'a,
    {
        let mut index = self.index.lock();
        let removed = keys.into_iter().filter(|key| index.del(*key)).count();
        self.stats.record_removals(removed as u64);
    }

    /// Remove every expired entry in one pass
    ///
    /// All entries are judged against a single reading of the clock.
    /// Entries left empty by a failed initializer, with no caller retrying
    /// them, are removed as well. Returns the number of entries removed.
    pub fn evict(&self) -> usize {
        let mut index = self.index.lock();
        let removed = index.evict();
        self.stats.record_expirations(removed as u64);

        if removed > 0 {
            debug!(
                "Evicted {} expired entries, {} remaining",
                removed,
                index.len()
            );
        }
        removed
    }

    /// Remove every entry
    pub fn clear(&self) {
        let removed = self.index.lock().clear();
        self.stats.record_removals(removed as u64);
    }

    /// Number of stored entries
    ///
    /// Includes pending entries and expired entries not yet swept.
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    /// Whether no entries are stored
    pub fn is_empty(&self) -> bool {
        self.index.lock().is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// The time source used for deadlines
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Return the current entry for `key`, installing an empty one if needed
    fn find_or_insert(&self, key: K) -> Arc<Entry<V>> {
        let mut index = self.index.lock();

        match index.get(&key) {
            Lookup::Live(entry) => {
                self.stats.record_hit();
                return entry;
            }
            Lookup::Expired => self.stats.record_expirations(1),
            Lookup::Absent => {}
        }
        self.stats.record_miss();

        let entry = Arc::new(Entry::new());
        index.set(key, Arc::clone(&entry));
        self.stats.record_insert();
        trace!("Created cache entry, {} entries stored", index.len());

        entry
    }

    /// Drive the one-time initialization of `entry` and read its value
    ///
    /// Must not be called with the structural lock held.
    fn initialize<F, E>(&self, entry: &Entry<V>, init: F) -> Result<V, E>
    where
        V: Clone,
        F: FnOnce() -> Result<(V, Duration), E>,
    {
        let value = entry.try_apply(self.clock.as_ref(), || {
            let result = init();
            match result {
                Ok(_) => self.stats.record_initialization(),
                Err(_) => {
                    self.stats.record_failure();
                    debug!("Cache initializer failed, entry left uninitialized");
                }
            }
            result
        })?;

        Ok(value.clone())
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for Cache<K, V>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("len", &self.len())
            .field("clock", &self.clock)
            .field("stats", &self.stats)
            .finish()
    }
}
