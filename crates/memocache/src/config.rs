use std::sync::Arc;

use crate::clock::{Clock, SystemClock};

/// Options used when constructing a [`Cache`](crate::Cache)
///
/// # Example
///
/// ```rust
/// use memocache::{Cache, CacheConfig, ManualClock};
/// use std::sync::Arc;
///
/// let clock = Arc::new(ManualClock::new());
/// let config = CacheConfig::default()
///     .with_initial_capacity(1024)
///     .with_clock(clock);
/// let cache: Cache<String, u64> = Cache::with_config(config);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of keys to reserve room for up front (default: 0)
    pub initial_capacity: usize,

    /// Time source for deadlines and expiration checks (default: [`SystemClock`])
    pub clock: Arc<dyn Clock>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 0,
            clock: Arc::new(SystemClock),
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial capacity of the key index
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Sets the time source
    ///
    /// Tests typically pass a [`ManualClock`](crate::ManualClock) here so
    /// expiration can be driven without sleeping.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.initial_capacity, 0);
    }

    #[test]
    fn test_builder_pattern_chaining() {
        let clock = Arc::new(ManualClock::new());
        let config = CacheConfig::new()
            .with_initial_capacity(64)
            .with_clock(clock.clone());

        assert_eq!(config.initial_capacity, 64);

        let before = config.clock.now();
        clock.advance(Duration::from_secs(1));
        assert_eq!(config.clock.now() - before, Duration::from_secs(1));
    }
}
