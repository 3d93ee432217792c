//! # memocache
//!
//! In-memory, thread-safe, compute-once cache with per-entry expiration.
//!
//! ## Architecture
//! - **Entry**: one memoized value, an optional deadline, and a one-shot
//!   guard so its initializer runs once however many callers race on it
//! - **Index**: AHash map from key to entry; expired entries are dropped on
//!   read, or all at once by an explicit sweep
//! - **Cache**: the public façade; a short structural lock picks the entry,
//!   initialization happens outside it
//!
//! Eviction is never automatic beyond expire-on-read: call
//! [`Cache::evict`] to sweep.
//!
//! ## Example
//!
//! ```rust
//! use memocache::Cache;
//! use std::time::Duration;
//!
//! let cache: Cache<String, String> = Cache::new();
//!
//! let greeting = cache.get_or_init("user:42".to_string(), || {
//!     ("hello".to_string(), Duration::from_secs(60))
//! });
//! assert_eq!(greeting, "hello");
//!
//! // Put always recomputes, even over a live entry
//! cache.put("user:42".to_string(), || ("bye".to_string(), Duration::ZERO));
//! assert_eq!(cache.get("user:42").as_deref(), Some("bye"));
//!
//! cache.remove(["user:42"]);
//! assert_eq!(cache.get("user:42"), None);
//! ```

#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod entry;
mod index;
mod stats;

pub use cache::Cache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use entry::Entry;
pub use stats::CacheStats;
