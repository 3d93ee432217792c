//! Single-initialization cache entry
//!
//! An [`Entry`] starts empty and is populated at most once. Callers racing
//! to populate it are serialized: one runs the initializer, the rest block
//! until it finishes and then read the same value. A failed attempt (an
//! `Err` or a panic) leaves the entry empty so the next caller can retry.

use std::convert::Infallible;
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::clock::Clock;

/// Materialized contents of an entry
struct Slot<V> {
    value: V,
    deadline: Option<Instant>,
}

/// Progress of the initializer attempts on an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// No attempt is running and none has failed
    Idle,
    /// Some caller is running an initializer
    Running,
    /// The last attempt failed and no caller has picked the entry up since
    Failed,
}

/// Memoized value with an optional expiration deadline
pub struct Entry<V> {
    /// Published exactly once by the initializing caller
    slot: OnceLock<Slot<V>>,

    /// Guard state for initializer attempts
    attempt: Mutex<Attempt>,

    /// Signalled when a running initializer finishes, successfully or not
    finished: Condvar,
}

/// Releases the initialization claim and wakes waiters
struct Claim<'a, V> {
    entry: &'a Entry<V>,
}

impl<V> Drop for Claim<'_, V> {
    fn drop(&mut self) {
        *self.entry.attempt.lock() = if self.entry.slot.get().is_some() {
            Attempt::Idle
        } else {
            Attempt::Failed
        };
        self.entry.finished.notify_all();
    }
}

impl<V> Entry<V> {
    /// Create an empty entry
    pub fn new() -> Self {
        Self {
            slot: OnceLock::new(),
            attempt: Mutex::new(Attempt::Idle),
            finished: Condvar::new(),
        }
    }

    /// The memoized value, or `None` if no initializer has completed
    pub fn value(&self) -> Option<&V> {
        self.slot.get().map(|slot| &slot.value)
    }

    /// The absolute expiration instant, if one was set
    pub fn deadline(&self) -> Option<Instant> {
        self.slot.get().and_then(|slot| slot.deadline)
    }

    /// Whether an initializer has completed
    pub fn is_initialized(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Whether the last initializer attempt failed and nobody has retried
    ///
    /// Such an entry holds no value and has no caller working on it.
    pub fn is_abandoned(&self) -> bool {
        !self.is_initialized() && *self.attempt.lock() == Attempt::Failed
    }

    /// True iff a deadline is set and `now` is at or past it
    pub fn expired(&self, now: Instant) -> bool {
        matches!(self.deadline(), Some(deadline) if now >= deadline)
    }

    /// Populate the entry with `init` unless it is already populated
    ///
    /// See [`Entry::try_apply`].
    pub fn apply<F>(&self, clock: &dyn Clock, init: F) -> &V
    where
        F: FnOnce() -> (V, Duration),
    {
        match self.try_apply(clock, || Ok::<_, Infallible>(init())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Populate the entry with a fallible `init` unless it is already populated
    ///
    /// `init` runs at most once successfully across all callers. Concurrent
    /// callers block until the running attempt finishes. The returned TTL
    /// sets the deadline to `clock.now() + ttl`, read after `init` returns;
    /// `Duration::ZERO` (or a TTL that overflows `Instant`) means the entry
    /// never expires.
    ///
    /// On `Err` the error is returned to this caller only and the entry stays
    /// empty. Waiting callers wake up and one of them runs its own initializer;
    /// if none does, the entry reports [`Entry::is_abandoned`].
    pub fn try_apply<F, E>(&self, clock: &dyn Clock, init: F) -> Result<&V, E>
    where
        F: FnOnce() -> Result<(V, Duration), E>,
    {
        let claim = loop {
            if let Some(slot) = self.slot.get() {
                return Ok(&slot.value);
            }

            let mut attempt = self.attempt.lock();
            if self.slot.get().is_some() {
                continue;
            }
            if *attempt == Attempt::Running {
                self.finished.wait(&mut attempt);
                continue;
            }

            *attempt = Attempt::Running;
            break Claim { entry: self };
        };

        let (value, ttl) = init()?;
        let deadline = if ttl.is_zero() {
            None
        } else {
            clock.now().checked_add(ttl)
        };
        let slot = self.slot.get_or_init(|| Slot { value, deadline });
        drop(claim);

        Ok(&slot.value)
    }
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for Entry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("initialized", &self.is_initialized())
            .field("deadline", &self.deadline())
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}
