//! Clock-driven TTL caching
//!
//! Caches are explicit values handed to their users, never module statics.
//! Time comes from an injected [`Clock`] so expiry is testable with
//! [`ManualClock`].

use std::cell::Cell;
use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::types::Result;

/// Source of the current time
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

/// `now + ttl`, saturating at the representable range instead of panicking
pub(crate) fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(if ttl < Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Outcome of a cache read
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    /// Present and within its TTL
    Hit(V),
    /// Present but expired; usable as a fallback
    Stale(V),
    Miss,
}

impl<V> Lookup<V> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    /// `(value, hit)`; stale values are returned with `hit == false`
    pub fn into_parts(self) -> (Option<V>, bool) {
        match self {
            Lookup::Hit(v) => (Some(v), true),
            Lookup::Stale(v) => (Some(v), false),
            Lookup::Miss => (None, false),
        }
    }
}

/// Cache with per-entry TTL and read-through fetching
pub trait ReadThroughCache<K, V> {
    fn get(&self, key: &K) -> Lookup<V>;

    fn put(&mut self, key: K, value: V, ttl: Duration) -> Result<()>;

    /// Return a fresh value, fetching and storing it on a miss or expiry.
    ///
    /// When the fetch fails an expired value is served instead; with nothing
    /// cached the fetch error is returned.
    fn get_or_fetch<F>(&mut self, key: K, ttl: Duration, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
        V: Clone,
    {
        let stale = match self.get(&key) {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Stale(value) => Some(value),
            Lookup::Miss => None,
        };

        match fetch() {
            Ok(fresh) => {
                if let Err(e) = self.put(key, fresh.clone(), ttl) {
                    warn!("failed to store fetched value: {}", e);
                }
                Ok(fresh)
            }
            Err(e) => match stale {
                Some(value) => {
                    warn!("fetch failed, serving expired value: {}", e);
                    Ok(value)
                }
                None => Err(e),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// In-memory TTL cache
#[derive(Debug)]
pub struct TtlCache<K, V, C: Clock = SystemClock> {
    clock: C,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V, SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<K: Eq + Hash, V: Clone> Default for TtlCache<K, V, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V: Clone, C: Clock> TtlCache<K, V, C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            entries: HashMap::new(),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn invalidate(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "purged expired cache entries");
        }
        removed
    }
}

impl<K: Eq + Hash, V: Clone, C: Clock> ReadThroughCache<K, V> for TtlCache<K, V, C> {
    fn get(&self, key: &K) -> Lookup<V> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > self.clock.now() => Lookup::Hit(entry.value.clone()),
            Some(entry) => Lookup::Stale(entry.value.clone()),
            None => Lookup::Miss,
        }
    }

    fn put(&mut self, key: K, value: V, ttl: Duration) -> Result<()> {
        let expires_at = expiry(self.clock.now(), ttl);
        self.entries.insert(key, Entry { value, expires_at });
        Ok(())
    }
}
