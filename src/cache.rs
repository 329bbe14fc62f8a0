//! Time-to-live memo for the fetch-and-parse pipeline.
//!
//! Per key: `Empty` and `Stale` both trigger a synchronous fetch on `get`,
//! only `Fresh` is served from memory, and `invalidate` returns the key to
//! `Empty`. Failed fetches are never stored.
//!
//! Each key owns a slot behind its own mutex. A fetch holds that slot, so
//! concurrent `get`s for one key wait for the single in-flight fetch instead
//! of stampeding the source.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        let mut guard = self
            .inner
            .lock()
            .expect("manual clock lock should not be poisoned");
        let delta = TimeDelta::from_std(by).unwrap_or_else(|_| TimeDelta::MAX);
        if let Some(next) = guard.checked_add_signed(delta) {
            *guard = next;
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut guard = self
            .inner
            .lock()
            .expect("manual clock lock should not be poisoned");
        *guard = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .inner
            .lock()
            .expect("manual clock lock should not be poisoned")
    }
}

/// Identifies one pipeline result: the source plus the ranges it read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub source_id: String,
    pub ranges: Vec<String>,
}

impl CacheKey {
    pub fn new(source_id: impl Into<String>, ranges: Vec<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ranges,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheState {
    Empty,
    Fresh,
    Stale,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

type Slot<V> = Arc<Mutex<Option<CacheEntry<V>>>>;

pub struct TtlCache<K, V> {
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::MAX),
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_system_clock(ttl: std::time::Duration) -> Self {
        Self::new(ttl, Arc::new(SystemClock))
    }

    pub fn ttl(&self) -> std::time::Duration {
        self.ttl.to_std().unwrap_or_default()
    }

    /// Returns the cached value for `key` while it is fresh, otherwise runs
    /// `fetch` and stores its result until `now + ttl`. An entry is stale
    /// from its expiry instant onwards.
    pub fn get<E>(&self, key: &K, fetch: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        let slot = self.slot(key);
        // A fetch that panicked leaves the slot poisoned but never wrote it.
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);

        let now = self.clock.now();
        let previous = match entry.as_ref() {
            Some(cached) if now < cached.expires_at => {
                debug!(component = "cache", event = "cache.hit", key = ?key);
                return Ok(cached.value.clone());
            }
            Some(_) => CacheState::Stale,
            None => CacheState::Empty,
        };

        info!(
            component = "cache",
            event = "cache.miss",
            key = ?key,
            state = ?previous
        );
        let value = fetch()?;

        let stored_at = self.clock.now();
        *entry = Some(CacheEntry {
            value: value.clone(),
            expires_at: stored_at
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        });
        Ok(value)
    }

    /// Drops any entry for `key`, fresh or not. Returns whether one existed.
    pub fn invalidate(&self, key: &K) -> bool {
        let removed = self
            .slots
            .lock()
            .expect("cache map lock should not be poisoned")
            .remove(key);
        let existed = match removed {
            Some(slot) => slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some(),
            None => false,
        };

        info!(
            component = "cache",
            event = "cache.invalidate",
            key = ?key,
            existed
        );
        existed
    }

    pub fn state(&self, key: &K) -> CacheState {
        let Some(slot) = self
            .slots
            .lock()
            .expect("cache map lock should not be poisoned")
            .get(key)
            .cloned()
        else {
            return CacheState::Empty;
        };

        let entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        match entry.as_ref() {
            Some(cached) if self.clock.now() < cached.expires_at => CacheState::Fresh,
            Some(_) => CacheState::Stale,
            None => CacheState::Empty,
        }
    }

    fn slot(&self, key: &K) -> Slot<V> {
        let mut slots = self
            .slots
            .lock()
            .expect("cache map lock should not be poisoned");
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }
}
