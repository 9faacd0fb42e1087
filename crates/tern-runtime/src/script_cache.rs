//! Process-wide cache of compiled units.
//!
//! Entries never keep a compiled unit alive on their own under
//! [`CacheRetention::Weak`]: once every script holding the unit dropped it,
//! the next lookup of its key drops the entry and misses. [`ScriptCache::purge`]
//! sweeps all such entries at once.
//! [`CacheRetention::Lru`] additionally pins the most recently used units.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::engine::CompiledUnit;
use crate::error::RuntimeError;
use crate::syntax_error::SyntaxError;

/// How long the cache keeps compiled units alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum CacheRetention {
    /// Only as long as some script uses the unit
    #[default]
    Weak,
    /// Additionally pin the `capacity` most recently used units
    Lru { capacity: usize },
}

/// Outcome of one compilation, keyed by resource path.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    compiled: Option<Weak<dyn Any + Send + Sync>>,
    checksum: i64,
    errors: Vec<SyntaxError>,
    failure: Option<RuntimeError>,
}

impl CacheEntry {
    pub fn compiled(unit: &CompiledUnit, checksum: i64, errors: Vec<SyntaxError>) -> Self {
        Self {
            compiled: Some(Arc::downgrade(unit)),
            checksum,
            errors,
            failure: None,
        }
    }

    pub fn failed(failure: RuntimeError, checksum: i64, errors: Vec<SyntaxError>) -> Self {
        Self {
            compiled: None,
            checksum,
            errors,
            failure: Some(failure),
        }
    }

    /// The compiled unit, if it is still alive.
    pub fn unit(&self) -> Option<CompiledUnit> {
        self.compiled.as_ref().and_then(Weak::upgrade)
    }

    /// Resource checksum at compile time.
    pub fn checksum(&self) -> i64 {
        self.checksum
    }

    pub fn errors(&self) -> &[SyntaxError] {
        &self.errors
    }

    pub fn failure(&self) -> Option<&RuntimeError> {
        self.failure.as_ref()
    }

    fn is_reclaimed(&self) -> bool {
        self.compiled
            .as_ref()
            .is_some_and(|unit| unit.strong_count() == 0)
    }
}

#[derive(Debug)]
pub struct ScriptCache {
    entries: DashMap<String, CacheEntry>,
    retention: CacheRetention,
    pinned: Mutex<VecDeque<(String, CompiledUnit)>>,
}

impl ScriptCache {
    pub fn new(retention: CacheRetention) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
            pinned: Mutex::new(VecDeque::new()),
        }
    }

    pub fn retention(&self) -> CacheRetention {
        self.retention
    }

    /// Look up the entry for `key`, dropping it if its unit was reclaimed.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_reclaimed())
            .is_some()
        {
            trace!(path = %key, "script cache miss (reclaimed)");
            return None;
        }
        let entry = self.entries.get(key).map(|e| e.value().clone())?;
        if entry.is_reclaimed() {
            return None;
        }
        if let Some(unit) = entry.unit() {
            self.pin(key, unit);
        }
        trace!(path = %key, "script cache hit");
        Some(entry)
    }

    /// Store `entry` for `key`, replacing whatever was there.
    pub fn put(&self, key: &str, entry: CacheEntry) {
        if let Some(unit) = entry.unit() {
            self.pin(key, unit);
        }
        self.entries.insert(key.to_string(), entry);
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
        self.pinned.lock().retain(|(k, _)| k != key);
    }

    pub fn clear(&self) {
        self.pinned.lock().clear();
        self.entries.clear();
    }

    /// Drop entries whose compiled unit was reclaimed. Returns how many.
    pub fn purge(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_reclaimed());
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            trace!(purged, "purged reclaimed script cache entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn pin(&self, key: &str, unit: CompiledUnit) {
        let CacheRetention::Lru { capacity } = self.retention else {
            return;
        };
        let mut pinned = self.pinned.lock();
        pinned.retain(|(k, _)| k != key);
        if capacity == 0 {
            return;
        }
        pinned.push_back((key.to_string(), unit));
        while pinned.len() > capacity {
            pinned.pop_front();
        }
    }
}

impl Default for ScriptCache {
    fn default() -> Self {
        Self::new(CacheRetention::default())
    }
}
