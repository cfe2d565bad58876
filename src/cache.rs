use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::adapters::SourceType;

/// How long a processed dataset is served before it is reloaded.
pub const DEFAULT_TTL: Duration = Duration::from_millis(300_000);

/// Entries are scoped to the source that was current when they were written,
/// so results from different sources are never served for one another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub cohort: String,
    pub source: SourceType,
}

impl CacheKey {
    pub fn new(cohort: impl Into<String>, source: SourceType) -> Self {
        CacheKey {
            cohort: cohort.into(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub written_at: Instant,
}

/// Time-boxed result cache. Staleness is checked lazily on read; there is no
/// background eviction.
///
/// Every [`clear`](ResultCache::clear) bumps a generation counter so writers
/// that started before the clear can be turned away.
#[derive(Debug)]
pub struct ResultCache<T> {
    entries: HashMap<CacheKey, CacheEntry<T>>,
    ttl: Duration,
    generation: u64,
}

impl<T: Clone> ResultCache<T> {
    pub fn new(ttl: Duration) -> Self {
        ResultCache {
            entries: HashMap::new(),
            ttl,
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The cached value for `key` if it was written less than one TTL before `now`.
    pub fn get_fresh(&self, key: &CacheKey, now: Instant) -> Option<T> {
        let entry = self.entries.get(key)?;
        if now.saturating_duration_since(entry.written_at) < self.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub fn insert(&mut self, key: CacheKey, value: T, now: Instant) {
        self.entries.insert(key, CacheEntry { value, written_at: now });
    }

    /// Insert only if no clear happened since `generation` was read.
    pub fn insert_if_current(&mut self, generation: u64, key: CacheKey, value: T, now: Instant) -> bool {
        if generation != self.generation {
            return false;
        }
        self.insert(key, value, now);
        true
    }

    /// Drop every entry for every cohort and source.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
