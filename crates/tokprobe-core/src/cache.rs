//! LRU memoization in front of a token-count oracle

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::oracle::TokenOracle;

/// Default number of cached counts
pub const DEFAULT_CACHE_CAPACITY: usize = 1_000;

/// Separates calibration probes from caller-supplied text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Content,
    Calibration,
}

/// Cache key for one oracle measurement.
///
/// Text is stored as a BLAKE3 digest so that probing many prefixes of a large
/// document does not keep copies of every prefix alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: Namespace,
    model: String,
    digest: [u8; 32],
}

impl CacheKey {
    pub fn new(namespace: Namespace, text: &str, model: &str) -> Self {
        Self {
            namespace,
            model: model.to_string(),
            digest: *blake3::hash(text.as_bytes()).as_bytes(),
        }
    }

    pub fn content(text: &str, model: &str) -> Self {
        Self::new(Namespace::Content, text, model)
    }

    pub fn calibration(text: &str, model: &str) -> Self {
        Self::new(Namespace::Calibration, text, model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Outcome of a single cache lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub tokens: usize,
    /// True when the value came from a fresh oracle call
    pub fresh: bool,
}

struct CacheState {
    entries: LruCache<CacheKey, usize>,
    hits: u64,
    misses: u64,
}

/// Thread-safe LRU cache of raw oracle counts.
///
/// The lock is only held for bookkeeping, never across an oracle call.
pub struct MemoizedOracle {
    oracle: Arc<dyn TokenOracle>,
    state: Mutex<CacheState>,
}

impl MemoizedOracle {
    /// Create a cache holding at most `capacity` counts
    pub fn new(oracle: Arc<dyn TokenOracle>, capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or(Error::InvalidCapacity)?;
        Ok(Self {
            oracle,
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        })
    }

    pub fn oracle(&self) -> &dyn TokenOracle {
        self.oracle.as_ref()
    }

    /// Raw oracle count for caller text, served from cache when possible
    pub async fn count(&self, text: &str, model: &str) -> Result<usize> {
        let lookup = self.measure(CacheKey::content(text, model), text).await?;
        Ok(lookup.tokens)
    }

    /// Cached count for `key`, without ever calling the oracle
    pub fn cached(&self, key: &CacheKey) -> Option<usize> {
        let mut state = self.state.lock();
        let tokens = state.entries.get(key).copied()?;
        state.hits += 1;
        Some(tokens)
    }

    /// Count for `key`, measuring `text` with the oracle on a miss
    pub async fn measure(&self, key: CacheKey, text: &str) -> Result<Lookup> {
        {
            let mut state = self.state.lock();
            if let Some(&tokens) = state.entries.get(&key) {
                state.hits += 1;
                return Ok(Lookup {
                    tokens,
                    fresh: false,
                });
            }
            state.misses += 1;
        }

        let tokens = self.oracle.measure(text, key.model()).await?;

        let mut state = self.state.lock();
        if let Some((evicted, _)) = state.entries.push(key.clone(), tokens) {
            if evicted != key {
                tracing::trace!(model = evicted.model(), "evicted least recently used count");
            }
        }

        Ok(Lookup {
            tokens,
            fresh: true,
        })
    }

    pub fn cache_info(&self) -> CacheInfo {
        let state = self.state.lock();
        let lookups = state.hits + state.misses;
        CacheInfo {
            size: state.entries.len(),
            capacity: state.entries.cap().get(),
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups > 0 {
                state.hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }

    /// Drop every entry and reset statistics
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.hits = 0;
        state.misses = 0;
    }
}
