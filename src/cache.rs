//! Bounded store of captured frame batches keyed by stack hash.

use crate::frame::CapturedFrameVariables;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Upper bound of simultaneously cached capture batches. Under a sustained
/// throw rate older batches are evicted before their report arrives;
/// correctness is traded for bounded memory here.
pub const DEFAULT_CAPACITY: usize = 20;

/// LRU map from stack hash to an innermost-first captured frame batch.
///
/// Lookups use take semantics: a hit removes the entry, so a later
/// unrelated exception colliding on the same hash cannot silently reuse
/// stale variables.
pub struct FrameCache {
    inner: Mutex<LruCache<String, Vec<CapturedFrameVariables>>>,
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("infallible");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Insert a batch, evicting the least recently used entry on overflow.
    pub fn put(&self, hash: String, frames: Vec<CapturedFrameVariables>) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.put(hash, frames);
        }
    }

    /// Look up and remove the batch for a hash.
    pub fn take(&self, hash: &str) -> Option<Vec<CapturedFrameVariables>> {
        self.inner.lock().ok()?.pop(hash)
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
