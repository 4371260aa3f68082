//! Compile-verdict cache keyed by exact source text
//!
//! The engine's compiled form is bound to the single-threaded context that
//! produced it, so what is shared across runs is the verdict of compiling a
//! source: its error diagnostics, empty when it compiled. A hit with errors
//! short-circuits execution without starting an engine thread. A hit without
//! errors lets the engine evaluate directly, skipping the diagnostic pass.
//!
//! Eviction is a coarse batch: when an insert pushes the cache past its
//! capacity, the oldest-inserted half is dropped in one sweep. Lookups do not
//! refresh an entry's age, so this is not LRU. One sweep per
//! `capacity / 2` inserts keeps the lock short on the hot path.

use crate::error::Diagnostic;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Outcome of compiling one exact source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileVerdict {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileVerdict {
    pub fn compiled() -> Self {
        Self {
            diagnostics: Vec::new(),
        }
    }

    pub fn rejected(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }

    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<Arc<str>, CompileVerdict>,
    // Insertion order, oldest first
    order: VecDeque<Arc<str>>,
}

/// Bounded map from source text to compile verdict
pub struct ScriptCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl ScriptCache {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // A panic while holding the lock cannot leave the map half-updated
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, source: &str) -> Option<CompileVerdict> {
        self.lock().entries.get(source).cloned()
    }

    /// Insert a verdict, returning how many entries were evicted
    pub fn insert(&self, source: &str, verdict: CompileVerdict) -> usize {
        let mut inner = self.lock();

        if let Some(existing) = inner.entries.get_mut(source) {
            *existing = verdict;
            return 0;
        }

        let key: Arc<str> = Arc::from(source);
        inner.order.push_back(Arc::clone(&key));
        inner.entries.insert(key, verdict);

        if inner.entries.len() > self.capacity {
            Self::evict_oldest(&mut inner, (self.capacity / 2).max(1))
        } else {
            0
        }
    }

    fn evict_oldest(inner: &mut CacheInner, count: usize) -> usize {
        let mut evicted = 0;
        while evicted < count {
            let Some(key) = inner.order.pop_front() else {
                break;
            };
            if inner.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }
        tracing::debug!(
            "Script cache evicted {} entries ({} remain)",
            evicted,
            inner.entries.len()
        );
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}
