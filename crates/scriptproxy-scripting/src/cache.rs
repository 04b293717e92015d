//! Engine instance reuse across invocations

use crate::engine::{EngineFactory, EngineInstance};
use crate::error::Result;
use crate::script::{ScriptRole, ScriptVersion};
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug)]
struct CachedEngine {
    version_id: u64,
    instance: Arc<dyn EngineInstance>,
}

/// One engine slot per role, keyed by [`ScriptVersion::id`].
///
/// A slot is never mutated in place: a new version's engine replaces the
/// whole entry, and calls still holding the old instance finish on it.
#[derive(Debug, Default)]
pub struct EngineCache {
    slots: [ArcSwapOption<CachedEngine>; 2],
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EngineCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine for `version`, building it with `factory` on a miss
    pub fn get_or_build(
        &self,
        version: &ScriptVersion,
        factory: &dyn EngineFactory,
    ) -> Result<Arc<dyn EngineInstance>> {
        let slot = &self.slots[version.role().index()];

        if let Some(cached) = slot.load().as_ref() {
            if cached.version_id == version.id() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(&cached.instance));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(role = %version.role(), version_id = version.id(), "Engine cache miss");

        let instance = factory.build(version.source(), version.entry_point())?;
        self.insert(version, Arc::clone(&instance));
        Ok(instance)
    }

    /// Store an already built engine for `version`.
    ///
    /// Version ids only grow, so a slot already holding a newer version is
    /// left alone.
    pub fn insert(&self, version: &ScriptVersion, instance: Arc<dyn EngineInstance>) {
        let entry = Arc::new(CachedEngine {
            version_id: version.id(),
            instance,
        });

        self.slots[version.role().index()].rcu(|current| match current {
            Some(cached) if cached.version_id >= entry.version_id => Some(Arc::clone(cached)),
            _ => Some(Arc::clone(&entry)),
        });
    }

    /// Drop the cached engine of `role`
    pub fn invalidate(&self, role: ScriptRole) {
        self.slots[role.index()].store(None);
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached_engines: self.slots.iter().filter(|s| s.load().is_some()).count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of roles with a cached engine
    pub cached_engines: usize,
    /// Cache hits
    pub hits: u64,
    /// Cache misses (engine builds)
    pub misses: u64,
}

impl CacheStats {
    /// Get cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
