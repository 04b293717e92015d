//! Active script set

use crate::script::{ScriptRole, ScriptVersion};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One complete, immutable assignment of a version to every role
#[derive(Debug, Clone)]
pub struct ActiveScriptSet {
    slots: [Arc<ScriptVersion>; 2],
}

impl ActiveScriptSet {
    /// Set holding the compiled-in default for every role
    pub fn defaults() -> Self {
        Self {
            slots: ScriptRole::ALL.map(|role| Arc::new(ScriptVersion::default_for(role))),
        }
    }

    /// Version active for `role`
    pub fn get(&self, role: ScriptRole) -> &Arc<ScriptVersion> {
        &self.slots[role.index()]
    }

    fn with(&self, version: Arc<ScriptVersion>) -> Self {
        let mut slots = self.slots.clone();
        let index = version.role().index();
        slots[index] = version;
        Self { slots }
    }
}

/// Process-wide holder of the active script set.
///
/// Readers load a snapshot without locking; the reload supervisor swaps in a
/// whole new set. A reader therefore always sees complete versions, and a
/// reload never waits for in-flight traffic.
#[derive(Debug)]
pub struct ScriptStore {
    active: ArcSwap<ActiveScriptSet>,
    generation: AtomicU64,
}

impl ScriptStore {
    /// Store initialised with the default scripts
    pub fn new() -> Self {
        Self {
            active: ArcSwap::from_pointee(ActiveScriptSet::defaults()),
            generation: AtomicU64::new(0),
        }
    }

    /// Version currently active for `role`. Never fails.
    pub fn current(&self, role: ScriptRole) -> Arc<ScriptVersion> {
        Arc::clone(self.active.load().get(role))
    }

    /// Both roles from one consistent snapshot
    pub fn snapshot(&self) -> Arc<ActiveScriptSet> {
        self.active.load_full()
    }

    /// Atomically make `version` the active version of its role.
    ///
    /// Returns the version it replaced.
    pub fn replace(&self, version: ScriptVersion) -> Arc<ScriptVersion> {
        let role = version.role();
        let version = Arc::new(version);

        let previous = self
            .active
            .rcu(|set| Arc::new(set.with(Arc::clone(&version))));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        debug!(
            role = %role,
            version_id = version.id(),
            generation,
            "Active script replaced"
        );

        Arc::clone(previous.get(role))
    }

    /// Number of accepted replacements so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Default for ScriptStore {
    fn default() -> Self {
        Self::new()
    }
}
