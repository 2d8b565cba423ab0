//! In-memory directory of parent scopes and targets.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use presence_keeper_core::{Directory, ParentId, ParentScope, Target, TargetId};

struct Entry {
    scope: ParentScope,
    targets: HashMap<TargetId, Target>,
}

/// In-memory directory.
///
/// Lookups are plain map reads; entries can be added and removed at any
/// time to simulate scopes appearing and disappearing.
pub struct MemoryDirectory {
    entries: RwLock<HashMap<ParentId, Entry>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Add (or rename) a parent scope.
    pub fn add_parent(&self, id: ParentId, name: impl Into<String>) {
        let name = name.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(id)
            .and_modify(|e| e.scope.name.clone_from(&name))
            .or_insert_with(|| Entry {
                scope: ParentScope { id, name },
                targets: HashMap::new(),
            });
    }

    /// Add a target to an existing parent scope.
    ///
    /// Returns `false` if the parent is unknown.
    pub fn add_target(&self, parent: ParentId, id: TargetId, name: impl Into<String>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(&parent) else {
            return false;
        };
        entry.targets.insert(
            id,
            Target {
                id,
                parent,
                name: name.into(),
            },
        );
        true
    }

    /// Remove a target, returning it if it existed.
    pub fn remove_target(&self, parent: ParentId, id: TargetId) -> Option<Target> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&parent)
            .and_then(|e| e.targets.remove(&id))
    }

    /// Remove a parent scope and all of its targets.
    pub fn remove_parent(&self, id: ParentId) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory for MemoryDirectory {
    fn parent_scope(&self, id: ParentId) -> Option<ParentScope> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|e| e.scope.clone())
    }

    fn sub_target(&self, parent: &ParentScope, id: TargetId) -> Option<Target> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&parent.id)
            .and_then(|e| e.targets.get(&id).cloned())
    }
}
