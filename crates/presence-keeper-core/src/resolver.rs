//! Resolution of a configured scope into a connectable target.

use thiserror::Error;

use crate::{Directory, ParentId, Scope, Target, TargetId};

/// The configured scope does not exist in the directory.
///
/// Configuration errors, not transient ones: callers should stop retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Parent scope not found: {0}")]
    ScopeNotFound(ParentId),
    #[error("Target {target} not found in parent scope {parent}")]
    TargetNotFound { parent: ParentId, target: TargetId },
}

/// Resolves scopes against a [`Directory`].
#[derive(Debug, Clone)]
pub struct TargetResolver<D> {
    directory: D,
}

impl<D: Directory> TargetResolver<D> {
    #[must_use]
    pub const fn new(directory: D) -> Self {
        Self { directory }
    }

    /// Access the underlying directory.
    #[must_use]
    pub const fn directory(&self) -> &D {
        &self.directory
    }

    /// Resolve `scope` into a target.
    ///
    /// # Errors
    /// Returns `ScopeNotFound` if the parent is unknown, `TargetNotFound` if
    /// the parent exists but does not contain the target.
    pub fn resolve(&self, scope: &Scope) -> Result<Target, ResolveError> {
        let parent = self
            .directory
            .parent_scope(scope.parent)
            .ok_or(ResolveError::ScopeNotFound(scope.parent))?;

        self.directory
            .sub_target(&parent, scope.target)
            .ok_or(ResolveError::TargetNotFound {
                parent: scope.parent,
                target: scope.target,
            })
    }
}
