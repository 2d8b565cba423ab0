//! Connection state notifications and their classification.

use serde::{Deserialize, Serialize};

use crate::{IdentityId, ParentId, Scope, TargetId};

/// "This identity's connection state changed within this parent scope."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub identity: IdentityId,
    pub parent: ParentId,
    /// Target before the change; `None` if not connected.
    pub before: Option<TargetId>,
    /// Target after the change; `None` if disconnected.
    pub after: Option<TargetId>,
}

/// What a [`StateChange`] means for a maintainer of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Was connected, now is not.
    Lost,
    /// Now connected, but not at the configured target.
    MovedAway,
    /// Now connected at the configured target.
    Arrived,
    /// Nothing moved.
    Unchanged,
    /// Notification about some other identity or parent scope.
    Foreign,
}

impl ChangeKind {
    /// Whether this change calls for a repair attempt.
    #[must_use]
    pub const fn needs_repair(self) -> bool {
        matches!(self, Self::Lost | Self::MovedAway)
    }
}

impl StateChange {
    /// Classify this change from the point of view of `own` keeping `scope`.
    ///
    /// One identity can hold a connection in several parent scopes, so a
    /// change in another parent is foreign even for our own identity.
    #[must_use]
    pub fn classify(&self, own: IdentityId, scope: Scope) -> ChangeKind {
        if self.identity != own || self.parent != scope.parent {
            return ChangeKind::Foreign;
        }
        let target = scope.target;
        match (self.before, self.after) {
            (None, None) => ChangeKind::Unchanged,
            (Some(_), None) => ChangeKind::Lost,
            (_, Some(after)) if after == target => ChangeKind::Arrived,
            (before, Some(after)) if before == Some(after) => ChangeKind::Unchanged,
            (_, Some(_)) => ChangeKind::MovedAway,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> TargetId {
        TargetId::new(raw).unwrap()
    }

    fn me() -> IdentityId {
        IdentityId::new(99).unwrap()
    }

    fn home() -> ParentId {
        ParentId::new(7).unwrap()
    }

    fn at(target: u64) -> Scope {
        Scope::new(home(), id(target))
    }

    fn change(before: Option<u64>, after: Option<u64>) -> StateChange {
        StateChange {
            identity: me(),
            parent: home(),
            before: before.map(id),
            after: after.map(id),
        }
    }

    #[test]
    fn test_disconnect_is_lost() {
        assert_eq!(change(Some(1), None).classify(me(), at(1)), ChangeKind::Lost);
        assert_eq!(change(Some(2), None).classify(me(), at(1)), ChangeKind::Lost);
    }

    #[test]
    fn test_arrival_at_target_never_repairs() {
        for before in [None, Some(1), Some(2)] {
            let kind = change(before, Some(1)).classify(me(), at(1));
            assert_eq!(kind, ChangeKind::Arrived);
            assert!(!kind.needs_repair());
        }
    }

    #[test]
    fn test_move_elsewhere() {
        assert_eq!(change(Some(1), Some(3)).classify(me(), at(1)), ChangeKind::MovedAway);
        assert_eq!(change(None, Some(3)).classify(me(), at(1)), ChangeKind::MovedAway);
        assert_eq!(change(Some(3), Some(3)).classify(me(), at(1)), ChangeKind::Unchanged);
    }

    #[test]
    fn test_other_identity_ignored() {
        let other = StateChange {
            identity: IdentityId::new(5).unwrap(),
            parent: home(),
            before: Some(id(1)),
            after: None,
        };
        assert_eq!(other.classify(me(), at(1)), ChangeKind::Foreign);
    }

    #[test]
    fn test_other_parent_ignored() {
        // Our identity joining a target in another parent scope.
        let joined = StateChange {
            parent: ParentId::new(8).unwrap(),
            ..change(None, Some(20))
        };
        assert_eq!(joined.classify(me(), at(1)), ChangeKind::Foreign);
        assert!(!joined.classify(me(), at(1)).needs_repair());

        let dropped = StateChange {
            parent: ParentId::new(8).unwrap(),
            ..change(Some(20), None)
        };
        assert_eq!(dropped.classify(me(), at(1)), ChangeKind::Foreign);
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&change(Some(1), None)).unwrap();
        assert_eq!(json, r#"{"identity":99,"parent":7,"before":1,"after":null}"#);

        let parsed: StateChange = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.before, Some(id(1)));
    }
}
