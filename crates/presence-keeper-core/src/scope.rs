//! Identifiers and the scope a maintainer keeps present in.

use std::{fmt, num::NonZeroU64, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Create an id, returning `None` for zero.
            #[must_use]
            pub const fn new(raw: u64) -> Option<Self> {
                match NonZeroU64::new(raw) {
                    Some(id) => Some(Self(id)),
                    None => None,
                }
            }

            /// Raw numeric value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw: u64 = s
                    .trim()
                    .parse()
                    .map_err(|_| IdParseError::NotNumeric(s.to_string()))?;
                Self::new(raw).ok_or(IdParseError::Zero)
            }
        }
    };
}

/// Failure to parse an id from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    #[error("id is not numeric: {0:?}")]
    NotNumeric(String),
    #[error("id must be non-zero")]
    Zero,
}

snowflake_id!(
    /// Identifier of a parent scope (the server/space that owns targets).
    ParentId
);

snowflake_id!(
    /// Identifier of a connectable sub-target inside a parent scope.
    TargetId
);

snowflake_id!(
    /// Identifier of a participant whose connection state changes.
    IdentityId
);

/// One maintained session: a parent scope plus the target inside it.
///
/// Immutable once configured. Used as the key of per-scope attempt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// Parent scope that owns the target.
    pub parent: ParentId,
    /// Target the session must stay connected to.
    pub target: TargetId,
}

impl Scope {
    #[must_use]
    pub const fn new(parent: ParentId, target: TargetId) -> Self {
        Self { parent, target }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.parent, self.target)
    }
}

/// A parent scope as known to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentScope {
    pub id: ParentId,
    pub name: String,
}

/// A connectable target, as resolved from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub parent: ParentId,
    pub name: String,
}

/// Observed state of the externally-owned connection for a parent scope.
///
/// The channel client owns the connection; this is only a snapshot.
/// A handle with `live == false` is stale: it exists but the transport
/// reports it is not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHandle {
    /// Target the connection currently points at, if any.
    pub target: Option<TargetId>,
    /// Whether the underlying transport reports connected.
    pub live: bool,
}

impl ConnectionHandle {
    /// A live connection pointing at `target`.
    #[must_use]
    pub const fn live(target: TargetId) -> Self {
        Self {
            target: Some(target),
            live: true,
        }
    }

    /// A handle whose transport is gone.
    #[must_use]
    pub const fn stale(target: Option<TargetId>) -> Self {
        Self {
            target,
            live: false,
        }
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.live && self.target.is_some()
    }

    /// Live and pointing at exactly `target`.
    #[must_use]
    pub fn is_live_at(&self, target: TargetId) -> bool {
        self.live && self.target == Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_id_rejected() {
        assert!(ParentId::new(0).is_none());
        assert_eq!("0".parse::<TargetId>(), Err(IdParseError::Zero));
    }

    #[test]
    fn test_id_parse() {
        let id: ParentId = " 123456789012345678 ".parse().unwrap();
        assert_eq!(id.get(), 123_456_789_012_345_678);
        assert!(matches!(
            "abc".parse::<ParentId>(),
            Err(IdParseError::NotNumeric(_))
        ));
    }

    #[test]
    fn test_handle_liveness() {
        let target = TargetId::new(7).unwrap();
        let other = TargetId::new(8).unwrap();

        assert!(ConnectionHandle::live(target).is_live_at(target));
        assert!(!ConnectionHandle::live(other).is_live_at(target));
        assert!(!ConnectionHandle::stale(Some(target)).is_live_at(target));
        assert!(!ConnectionHandle::stale(None).is_live());
    }

    #[test]
    fn test_id_serializes_as_number() {
        let scope = Scope::new(ParentId::new(1).unwrap(), TargetId::new(2).unwrap());
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, r#"{"parent":1,"target":2}"#);
        assert_eq!(scope.to_string(), "1/2");
    }
}
