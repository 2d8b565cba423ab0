//! Core abstractions for keeping a channel session present.
//!
//! This crate provides the fundamental building blocks:
//! - `Scope` and ids - What a maintainer keeps present in
//! - `TargetResolver` - Scope to connectable target, no side effects
//! - `BackoffPolicy` - Bounded exponential retry timing
//! - `StateChange` - Connection notifications and their classification
//! - `PresenceConfig` - Validated configuration
//! - Directory, channel client and event source traits

pub mod backoff;
pub mod config;
pub mod event;
pub mod resolver;
pub mod scope;
pub mod traits;

pub use backoff::BackoffPolicy;
pub use config::{ConfigError, PresenceConfig};
pub use event::{ChangeKind, StateChange};
pub use resolver::{ResolveError, TargetResolver};
pub use scope::{ConnectionHandle, IdentityId, ParentId, ParentScope, Scope, Target, TargetId};
pub use traits::{ChannelClient, ConnectError, Directory, EventSource, MoveError};
