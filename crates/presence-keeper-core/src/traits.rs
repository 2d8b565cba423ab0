//! Capabilities the maintainer consumes from its collaborators.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::{ConnectionHandle, IdentityId, ParentId, ParentScope, StateChange, Target, TargetId};

/// Directory lookup of parent scopes and their targets.
///
/// Lookups are synchronous reads of whatever the client already knows;
/// they must not perform I/O or mutate anything.
pub trait Directory: Send + Sync {
    /// Look up a parent scope by id.
    fn parent_scope(&self, id: ParentId) -> Option<ParentScope>;

    /// Look up a target inside a parent scope.
    fn sub_target(&self, parent: &ParentScope, id: TargetId) -> Option<Target>;
}

/// Connect failure reported by the channel client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The client was already connected; not a failure.
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ConnectError {
    /// Whether this error should be treated as success.
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::AlreadyConnected)
    }
}

/// Move failure reported by the channel client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("No live connection to move")]
    NotConnected,
    #[error("Transport error: {0}")]
    Transport(String),
}

/// The external client that owns the real-time connection.
///
/// The maintainer only observes handles and requests transitions; all
/// protocol work happens behind this trait.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Identity the client is connected as. Used to filter notifications.
    fn identity(&self) -> IdentityId;

    /// Current connection handle for a parent scope, if any.
    async fn current_handle(&self, parent: ParentId) -> Option<ConnectionHandle>;

    /// Open a connection to `target`.
    ///
    /// `auto_reconnect` asks the client to run its own reconnect loop. The
    /// maintainer always passes `false` so that retry timing has one owner.
    async fn connect(
        &self,
        target: &Target,
        auto_reconnect: bool,
        timeout: Duration,
    ) -> Result<(), ConnectError>;

    /// Move an existing live connection to `target`.
    async fn move_to(&self, handle: &ConnectionHandle, target: &Target) -> Result<(), MoveError>;
}

/// Source of asynchronous connection state notifications.
pub trait EventSource: Send + Sync {
    /// Subscribe to state changes from now on.
    fn subscribe(&self) -> BoxStream<'static, StateChange>;
}

impl<T: Directory + ?Sized> Directory for std::sync::Arc<T> {
    fn parent_scope(&self, id: ParentId) -> Option<ParentScope> {
        (**self).parent_scope(id)
    }

    fn sub_target(&self, parent: &ParentScope, id: TargetId) -> Option<Target> {
        (**self).sub_target(parent, id)
    }
}

#[async_trait]
impl<T: ChannelClient + ?Sized> ChannelClient for std::sync::Arc<T> {
    fn identity(&self) -> IdentityId {
        (**self).identity()
    }

    async fn current_handle(&self, parent: ParentId) -> Option<ConnectionHandle> {
        (**self).current_handle(parent).await
    }

    async fn connect(
        &self,
        target: &Target,
        auto_reconnect: bool,
        timeout: Duration,
    ) -> Result<(), ConnectError> {
        (**self).connect(target, auto_reconnect, timeout).await
    }

    async fn move_to(&self, handle: &ConnectionHandle, target: &Target) -> Result<(), MoveError> {
        (**self).move_to(handle, target).await
    }
}

impl<T: EventSource + ?Sized> EventSource for std::sync::Arc<T> {
    fn subscribe(&self) -> BoxStream<'static, StateChange> {
        (**self).subscribe()
    }
}
