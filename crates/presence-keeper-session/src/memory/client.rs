//! Scriptable in-memory channel client.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use presence_keeper_core::{
    ChannelClient, ConnectError, ConnectionHandle, EventSource, IdentityId, MoveError, ParentId,
    StateChange, Target, TargetId,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

/// Notifications buffered per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 1024;

/// Call counters, readable at any time.
#[derive(Debug, Default)]
struct Stats {
    connects: AtomicUsize,
    moves: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Tracks one in-flight connect or move.
struct InFlight<'a>(&'a Stats);

impl<'a> InFlight<'a> {
    fn start(stats: &'a Stats) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Script {
    connect_failures: VecDeque<ConnectError>,
    move_failures: VecDeque<MoveError>,
    /// Returned for every connect once the queue is empty.
    persistent_failure: Option<ConnectError>,
    last_auto_reconnect: Option<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory channel client.
///
/// Keeps one connection handle per parent scope and broadcasts a
/// [`StateChange`] for every transition, like a real gateway would.
/// Failures are scripted up front; `latency` simulates network time.
pub struct MemoryChannelClient {
    identity: IdentityId,
    latency: Duration,
    handles: RwLock<HashMap<ParentId, ConnectionHandle>>,
    script: Mutex<Script>,
    stats: Stats,
    events: broadcast::Sender<StateChange>,
}

impl MemoryChannelClient {
    /// Create a client with no connections and no simulated latency.
    #[must_use]
    pub fn new(identity: IdentityId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            identity,
            latency: Duration::ZERO,
            handles: RwLock::new(HashMap::new()),
            script: Mutex::new(Script::default()),
            stats: Stats::default(),
            events,
        }
    }

    /// Simulate network time for connect and move.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue failures for the next connect calls, in order.
    pub fn fail_next_connects(&self, errors: impl IntoIterator<Item = ConnectError>) {
        lock(&self.script).connect_failures.extend(errors);
    }

    /// Fail every connect with `error` (after queued failures), or stop
    /// failing with `None`.
    pub fn fail_all_connects(&self, error: Option<ConnectError>) {
        lock(&self.script).persistent_failure = error;
    }

    /// Queue failures for the next move calls, in order.
    pub fn fail_next_moves(&self, errors: impl IntoIterator<Item = MoveError>) {
        lock(&self.script).move_failures.extend(errors);
    }

    /// Number of connect calls so far.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.stats.connects.load(Ordering::SeqCst)
    }

    /// Number of move calls so far.
    #[must_use]
    pub fn move_calls(&self) -> usize {
        self.stats.moves.load(Ordering::SeqCst)
    }

    /// Highest number of connect/move calls ever running at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.stats.max_in_flight.load(Ordering::SeqCst)
    }

    /// `auto_reconnect` flag of the most recent connect call.
    #[must_use]
    pub fn last_auto_reconnect(&self) -> Option<bool> {
        lock(&self.script).last_auto_reconnect
    }

    /// Current handle without going through the trait.
    #[must_use]
    pub fn handle(&self, parent: ParentId) -> Option<ConnectionHandle> {
        self.read_handles().get(&parent).copied()
    }

    /// Place a live connection directly, broadcasting the change.
    pub fn set_connected(&self, parent: ParentId, target: TargetId) {
        self.transition(parent, Some(ConnectionHandle::live(target)));
    }

    /// Drop the connection as the remote side would, broadcasting the loss.
    pub fn drop_connection(&self, parent: ParentId) {
        self.transition(parent, None);
    }

    /// Move the connection somewhere else, broadcasting the move.
    pub fn force_move(&self, parent: ParentId, target: TargetId) {
        self.transition(parent, Some(ConnectionHandle::live(target)));
    }

    /// Let the transport die silently: the handle stays but is no longer
    /// live, and no notification is sent.
    pub fn go_stale(&self, parent: ParentId) {
        let mut handles = self.write_handles();
        if let Some(handle) = handles.get_mut(&parent) {
            handle.live = false;
        }
    }

    fn read_handles(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ParentId, ConnectionHandle>> {
        self.handles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_handles(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<ParentId, ConnectionHandle>> {
        self.handles.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, parent: ParentId, next: Option<ConnectionHandle>) {
        let previous = {
            let mut handles = self.write_handles();
            match next {
                Some(handle) => handles.insert(parent, handle),
                None => handles.remove(&parent),
            }
        };

        let before = previous.filter(ConnectionHandle::is_live).and_then(|h| h.target);
        let after = next.and_then(|h| h.target);
        // No receivers is fine.
        let _ = self.events.send(StateChange {
            identity: self.identity,
            parent,
            before,
            after,
        });
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl ChannelClient for MemoryChannelClient {
    fn identity(&self) -> IdentityId {
        self.identity
    }

    async fn current_handle(&self, parent: ParentId) -> Option<ConnectionHandle> {
        self.handle(parent)
    }

    async fn connect(
        &self,
        target: &Target,
        auto_reconnect: bool,
        timeout: Duration,
    ) -> Result<(), ConnectError> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::start(&self.stats);

        let scripted = {
            let mut script = lock(&self.script);
            script.last_auto_reconnect = Some(auto_reconnect);
            script
                .connect_failures
                .pop_front()
                .or_else(|| script.persistent_failure.clone())
        };

        if self.latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(ConnectError::Timeout(timeout));
        }
        self.simulate_latency().await;

        if let Some(error) = scripted {
            tracing::debug!(target_id = %target.id, %error, "scripted connect failure");
            return Err(error);
        }

        if self.handle(target.parent).is_some_and(|h| h.is_live()) {
            return Err(ConnectError::AlreadyConnected);
        }

        self.transition(target.parent, Some(ConnectionHandle::live(target.id)));
        Ok(())
    }

    async fn move_to(&self, handle: &ConnectionHandle, target: &Target) -> Result<(), MoveError> {
        self.stats.moves.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::start(&self.stats);

        let scripted = lock(&self.script).move_failures.pop_front();
        self.simulate_latency().await;

        if let Some(error) = scripted {
            return Err(error);
        }
        if !handle.is_live() || !self.handle(target.parent).is_some_and(|h| h.is_live()) {
            return Err(MoveError::NotConnected);
        }

        self.transition(target.parent, Some(ConnectionHandle::live(target.id)));
        Ok(())
    }
}

impl EventSource for MemoryChannelClient {
    fn subscribe(&self) -> BoxStream<'static, StateChange> {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|res| async move {
                match res {
                    Ok(change) => Some(change),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "state change subscriber lagged, notifications lost");
                        None
                    }
                }
            })
            .boxed()
    }
}
