//! Presence maintainer: keeps one scope connected.
//!
//! Three stimuli start an attempt sequence: the periodic health check, a
//! drop/move notification for our own identity, and a manual repair
//! request. All of them go through the [`AttemptSerializer`], so a trigger
//! that arrives while a sequence is running folds into it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, stream::BoxStream};
use presence_keeper_core::{
    ChangeKind, ChannelClient, ConnectError, Directory, EventSource, PresenceConfig, ResolveError,
    StateChange, Target, TargetResolver,
};
use serde::Serialize;
use tokio::{
    sync::watch,
    task::{JoinHandle, JoinSet},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::serializer::{AttemptGuard, AttemptSerializer};

/// Observable state of the maintainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    /// No known problem.
    Idle,
    /// Resolving and connecting/moving, attempt number `attempt` (1-based).
    Attempting { attempt: u32 },
    /// Waiting `delay` after failed attempt `attempt`.
    BackingOff { attempt: u32, delay: Duration },
    /// Sequence ended after `attempts` failures. Stays until the next
    /// sequence starts.
    GivenUp { attempts: u32 },
}

/// What started an attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    HealthCheck,
    Notification(ChangeKind),
    Manual,
}

/// Result of one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Another sequence holds the scope; this trigger did nothing.
    Skipped,
    /// Notification did not call for a repair.
    Ignored(ChangeKind),
    /// Already live at the target.
    AlreadyPresent,
    /// Connected after `attempts` tries (1 = first try).
    Connected { attempts: u32 },
    /// Moved an existing connection to the target.
    Moved,
    /// The move failed and the client, still connected elsewhere, refused
    /// a fresh connect. Not present; the next trigger tries again.
    MoveFailed,
    /// Target could not be resolved; not retried.
    Misconfigured(ResolveError),
    /// Attempt ceiling reached.
    GaveUp { attempts: u32 },
    /// Shutdown interrupted the trigger.
    Cancelled,
}

/// How one attempt succeeded.
enum Success {
    AlreadyPresent,
    Moved,
    Connected,
    StuckElsewhere,
}

struct Inner<D, C> {
    config: PresenceConfig,
    resolver: TargetResolver<D>,
    client: C,
    serializer: Arc<AttemptSerializer>,
    phase: watch::Sender<Phase>,
    /// Number of the latest sequence to take the guard.
    sequence: AtomicU64,
    shutdown: CancellationToken,
}

/// Supervised-reconnect state machine for one scope.
///
/// Cheap to clone; clones share state.
pub struct PresenceMaintainer<D, C> {
    inner: Arc<Inner<D, C>>,
}

impl<D, C> Clone for PresenceMaintainer<D, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D, C> PresenceMaintainer<D, C>
where
    D: Directory + 'static,
    C: ChannelClient + 'static,
{
    /// Create a maintainer with its own serializer.
    #[must_use]
    pub fn new(config: PresenceConfig, directory: D, client: C) -> Self {
        let serializer = Arc::new(AttemptSerializer::new(config.backoff.base));
        Self::with_serializer(config, directory, client, serializer)
    }

    /// Create a maintainer sharing `serializer` with maintainers of other
    /// scopes.
    #[must_use]
    pub fn with_serializer(
        config: PresenceConfig,
        directory: D,
        client: C,
        serializer: Arc<AttemptSerializer>,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                resolver: TargetResolver::new(directory),
                client,
                serializer,
                phase,
                sequence: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PresenceConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn serializer(&self) -> &Arc<AttemptSerializer> {
        &self.inner.serializer
    }

    #[must_use]
    pub fn client(&self) -> &C {
        &self.inner.client
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    /// Receiver that observes every phase change.
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    /// Stop the maintainer. In-flight waits end, guards are released and
    /// [`PresenceMaintainer::run`] returns.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Token cancelled on shutdown.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    fn set_phase(&self, phase: Phase) {
        self.inner.phase.send_replace(phase);
    }

    /// Periodic check: start a sequence if the connection is absent, stale
    /// or at the wrong target.
    pub async fn health_check(&self) -> Outcome {
        let scope = self.inner.config.scope;
        if self.inner.serializer.is_in_progress(&scope) {
            debug!(%scope, "health check: attempt in progress");
            return Outcome::Skipped;
        }

        match self.inner.client.current_handle(scope.parent).await {
            Some(handle) if handle.is_live_at(scope.target) => {
                debug!(%scope, "health check: present");
                Outcome::AlreadyPresent
            }
            handle => {
                info!(%scope, ?handle, "health check: not present at target");
                self.attempt_sequence(Trigger::HealthCheck).await
            }
        }
    }

    /// React to a connection state notification.
    ///
    /// Only losses and moves away from the target of our own identity are
    /// repaired, after the configured debounce.
    pub async fn handle_state_change(&self, change: StateChange) -> Outcome {
        let scope = self.inner.config.scope;
        let kind = change.classify(self.inner.client.identity(), scope);
        if !kind.needs_repair() {
            debug!(?kind, ?change, "state change needs no repair");
            return Outcome::Ignored(kind);
        }

        let debounce = self.inner.config.debounce;
        warn!(?kind, before = ?change.before, after = ?change.after, ?debounce, "connection left target, repairing");
        tokio::select! {
            () = self.inner.shutdown.cancelled() => return Outcome::Cancelled,
            () = tokio::time::sleep(debounce) => {}
        }
        self.attempt_sequence(Trigger::Notification(kind)).await
    }

    /// Run one sequence right now, regardless of the current handle.
    pub async fn request_repair(&self) -> Outcome {
        info!(scope = %self.inner.config.scope, "manual repair requested");
        self.attempt_sequence(Trigger::Manual).await
    }

    async fn attempt_sequence(&self, trigger: Trigger) -> Outcome {
        let scope = self.inner.config.scope;
        if self.inner.shutdown.is_cancelled() {
            return Outcome::Cancelled;
        }
        let Some(guard) = self.inner.serializer.enter(&scope) else {
            debug!(%scope, ?trigger, "attempt already in progress, folding trigger");
            return Outcome::Skipped;
        };

        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let span = info_span!("attempt_sequence", id = %Uuid::new_v4(), %scope, ?trigger);
        let outcome = self.drive(&guard).instrument(span).await;
        let resting = match outcome {
            Outcome::GaveUp { attempts } => Phase::GivenUp { attempts },
            _ => Phase::Idle,
        };

        // Release before publishing so observers of the resting phase can
        // enter. A sequence that entered in between owns the phase now.
        drop(guard);
        self.inner.phase.send_if_modified(|phase| {
            if self.inner.sequence.load(Ordering::SeqCst) != sequence {
                return false;
            }
            *phase = resting;
            true
        });
        outcome
    }

    async fn drive(&self, guard: &AttemptGuard) -> Outcome {
        let inner = &self.inner;
        let scope = inner.config.scope;
        let policy = inner.config.backoff;

        loop {
            let attempt = guard.attempt_count().saturating_add(1);
            self.set_phase(Phase::Attempting { attempt });

            let target = match inner.resolver.resolve(&scope) {
                Ok(target) => target,
                Err(e) => {
                    warn!(error = %e, "cannot resolve target, not retrying");
                    guard.reset();
                    return Outcome::Misconfigured(e);
                }
            };

            let error = match self.attempt_once(&target).await {
                Ok(success) => {
                    guard.reset();
                    return match success {
                        Success::AlreadyPresent => Outcome::AlreadyPresent,
                        Success::Moved => Outcome::Moved,
                        Success::StuckElsewhere => Outcome::MoveFailed,
                        Success::Connected => {
                            info!(attempt, "connected to {}", target.name);
                            Outcome::Connected { attempts: attempt }
                        }
                    };
                }
                Err(e) => e,
            };

            let delay = policy.delay_for(attempt);
            warn!(attempt, ?delay, error = %error, "connect failed, backing off");
            self.set_phase(Phase::BackingOff { attempt, delay });
            tokio::select! {
                () = inner.shutdown.cancelled() => {
                    debug!("backoff interrupted by shutdown");
                    return Outcome::Cancelled;
                }
                () = tokio::time::sleep(delay) => {}
            }

            let failed = guard.record_failure(policy.delay_for(attempt.saturating_add(1)));
            if policy.is_exhausted(failed) {
                warn!(attempts = failed, "attempt ceiling reached, waiting for next trigger");
                guard.reset();
                return Outcome::GaveUp { attempts: failed };
            }
        }
    }

    /// One connect or move against the client.
    async fn attempt_once(&self, target: &Target) -> Result<Success, ConnectError> {
        let inner = &self.inner;
        let handle = inner.client.current_handle(target.parent).await;
        let mut move_failed = false;

        match handle {
            Some(handle) if handle.is_live_at(target.id) => {
                debug!("already connected to target");
                return Ok(Success::AlreadyPresent);
            }
            Some(handle) if handle.is_live() => {
                info!(from = ?handle.target, to = %target.id, "connected elsewhere, moving");
                match inner.client.move_to(&handle, target).await {
                    Ok(()) => return Ok(Success::Moved),
                    Err(e) => {
                        warn!(error = %e, "move failed, connecting instead");
                        move_failed = true;
                    }
                }
            }
            _ => {}
        }

        let timeout = inner.config.connect_timeout;
        info!(target_id = %target.id, ?timeout, "connecting");
        // The client's own reconnect loop stays off; retries are ours.
        let result = tokio::time::timeout(timeout, inner.client.connect(target, false, timeout))
            .await
            .unwrap_or(Err(ConnectError::Timeout(timeout)));

        match result {
            Ok(()) => Ok(Success::Connected),
            Err(e) if e.is_benign() && move_failed => {
                warn!("still connected elsewhere after failed move");
                Ok(Success::StuckElsewhere)
            }
            Err(e) if e.is_benign() => {
                debug!("client reports already connected");
                Ok(Success::AlreadyPresent)
            }
            Err(e) => Err(e),
        }
    }

    /// Drive health checks and notifications until shutdown.
    ///
    /// The first health check runs immediately. Every stimulus runs in its
    /// own task so debounce and backoff waits never stall the loop.
    pub async fn run(self, mut events: BoxStream<'static, StateChange>) {
        let shutdown = self.inner.shutdown.clone();
        let mut ticker = tokio::time::interval(self.inner.config.health_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks = JoinSet::new();

        info!(scope = %self.inner.config.scope, "presence maintainer started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let this = self.clone();
                    tasks.spawn(async move { this.health_check().await });
                }
                next = events.next() => match next {
                    Some(change) => {
                        let this = self.clone();
                        tasks.spawn(async move { this.handle_state_change(change).await });
                    }
                    None => {
                        warn!("event source closed, relying on health checks");
                        events = futures::stream::pending().boxed();
                    }
                },
                Some(joined) = tasks.join_next() => match joined {
                    Ok(outcome) => debug!(?outcome, "trigger finished"),
                    Err(e) if e.is_panic() => error!(error = %e, "trigger task panicked"),
                    Err(_) => {}
                },
            }
        }

        // Aborting drops any held guard, which releases the scope.
        tasks.shutdown().await;
        self.set_phase(Phase::Idle);
        info!(scope = %self.inner.config.scope, "presence maintainer stopped");
    }

    /// Subscribe to `source` and spawn [`PresenceMaintainer::run`].
    pub fn spawn(&self, source: &impl EventSource) -> JoinHandle<()> {
        let events = source.subscribe();
        tokio::spawn(self.clone().run(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serialization() {
        let phase = Phase::BackingOff {
            attempt: 2,
            delay: Duration::from_secs(4),
        };
        let json = serde_json::to_value(phase).unwrap();
        assert_eq!(json["phase"], "backing_off");
        assert_eq!(json["attempt"], 2);
    }
}
