//! Per-scope guard that keeps attempts from overlapping.
//!
//! The serializer never queues: a trigger that finds its scope busy is
//! told so immediately and is expected to skip its work.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use presence_keeper_core::{Scope, backoff::DEFAULT_BASE_DELAY};

/// Attempt bookkeeping for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    /// An attempt sequence currently holds the scope.
    pub in_progress: bool,
    /// Failed attempts in the current sequence.
    pub attempt_count: u32,
    /// Delay that the next failure will wait.
    pub next_backoff: Duration,
}

impl AttemptState {
    const fn idle(base: Duration) -> Self {
        Self {
            in_progress: false,
            attempt_count: 0,
            next_backoff: base,
        }
    }
}

type Slot = Arc<Mutex<AttemptState>>;

fn lock(slot: &Mutex<AttemptState>) -> MutexGuard<'_, AttemptState> {
    // Critical sections only copy plain data, so a poisoned lock holds
    // consistent state.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Non-blocking per-scope mutual exclusion.
///
/// Each scope has its own lock. The scope map is locked only to find or
/// create a slot, so a busy scope never delays another one.
#[derive(Debug)]
pub struct AttemptSerializer {
    base: Duration,
    slots: Mutex<HashMap<Scope, Slot>>,
}

impl Default for AttemptSerializer {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY)
    }
}

impl AttemptSerializer {
    /// Create a serializer whose idle state carries `base` as next backoff.
    #[must_use]
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, scope: &Scope) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(*scope)
                .or_insert_with(|| Arc::new(Mutex::new(AttemptState::idle(self.base)))),
        )
    }

    /// Mark `scope` as in progress.
    ///
    /// Returns `false` without side effects if it already is.
    pub fn try_enter(&self, scope: &Scope) -> bool {
        let slot = self.slot(scope);
        let mut state = lock(&slot);
        if state.in_progress {
            false
        } else {
            state.in_progress = true;
            true
        }
    }

    /// Clear the in-progress flag of `scope` unconditionally.
    pub fn exit(&self, scope: &Scope) {
        let slot = self.slot(scope);
        lock(&slot).in_progress = false;
    }

    /// Guarded form of [`AttemptSerializer::try_enter`].
    ///
    /// The returned guard releases the scope when dropped, including when
    /// the owning task is aborted.
    #[must_use]
    pub fn enter(&self, scope: &Scope) -> Option<AttemptGuard> {
        let slot = self.slot(scope);
        {
            let mut state = lock(&slot);
            if state.in_progress {
                return None;
            }
            state.in_progress = true;
        }
        Some(AttemptGuard {
            scope: *scope,
            base: self.base,
            slot,
        })
    }

    /// Snapshot of the state of `scope`, if it was ever entered.
    #[must_use]
    pub fn state(&self, scope: &Scope) -> Option<AttemptState> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(scope).map(|slot| *lock(slot))
    }

    /// Whether an attempt sequence currently holds `scope`.
    #[must_use]
    pub fn is_in_progress(&self, scope: &Scope) -> bool {
        self.state(scope).is_some_and(|s| s.in_progress)
    }
}

/// Exclusive hold on one scope for the length of an attempt sequence.
///
/// Dropping the guard ends the sequence: the attempt count and backoff are
/// reset and the scope is released.
#[derive(Debug)]
pub struct AttemptGuard {
    scope: Scope,
    base: Duration,
    slot: Slot,
}

impl AttemptGuard {
    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Failed attempts so far in this sequence.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        lock(&self.slot).attempt_count
    }

    /// Count one more failed attempt and remember the next delay.
    ///
    /// Returns the new attempt count.
    pub fn record_failure(&self, next_backoff: Duration) -> u32 {
        let mut state = lock(&self.slot);
        state.attempt_count = state.attempt_count.saturating_add(1);
        state.next_backoff = next_backoff;
        state.attempt_count
    }

    /// Reset the count and backoff while keeping the scope held.
    pub fn reset(&self) {
        let mut state = lock(&self.slot);
        state.attempt_count = 0;
        state.next_backoff = self.base;
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        *lock(&self.slot) = AttemptState::idle(self.base);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use presence_keeper_core::{ParentId, TargetId};

    use super::*;

    fn scope(target: u64) -> Scope {
        Scope::new(ParentId::new(1).unwrap(), TargetId::new(target).unwrap())
    }

    #[test]
    fn test_try_enter_twice() {
        let serializer = AttemptSerializer::default();
        assert!(serializer.try_enter(&scope(1)));
        assert!(!serializer.try_enter(&scope(1)));

        serializer.exit(&scope(1));
        assert!(serializer.try_enter(&scope(1)));
    }

    #[test]
    fn test_state_created_lazily() {
        let serializer = AttemptSerializer::new(Duration::from_secs(3));
        assert!(serializer.state(&scope(1)).is_none());

        let _guard = serializer.enter(&scope(1)).unwrap();
        let state = serializer.state(&scope(1)).unwrap();
        assert_eq!(
            state,
            AttemptState {
                in_progress: true,
                attempt_count: 0,
                next_backoff: Duration::from_secs(3),
            }
        );
    }

    #[test]
    fn test_scopes_are_independent() {
        let serializer = AttemptSerializer::default();
        let _a = serializer.enter(&scope(1)).unwrap();
        assert!(serializer.enter(&scope(2)).is_some());
        assert!(serializer.enter(&scope(1)).is_none());
    }

    #[test]
    fn test_guard_drop_releases_and_resets() {
        let serializer = AttemptSerializer::default();
        let guard = serializer.enter(&scope(1)).unwrap();
        assert_eq!(guard.record_failure(Duration::from_secs(4)), 1);
        assert_eq!(guard.record_failure(Duration::from_secs(8)), 2);
        assert!(serializer.is_in_progress(&scope(1)));

        drop(guard);
        let state = serializer.state(&scope(1)).unwrap();
        assert!(!state.in_progress);
        assert_eq!(state.attempt_count, 0);
        assert_eq!(state.next_backoff, DEFAULT_BASE_DELAY);
    }

    #[test]
    fn test_reset_keeps_hold() {
        let serializer = AttemptSerializer::default();
        let guard = serializer.enter(&scope(1)).unwrap();
        guard.record_failure(Duration::from_secs(4));
        guard.reset();
        assert_eq!(guard.attempt_count(), 0);
        assert!(serializer.is_in_progress(&scope(1)));
    }

    #[test]
    fn test_only_one_thread_enters() {
        let serializer = Arc::new(AttemptSerializer::default());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let serializer = Arc::clone(&serializer);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    serializer.try_enter(&scope(1))
                })
            })
            .collect();

        let entered = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|entered| *entered)
            .count();
        assert_eq!(entered, 1);
    }

    #[tokio::test]
    async fn test_aborted_task_releases_scope() {
        let serializer = Arc::new(AttemptSerializer::default());
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();

        let task_serializer = Arc::clone(&serializer);
        let task = tokio::spawn(async move {
            let _guard = task_serializer.enter(&scope(1)).unwrap();
            let _ = entered_tx.send(());
            std::future::pending::<()>().await;
        });

        entered_rx.await.unwrap();
        assert!(serializer.is_in_progress(&scope(1)));

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!serializer.is_in_progress(&scope(1)));
    }
}
