use std::sync::atomic::{self, AtomicUsize};
use std::sync::{self, PoisonError};

use tokio::sync::{Mutex, MutexGuard};

use crate::UnitError;

/// The data every unit shares: the contended counter and the completion bookkeeping.
///
/// One instance is created per benchmark run and handed to every unit through an `Arc`.
///
/// The counter is a plain `u64` behind the lock, so the experiment measures the cost of
/// lock acquisition and release alone. The completion count is not part of the contention
/// being measured and is kept in a separate atomic. Failures are rare and only touch their
/// own lock.
#[derive(Debug, Default)]
pub struct SharedState {
    counter: Mutex<u64>,
    completed: AtomicUsize,
    failures: sync::Mutex<Vec<UnitError>>,
}

impl SharedState {
    /// Creates state with a zero counter and no finished units.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock guarding the counter.
    ///
    /// The caller suspends until the lock is available. The lock is released when the
    /// returned guard is dropped, including during unwinding.
    pub async fn lock_counter(&self) -> MutexGuard<'_, u64> {
        self.counter.lock().await
    }

    /// Reads the counter under the lock.
    pub async fn counter_value(&self) -> u64 {
        *self.counter.lock().await
    }

    /// Number of units that finished their whole loop.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(atomic::Ordering::Acquire)
    }

    /// Number of units that were stopped by an error or a panic.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The errors of all units that failed so far, ordered by unit index.
    #[must_use]
    pub fn failures(&self) -> Vec<UnitError> {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        failures.sort_by_key(UnitError::unit);
        failures
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, atomic::Ordering::Release);
    }

    pub(crate) fn record_failed(&self, error: UnitError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_empty() {
        let state = SharedState::new();

        assert_eq!(state.counter_value().await, 0);
        assert_eq!(state.completed(), 0);
        assert_eq!(state.failed(), 0);
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let state = SharedState::new();

        {
            let mut guard = state.lock_counter().await;
            *guard += 1;
        }

        // Would never resolve if the first guard were still held.
        assert_eq!(state.counter_value().await, 1);
    }

    #[test]
    fn bookkeeping_is_independent() {
        let state = SharedState::new();

        state.record_completed();
        state.record_completed();
        state.record_failed(UnitError::Injected { unit: 8, op: 0 });
        state.record_failed(UnitError::Injected { unit: 3, op: 1 });

        assert_eq!(state.completed(), 2);
        assert_eq!(state.failed(), 2);
        assert_eq!(
            state
                .failures()
                .iter()
                .map(UnitError::unit)
                .collect::<Vec<_>>(),
            [3, 8]
        );
    }
}
