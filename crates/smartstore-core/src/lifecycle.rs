//! Lifecycle state and in-flight operation slots
//!
//! ```text
//!   closed --open--> opening --ok--> open --close--> closing --ok--> closed
//!                       |                               |
//!                       +--err--> closed                +--err--> open
//! ```
//!
//! The sync variants jump straight along the same edges (`closed -> open`,
//! `open -> closed`). Each async operation kind has one slot holding a
//! shared handle to the running task; later callers clone the handle and
//! await the same result instead of starting a second operation.

use std::fmt;
use std::future::Future;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle;

use crate::error::{StoreError, StoreResult};

/// A running open/flush/close that any number of callers can await.
pub type SharedOp = Shared<BoxFuture<'static, StoreResult<()>>>;

/// Where a store is in its open/close cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Closed,
    Opening,
    Open,
    Closing,
}

impl LifecycleState {
    /// Whether moving from `self` to `next` is a legal edge.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Closed, Opening)
                | (Closed, Open)
                | (Opening, Open)
                | (Opening, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
                | (Closing, Open)
        )
    }

    /// Keys may only be read or written while fully open.
    pub fn accepts_key_access(self) -> bool {
        self == LifecycleState::Open
    }

    /// Move to `next`, checking the edge in debug builds.
    pub(crate) fn advance(&mut self, next: LifecycleState) {
        debug_assert!(
            self.can_transition_to(next),
            "illegal lifecycle transition {} -> {}",
            self,
            next
        );
        *self = next;
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Closed => "closed",
            LifecycleState::Opening => "opening",
            LifecycleState::Open => "open",
            LifecycleState::Closing => "closing",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The coalescing slots of one store.
#[derive(Default)]
pub struct InFlight {
    pub opening: Option<SharedOp>,
    pub closing: Option<SharedOp>,
    /// Write currently in flight, tagged so only its own task clears it
    flushing: Option<(u64, SharedOp)>,
    next_flush_id: u64,
}

impl InFlight {
    pub fn flush(&self) -> Option<SharedOp> {
        self.flushing.as_ref().map(|(_, op)| op.clone())
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.is_some()
    }

    /// Reserve an id for a write about to be installed.
    pub fn next_flush_id(&mut self) -> u64 {
        self.next_flush_id += 1;
        self.next_flush_id
    }

    /// Install a write, returning the one it supersedes.
    pub fn replace_flush(&mut self, id: u64, op: SharedOp) -> Option<SharedOp> {
        self.flushing.replace((id, op)).map(|(_, previous)| previous)
    }

    /// Clear the slot if it still holds write `id`.
    pub fn finish_flush(&mut self, id: u64) -> bool {
        if self.flushing.as_ref().map(|(current, _)| *current) == Some(id) {
            self.flushing = None;
            true
        } else {
            false
        }
    }
}

/// Handle of the tokio runtime the caller is running on.
///
/// Async operations spawn their work as tasks, so polling them from any
/// other executor is a misuse error rather than a panic.
pub fn current_runtime(operation: &'static str) -> StoreResult<Handle> {
    Handle::try_current().map_err(|_| {
        StoreError::misuse(format!(
            "{} must be awaited inside a tokio runtime (use the sync variant otherwise)",
            operation
        ))
    })
}

/// Run `task` on `runtime` and expose its result as a joinable handle.
/// The task keeps running even if every handle is dropped.
pub fn spawn_shared<F>(runtime: &Handle, operation: &'static str, task: F) -> SharedOp
where
    F: Future<Output = StoreResult<()>> + Send + 'static,
{
    let handle = runtime.spawn(task);
    async move {
        handle.await.unwrap_or_else(|e| {
            Err(StoreError::Interrupted {
                operation,
                reason: e.to_string(),
            })
        })
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_happy_path_edges() {
        use LifecycleState::*;
        let mut state = LifecycleState::default();
        for next in [Opening, Open, Closing, Closed] {
            state.advance(next);
        }
        assert_eq!(state, Closed);
    }

    #[test]
    fn test_illegal_edges() {
        use LifecycleState::*;
        assert!(!Closed.can_transition_to(Closing));
        assert!(!Opening.can_transition_to(Closing));
        assert!(!Open.can_transition_to(Opening));
        assert!(!Closing.can_transition_to(Opening));
        assert!(Closing.can_transition_to(Open)); // failed closing flush
    }

    #[test]
    fn test_only_open_accepts_keys() {
        use LifecycleState::*;
        assert!(Open.accepts_key_access());
        for state in [Closed, Opening, Closing] {
            assert!(!state.accepts_key_access(), "{} accepted keys", state);
        }
    }

    #[tokio::test]
    async fn test_flush_slot_tagging() {
        let mut inflight = InFlight::default();
        let runtime = Handle::current();
        let first = inflight.next_flush_id();
        let op = spawn_shared(&runtime, "flush", async { Ok(()) });
        assert!(inflight.replace_flush(first, op).is_none());

        let second = inflight.next_flush_id();
        let op = spawn_shared(&runtime, "flush", async { Ok(()) });
        assert!(inflight.replace_flush(second, op).is_some());

        // The older write settling must not clear the newer slot
        assert!(!inflight.finish_flush(first));
        assert!(inflight.is_flushing());
        assert!(inflight.finish_flush(second));
        assert!(inflight.flush().is_none());
    }

    #[tokio::test]
    async fn test_joiners_share_one_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let op = spawn_shared(&Handle::current(), "flush", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(StoreError::misuse("boom"))
        });

        let (a, b) = tokio::join!(op.clone(), op);
        assert!(matches!(a, Err(StoreError::Misuse { .. })));
        assert!(matches!(b, Err(StoreError::Misuse { .. })));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_task_runs_without_awaiters() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        drop(spawn_shared(&Handle::current(), "open", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_runtime_required() {
        match current_runtime("open") {
            Err(StoreError::Misuse { reason }) => assert!(reason.contains("tokio runtime")),
            other => panic!("Expected Misuse, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_current_runtime_inside_tokio() {
        assert!(current_runtime("flush").is_ok());
    }

    #[tokio::test]
    async fn test_panicking_task_is_interrupted() {
        let op = spawn_shared(&Handle::current(), "close", async {
            Option::<()>::None.expect("lost");
            Ok(())
        });
        assert!(matches!(op.await, Err(StoreError::Interrupted { operation: "close", .. })));
    }
}
