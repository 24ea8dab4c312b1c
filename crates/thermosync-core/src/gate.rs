// ── Exclusive gate ──
//
// Single holder plus at most one pending successor. Not a blocking
// mutex: `try_acquire` fails at once when held, and `acquire_latest`
// parks as the one pending successor, superseding any older one. On
// release the gate passes straight to the pending successor, so a
// `try_acquire` can never slip in between.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// A newer request took the pending slot.
    #[error("superseded by a newer pending request")]
    Superseded,

    /// The holder did not release within the wait limit.
    #[error("gate not granted within {0:?}")]
    TimedOut(Duration),

    /// Shutdown started while the request was parked.
    #[error("gate request cancelled by shutdown")]
    Cancelled,
}

struct Pending {
    id: u64,
    cancel: CancellationToken,
    grant: oneshot::Sender<()>,
}

/// `pending.is_some()` implies `held`.
#[derive(Default)]
struct GateState {
    held: bool,
    pending: Option<Pending>,
}

#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    next_id: AtomicU64,
}

/// Proof of holding the gate. Releases on drop.
#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct GateGuard<'a> {
    gate: &'a Gate,
}

impl GateGuard<'_> {
    /// Whether this guard was issued by `gate`.
    pub fn belongs_to(&self, gate: &Gate) -> bool {
        std::ptr::eq(self.gate, gate)
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().expect("gate lock poisoned")
    }

    /// Whether a holder is active.
    pub fn is_busy(&self) -> bool {
        self.lock().held
    }

    /// Whether a successor is parked.
    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Take the gate only if nobody holds it.
    pub fn try_acquire(&self) -> Option<GateGuard<'_>> {
        let mut state = self.lock();
        if state.held {
            return None;
        }
        state.held = true;
        Some(GateGuard { gate: self })
    }

    /// Take the gate, parking as the single pending successor if needed.
    ///
    /// A newer call supersedes this one while it is parked. Parked callers
    /// have taken no action, so losing the slot is always safe. Cancelling
    /// `shutdown` leaves the slot; a grant that already arrived is still
    /// returned as a guard so the gate is released normally.
    pub async fn acquire_latest(
        &self,
        timeout: Duration,
        shutdown: &CancellationToken,
    ) -> Result<GateGuard<'_>, GateError> {
        let (id, cancel, mut granted) = {
            let mut state = self.lock();
            if !state.held {
                state.held = true;
                return Ok(GateGuard { gate: self });
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let cancel = CancellationToken::new();
            let (grant, granted) = oneshot::channel();
            let previous = state.pending.replace(Pending {
                id,
                cancel: cancel.clone(),
                grant,
            });
            if let Some(previous) = previous {
                debug!(superseded = previous.id, by = id, "pending gate request superseded");
                previous.cancel.cancel();
            }
            (id, cancel, granted)
        };

        tokio::select! {
            biased;
            result = &mut granted => match result {
                Ok(()) => Ok(GateGuard { gate: self }),
                Err(_) => Err(GateError::Superseded),
            },
            () = cancel.cancelled() => self.abandon(id, &mut granted, GateError::Superseded),
            () = shutdown.cancelled() => self.abandon(id, &mut granted, GateError::Cancelled),
            () = tokio::time::sleep(timeout) => {
                self.abandon(id, &mut granted, GateError::TimedOut(timeout))
            }
        }
    }

    /// Leave the pending slot, unless a grant already arrived.
    fn abandon(
        &self,
        id: u64,
        granted: &mut oneshot::Receiver<()>,
        reason: GateError,
    ) -> Result<GateGuard<'_>, GateError> {
        let mut state = self.lock();
        if state.pending.as_ref().is_some_and(|p| p.id == id) {
            state.pending = None;
            return Err(reason);
        }
        drop(state);
        // Released to us between the wakeup and taking the lock.
        match granted.try_recv() {
            Ok(()) => Ok(GateGuard { gate: self }),
            Err(_) => Err(reason),
        }
    }

    fn release(&self) {
        let mut state = self.lock();
        if !state.held {
            error!("gate released while not held");
            return;
        }
        if let Some(next) = state.pending.take() {
            if next.grant.send(()).is_ok() {
                debug!(id = next.id, "gate handed to pending successor");
                return;
            }
        }
        state.held = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const WAIT: Duration = Duration::from_secs(120);

    fn no_shutdown() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn try_acquire_fails_while_held() {
        let gate = Gate::new();
        let guard = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());
        drop(guard);
        assert!(gate.try_acquire().is_some());
        assert!(!gate.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn release_hands_off_to_pending() {
        let gate = Arc::new(Gate::new());
        let guard = gate.try_acquire().unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let _guard = gate.acquire_latest(WAIT, &no_shutdown()).await.unwrap();
                tokio::time::sleep(Duration::from_secs(1)).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(gate.has_pending());

        drop(guard);
        // The successor owns it now; a fetch cannot slip in.
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());

        waiter.await.unwrap();
        assert!(!gate.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_pending_request_supersedes_older() {
        let gate = Arc::new(Gate::new());
        let guard = gate.try_acquire().unwrap();

        let older = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let idle = no_shutdown();
                gate.acquire_latest(WAIT, &idle).await.map(|_| ())
            })
        };
        tokio::task::yield_now().await;
        let newer = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let idle = no_shutdown();
                gate.acquire_latest(WAIT, &idle).await.map(|_| ())
            })
        };
        tokio::task::yield_now().await;

        assert_eq!(older.await.unwrap(), Err(GateError::Superseded));
        drop(guard);
        assert_eq!(newer.await.unwrap(), Ok(()));
        assert!(!gate.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_request_times_out() {
        let gate = Gate::new();
        let _guard = gate.try_acquire().unwrap();

        let result = gate
            .acquire_latest(Duration::from_secs(5), &no_shutdown())
            .await;
        assert!(matches!(result, Err(GateError::TimedOut(_))));
        assert!(!gate.has_pending());
        assert!(gate.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_leaves_the_pending_slot() {
        let gate = Arc::new(Gate::new());
        let guard = gate.try_acquire().unwrap();
        let shutdown = CancellationToken::new();

        let waiter = {
            let gate = Arc::clone(&gate);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { gate.acquire_latest(WAIT, &shutdown).await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        assert!(gate.has_pending());

        shutdown.cancel();
        assert_eq!(waiter.await.unwrap(), Err(GateError::Cancelled));
        assert!(!gate.has_pending());

        drop(guard);
        assert!(!gate.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn grant_racing_shutdown_still_releases() {
        let gate = Arc::new(Gate::new());
        let guard = gate.try_acquire().unwrap();
        let shutdown = CancellationToken::new();

        let waiter = {
            let gate = Arc::clone(&gate);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { gate.acquire_latest(WAIT, &shutdown).await.is_ok() })
        };
        tokio::task::yield_now().await;

        // Both happen before the waiter runs again.
        drop(guard);
        shutdown.cancel();

        assert!(waiter.await.unwrap());
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[tokio::test]
    async fn idle_gate_is_granted_immediately() {
        let gate = Gate::new();
        let guard = gate.acquire_latest(WAIT, &no_shutdown()).await.unwrap();
        assert!(guard.belongs_to(&gate));
        assert!(!guard.belongs_to(&Gate::new()));
    }
}
