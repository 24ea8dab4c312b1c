// ── Reconciler ──
//
// Consumer-facing handle for one synchronized resource. Owns the cache
// and the mutation queue, and runs the push protocol: debounce, take
// the gate as the latest pending successor, re-read fresh state, drain
// the queue in FIFO order, settle, then verify.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thermosync_api::{TokenManager, Transport};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::cache::{BackoffState, FetchOutcome, SnapshotCache};
use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::events::{Subscription, Topic};
use crate::gate::{GateError, GateGuard};
use crate::queue::{Mutation, MutationQueue, Queued};
use crate::resource::Resource;
use crate::snapshot::Snapshot;
use crate::verify::{Mismatch, verify};
use crate::write::WriteRequest;

/// How a push ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// A newer push took the pending slot before this one ran.
    Superseded,
    /// An earlier push already drained the queue.
    NothingQueued,
    /// Every write is reflected in the fresh snapshot.
    Confirmed { writes: usize },
    /// Some written fields differ in the fresh snapshot.
    Mismatched { mismatches: Vec<Mismatch> },
    /// New mutations arrived while settling; the next push will re-check.
    Unverified { writes: usize },
    /// A remote call failed; unexecuted mutations stay queued.
    Failed { message: String },
    /// The gate misbehaved. Always a bug.
    Anomaly { message: String },
    /// Shutdown interrupted the push.
    Cancelled,
}

impl PushOutcome {
    /// Whether this push took the gate and found work to do.
    pub fn did_work(&self) -> bool {
        !matches!(self, Self::Superseded | Self::NothingQueued)
    }
}

struct ReconcilerInner {
    name: String,
    cache: SnapshotCache,
    queue: MutationQueue,
    resource: Arc<dyn Resource>,
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenManager>,
    config: SyncConfig,
    outcome_tx: watch::Sender<Option<PushOutcome>>,
    pushes_in_flight: AtomicUsize,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// Synchronized view of one remote resource. Cheaply cloneable.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<ReconcilerInner>,
}

impl Reconciler {
    pub fn new(
        resource: Arc<dyn Resource>,
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenManager>,
        config: SyncConfig,
    ) -> Self {
        let cache = SnapshotCache::new(
            Arc::clone(&resource),
            Arc::clone(&transport),
            Arc::clone(&tokens),
            config.clone(),
        );
        let (outcome_tx, _) = watch::channel(None);

        Self {
            inner: Arc::new(ReconcilerInner {
                name: resource.name(),
                cache,
                queue: MutationQueue::default(),
                resource,
                transport,
                tokens,
                config,
                outcome_tx,
                pushes_in_flight: AtomicUsize::new(0),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Make the cache reasonably fresh. Never fails.
    ///
    /// Suppressed while mutations are queued. If nothing is draining
    /// them and no failure backoff is pending, a recovery push is started.
    pub async fn fetch(&self) -> FetchOutcome {
        let queued = self.inner.queue.len();
        if queued > 0 {
            debug!(
                resource = %self.inner.name,
                queued,
                "fetch suppressed while mutations are queued"
            );
            let idle = self.inner.pushes_in_flight.load(Ordering::SeqCst) == 0
                && !self.inner.cache.gate().is_busy();
            if !idle {
                return FetchOutcome::Suppressed;
            }
            // Recovery reads the remote and honors the fetch backoff.
            if let Some(remaining) = self.inner.cache.backoff().remaining(Instant::now()) {
                debug!(
                    resource = %self.inner.name,
                    remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                    "recovery push deferred while backing off"
                );
            } else {
                warn!(
                    resource = %self.inner.name,
                    queued,
                    "queued mutations have no push in flight, starting recovery push"
                );
                self.spawn_push();
            }
            return FetchOutcome::Suppressed;
        }
        self.inner.cache.fetch().await
    }

    /// The readable snapshot, including unconfirmed local writes.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>, CoreError> {
        self.inner.cache.snapshot()
    }

    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        self.inner.cache.subscribe(topics)
    }

    /// Outcome of the most recent push that took the gate and found work.
    pub fn push_outcomes(&self) -> watch::Receiver<Option<PushOutcome>> {
        self.inner.outcome_tx.subscribe()
    }

    pub fn backoff(&self) -> BackoffState {
        self.inner.cache.backoff()
    }

    /// Number of mutations not yet written.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Queue a mutation, apply it optimistically, and schedule a push.
    /// Returns without waiting for the remote.
    pub fn enqueue(&self, mutation: Mutation) {
        let id = self.inner.queue.push(mutation.clone());
        if let Ok(current) = self.inner.cache.snapshot() {
            match mutation.evaluate(&current) {
                Ok(write) => {
                    self.inner.cache.apply_local(id, write);
                }
                Err(e) => {
                    debug!(
                        mutation = mutation.label(),
                        error = %e,
                        "mutation has no local effect yet"
                    );
                }
            }
        }
        debug!(
            resource = %self.inner.name,
            mutation = mutation.label(),
            queued = self.inner.queue.len(),
            "mutation enqueued"
        );
        self.spawn_push();
    }

    fn spawn_push(&self) {
        if self.inner.cancel.is_cancelled() {
            debug!("shutting down, push not scheduled");
            return;
        }
        let inner = Arc::clone(&self.inner);
        inner.pushes_in_flight.fetch_add(1, Ordering::SeqCst);
        self.inner.tasks.spawn(async move {
            let outcome = inner.push().await;
            inner.pushes_in_flight.fetch_sub(1, Ordering::SeqCst);
            inner.report(outcome);
        });
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Poll the remote every `poll_interval` until shutdown.
    pub fn spawn_poller(&self) {
        let reconciler = self.clone();
        let period = self.inner.config.poll_interval;
        let cancel = self.inner.cancel.child_token();
        self.inner
            .tasks
            .spawn(poll_task(reconciler, period, cancel));
    }

    /// Stop the poller, interrupt debounce and settle waits, and wait for
    /// every task to finish. Mutations still queued are abandoned.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        let abandoned = self.inner.queue.len();
        if abandoned > 0 {
            warn!(resource = %self.inner.name, abandoned, "shut down with mutations still queued");
        }
    }
}

async fn poll_task(reconciler: Reconciler, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let outcome = reconciler.fetch().await;
                trace!(?outcome, "poll tick");
            }
        }
    }
}

// ── Push protocol ────────────────────────────────────────────────────

/// The drain raced shutdown, or a remote call failed.
enum DrainError {
    Cancelled,
    Core(CoreError),
}

impl From<CoreError> for DrainError {
    fn from(e: CoreError) -> Self {
        Self::Core(e)
    }
}

impl From<thermosync_api::Error> for DrainError {
    fn from(e: thermosync_api::Error) -> Self {
        Self::Core(e.into())
    }
}

impl ReconcilerInner {
    /// Sleep unless shutdown starts first. Returns `false` if cancelled.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }

    async fn push(&self) -> PushOutcome {
        if let Ok(snapshot) = self.cache.snapshot() {
            self.cache.publish(Topic::LocalMutation, snapshot);
        }

        if !self.pause(self.config.debounce).await {
            return PushOutcome::Cancelled;
        }

        let acquired = self
            .cache
            .gate()
            .acquire_latest(self.config.lock_timeout, &self.cancel)
            .await;
        let guard = match acquired {
            Ok(guard) => guard,
            Err(GateError::Superseded) => return PushOutcome::Superseded,
            Err(GateError::Cancelled) => return PushOutcome::Cancelled,
            Err(e @ GateError::TimedOut(_)) => return self.anomaly(&e.to_string()),
        };
        if self.cancel.is_cancelled() {
            return PushOutcome::Cancelled;
        }

        if self.queue.is_empty() {
            return PushOutcome::NothingQueued;
        }

        match self.drain_and_verify(&guard).await {
            Ok(outcome) => outcome,
            Err(DrainError::Cancelled) => PushOutcome::Cancelled,
            Err(DrainError::Core(CoreError::LockContention { message })) => self.anomaly(&message),
            Err(DrainError::Core(e)) => {
                error!(
                    resource = %self.name,
                    queued = self.queue.len(),
                    error = %e,
                    "push failed, remaining mutations stay queued"
                );
                PushOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn drain_and_verify(&self, guard: &GateGuard<'_>) -> Result<PushOutcome, DrainError> {
        let fresh = self.cache.force_fresh_fetch(guard).await?;
        let mut working = Snapshot::clone(&fresh);
        self.cache.rebase_overlay(predict(&working, &self.queue.entries()));

        let mut executed: Vec<WriteRequest> = Vec::new();
        let mut covered: Vec<u64> = Vec::new();

        while let Some(Queued { id, mutation }) = self.queue.front() {
            let write = match mutation.evaluate(&working) {
                Ok(write) => write,
                Err(e) => {
                    warn!(
                        resource = %self.name,
                        mutation = mutation.label(),
                        error = %e,
                        "dropping mutation that no longer applies"
                    );
                    self.queue.pop_front_if(id);
                    covered.push(id);
                    continue;
                }
            };

            self.tokens.ensure_valid().await?;
            if let Err(e) = self
                .transport
                .send(&self.resource.write_request(&write))
                .await
            {
                if e.is_auth() {
                    self.tokens.invalidate();
                }
                return Err(e.into());
            }
            self.queue.pop_front_if(id);
            covered.push(id);
            debug!(
                resource = %self.name,
                mutation = mutation.label(),
                target = %write.target(),
                "write sent"
            );

            if let Err(e) = working.apply(&write) {
                debug!(error = %e, "write sent but not reflected in working copy");
            }
            executed.push(write);
        }

        let generation = self.queue.generation();
        if !self.pause(self.config.settle).await {
            return Err(DrainError::Cancelled);
        }
        if self.queue.generation() != generation {
            info!(
                resource = %self.name,
                writes = executed.len(),
                "new mutations arrived while settling, verification deferred"
            );
            return Ok(PushOutcome::Unverified {
                writes: executed.len(),
            });
        }

        let confirmed = self.cache.force_fresh_fetch(guard).await?;
        self.cache.settle_overlay(&covered);

        let mismatches = verify(&executed, &confirmed);
        if mismatches.is_empty() {
            info!(resource = %self.name, writes = executed.len(), "confirmed");
            return Ok(PushOutcome::Confirmed {
                writes: executed.len(),
            });
        }
        for mismatch in &mismatches {
            warn!(resource = %self.name, %mismatch, "write not reflected by the remote");
        }
        Ok(PushOutcome::Mismatched { mismatches })
    }

    fn anomaly(&self, message: &str) -> PushOutcome {
        error!(
            resource = %self.name,
            error = message,
            "exclusive gate anomaly. This is a bug: \
             please report it with RUST_LOG=thermosync=debug output"
        );
        PushOutcome::Anomaly {
            message: message.to_owned(),
        }
    }

    fn report(&self, outcome: PushOutcome) {
        if outcome.did_work() {
            self.outcome_tx.send_replace(Some(outcome));
        } else {
            debug!(resource = %self.name, ?outcome, "push ended without work");
        }
    }
}

/// Evaluate queued mutations in order on a copy of `snapshot`.
fn predict(snapshot: &Snapshot, queued: &[Queued]) -> Vec<(u64, WriteRequest)> {
    let mut working = snapshot.clone();
    let mut predicted = Vec::with_capacity(queued.len());
    for Queued { id, mutation } in queued {
        if let Ok(write) = mutation.evaluate(&working) {
            if working.apply(&write).is_ok() {
                predicted.push((*id, write));
            }
        }
    }
    predicted
}
