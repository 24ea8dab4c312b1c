// ── Snapshot cache ──
//
// Polling cache for one remote resource: failure backoff, a short
// memoization window, single-holder coalescing, and per-section change
// detection. The remote snapshot is replaced wholesale on each
// successful read; optimistic local writes live in a separate overlay
// and are replayed on top of it to form the readable snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use strum::IntoEnumIterator;
use thermosync_api::{TokenManager, Transport};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::events::{EventBus, Subscription, Topic};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::gate::{Gate, GateGuard};
use crate::resource::Resource;
use crate::snapshot::{Section, Snapshot};
use crate::write::WriteRequest;

/// Failure bookkeeping, reset by any successful read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    pub consecutive_failures: u32,
    pub backoff_until: Option<Instant>,
}

impl BackoffState {
    /// Time left before the next read may be attempted.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.backoff_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }
}

/// `min(base * 2^(failures-1), max)`. Zero failures means no backoff.
pub fn backoff_delay(failures: u32, base: Duration, max: Duration) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let factor = 1_u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// What a call to [`SnapshotCache::fetch`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Read succeeded; `changed` lists the sections whose fingerprint moved.
    Fetched { changed: Vec<Section> },
    /// Skipped: a previous failure is still backing off.
    BackingOff { remaining: Duration },
    /// Skipped: the last success is recent enough.
    Memoized,
    /// Skipped: a fetch or push already holds the gate.
    Coalesced,
    /// Skipped: mutations are queued and a poll would clobber them.
    Suppressed,
    /// Read failed; the failure now counts toward backoff.
    Failed { message: String },
}

struct OverlayEntry {
    id: u64,
    write: WriteRequest,
}

#[derive(Default)]
struct CacheState {
    remote: Option<Arc<Snapshot>>,
    readable: Option<Arc<Snapshot>>,
    fingerprints: HashMap<Section, Fingerprint>,
    overlay: Vec<OverlayEntry>,
    /// Bumped whenever the overlay changes.
    overlay_generation: u64,
    backoff: BackoffState,
    last_success: Option<Instant>,
}

/// Remote snapshot plus the overlay, replayed in order.
fn replay(remote: &Arc<Snapshot>, overlay: &[OverlayEntry]) -> Arc<Snapshot> {
    if overlay.is_empty() {
        return Arc::clone(remote);
    }
    let mut readable = Snapshot::clone(remote);
    for entry in overlay {
        if let Err(e) = readable.apply(&entry.write) {
            debug!(mutation = entry.id, error = %e, "overlay entry no longer applies");
        }
    }
    Arc::new(readable)
}

pub struct SnapshotCache {
    name: String,
    resource: Arc<dyn Resource>,
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenManager>,
    config: SyncConfig,
    fingerprinter: Fingerprinter,
    gate: Gate,
    bus: EventBus,
    state: Mutex<CacheState>,
}

impl SnapshotCache {
    pub fn new(
        resource: Arc<dyn Resource>,
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenManager>,
        config: SyncConfig,
    ) -> Self {
        Self {
            name: resource.name(),
            fingerprinter: Fingerprinter::new(config.volatile_fields.iter().cloned()),
            resource,
            transport,
            tokens,
            config,
            gate: Gate::new(),
            bus: EventBus::new(),
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().expect("cache lock poisoned")
    }

    /// The gate shared by reads and write batches on this resource.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        self.bus.subscribe(topics)
    }

    pub fn backoff(&self) -> BackoffState {
        self.lock().backoff
    }

    /// The readable snapshot: remote state plus unconfirmed local writes.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>, CoreError> {
        self.lock()
            .readable
            .clone()
            .ok_or(CoreError::DataNotAvailable)
    }

    /// Refresh if the cache is due. Never fails; see [`FetchOutcome`].
    ///
    /// Callers only use this while no mutations are queued: a success
    /// drops overlay entries that were already in place when it started.
    pub async fn fetch(&self) -> FetchOutcome {
        let now = Instant::now();
        let overlay_generation = {
            let state = self.lock();
            if let Some(remaining) = state.backoff.remaining(now) {
                debug!(
                    resource = %self.name,
                    remaining_ms = millis(remaining),
                    "still backing off"
                );
                return FetchOutcome::BackingOff { remaining };
            }
            if state
                .last_success
                .is_some_and(|at| now.saturating_duration_since(at) < self.config.memo_window)
            {
                return FetchOutcome::Memoized;
            }
            state.overlay_generation
        };

        let Some(_guard) = self.gate.try_acquire() else {
            debug!(resource = %self.name, "fetch coalesced into in-flight operation");
            return FetchOutcome::Coalesced;
        };

        match self.load(Some(overlay_generation)).await {
            Ok((_, changed)) => FetchOutcome::Fetched { changed },
            Err(e) => FetchOutcome::Failed {
                message: e.to_string(),
            },
        }
    }

    /// Read the remote now, ignoring backoff and memoization.
    ///
    /// Returns the remote snapshot without the overlay. Failures still
    /// count toward backoff.
    pub async fn force_fresh_fetch(
        &self,
        guard: &GateGuard<'_>,
    ) -> Result<Arc<Snapshot>, CoreError> {
        if !guard.belongs_to(&self.gate) {
            return Err(CoreError::LockContention {
                message: format!("fresh fetch of {} with a foreign gate guard", self.name),
            });
        }
        self.load(None).await.map(|(remote, _)| remote)
    }

    async fn load(
        &self,
        clear_overlay_at: Option<u64>,
    ) -> Result<(Arc<Snapshot>, Vec<Section>), CoreError> {
        match self.read_remote().await {
            Ok(snapshot) => Ok(self.store(snapshot, clear_overlay_at)),
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    async fn read_remote(&self) -> Result<Snapshot, CoreError> {
        self.tokens.ensure_valid().await?;
        let payload = match self.transport.send(&self.resource.read_request()).await {
            Ok(payload) => payload,
            Err(e) => {
                if e.is_auth() {
                    self.tokens.invalidate();
                }
                return Err(e.into());
            }
        };
        self.resource.parse_snapshot(payload)
    }

    fn store(
        &self,
        snapshot: Snapshot,
        clear_overlay_at: Option<u64>,
    ) -> (Arc<Snapshot>, Vec<Section>) {
        let remote = Arc::new(snapshot);
        let (readable, changed) = {
            let mut state = self.lock();

            let mut changed = Vec::new();
            for section in Section::iter() {
                let fingerprint = self.fingerprinter.fingerprint(remote.section(section));
                if state.fingerprints.insert(section, fingerprint) != Some(fingerprint) {
                    changed.push(section);
                }
            }

            if clear_overlay_at == Some(state.overlay_generation) && !state.overlay.is_empty() {
                debug!(
                    resource = %self.name,
                    entries = state.overlay.len(),
                    "remote caught up with local writes"
                );
                state.overlay.clear();
                state.overlay_generation += 1;
            }

            if state.backoff.consecutive_failures > 0 {
                info!(
                    resource = %self.name,
                    failures = state.backoff.consecutive_failures,
                    "fetch recovered after failures"
                );
            }
            state.backoff = BackoffState::default();
            state.last_success = Some(Instant::now());

            let readable = replay(&remote, &state.overlay);
            state.remote = Some(Arc::clone(&remote));
            state.readable = Some(Arc::clone(&readable));
            (readable, changed)
        };

        for section in &changed {
            self.bus.publish(Topic::from(*section), Arc::clone(&readable));
        }
        debug!(resource = %self.name, changed = ?changed, "snapshot stored");
        (remote, changed)
    }

    fn record_failure(&self, error: &CoreError) {
        let mut state = self.lock();
        let failures = state.backoff.consecutive_failures.saturating_add(1);
        let delay = backoff_delay(failures, self.config.backoff_base, self.config.backoff_max);
        state.backoff = BackoffState {
            consecutive_failures: failures,
            backoff_until: Some(Instant::now() + delay),
        };
        warn!(
            resource = %self.name,
            attempt = failures,
            delay_ms = millis(delay),
            error = %error,
            "fetch failed, backing off"
        );
    }

    // ── Optimistic overlay ───────────────────────────────────────────

    pub(crate) fn publish(&self, topic: Topic, snapshot: Arc<Snapshot>) {
        self.bus.publish(topic, snapshot);
    }

    /// Apply a local write on top of the readable snapshot.
    ///
    /// Returns the new readable snapshot, or `None` when there is no
    /// snapshot yet or the write does not apply.
    pub(crate) fn apply_local(&self, id: u64, write: WriteRequest) -> Option<Arc<Snapshot>> {
        let mut state = self.lock();
        let mut next = Snapshot::clone(state.readable.as_ref()?);
        if let Err(e) = next.apply(&write) {
            debug!(mutation = id, error = %e, "local write does not apply");
            return None;
        }
        let next = Arc::new(next);
        state.overlay.push(OverlayEntry { id, write });
        state.overlay_generation += 1;
        state.readable = Some(Arc::clone(&next));
        Some(next)
    }

    /// Replace the overlay with `entries`, replayed on the current remote.
    pub(crate) fn rebase_overlay(&self, entries: Vec<(u64, WriteRequest)>) {
        let mut state = self.lock();
        state.overlay = entries
            .into_iter()
            .map(|(id, write)| OverlayEntry { id, write })
            .collect();
        state.overlay_generation += 1;
        Self::refresh_readable(&mut state);
    }

    /// Drop overlay entries the remote has now confirmed.
    pub(crate) fn settle_overlay(&self, ids: &[u64]) {
        let mut state = self.lock();
        state.overlay.retain(|entry| !ids.contains(&entry.id));
        state.overlay_generation += 1;
        Self::refresh_readable(&mut state);
    }

    fn refresh_readable(state: &mut CacheState) {
        if let Some(remote) = &state.remote {
            state.readable = Some(replay(remote, &state.overlay));
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
