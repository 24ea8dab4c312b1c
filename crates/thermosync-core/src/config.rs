// ── Sync engine tuning ──
//
// Timing knobs for the cache and reconciler. These never touch disk:
// the CLI builds a `SyncConfig` from its profile and hands it in.

use std::time::Duration;

/// Keys excluded from fingerprints by default. They change on every
/// read without reflecting a real state change.
pub const DEFAULT_VOLATILE_FIELDS: &[&str] = &["etag", "localTime", "utcTime", "timestamp"];

/// Timing and change-detection settings for one synchronized resource.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Successful fetches younger than this satisfy `fetch()` without a request.
    pub memo_window: Duration,
    /// Backoff after the first consecutive failure. Doubles per failure.
    pub backoff_base: Duration,
    /// Upper bound on the failure backoff.
    pub backoff_max: Duration,
    /// Wait before a push acquires the gate, so close enqueues share a batch.
    pub debounce: Duration,
    /// Wait between the last write and the verification fetch.
    pub settle: Duration,
    /// How long a push may wait for the gate before it is an anomaly.
    pub lock_timeout: Duration,
    /// Period of the background poller.
    pub poll_interval: Duration,
    /// Object keys ignored by change detection at any depth.
    pub volatile_fields: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            memo_window: Duration::from_secs(10),
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(600),
            debounce: Duration::from_secs(2),
            settle: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(30),
            volatile_fields: DEFAULT_VOLATILE_FIELDS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }
}
