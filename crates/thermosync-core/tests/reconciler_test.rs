#![allow(clippy::unwrap_used)]
// Push protocol tests on a paused clock: debounce, single-flight drain,
// fresh-read-before-write, settle and verification.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::Instant;

use thermosync_core::{
    CoreError, FetchOutcome, Mutation, PushOutcome, Snapshot, SyncConfig, Topic, WriteRequest,
};

use common::{FakeRemote, harness, harness_with};

// ── Helpers ─────────────────────────────────────────────────────────

async fn next_outcome(rx: &mut watch::Receiver<Option<PushOutcome>>) -> PushOutcome {
    rx.changed().await.unwrap();
    rx.borrow_and_update().clone().unwrap()
}

fn set_mode(mode: &str) -> Mutation {
    Mutation::system(vec![("mode".into(), mode.into())])
}

fn set_zone(zone: &str, field: &str, value: f64) -> Mutation {
    Mutation::zone(zone, vec![(field.into(), value.into())])
}

fn zone_field(snapshot: &Snapshot, zone: &str, field: &str) -> Value {
    snapshot.zone(zone).unwrap()[field].clone()
}

// ── End-to-end ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_set_mode_is_written_once_and_confirmed() {
    let h = harness();
    h.reconciler.fetch().await;
    let mut outcomes = h.reconciler.push_outcomes();
    let started = Instant::now();

    h.reconciler.enqueue(set_mode("cool"));
    // Optimistic read-back before any network traffic.
    assert_eq!(h.reconciler.snapshot().unwrap().mode(), Some("cool"));
    assert!(h.remote.writes().is_empty());

    let outcome = next_outcome(&mut outcomes).await;
    assert_eq!(outcome, PushOutcome::Confirmed { writes: 1 });
    assert!(started.elapsed() >= Duration::from_secs(7));

    let writes = h.remote.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].operation_name, "updateInfinityConfig");
    assert_eq!(
        writes[0].variables,
        json!({ "input": { "serial": "S1", "mode": "cool" } })
    );
    // Initial read, fresh read before the drain, verification read.
    assert_eq!(h.remote.reads(), 3);
    assert_eq!(h.reconciler.queued(), 0);
    assert_eq!(h.reconciler.snapshot().unwrap().mode(), Some("cool"));
}

#[tokio::test(start_paused = true)]
async fn test_local_mutation_is_announced_immediately() {
    let h = harness();
    h.reconciler.fetch().await;
    let mut sub = h.reconciler.subscribe(&[Topic::LocalMutation]);

    h.reconciler.enqueue(set_mode("heat"));
    let started = Instant::now();
    let change = sub.recv().await.unwrap();

    assert_eq!(change.topic, Topic::LocalMutation);
    assert_eq!(change.snapshot.mode(), Some("heat"));
    assert!(started.elapsed() < Duration::from_secs(2));
}

// ── Batching and ordering ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_quick_enqueues_share_one_batch() {
    let h = harness();
    h.reconciler.fetch().await;
    let mut outcomes = h.reconciler.push_outcomes();

    h.reconciler.enqueue(set_zone("1", "htsp", 70.0));
    h.reconciler.enqueue(set_zone("1", "clsp", 74.0));
    h.reconciler.enqueue(set_mode("auto"));

    assert_eq!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Confirmed { writes: 3 }
    );
    // Let the superseded and empty pushes run out.
    tokio::time::sleep(Duration::from_secs(30)).await;

    let ops: Vec<String> = h
        .remote
        .writes()
        .into_iter()
        .map(|r| r.operation_name)
        .collect();
    assert_eq!(
        ops,
        [
            "updateInfinityZoneConfig",
            "updateInfinityZoneConfig",
            "updateInfinityConfig"
        ]
    );
    assert_eq!(h.remote.reads(), 3);
    assert!(!outcomes.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_drain_is_fifo_over_a_working_copy() {
    let h = harness();
    h.reconciler.fetch().await;
    let mut outcomes = h.reconciler.push_outcomes();

    h.reconciler.enqueue(set_zone("1", "htsp", 70.0));
    // Keep cooling four degrees above whatever heating is at drain time.
    h.reconciler
        .enqueue(Mutation::new("clsp follows htsp", |snap: &Snapshot| {
            let htsp = snap
                .zone("1")
                .and_then(|z| z.get("htsp"))
                .and_then(Value::as_f64)
                .ok_or_else(|| CoreError::TargetNotFound {
                    target: "zone 1".into(),
                })?;
            Ok(WriteRequest::zone("1", [("clsp", htsp + 4.0)]))
        }));

    assert_eq!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Confirmed { writes: 2 }
    );
    let writes = h.remote.writes();
    assert_eq!(writes[0].variables["input"]["htsp"], json!(70.0));
    assert_eq!(writes[1].variables["input"]["clsp"], json!(74.0));
    assert!(writes[1].variables["input"].get("htsp").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_zone_writes_do_not_cross_contaminate() {
    let h = harness();
    h.reconciler.fetch().await;
    let mut outcomes = h.reconciler.push_outcomes();

    h.reconciler.enqueue(set_zone("1", "htsp", 70.0));
    h.reconciler.enqueue(set_zone("2", "htsp", 64.0));

    let optimistic = h.reconciler.snapshot().unwrap();
    assert_eq!(zone_field(&optimistic, "1", "htsp"), json!(70.0));
    assert_eq!(zone_field(&optimistic, "2", "htsp"), json!(64.0));
    assert_eq!(zone_field(&optimistic, "2", "clsp"), json!(78.0));

    assert_eq!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Confirmed { writes: 2 }
    );

    let writes = h.remote.writes();
    assert_eq!(writes[0].variables["input"]["zoneId"], "1");
    assert_eq!(writes[1].variables["input"]["zoneId"], "2");

    let confirmed = h.reconciler.snapshot().unwrap();
    assert_eq!(zone_field(&confirmed, "1", "htsp"), json!(70.0));
    assert_eq!(zone_field(&confirmed, "1", "clsp"), json!(76.0));
    assert_eq!(zone_field(&confirmed, "2", "htsp"), json!(64.0));
    assert_eq!(zone_field(&confirmed, "2", "clsp"), json!(78.0));
}

#[tokio::test(start_paused = true)]
async fn test_activity_write_targets_nested_object() {
    let h = harness();
    h.reconciler.fetch().await;
    let mut outcomes = h.reconciler.push_outcomes();

    h.reconciler.enqueue(Mutation::activity(
        "1",
        "away",
        vec![("fan".into(), "med".into())],
    ));

    assert_eq!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Confirmed { writes: 1 }
    );
    let snap = h.reconciler.snapshot().unwrap();
    assert_eq!(snap.activity("1", "away").unwrap()["fan"], "med");
    assert_eq!(snap.activity("1", "home").unwrap()["fan"], "auto");
}

// ── Verification ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_unreflected_write_is_a_mismatch_not_a_retry() {
    let h = harness();
    h.reconciler.fetch().await;
    h.remote.ignore_writes();
    let mut outcomes = h.reconciler.push_outcomes();

    h.reconciler.enqueue(set_mode("cool"));

    match next_outcome(&mut outcomes).await {
        PushOutcome::Mismatched { mismatches } => {
            assert_eq!(mismatches.len(), 1);
            assert_eq!(mismatches[0].field, "mode");
            assert_eq!(mismatches[0].actual, Some(json!("off")));
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.remote.writes().len(), 1);
    // The remote is authoritative once verification has run.
    assert_eq!(h.reconciler.snapshot().unwrap().mode(), Some("off"));
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_during_settle_defers_verification() {
    let h = harness();
    h.reconciler.fetch().await;
    let mut outcomes = h.reconciler.push_outcomes();

    h.reconciler.enqueue(set_zone("1", "htsp", 70.0));
    // First batch is written at 2s and settles until 7s.
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(h.remote.writes().len(), 1);
    h.reconciler.enqueue(set_zone("2", "htsp", 64.0));

    assert_eq!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Unverified { writes: 1 }
    );
    assert_eq!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Confirmed { writes: 1 }
    );
    assert_eq!(h.remote.writes().len(), 2);
}

// ── Failure handling ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_failed_write_stays_queued_and_recovers_on_poll() {
    let h = harness();
    h.reconciler.fetch().await;
    h.remote.fail_next_writes(1);
    let mut outcomes = h.reconciler.push_outcomes();

    h.reconciler.enqueue(set_mode("cool"));

    assert!(matches!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Failed { .. }
    ));
    assert_eq!(h.reconciler.queued(), 1);
    assert_eq!(h.reconciler.snapshot().unwrap().mode(), Some("cool"));

    // The next poll is suppressed and kicks off a recovery push.
    assert_eq!(h.reconciler.fetch().await, FetchOutcome::Suppressed);
    assert_eq!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Confirmed { writes: 1 }
    );
    assert_eq!(h.remote.writes().len(), 2);
    assert_eq!(h.reconciler.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_write_token_is_replaced_before_retry() {
    let h = harness();
    h.reconciler.fetch().await;
    h.remote.reject_next_writes(1);
    let mut outcomes = h.reconciler.push_outcomes();

    h.reconciler.enqueue(set_mode("cool"));
    assert!(matches!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Failed { .. }
    ));
    assert_eq!(h.auth.logins.load(Ordering::SeqCst), 1);

    assert_eq!(h.reconciler.fetch().await, FetchOutcome::Suppressed);
    assert_eq!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Confirmed { writes: 1 }
    );
    assert_eq!(h.auth.logins.load(Ordering::SeqCst), 2);
    assert_eq!(h.reconciler.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_push_waits_out_read_backoff() {
    let h = harness();
    h.reconciler.fetch().await;
    h.remote.fail_next_reads(1000);
    let mut outcomes = h.reconciler.push_outcomes();

    h.reconciler.enqueue(set_mode("cool"));
    assert!(matches!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Failed { .. }
    ));
    assert_eq!(h.remote.reads(), 2);

    // Poll every 30s for ten minutes while the remote stays down.
    tokio::time::sleep(Duration::from_secs(1)).await;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.reconciler.fetch().await, FetchOutcome::Suppressed);
    }
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Recovery reads land only once each backoff window (30/60/120/240s) expires.
    assert_eq!(h.remote.reads(), 6);
    assert_eq!(h.reconciler.backoff().consecutive_failures, 5);
    assert_eq!(h.reconciler.queued(), 1);
    assert!(h.remote.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mutation_with_missing_target_is_dropped() {
    let h = harness();
    h.reconciler.fetch().await;
    let mut outcomes = h.reconciler.push_outcomes();

    h.reconciler.enqueue(set_zone("9", "htsp", 70.0));

    assert_eq!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Confirmed { writes: 0 }
    );
    assert!(h.remote.writes().is_empty());
    assert_eq!(h.reconciler.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_gate_timeout_is_an_anomaly() {
    let remote = Arc::new(FakeRemote::with_latency(Duration::from_secs(5)));
    let config = SyncConfig {
        lock_timeout: Duration::from_secs(1),
        ..SyncConfig::default()
    };
    let h = harness_with(remote, config);
    let mut outcomes = h.reconciler.push_outcomes();

    // A slow read holds the gate from 0s to 5s.
    let reader = {
        let reconciler = h.reconciler.clone();
        tokio::spawn(async move { reconciler.fetch().await })
    };
    tokio::task::yield_now().await;

    h.reconciler.enqueue(set_mode("cool"));

    assert!(matches!(
        next_outcome(&mut outcomes).await,
        PushOutcome::Anomaly { .. }
    ));
    assert!(matches!(reader.await.unwrap(), FetchOutcome::Fetched { .. }));
    assert_eq!(h.reconciler.queued(), 1);
    assert!(h.remote.writes().is_empty());
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_poller_fetches_on_interval() {
    let h = harness();
    h.reconciler.spawn_poller();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(h.remote.reads(), 3);

    h.reconciler.shutdown().await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.remote.reads(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_push() {
    let h = harness();
    h.reconciler.fetch().await;
    let mut outcomes = h.reconciler.push_outcomes();

    h.reconciler.spawn_poller();
    h.reconciler.enqueue(set_mode("cool"));
    h.reconciler.shutdown().await;

    assert_eq!(next_outcome(&mut outcomes).await, PushOutcome::Cancelled);
    assert!(h.remote.writes().is_empty());
    assert_eq!(h.reconciler.queued(), 1);
}
