//! Remote-state synchronization between `thermosync-api` and its consumers.
//!
//! This crate keeps a cached view of an HVAC controller in step with the
//! cloud API while local edits are in flight:
//!
//! - **[`SnapshotCache`]** holds the last remote [`Snapshot`] plus an overlay
//!   of unconfirmed local writes, with fetch deduplication and failure backoff.
//! - **[`Reconciler`]** queues [`Mutation`]s, drains them through the
//!   exclusive [`Gate`] and [`verify`]s the result against a fresh read.
//! - **[`ChangeStream`]** notifies [`Subscription`]s when a [`Section`]'s
//!   [`Fingerprint`] changes.
//!
//! [`HvacSystem`] is the concrete [`Resource`] for the controller's system
//! document.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod gate;
pub mod queue;
pub mod reconciler;
pub mod resource;
pub mod snapshot;
pub mod verify;
pub mod write;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::{BackoffState, FetchOutcome, SnapshotCache};
pub use config::SyncConfig;
pub use error::CoreError;
pub use events::{Change, ChangeStream, Subscription, Topic};
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use gate::{Gate, GateError, GateGuard};
pub use queue::Mutation;
pub use reconciler::{PushOutcome, Reconciler};
pub use resource::{HvacSystem, Resource};
pub use snapshot::{Section, Snapshot};
pub use verify::{Mismatch, verify};
pub use write::{FieldValue, Fields, Target, WriteRequest};
