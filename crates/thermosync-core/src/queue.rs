// ── Mutation queue ──
//
// Deferred writes, evaluated at drain time against the freshest snapshot.
// Only the reconciler reads or removes entries; callers append through
// `Reconciler::enqueue`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::CoreError;
use crate::snapshot::Snapshot;
use crate::write::{FieldValue, WriteRequest};

type Eval = dyn Fn(&Snapshot) -> Result<WriteRequest, CoreError> + Send + Sync;

/// A pure transform from a snapshot to the write it implies.
///
/// Parameters are captured when the mutation is built; the snapshot it
/// sees is whichever one is fresh when the queue drains.
#[derive(Clone)]
pub struct Mutation {
    label: String,
    eval: Arc<Eval>,
}

impl Mutation {
    pub fn new<F>(label: impl Into<String>, eval: F) -> Self
    where
        F: Fn(&Snapshot) -> Result<WriteRequest, CoreError> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            eval: Arc::new(eval),
        }
    }

    /// Set fields on the system config.
    pub fn system(fields: Vec<(String, FieldValue)>) -> Self {
        let label = format!("system {}", describe(&fields));
        Self::new(label, move |_| Ok(WriteRequest::system(fields.clone())))
    }

    /// Set fields on a zone. Fails at drain time if the zone is gone.
    pub fn zone(zone: impl Into<String>, fields: Vec<(String, FieldValue)>) -> Self {
        let zone = zone.into();
        let label = format!("zone {zone} {}", describe(&fields));
        Self::new(label, move |snapshot| {
            if snapshot.zone(&zone).is_none() {
                return Err(CoreError::TargetNotFound {
                    target: format!("zone {zone}"),
                });
            }
            Ok(WriteRequest::zone(zone.clone(), fields.clone()))
        })
    }

    /// Set fields on a zone activity. Fails at drain time if it is gone.
    pub fn activity(
        zone: impl Into<String>,
        activity: impl Into<String>,
        fields: Vec<(String, FieldValue)>,
    ) -> Self {
        let zone = zone.into();
        let activity = activity.into();
        let label = format!("zone {zone} activity {activity} {}", describe(&fields));
        Self::new(label, move |snapshot| {
            if snapshot.activity(&zone, &activity).is_none() {
                return Err(CoreError::TargetNotFound {
                    target: format!("zone {zone} activity {activity}"),
                });
            }
            Ok(WriteRequest::activity(
                zone.clone(),
                activity.clone(),
                fields.clone(),
            ))
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn evaluate(&self, snapshot: &Snapshot) -> Result<WriteRequest, CoreError> {
        (self.eval)(snapshot)
    }
}

fn describe(fields: &[(String, FieldValue)]) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation").field("label", &self.label).finish()
    }
}

/// A mutation with its queue-assigned id.
#[derive(Debug, Clone)]
pub(crate) struct Queued {
    pub id: u64,
    pub mutation: Mutation,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Queued>,
    next_id: u64,
    /// Bumped on every push; lets a drain tell whether anything arrived.
    generation: u64,
}

/// FIFO queue of pending mutations.
#[derive(Default)]
pub(crate) struct MutationQueue {
    state: Mutex<QueueState>,
}

impl MutationQueue {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("queue lock poisoned")
    }

    pub fn push(&self, mutation: Mutation) -> u64 {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.generation += 1;
        state.entries.push_back(Queued { id, mutation });
        id
    }

    pub fn front(&self) -> Option<Queued> {
        self.lock().entries.front().cloned()
    }

    /// Remove the head, but only if it is still `id`.
    pub fn pop_front_if(&self, id: u64) -> bool {
        let mut state = self.lock();
        if state.entries.front().is_some_and(|q| q.id == id) {
            state.entries.pop_front();
            true
        } else {
            false
        }
    }

    pub fn entries(&self) -> Vec<Queued> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }
}
