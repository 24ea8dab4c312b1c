// ── Change notifications ──
//
// Closed set of topics over a broadcast channel. Every delivery carries
// the readable snapshot as it was when the change was published.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use strum::{Display, EnumIter, EnumString};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{trace, warn};

use crate::snapshot::{Section, Snapshot};

/// Buffered changes per subscriber before it starts lagging.
const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Topic {
    Profile,
    Status,
    Config,
    /// An optimistic local write was applied ahead of remote confirmation.
    LocalMutation,
}

impl From<Section> for Topic {
    fn from(section: Section) -> Self {
        match section {
            Section::Profile => Topic::Profile,
            Section::Status => Topic::Status,
            Section::Config => Topic::Config,
        }
    }
}

/// One delivered change.
#[derive(Debug, Clone)]
pub struct Change {
    pub topic: Topic,
    pub snapshot: Arc<Snapshot>,
}

pub(crate) struct EventBus {
    tx: broadcast::Sender<Change>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub(crate) fn publish(&self, topic: Topic, snapshot: Arc<Snapshot>) {
        if self.tx.send(Change { topic, snapshot }).is_err() {
            trace!(%topic, "no subscribers");
        }
    }

    pub(crate) fn subscribe(&self, topics: &[Topic]) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            topics: topics.to_vec(),
        }
    }
}

/// A filtered view of the change bus.
///
/// An empty topic list receives every topic.
pub struct Subscription {
    rx: broadcast::Receiver<Change>,
    topics: Vec<Topic>,
}

fn wants(topics: &[Topic], topic: Topic) -> bool {
    topics.is_empty() || topics.contains(&topic)
}

impl Subscription {
    /// Wait for the next matching change.
    /// Returns `None` once the publisher has been dropped.
    pub async fn recv(&mut self) -> Option<Change> {
        loop {
            match self.rx.recv().await {
                Ok(change) if wants(&self.topics, change.topic) => return Some(change),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change subscriber lagged, skipping missed changes");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching change that is already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<Change> {
        loop {
            match self.rx.try_recv() {
                Ok(change) if wants(&self.topics, change.topic) => return Some(change),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "change subscriber lagged, skipping missed changes");
                }
                Err(_) => return None,
            }
        }
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> ChangeStream {
        ChangeStream {
            inner: BroadcastStream::new(self.rx),
            topics: self.topics,
        }
    }
}

/// `Stream` adapter backed by a `broadcast::Receiver`.
pub struct ChangeStream {
    inner: BroadcastStream<Change>,
    topics: Vec<Topic>,
}

impl Stream for ChangeStream {
    type Item = Change;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(change))) => {
                    if wants(&self.topics, change.topic) {
                        return Poll::Ready(Some(change));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, "change stream lagged, skipping missed changes");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
