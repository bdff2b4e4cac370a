//! Subscriber registry and dispatch.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};

use super::event::{EventBatch, StreamKind, TreeEvent};
use super::stream::{EventStream, ObservedStream, ReadSet};
use crate::tree::NodeId;

struct Subscriber {
    kind: StreamKind,
    sender: UnboundedSender<TreeEvent>,
    reads: Option<ReadSet>,
}

impl Subscriber {
    /// Deliver `event` if it belongs on this stream. Returns `false` once the
    /// receiving end is gone.
    fn deliver(&self, event: &TreeEvent, batch: &EventBatch) -> bool {
        if self.kind == event.kind() {
            return self.sender.send(event.clone()).is_ok();
        }
        if self.kind.base() == event.kind() {
            let touched = self
                .reads
                .as_ref()
                .is_some_and(|reads| reads.take_if_touched(&batch.fields_of(event)));
            if let (true, Some(observed)) = (touched, event.observed()) {
                return self.sender.send(observed).is_ok();
            }
        }
        !self.sender.is_closed()
    }
}

/// Per-node change streams.
///
/// Obtained from [`Tree::emitter`](crate::Tree::emitter). Subscriptions may
/// be taken from any thread. A subscription to a node that is not attached
/// yields a stream that has already ended.
pub struct Emitter {
    nodes: DashMap<NodeId, Vec<Subscriber>>,
    all: Mutex<Vec<UnboundedSender<TreeEvent>>>,
    /// Attached nodes, shared with the tree state.
    live: Arc<DashSet<NodeId>>,
}

impl Emitter {
    pub(crate) fn new(live: Arc<DashSet<NodeId>>) -> Self {
        Self {
            nodes: DashMap::new(),
            all: Mutex::new(Vec::new()),
            live,
        }
    }

    fn register(&self, node: NodeId, kind: StreamKind, reads: Option<ReadSet>) -> EventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut subscribers = self.nodes.entry(node).or_default();

        // Checked under the entry lock: a detach removes the node from
        // `live` before its dispatch removes the entry.
        if !self.live.contains(&node) {
            drop(subscribers);
            self.nodes.remove_if(&node, |_, subscribers| subscribers.is_empty());
            return EventStream::new(receiver);
        }

        subscribers.push(Subscriber {
            kind,
            sender,
            reads,
        });
        EventStream::new(receiver)
    }

    /// Subscribe to one of `node`'s streams.
    ///
    /// Subscribing to an observed kind this way yields a stream whose read
    /// set is unreachable, so it never fires; use [`observe`](Self::observe).
    pub fn subscribe(&self, node: NodeId, kind: StreamKind) -> EventStream {
        let reads = kind.is_observed().then(ReadSet::default);
        self.register(node, kind, reads)
    }

    /// Subscribe to an observed stream of `node`. Base kinds are mapped to
    /// their observed counterparts.
    pub fn observe(&self, node: NodeId, kind: StreamKind) -> ObservedStream {
        let kind = match kind {
            StreamKind::StateDidChange => StreamKind::ObservedStateDidChange,
            StreamKind::SubtreeDidChange => StreamKind::ObservedSubtreeDidChange,
            other => other,
        };
        let reads = ReadSet::default();
        let stream = self.register(node, kind, Some(reads.clone()));
        ObservedStream::new(stream, reads)
    }

    /// Fields of `node` were written.
    pub fn state_did_change(&self, node: NodeId) -> EventStream {
        self.subscribe(node, StreamKind::StateDidChange)
    }

    /// Fields of `node` that the observer read were written.
    pub fn observed_state_did_change(&self, node: NodeId) -> ObservedStream {
        self.observe(node, StreamKind::ObservedStateDidChange)
    }

    /// `node`'s children changed.
    pub fn routes_did_change(&self, node: NodeId) -> EventStream {
        self.subscribe(node, StreamKind::RoutesDidChange)
    }

    /// Something at or below `node` changed.
    pub fn subtree_did_change(&self, node: NodeId) -> EventStream {
        self.subscribe(node, StreamKind::SubtreeDidChange)
    }

    /// Something the observer read at or below `node` changed.
    pub fn observed_subtree_did_change(&self, node: NodeId) -> ObservedStream {
        self.observe(node, StreamKind::ObservedSubtreeDidChange)
    }

    /// `node`'s rules changed validity.
    pub fn validity_did_change(&self, node: NodeId) -> EventStream {
        self.subscribe(node, StreamKind::ValidityDidChange)
    }

    /// Every event of every node, in dispatch order.
    pub fn all(&self) -> EventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.all.lock().push(sender);
        EventStream::new(receiver)
    }

    /// Number of live per-node subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.nodes.iter().map(|entry| entry.value().len()).sum()
    }

    /// Send a batch. Called with the tree context held.
    pub(crate) fn dispatch(&self, batch: &EventBatch) {
        if batch.is_empty() {
            return;
        }

        {
            let mut all = self.all.lock();
            for event in &batch.events {
                all.retain(|sender| sender.send(event.clone()).is_ok());
            }
        }

        for event in &batch.events {
            let node = event.node();
            if let Some(mut subscribers) = self.nodes.get_mut(&node) {
                subscribers.retain(|subscriber| subscriber.deliver(event, batch));
                tracing::trace!(%node, kind = ?event.kind(), "dispatched");
            }
        }

        // Dropping the senders ends the streams of detached nodes.
        for node in &batch.detached {
            self.nodes.remove(node);
        }

        // Streams dropped by their receivers on nodes with no events.
        self.nodes.retain(|_, subscribers| {
            subscribers.retain(|subscriber| !subscriber.sender.is_closed());
            !subscribers.is_empty()
        });
    }

    /// End every stream.
    pub(crate) fn close(&self) {
        self.nodes.clear();
        self.all.lock().clear();
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("nodes", &self.nodes.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
