//! Receiving ends of the emitter.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use super::event::TreeEvent;
use crate::tree::FieldId;

/// A stream of [`TreeEvent`]s.
#[derive(Debug)]
pub struct EventStream {
    receiver: UnboundedReceiver<TreeEvent>,
}

impl EventStream {
    pub(crate) fn new(receiver: UnboundedReceiver<TreeEvent>) -> Self {
        Self { receiver }
    }

    /// Wait for the next event. Returns `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<TreeEvent> {
        self.receiver.recv().await
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<TreeEvent> {
        self.receiver.try_recv().ok()
    }

    /// Take every queued event.
    pub fn drain(&mut self) -> Vec<TreeEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// The set of fields an observer has read since it was last notified.
#[derive(Debug, Clone, Default)]
pub struct ReadSet {
    fields: Arc<Mutex<HashSet<FieldId>>>,
}

impl ReadSet {
    /// Record a read.
    pub fn record(&self, field: FieldId) {
        self.fields.lock().insert(field);
    }

    /// Whether `field` was read since the last notification.
    pub fn contains(&self, field: FieldId) -> bool {
        self.fields.lock().contains(&field)
    }

    /// Number of recorded fields.
    pub fn len(&self) -> usize {
        self.fields.lock().len()
    }

    /// Whether nothing has been read since the last notification.
    pub fn is_empty(&self) -> bool {
        self.fields.lock().is_empty()
    }

    /// Clear the set and return `true` if it contains any of `changed`.
    pub(crate) fn take_if_touched(&self, changed: &[FieldId]) -> bool {
        let mut fields = self.fields.lock();
        if changed.iter().any(|field| fields.contains(field)) {
            fields.clear();
            true
        } else {
            false
        }
    }
}

/// An event stream filtered by what its observer read.
#[derive(Debug)]
pub struct ObservedStream {
    stream: EventStream,
    reads: ReadSet,
}

impl ObservedStream {
    pub(crate) fn new(stream: EventStream, reads: ReadSet) -> Self {
        Self { stream, reads }
    }

    /// The observer's read set.
    pub fn reads(&self) -> &ReadSet {
        &self.reads
    }

    /// Wait for the next event. Returns `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<TreeEvent> {
        self.stream.recv().await
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<TreeEvent> {
        self.stream.try_recv()
    }

    /// Take every queued event.
    pub fn drain(&mut self) -> Vec<TreeEvent> {
        self.stream.drain()
    }
}
