//! Identifiers for nodes and fields.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier of an attached node.
///
/// Ids come from a process-wide counter and are never reused, so an id that
/// is still queued in an event stream cannot alias a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What a field slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Ground-truth storage.
    Value,
    /// A transformed view over a value field.
    Projection,
}

/// Identifies a field slot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId {
    node: NodeId,
    slot: u32,
    kind: FieldKind,
}

impl FieldId {
    pub(crate) fn new(node: NodeId, slot: u32, kind: FieldKind) -> Self {
        Self { node, slot, kind }
    }

    /// The node that owns this field.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Position of the field within its node.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Whether this is a value or a projection slot.
    pub fn kind(&self) -> FieldKind {
        self.kind
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            FieldKind::Value => "v",
            FieldKind::Projection => "p",
        };
        write!(f, "{}.{}{}", self.node, tag, self.slot)
    }
}
