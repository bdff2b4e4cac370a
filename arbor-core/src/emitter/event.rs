//! Event types.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::tree::{FieldId, NodeId, StateChangeMetadata};

/// The stream an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// A field of the node was written.
    StateDidChange,
    /// A field the observer read was written.
    ObservedStateDidChange,
    /// The node's children changed.
    RoutesDidChange,
    /// Something at or below the node changed.
    SubtreeDidChange,
    /// Something the observer read at or below the node changed.
    ObservedSubtreeDidChange,
    /// The node's rules changed validity.
    ValidityDidChange,
}

impl StreamKind {
    /// The base stream an observed stream filters.
    pub(crate) fn base(self) -> Self {
        match self {
            StreamKind::ObservedStateDidChange => StreamKind::StateDidChange,
            StreamKind::ObservedSubtreeDidChange => StreamKind::SubtreeDidChange,
            other => other,
        }
    }

    pub(crate) fn is_observed(self) -> bool {
        self.base() != self
    }
}

/// A change notification. Events are immutable snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    /// Fields of `node` were written; `changes` lists each distinct change.
    StateDidChange {
        /// The node whose state changed.
        node: NodeId,
        /// What was written.
        changes: Arc<[StateChangeMetadata]>,
    },
    /// A field the observer of `node` read was written.
    ObservedStateDidChange {
        /// The observed node.
        node: NodeId,
    },
    /// `node` attached, detached, or reordered children.
    RoutesDidChange {
        /// The node whose route changed.
        node: NodeId,
    },
    /// Something at or below `node` changed.
    SubtreeDidChange {
        /// The subtree root.
        node: NodeId,
    },
    /// Something the observer of `node` read at or below it changed.
    ObservedSubtreeDidChange {
        /// The observed subtree root.
        node: NodeId,
    },
    /// `node`'s rules became valid or invalid.
    ValidityDidChange {
        /// The node.
        node: NodeId,
        /// Whether the rules now produce a valid route.
        valid: bool,
    },
}

impl TreeEvent {
    /// The node the event is about.
    pub fn node(&self) -> NodeId {
        match *self {
            TreeEvent::StateDidChange { node, .. }
            | TreeEvent::ObservedStateDidChange { node }
            | TreeEvent::RoutesDidChange { node }
            | TreeEvent::SubtreeDidChange { node }
            | TreeEvent::ObservedSubtreeDidChange { node }
            | TreeEvent::ValidityDidChange { node, .. } => node,
        }
    }

    /// The stream the event is delivered on.
    pub fn kind(&self) -> StreamKind {
        match self {
            TreeEvent::StateDidChange { .. } => StreamKind::StateDidChange,
            TreeEvent::ObservedStateDidChange { .. } => StreamKind::ObservedStateDidChange,
            TreeEvent::RoutesDidChange { .. } => StreamKind::RoutesDidChange,
            TreeEvent::SubtreeDidChange { .. } => StreamKind::SubtreeDidChange,
            TreeEvent::ObservedSubtreeDidChange { .. } => StreamKind::ObservedSubtreeDidChange,
            TreeEvent::ValidityDidChange { .. } => StreamKind::ValidityDidChange,
        }
    }

    /// The observed counterpart of a state or subtree event.
    pub(crate) fn observed(&self) -> Option<TreeEvent> {
        match *self {
            TreeEvent::StateDidChange { node, .. } => {
                Some(TreeEvent::ObservedStateDidChange { node })
            }
            TreeEvent::SubtreeDidChange { node } => {
                Some(TreeEvent::ObservedSubtreeDidChange { node })
            }
            _ => None,
        }
    }
}

/// Everything one mutation batch produced, ready for dispatch.
#[derive(Debug, Default)]
pub(crate) struct EventBatch {
    pub(crate) events: Vec<TreeEvent>,
    /// Fields reported by state changes at or below each node.
    pub(crate) subtree_fields: HashMap<NodeId, HashSet<FieldId>>,
    /// Nodes detached during the batch; their streams end.
    pub(crate) detached: Vec<NodeId>,
}

impl EventBatch {
    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty() && self.detached.is_empty()
    }

    /// The fields an observed stream checks its reads against for `event`.
    pub(crate) fn fields_of(&self, event: &TreeEvent) -> Vec<FieldId> {
        match event {
            TreeEvent::StateDidChange { changes, .. } => changes
                .iter()
                .flat_map(StateChangeMetadata::fields)
                .collect(),
            TreeEvent::SubtreeDidChange { node } => self
                .subtree_fields
                .get(node)
                .into_iter()
                .flatten()
                .copied()
                .collect(),
            _ => Vec::new(),
        }
    }
}
