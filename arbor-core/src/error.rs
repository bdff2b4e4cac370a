//! Error types.
//!
//! Three families of failure exist in the runtime:
//!
//! - [`TreeError`]: structural faults. A broken invariant (duplicate route
//!   identity, a write through an invalid projection, use of a detached
//!   scope) surfaces immediately at the operation that detected it.
//! - [`BehaviorCancelled`]: the single failure path of a behavior. It is
//!   reported when the owning scope is detached or a hook cancels the
//!   behavior before it starts.
//! - [`StoreError`]: failures of the storage collaborator. The core never
//!   inspects them; behaviors hand them to their result handlers.

use std::time::Duration;

use thiserror::Error;

use crate::behavior::BehaviorId;
use crate::tree::{FieldId, Identity, NodeId};

/// Result alias used throughout the crate.
pub type Result<T, E = TreeError> = std::result::Result<T, E>;

/// A structural fault in the state tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The scope has already been detached (or never existed).
    #[error("node {0} is not attached")]
    Detached(NodeId),

    /// The tree was disposed; no further operations are possible.
    #[error("the tree has been disposed")]
    Disposed,

    /// Two entries of one route share an identity.
    #[error("route of node {parent} declares identity {identity} more than once")]
    DuplicateIdentity {
        /// Node whose rules produced the route.
        parent: NodeId,
        /// The repeated identity.
        identity: Identity,
    },

    /// A projection's validity predicate rejected the current upstream value.
    #[error("projection {0} is invalid for the current upstream value")]
    InvalidProjection(FieldId),

    /// A field handle was used with a value of a different type.
    #[error("field {field} does not hold a `{expected}`")]
    FieldType {
        /// The field that was accessed.
        field: FieldId,
        /// Type requested by the caller.
        expected: &'static str,
    },

    /// The field handle does not belong to its node's field store.
    #[error("field {0} is not known to its node")]
    UnknownField(FieldId),

    /// The node model is not of the requested type.
    #[error("node {node} is not a `{expected}`")]
    NodeType {
        /// Node that was accessed.
        node: NodeId,
        /// Type requested by the caller.
        expected: &'static str,
    },

    /// A node model was still borrowed when an update needed exclusive access.
    #[error("node {0} is in use and cannot be updated")]
    NodeBusy(NodeId),

    /// Field writes kept triggering re-evaluation past the configured limit.
    #[error("state did not settle after {0} flush passes")]
    Unstable(usize),

    /// Routing nested deeper than the configured limit.
    #[error("tree depth exceeded the limit of {0}")]
    DepthExceeded(usize),

    /// A behavior was started outside a tokio runtime.
    #[error("behaviors require a tokio runtime")]
    NoAsyncRuntime,
}

/// A behavior was cancelled before its result could be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("behavior `{id}` was cancelled")]
pub struct BehaviorCancelled {
    /// Id of the cancelled behavior.
    pub id: BehaviorId,
}

/// Failure when awaiting a produced behavior.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BehaviorError {
    /// The behavior was cancelled.
    #[error(transparent)]
    Cancelled(#[from] BehaviorCancelled),

    /// The deadline passed before the behavior finished. The action itself
    /// may still be running.
    #[error("behavior `{id}` timed out after {after:?}")]
    TimedOut {
        /// Id of the behavior.
        id: BehaviorId,
        /// The deadline that elapsed.
        after: Duration,
    },
}

/// Failure reported by a storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Reading the record failed.
    #[error("failed to read `{key}`: {reason}")]
    Read {
        /// Key that was read.
        key: String,
        /// Collaborator-specific detail.
        reason: String,
    },

    /// Writing the record failed.
    #[error("failed to write `{key}`: {reason}")]
    Write {
        /// Key that was written.
        key: String,
        /// Collaborator-specific detail.
        reason: String,
    },
}
