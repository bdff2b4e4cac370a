//! Scopes: the runtime instances of attached nodes.
//!
//! Scopes live in the runtime's arena, keyed by [`NodeId`]. A parent refers
//! to its children by id and a child refers to its parent by id, so the
//! ownership graph has no counted edges and cannot form cycles. Detaching a
//! scope removes it (and its subtree) from the arena.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use super::dependency::DependencyValues;
use super::field::{FieldStore, Fields};
use super::id::{FieldId, NodeId};
use super::node::AnyNode;
use super::route::{Entry, Identity};
use crate::error::{Result, TreeError};

/// Lifecycle of a scope. `Detached` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    /// Created, rules not evaluated yet.
    Unattached,
    /// Live in the tree.
    Attached,
    /// Torn down.
    Detached,
}

/// Runtime state of one attached node.
pub(crate) struct Scope {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<NodeId>,
    pub(crate) identity: Identity,
    pub(crate) depth: usize,
    pub(crate) node: Arc<dyn AnyNode>,
    pub(crate) fields: FieldStore,
    pub(crate) dependencies: DependencyValues,
    /// Children in route order; doubles as the previous route when diffing.
    pub(crate) children: IndexMap<Identity, NodeId>,
    /// Fields the last rule evaluation read.
    pub(crate) reads: HashSet<FieldId>,
    pub(crate) valid: bool,
    pub(crate) lifecycle: Lifecycle,
    /// Cancelled on detach; behaviors and child scopes hold child tokens.
    pub(crate) token: CancellationToken,
}

impl Scope {
    /// Build the node for `entry` and wrap it in an unattached scope.
    pub(crate) fn new(
        id: NodeId,
        parent: Option<(NodeId, &CancellationToken)>,
        identity: Identity,
        depth: usize,
        entry: Entry,
        dependencies: DependencyValues,
    ) -> Result<Self> {
        let mut fields = FieldStore::default();
        let node = entry
            .build(&mut Fields::new(id, &mut fields, &dependencies))
            .ok_or(TreeError::NodeType {
                node: id,
                expected: identity.type_name(),
            })?;

        let token = match parent {
            Some((_, token)) => token.child_token(),
            None => CancellationToken::new(),
        };

        Ok(Self {
            id,
            parent: parent.map(|(parent, _)| parent),
            identity,
            depth,
            node,
            fields,
            dependencies,
            children: IndexMap::new(),
            reads: HashSet::new(),
            valid: true,
            lifecycle: Lifecycle::Unattached,
            token,
        })
    }

    pub(crate) fn mark_attached(&mut self) {
        if self.lifecycle == Lifecycle::Unattached {
            self.lifecycle = Lifecycle::Attached;
        }
    }

    /// Cancel behaviors and stop the node. Returns `false` if already detached.
    pub(crate) fn tear_down(&mut self) -> bool {
        if self.lifecycle == Lifecycle::Detached {
            return false;
        }
        self.token.cancel();
        self.lifecycle = Lifecycle::Detached;
        self.node.did_stop();
        true
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

/// Identity path from the root to a node, e.g. `/Root#0/Todo[42]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath {
    segments: Vec<Identity>,
}

impl NodePath {
    pub(crate) fn new(segments: Vec<Identity>) -> Self {
        Self { segments }
    }

    /// Identities from the root down.
    pub fn segments(&self) -> &[Identity] {
        &self.segments
    }

    /// The last segment's identity.
    pub fn leaf(&self) -> Option<&Identity> {
        self.segments.last()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}
