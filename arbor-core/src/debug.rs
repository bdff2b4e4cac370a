//! Diagnostic dumps of a tree.

use std::fmt::Write;

use serde::Serialize;

use crate::tree::{NodeId, TreeState};

/// One attached scope, as captured by [`Tree::snapshot`](crate::Tree::snapshot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeSnapshot {
    /// Raw node id.
    pub id: u64,
    /// Raw id of the parent; `None` for the root.
    pub parent: Option<u64>,
    /// Distance from the root.
    pub depth: usize,
    /// Identity within the parent's route, e.g. `Todo[42]`.
    pub identity: String,
    /// Full type name of the node.
    pub node_type: &'static str,
    /// Allocated fields, values and projections.
    pub fields: usize,
    /// Allocated value fields.
    pub values: usize,
    /// Raw ids of the children, in route order.
    pub children: Vec<u64>,
    /// Whether the last rule evaluation produced a valid route.
    pub valid: bool,
    /// Number of injected dependency keys the scope sees.
    pub dependencies: usize,
}

/// Scopes in depth-first order, parents first.
fn walk(state: &TreeState) -> Vec<NodeId> {
    let mut order = Vec::with_capacity(state.scopes.len());
    let mut stack: Vec<NodeId> = state.root.into_iter().collect();
    while let Some(id) = stack.pop() {
        if let Some(scope) = state.scopes.get(&id) {
            order.push(id);
            stack.extend(scope.children.values().rev().copied());
        }
    }
    order
}

pub(crate) fn snapshot(state: &TreeState) -> Vec<ScopeSnapshot> {
    walk(state)
        .into_iter()
        .filter_map(|id| state.scopes.get(&id))
        .map(|scope| ScopeSnapshot {
            id: scope.id.raw(),
            parent: scope.parent.map(|parent| parent.raw()),
            depth: scope.depth,
            identity: scope.identity.to_string(),
            node_type: scope.identity.type_name(),
            fields: scope.fields.len(),
            values: scope.fields.values(),
            children: scope.children.values().map(NodeId::raw).collect(),
            valid: scope.valid,
            dependencies: scope.dependencies.len(),
        })
        .collect()
}

pub(crate) fn render(state: &TreeState) -> String {
    let mut out = String::new();
    for id in walk(state) {
        let Some(scope) = state.scopes.get(&id) else {
            continue;
        };
        let _ = write!(
            out,
            "{:indent$}{} ({})",
            "",
            scope.identity,
            scope.id,
            indent = scope.depth * 2
        );
        if !scope.valid {
            out.push_str(" [invalid]");
        }
        out.push('\n');
    }
    out
}
