//! Flush Scheduler
//!
//! The scheduler decides which dirty nodes to re-evaluate, and in what order.
//!
//! # Algorithm
//!
//! Re-evaluating a node re-evaluates its whole subtree (the router recurses
//! into every child it keeps), so a dirty node with a dirty ancestor is
//! already covered:
//!
//! 1. Collect the dirty nodes that are still attached
//! 2. Drop every node that has a dirty ancestor
//! 3. Sort the rest by depth (parents before children), keeping the order in
//!    which nodes were marked for nodes of equal depth
//!
//! Parent-first order matters: a parent's dependency context must be settled
//! before its children inherit it.

use std::collections::HashSet;

use super::id::NodeId;

/// Where a node sits in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lineage {
    pub(crate) depth: usize,
    pub(crate) parent: Option<NodeId>,
}

/// Reduce `dirty` to the topmost nodes, ordered parents first.
///
/// `lineage` returns `None` for nodes that are no longer attached.
pub(crate) fn topmost<I, F>(dirty: I, lineage: F) -> Vec<NodeId>
where
    I: IntoIterator<Item = NodeId>,
    F: Fn(NodeId) -> Option<Lineage>,
{
    let candidates: Vec<(NodeId, Lineage)> = dirty
        .into_iter()
        .filter_map(|id| lineage(id).map(|line| (id, line)))
        .collect();
    let marked: HashSet<NodeId> = candidates.iter().map(|(id, _)| *id).collect();

    let mut roots: Vec<(NodeId, usize)> = Vec::with_capacity(candidates.len());
    let mut seen = HashSet::with_capacity(candidates.len());
    for (id, line) in candidates {
        if !seen.insert(id) {
            continue;
        }
        let mut ancestor = line.parent;
        let mut covered = false;
        while let Some(parent) = ancestor {
            if marked.contains(&parent) {
                covered = true;
                break;
            }
            ancestor = lineage(parent).and_then(|line| line.parent);
        }
        if !covered {
            roots.push((id, line.depth));
        }
    }

    roots.sort_by_key(|(_, depth)| *depth);
    roots.into_iter().map(|(id, _)| id).collect()
}
