//! Route Reconciliation
//!
//! The router diffs the route a node's rules just produced against the
//! children the node already has, matching entries by [`Identity`]:
//!
//! - identity in both: the child scope is kept and receives the new props
//!   (its value fields and behaviors survive)
//! - identity only in the previous route: the child is detached
//! - identity only in the new route: a child scope is attached
//!
//! Reconciliation walks the tree with an explicit stack, parents before
//! children, so a child always inherits its parent's settled dependencies.
//! Detach also walks iteratively. Neither recurses on the call stack, so
//! chains thousands of nodes deep are safe.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::context::Rules;
use super::dependency::DependencyValues;
use super::id::{FieldId, NodeId};
use super::route::{Entry, Identity, ResolvedRoute};
use super::runtime::TreeState;
use super::scope::{Lifecycle, Scope};
use crate::error::{Result, TreeError};

impl TreeState {
    /// Attach the root scope and everything its rules route to.
    pub(crate) fn attach_root(
        &mut self,
        entry: Entry,
        dependencies: DependencyValues,
    ) -> Result<NodeId> {
        let identity = entry.identity(0);
        let root = self.create_scope(None, identity, entry, dependencies)?;
        self.root = Some(root);
        self.reconcile(root)?;
        Ok(root)
    }

    fn create_scope(
        &mut self,
        parent: Option<NodeId>,
        identity: Identity,
        entry: Entry,
        dependencies: DependencyValues,
    ) -> Result<NodeId> {
        let (depth, parent) = match parent {
            Some(id) => {
                let scope = self.scope(id)?;
                if scope.lifecycle == Lifecycle::Detached {
                    return Err(TreeError::Detached(id));
                }
                (scope.depth + 1, Some((id, scope.token.clone())))
            }
            None => (0, None),
        };
        if depth > self.max_depth {
            return Err(TreeError::DepthExceeded(self.max_depth));
        }

        let id = NodeId::next();
        let scope = Scope::new(
            id,
            parent.as_ref().map(|(parent, token)| (*parent, token)),
            identity,
            depth,
            entry,
            dependencies,
        )?;
        debug!(node = %id, identity = %scope.identity, depth, "attach");

        self.scopes.insert(id, scope);
        self.live.insert(id);
        self.stats.attached += 1;
        self.starting.push(id);
        Ok(id)
    }

    /// Re-evaluate `start` and everything below it. Returns whether any
    /// route changed.
    pub(crate) fn reconcile(&mut self, start: NodeId) -> Result<bool> {
        let mut changed = false;
        let mut stack = vec![start];

        while let Some(id) = stack.pop() {
            let Some(scope) = self.scopes.get(&id) else {
                continue;
            };
            let node = Arc::clone(&scope.node);
            let dependencies = scope.dependencies.clone();
            let was_valid = scope.valid;

            let mut cx = Rules::new(self, id, &dependencies);
            let route = node.rules(&mut cx);
            let reads = cx.into_reads();
            self.retrack(id, reads)?;

            let valid = match route {
                Ok(route) => {
                    changed |= self.update_children(id, route.resolve(id)?)?;
                    true
                }
                Err(TreeError::InvalidProjection(field)) => {
                    debug!(node = %id, %field, "rules read an invalid projection");
                    false
                }
                Err(err) => return Err(err),
            };

            let scope = self.scope_mut(id)?;
            scope.valid = valid;
            scope.mark_attached();
            stack.extend(scope.children.values().rev().copied());
            if was_valid != valid {
                self.batch.validity_changed(id, was_valid, valid);
            }
        }

        Ok(changed)
    }

    fn retrack(&mut self, id: NodeId, reads: HashSet<FieldId>) -> Result<()> {
        let scope = self.scopes.get_mut(&id).ok_or(TreeError::Detached(id))?;
        self.readers.untrack(id, &scope.reads);
        self.readers.track(id, &reads);
        scope.reads = reads;
        Ok(())
    }

    /// Diff `parent`'s children against `route`.
    fn update_children(&mut self, parent: NodeId, route: ResolvedRoute) -> Result<bool> {
        let scope = self.scope_mut(parent)?;
        let previous = std::mem::take(&mut scope.children);
        let inherited = route.dependencies(&scope.dependencies);

        let mut changed = false;
        for (identity, child) in &previous {
            if !route.entries.contains_key(identity) {
                changed |= self.detach(*child);
            }
        }

        let mut children = IndexMap::with_capacity(route.entries.len());
        let mut outcome = Ok(());
        for (identity, entry) in route.entries {
            let result = match previous.get(&identity) {
                Some(&child) => self.update_scope(child, entry, &inherited).map(|()| child),
                None => {
                    changed = true;
                    self.create_scope(Some(parent), identity.clone(), entry, inherited.clone())
                }
            };
            match result {
                Ok(child) => {
                    children.insert(identity, child);
                }
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        if outcome.is_err() {
            // Keep whatever survived so a later detach still finds it.
            for (identity, child) in previous {
                if self.scopes.contains_key(&child) {
                    children.entry(identity).or_insert(child);
                }
            }
        } else if !changed && !previous.keys().eq(children.keys()) {
            changed = true;
        }

        self.scope_mut(parent)?.children = children;
        if changed {
            self.batch.routes_changed(parent);
        }
        outcome.map(|()| changed)
    }

    /// Hand fresh props and dependencies to a kept child.
    fn update_scope(
        &mut self,
        child: NodeId,
        entry: Entry,
        dependencies: &DependencyValues,
    ) -> Result<()> {
        let scope = self.scope_mut(child)?;
        let expected = scope.identity.type_name();
        let node = Arc::get_mut(&mut scope.node).ok_or(TreeError::NodeBusy(child))?;
        if !node.update(entry.into_props()) {
            return Err(TreeError::NodeType {
                node: child,
                expected,
            });
        }
        scope.dependencies = dependencies.clone();
        Ok(())
    }

    /// Detach `id` and its subtree. Returns `false` if it was already gone.
    ///
    /// Behaviors are cancelled first, then scopes are torn down children
    /// before parents.
    pub(crate) fn detach(&mut self, id: NodeId) -> bool {
        let Some(scope) = self.scopes.get(&id) else {
            return false;
        };
        scope.token.cancel();
        let parent = scope.parent;

        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(scope) = self.scopes.get(&next) {
                order.push(next);
                stack.extend(scope.children.values().copied());
            }
        }

        for node in order.into_iter().rev() {
            if let Some(mut scope) = self.scopes.remove(&node) {
                scope.tear_down();
                self.live.remove(&node);
                self.readers.untrack(node, &scope.reads);
                self.stats.detached += 1;
                self.batch.mark_detached(node);
                debug!(node = %node, identity = %scope.identity, "detach");
            }
        }

        match parent {
            Some(parent) => {
                if let Some(scope) = self.scopes.get_mut(&parent) {
                    scope.children.retain(|_, child| *child != id);
                    self.batch.routes_changed(parent);
                }
            }
            None => {
                if self.root == Some(id) {
                    self.root = None;
                }
            }
        }
        true
    }
}
