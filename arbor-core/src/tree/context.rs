//! Access contexts handed to node code.
//!
//! - [`Rules`]: what a node's `rules` may see. Every field read is recorded
//!   so the runtime knows which writes must re-evaluate the node.
//! - [`View`]: read-only access to the whole tree, optionally recording reads
//!   into an observer's [`ReadSet`].
//! - [`Tx`]: a write transaction. It only exists while the tree context is
//!   held, so every mutation is serialized.

use std::collections::HashSet;

use tracing::{error, trace};

use super::dependency::{DependencyKey, DependencyValues};
use super::field::{Projection, StateChangeMetadata, Value};
use super::id::{FieldId, NodeId};
use super::node::Node;
use super::runtime::{Runtime, TreeState};
use super::scope::NodePath;
use crate::behavior::{self, Behavior, Deferred, Handler};
use crate::emitter::ReadSet;
use crate::error::{Result, TreeError};

/// Context for [`Node::rules`](super::Node::rules).
pub struct Rules<'a> {
    state: &'a TreeState,
    node: NodeId,
    dependencies: &'a DependencyValues,
    reads: HashSet<FieldId>,
}

impl<'a> Rules<'a> {
    pub(crate) fn new(
        state: &'a TreeState,
        node: NodeId,
        dependencies: &'a DependencyValues,
    ) -> Self {
        Self {
            state,
            node,
            dependencies,
            reads: HashSet::new(),
        }
    }

    /// Id of the node being evaluated.
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Read a value field and depend on it.
    pub fn get<T: Clone + 'static>(&mut self, field: &Value<T>) -> Result<T> {
        self.reads.insert(field.id());
        self.state.read_value(field)
    }

    /// Read a projection and depend on it and its backing value field.
    ///
    /// Fails with [`TreeError::InvalidProjection`] while the projection is
    /// invalid; returning that error from `rules` marks the node invalid
    /// instead of failing the transaction.
    pub fn get_projection<T: 'static>(&mut self, projection: &Projection<T>) -> Result<T> {
        self.reads.insert(projection.id());
        self.reads.insert(projection.source());
        self.state.read_projection(projection)
    }

    /// Whether `projection` is currently valid. Depends on its backing field.
    pub fn is_valid<T: 'static>(&mut self, projection: &Projection<T>) -> Result<bool> {
        self.reads.insert(projection.source());
        self.state.projection_valid(projection)
    }

    /// Resolve a dependency from this node's inherited map.
    pub fn dependency<K: DependencyKey>(&self) -> K::Value {
        self.dependencies.get::<K>()
    }

    pub(crate) fn into_reads(self) -> HashSet<FieldId> {
        self.reads
    }
}

/// Read-only access to the tree.
pub struct View<'a> {
    state: &'a TreeState,
    tracker: Option<&'a ReadSet>,
}

impl<'a> View<'a> {
    pub(crate) fn new(state: &'a TreeState, tracker: Option<&'a ReadSet>) -> Self {
        Self { state, tracker }
    }

    fn track(&self, field: FieldId) {
        if let Some(tracker) = self.tracker {
            tracker.record(field);
        }
    }

    /// Read a value field.
    pub fn get<T: Clone + 'static>(&self, field: &Value<T>) -> Result<T> {
        self.track(field.id());
        self.state.read_value(field)
    }

    /// Read a projection. Reading an invalid projection is a fault.
    pub fn get_projection<T: 'static>(&self, projection: &Projection<T>) -> Result<T> {
        self.track(projection.id());
        self.track(projection.source());
        self.state.read_projection(projection).inspect_err(|err| {
            if matches!(err, TreeError::InvalidProjection(_)) {
                error!(projection = %projection.id(), "read through an invalid projection");
            }
        })
    }

    /// Whether `projection` is currently valid.
    pub fn is_valid<T: 'static>(&self, projection: &Projection<T>) -> Result<bool> {
        self.track(projection.source());
        self.state.projection_valid(projection)
    }

    /// Whether `node` is attached.
    pub fn contains(&self, node: NodeId) -> bool {
        self.state.scopes.contains_key(&node)
    }

    /// The root node, unless the tree was disposed.
    pub fn root(&self) -> Option<NodeId> {
        self.state.root
    }

    /// `node`'s children in route order.
    pub fn children(&self, node: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.state.scope(node)?.children.values().copied().collect())
    }

    /// `node`'s parent; `None` for the root.
    pub fn parent(&self, node: NodeId) -> Result<Option<NodeId>> {
        Ok(self.state.scope(node)?.parent)
    }

    /// Identity path from the root to `node`.
    pub fn path(&self, node: NodeId) -> Result<NodePath> {
        self.state.path(node)
    }

    /// `node`'s model, if it is an `N`.
    pub fn node<N: Node>(&self, node: NodeId) -> Result<&'a N> {
        let scope = self.state.scope(node)?;
        scope
            .node
            .as_any()
            .downcast_ref::<N>()
            .ok_or(TreeError::NodeType {
                node,
                expected: std::any::type_name::<N>(),
            })
    }

    /// Resolve a dependency as `node` sees it.
    pub fn dependency<K: DependencyKey>(&self, node: NodeId) -> Result<K::Value> {
        Ok(self.state.scope(node)?.dependencies.get::<K>())
    }

    /// Whether `node`'s rules last produced a valid route.
    pub fn is_node_valid(&self, node: NodeId) -> Result<bool> {
        Ok(self.state.scope(node)?.valid)
    }
}

/// A write transaction.
///
/// Writes take effect immediately; rule re-evaluation and event dispatch
/// happen once, when the enclosing [`Tree::write`](super::Tree::write)
/// returns.
pub struct Tx<'a> {
    rt: &'a Runtime,
    state: &'a mut TreeState,
}

impl<'a> Tx<'a> {
    pub(crate) fn new(rt: &'a Runtime, state: &'a mut TreeState) -> Self {
        Self { rt, state }
    }

    /// Read-only access to the tree as it currently stands.
    pub fn view(&self) -> View<'_> {
        View::new(self.state, None)
    }

    /// Read a value field.
    pub fn get<T: Clone + 'static>(&self, field: &Value<T>) -> Result<T> {
        self.state.read_value(field)
    }

    /// Read a projection.
    pub fn get_projection<T: 'static>(&self, projection: &Projection<T>) -> Result<T> {
        self.view().get_projection(projection)
    }

    /// Whether `projection` is currently valid.
    pub fn is_valid<T: 'static>(&self, projection: &Projection<T>) -> Result<bool> {
        self.state.projection_valid(projection)
    }

    /// Whether `node` is attached.
    pub fn contains(&self, node: NodeId) -> bool {
        self.state.scopes.contains_key(&node)
    }

    /// Resolve a dependency as `node` sees it.
    pub fn dependency<K: DependencyKey>(&self, node: NodeId) -> Result<K::Value> {
        self.view().dependency::<K>(node)
    }

    /// Overwrite a value field.
    pub fn set<T: Clone + Send + 'static>(&mut self, field: &Value<T>, value: T) -> Result<()> {
        let slot = self
            .state
            .scope_mut(field.id().node())?
            .fields
            .slot_mut(field.id())?;
        field.write(slot, value)?;
        self.record(StateChangeMetadata::Value(field.id()))
    }

    /// Mutate a value field in place.
    pub fn update<T, R, F>(&mut self, field: &Value<T>, f: F) -> Result<R>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut T) -> R,
    {
        let slot = self
            .state
            .scope_mut(field.id().node())?
            .fields
            .slot_mut(field.id())?;
        let out = f(field.get_mut(slot)?);
        self.record(StateChangeMetadata::Value(field.id()))?;
        Ok(out)
    }

    /// Write through a projection. Writing an invalid projection is a fault.
    pub fn set_projection<T: 'static>(&mut self, projection: &Projection<T>, value: T) -> Result<()> {
        self.state.scope(projection.id().node())?;
        let source = projection.source();
        let slot = self.state.scope_mut(source.node())?.fields.slot_mut(source)?;
        if let Err(err) = projection.write(slot, value) {
            error!(projection = %projection.id(), %err, "write through projection rejected");
            return Err(err);
        }
        self.record(StateChangeMetadata::Projection {
            projection: projection.id(),
            value: source,
        })
    }

    /// Start a fire-and-forget behavior bound to `owner`'s lifetime.
    ///
    /// The handler's result callback runs inside a later transaction; if
    /// `owner` is detached first, only its cancel callback runs.
    pub fn run<T: Send + 'static>(
        &mut self,
        owner: NodeId,
        behavior: Behavior<T>,
        handler: Handler<T>,
    ) -> Result<()> {
        let launch = self.rt.launch(self.state, owner)?;
        behavior::spawn_run(launch, behavior, handler);
        Ok(())
    }

    /// Prepare a behavior bound to `owner`'s lifetime for the caller to await.
    pub fn produce<T: Send + 'static>(
        &mut self,
        owner: NodeId,
        behavior: Behavior<T>,
    ) -> Result<Deferred<T>> {
        let launch = self.rt.launch(self.state, owner)?;
        Ok(behavior::defer(launch, behavior))
    }

    fn record(&mut self, change: StateChangeMetadata) -> Result<()> {
        let origin = change.fields()[0].node();
        let path = self.state.path(origin)?;
        trace!(%path, ?change, "write");
        self.rt.hooks().did_write_change(&path, &change);
        self.state.batch.record(change);
        Ok(())
    }
}
