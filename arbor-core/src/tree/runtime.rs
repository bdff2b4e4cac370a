//! The Tree Context
//!
//! The runtime owns every scope and is the only place tree state is
//! mutated. All mutation, reconciliation and event dispatch happens while
//! holding one `FairMutex`: waiters are handed the lock in the order they
//! queued, so transactions (including behavior results marshalled back from
//! other tasks) run one at a time in submission order.
//!
//! # Flushing
//!
//! A transaction's writes are collected in a [`Batch`]. When the
//! transaction's closure returns, the runtime flushes:
//!
//! 1. The written fields are looked up in the read index to find every node
//!    whose rules read one of them
//! 2. The scheduler reduces those to the topmost nodes, parents first
//! 3. Each is re-reconciled, which re-evaluates its whole subtree
//! 4. `did_start` runs for nodes attached during the pass; it may write
//!    again, so the loop repeats until no writes are pending
//!
//! The batch is then turned into events and dispatched before the lock is
//! released, so observers see changes in the order they were made.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashSet;
use indexmap::{IndexMap, IndexSet};
use parking_lot::FairMutex;
use serde::Serialize;
use smallvec::SmallVec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, warn};

use super::context::{Tx, View};
use super::dependency::DependencyValues;
use super::field::{Projection, StateChangeMetadata, Value};
use super::id::{FieldId, NodeId};
use super::route::Entry;
use super::scheduler::{self, Lineage};
use super::scope::{NodePath, Scope};
use crate::behavior::{Hooks, InFlight, Launch};
use crate::config::RuntimeConfig;
use crate::emitter::{Emitter, EventBatch, ReadSet, TreeEvent};
use crate::error::{Result, TreeError};

/// Attach and detach counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    /// Scopes attached since the tree started.
    pub attached: u64,
    /// Scopes detached since the tree started.
    pub detached: u64,
}

impl TreeStats {
    /// Scopes currently attached.
    pub fn live(&self) -> u64 {
        self.attached - self.detached
    }
}

/// Field id to the nodes whose last rule evaluation read it.
#[derive(Debug, Default)]
pub(crate) struct ReadIndex {
    readers: HashMap<FieldId, IndexSet<NodeId>>,
}

impl ReadIndex {
    pub(crate) fn track(&mut self, node: NodeId, fields: &HashSet<FieldId>) {
        for field in fields {
            self.readers.entry(*field).or_default().insert(node);
        }
    }

    pub(crate) fn untrack(&mut self, node: NodeId, fields: &HashSet<FieldId>) {
        for field in fields {
            if let Some(readers) = self.readers.get_mut(field) {
                readers.shift_remove(&node);
                if readers.is_empty() {
                    self.readers.remove(field);
                }
            }
        }
    }

    pub(crate) fn readers_of(&self, field: FieldId) -> impl Iterator<Item = NodeId> + '_ {
        self.readers.get(&field).into_iter().flatten().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.readers.len()
    }
}

/// Everything one transaction changed.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    changes: IndexMap<NodeId, SmallVec<[StateChangeMetadata; 2]>>,
    /// Written fields whose readers have not been re-evaluated yet.
    pending: IndexSet<FieldId>,
    routes: IndexSet<NodeId>,
    /// Validity at the start of the batch and now.
    validity: IndexMap<NodeId, (bool, bool)>,
    detached: Vec<NodeId>,
}

impl Batch {
    pub(crate) fn record(&mut self, change: StateChangeMetadata) {
        for field in change.fields() {
            let changes = self.changes.entry(field.node()).or_default();
            if !changes.contains(&change) {
                changes.push(change);
            }
            self.pending.insert(field);
        }
    }

    pub(crate) fn routes_changed(&mut self, node: NodeId) {
        self.routes.insert(node);
    }

    pub(crate) fn validity_changed(&mut self, node: NodeId, before: bool, after: bool) {
        self.validity.entry(node).or_insert((before, after)).1 = after;
    }

    pub(crate) fn mark_detached(&mut self, node: NodeId) {
        self.detached.push(node);
    }

    fn take_pending(&mut self) -> IndexSet<FieldId> {
        std::mem::take(&mut self.pending)
    }
}

/// Tree state guarded by the tree context.
pub(crate) struct TreeState {
    pub(crate) scopes: HashMap<NodeId, Scope>,
    pub(crate) root: Option<NodeId>,
    pub(crate) readers: ReadIndex,
    pub(crate) batch: Batch,
    /// Attached nodes whose `did_start` has not run yet, parents first.
    pub(crate) starting: Vec<NodeId>,
    pub(crate) stats: TreeStats,
    pub(crate) max_depth: usize,
    /// Ids of attached scopes, readable without the tree context.
    pub(crate) live: Arc<DashSet<NodeId>>,
    disposed: bool,
}

impl TreeState {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            scopes: HashMap::new(),
            root: None,
            readers: ReadIndex::default(),
            batch: Batch::default(),
            starting: Vec::new(),
            stats: TreeStats::default(),
            max_depth,
            live: Arc::new(DashSet::new()),
            disposed: false,
        }
    }

    pub(crate) fn scope(&self, id: NodeId) -> Result<&Scope> {
        self.scopes.get(&id).ok_or(TreeError::Detached(id))
    }

    pub(crate) fn scope_mut(&mut self, id: NodeId) -> Result<&mut Scope> {
        self.scopes.get_mut(&id).ok_or(TreeError::Detached(id))
    }

    pub(crate) fn lineage(&self, id: NodeId) -> Option<Lineage> {
        self.scopes.get(&id).map(|scope| Lineage {
            depth: scope.depth,
            parent: scope.parent,
        })
    }

    pub(crate) fn path(&self, id: NodeId) -> Result<NodePath> {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            let scope = self.scope(node)?;
            segments.push(scope.identity.clone());
            cursor = scope.parent;
        }
        segments.reverse();
        Ok(NodePath::new(segments))
    }

    pub(crate) fn read_value<T: Clone + 'static>(&self, field: &Value<T>) -> Result<T> {
        let slot = self.scope(field.id().node())?.fields.slot(field.id())?;
        field.read(slot)
    }

    fn upstream<T: 'static>(&self, projection: &Projection<T>) -> Result<&dyn std::any::Any> {
        self.scope(projection.id().node())?;
        let source = projection.source();
        self.scope(source.node())?.fields.slot(source)
    }

    pub(crate) fn read_projection<T: 'static>(&self, projection: &Projection<T>) -> Result<T> {
        projection.read(self.upstream(projection)?)
    }

    pub(crate) fn projection_valid<T: 'static>(&self, projection: &Projection<T>) -> Result<bool> {
        projection.is_valid(self.upstream(projection)?)
    }

    /// Turn the batch into events, dropping events for nodes that are gone.
    fn take_events(&mut self) -> EventBatch {
        let batch = std::mem::take(&mut self.batch);
        let mut events = Vec::new();
        let mut touched = Vec::new();
        let mut written = Vec::new();

        for (node, changes) in batch.changes {
            if self.scopes.contains_key(&node) {
                let fields: Vec<FieldId> = changes
                    .iter()
                    .flat_map(StateChangeMetadata::fields)
                    .collect();
                written.push((node, fields));
                events.push(TreeEvent::StateDidChange {
                    node,
                    changes: changes.into_vec().into(),
                });
                touched.push(node);
            }
        }
        for node in batch.routes {
            if self.scopes.contains_key(&node) {
                events.push(TreeEvent::RoutesDidChange { node });
                touched.push(node);
            }
        }
        for (node, (before, after)) in batch.validity {
            if before != after && self.scopes.contains_key(&node) {
                events.push(TreeEvent::ValidityDidChange { node, valid: after });
                touched.push(node);
            }
        }

        // Every touched node and its ancestors, each once, deepest first.
        let mut subtree: IndexMap<NodeId, usize> = IndexMap::new();
        for node in touched {
            let mut cursor = Some(node);
            while let Some(id) = cursor {
                let Some(scope) = self.scopes.get(&id) else { break };
                if subtree.insert(id, scope.depth).is_some() {
                    break;
                }
                cursor = scope.parent;
            }
        }
        subtree.sort_by(|_, a, _, b| b.cmp(a));
        events.extend(
            subtree
                .into_keys()
                .map(|node| TreeEvent::SubtreeDidChange { node }),
        );

        // Each node's written fields count for it and all its ancestors.
        let mut subtree_fields: HashMap<NodeId, HashSet<FieldId>> = HashMap::new();
        for (node, fields) in written {
            let mut cursor = Some(node);
            while let Some(id) = cursor {
                let Some(scope) = self.scopes.get(&id) else { break };
                subtree_fields
                    .entry(id)
                    .or_default()
                    .extend(fields.iter().copied());
                cursor = scope.parent;
            }
        }

        EventBatch {
            events,
            subtree_fields,
            detached: batch.detached,
        }
    }
}

/// The tree context and everything it guards.
pub(crate) struct Runtime {
    state: FairMutex<TreeState>,
    emitter: Emitter,
    hooks: Arc<dyn Hooks>,
    config: RuntimeConfig,
    this: Weak<Runtime>,
    in_flight: Arc<AtomicUsize>,
}

impl Runtime {
    /// Create the runtime and attach the root.
    pub(crate) fn start(
        config: RuntimeConfig,
        hooks: Arc<dyn Hooks>,
        dependencies: DependencyValues,
        root: Entry,
    ) -> Result<(Arc<Self>, NodeId)> {
        let state = TreeState::new(config.max_depth);
        let emitter = Emitter::new(Arc::clone(&state.live));
        let runtime = Arc::new_cyclic(|this| Self {
            state: FairMutex::new(state),
            emitter,
            hooks,
            config,
            this: this.clone(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        });
        let id = runtime.exclusive(|state| state.attach_root(root, dependencies));
        match id {
            Ok(id) => Ok((runtime, id)),
            Err(err) => {
                runtime.dispose();
                Err(err)
            }
        }
    }

    pub(crate) fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub(crate) fn hooks(&self) -> &dyn Hooks {
        &*self.hooks
    }

    pub(crate) fn behaviors_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Everything a behavior started by `owner` needs to outlive the
    /// transaction that started it.
    pub(crate) fn launch(&self, state: &TreeState, owner: NodeId) -> Result<Launch> {
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| TreeError::NoAsyncRuntime)?;
        let token = state.scope(owner)?.token.child_token();
        Ok(Launch {
            runtime: self.this.clone(),
            hooks: Arc::clone(&self.hooks),
            token,
            handle,
            in_flight: InFlight::new(&self.in_flight),
        })
    }

    /// Run `f` in the tree context, then flush and dispatch.
    fn exclusive<R>(&self, f: impl FnOnce(&mut TreeState) -> Result<R>) -> Result<R> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(TreeError::Disposed);
        }
        let _span = debug_span!("transact", tree = %self.config.name).entered();

        let result = f(&mut state);
        let flushed = self.flush(&mut state);
        let events = state.take_events();
        self.emitter.dispatch(&events);

        let value = result?;
        flushed?;
        Ok(value)
    }

    /// Run a write transaction.
    pub(crate) fn transact<R>(&self, f: impl FnOnce(&mut Tx<'_>) -> Result<R>) -> Result<R> {
        self.exclusive(|state| f(&mut Tx::new(self, state)))
    }

    /// Apply a behavior result unless `token` was cancelled first.
    ///
    /// Detaching cancels tokens inside the tree context, so the check and
    /// the application cannot interleave with a detach.
    pub(crate) fn apply(
        &self,
        token: &CancellationToken,
        f: impl FnOnce(&mut Tx<'_>) -> Result<()>,
    ) -> Result<bool> {
        self.transact(|tx| {
            if token.is_cancelled() {
                return Ok(false);
            }
            f(tx)?;
            Ok(true)
        })
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&View<'_>) -> R) -> Result<R> {
        let state = self.state.lock();
        if state.disposed {
            return Err(TreeError::Disposed);
        }
        Ok(f(&View::new(&state, None)))
    }

    pub(crate) fn read_observed<R>(
        &self,
        reads: &ReadSet,
        f: impl FnOnce(&View<'_>) -> R,
    ) -> Result<R> {
        let state = self.state.lock();
        if state.disposed {
            return Err(TreeError::Disposed);
        }
        Ok(f(&View::new(&state, Some(reads))))
    }

    /// Run `f` against the raw state without flushing.
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&TreeState) -> R) -> R {
        f(&self.state.lock())
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.state.lock().disposed
    }

    /// Re-evaluate readers of written fields and start new nodes until
    /// nothing is pending.
    ///
    /// A failing `did_start` does not stop the others: every pending node
    /// is started and the first error is returned once the tree settles.
    fn flush(&self, state: &mut TreeState) -> Result<()> {
        let mut passes = 0;
        let mut failure = None;
        loop {
            let dirty = state.batch.take_pending();
            if dirty.is_empty() && state.starting.is_empty() {
                return failure.map_or(Ok(()), Err);
            }
            passes += 1;
            if passes > self.config.max_flush_passes {
                state.starting.clear();
                return Err(TreeError::Unstable(self.config.max_flush_passes));
            }

            let readers: Vec<NodeId> = dirty
                .iter()
                .flat_map(|field| state.readers.readers_of(*field))
                .collect();
            let order = scheduler::topmost(readers, |id| state.lineage(id));
            debug!(pass = passes, dirty = dirty.len(), reevaluate = order.len(), "flush");

            for node in order {
                if state.scopes.contains_key(&node) {
                    if let Err(err) = state.reconcile(node) {
                        state.starting.clear();
                        return Err(err);
                    }
                }
            }

            for node in std::mem::take(&mut state.starting) {
                let Some(model) = state.scopes.get(&node).map(|scope| Arc::clone(&scope.node))
                else {
                    continue;
                };
                if let Err(err) = model.did_start(&mut Tx::new(self, state)) {
                    warn!(node = %node, %err, "did_start failed");
                    failure.get_or_insert(err);
                }
            }
        }
    }

    /// Tear the whole tree down. Returns `false` if already disposed.
    pub(crate) fn dispose(&self) -> bool {
        let mut state = self.state.lock();
        if state.disposed {
            return false;
        }
        let _span = debug_span!("dispose", tree = %self.config.name).entered();
        if let Some(root) = state.root {
            state.detach(root);
        }
        state.disposed = true;
        state.starting.clear();
        let events = state.take_events();
        self.emitter.dispatch(&events);
        self.emitter.close();
        debug!(stats = ?state.stats, "disposed");
        true
    }
}
