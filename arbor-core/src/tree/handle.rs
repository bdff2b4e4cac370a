//! The lifetime handle of a running tree.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::context::{Tx, View};
use super::dependency::{DependencyKey, DependencyValues};
use super::id::NodeId;
use super::node::Node;
use super::route::Entry;
use super::runtime::{Runtime, TreeStats};
use crate::behavior::{Hooks, NoHooks};
use crate::config::RuntimeConfig;
use crate::debug::{self, ScopeSnapshot};
use crate::emitter::{Emitter, ObservedStream};
use crate::error::Result;

/// A running tree rooted at an `N`.
///
/// Dropping the handle disposes the tree.
///
/// ```rust,ignore
/// let tree = Tree::<Counter>::start(0)?;
/// let count = tree.with_model(|counter| counter.count)?;
/// tree.write(|tx| tx.set(&count, 11))?;
/// assert_eq!(tree.read(|view| view.get(&count))??, 11);
/// ```
pub struct Tree<N: Node> {
    runtime: Arc<Runtime>,
    root: NodeId,
    _root: PhantomData<fn() -> N>,
}

impl<N: Node> Tree<N> {
    /// Start a tree with the default configuration.
    pub fn start(props: N::Props) -> Result<Self> {
        TreeBuilder::new().start::<N>(props)
    }

    /// Configure a tree before starting it.
    pub fn builder() -> TreeBuilder {
        TreeBuilder::new()
    }

    /// Id of the root node.
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Whether the tree has not been disposed.
    pub fn is_active(&self) -> bool {
        self.runtime.is_active()
    }

    /// Borrow the root node's model.
    pub fn with_model<R>(&self, f: impl FnOnce(&N) -> R) -> Result<R> {
        self.with_node::<N, R>(self.root, f)
    }

    /// Borrow the model of any attached node.
    pub fn with_node<M: Node, R>(&self, node: NodeId, f: impl FnOnce(&M) -> R) -> Result<R> {
        self.runtime.read(|view| view.node::<M>(node).map(f))?
    }

    /// Read the tree.
    pub fn read<R>(&self, f: impl FnOnce(&View<'_>) -> R) -> Result<R> {
        self.runtime.read(f)
    }

    /// Read the tree, recording every field read into `stream`'s read set.
    pub fn read_observed<R>(
        &self,
        stream: &ObservedStream,
        f: impl FnOnce(&View<'_>) -> R,
    ) -> Result<R> {
        self.runtime.read_observed(stream.reads(), f)
    }

    /// Run a write transaction.
    ///
    /// Writes made by `f` stay applied even if `f` fails; the error is
    /// returned after the tree has settled.
    pub fn write<R>(&self, f: impl FnOnce(&mut Tx<'_>) -> Result<R>) -> Result<R> {
        self.runtime.transact(f)
    }

    /// The tree's change streams.
    pub fn emitter(&self) -> &Emitter {
        self.runtime.emitter()
    }

    /// Number of attached scopes.
    pub fn live_scopes(&self) -> usize {
        self.runtime.inspect(|state| state.scopes.len())
    }

    /// Attach and detach counters.
    pub fn stats(&self) -> TreeStats {
        self.runtime.inspect(|state| state.stats)
    }

    /// Behaviors started but not yet finished.
    pub fn behaviors_in_flight(&self) -> usize {
        self.runtime.behaviors_in_flight()
    }

    /// Indented text rendering of the tree.
    pub fn dump(&self) -> String {
        self.runtime.inspect(debug::render)
    }

    /// Flat description of every attached scope, parents first.
    pub fn snapshot(&self) -> Vec<ScopeSnapshot> {
        self.runtime.inspect(debug::snapshot)
    }

    /// [`snapshot`](Self::snapshot) as pretty-printed JSON.
    pub fn dump_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// Detach every scope and end every stream. Returns `false` if the tree
    /// was already disposed.
    pub fn dispose(&self) -> bool {
        self.runtime.dispose()
    }
}

impl<N: Node> Drop for Tree<N> {
    fn drop(&mut self) {
        self.runtime.dispose();
    }
}

impl<N: Node> fmt::Debug for Tree<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("root", &self.root)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Builder for [`Tree`].
pub struct TreeBuilder {
    config: RuntimeConfig,
    hooks: Arc<dyn Hooks>,
    dependencies: DependencyValues,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            hooks: Arc::new(NoHooks),
            dependencies: DependencyValues::new(),
        }
    }

    /// Use `config`.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Install instrumentation hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: impl Hooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Install shared instrumentation hooks.
    #[must_use]
    pub fn shared_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Inject `K` for the whole tree.
    #[must_use]
    pub fn dependency<K: DependencyKey>(mut self, value: K::Value) -> Self {
        self.dependencies = self.dependencies.inject::<K>(value);
        self
    }

    /// Attach the root and settle the tree.
    pub fn start<N: Node>(self, props: N::Props) -> Result<Tree<N>> {
        let (runtime, root) = Runtime::start(
            self.config,
            self.hooks,
            self.dependencies,
            Entry::new::<N>(props),
        )?;
        Ok(Tree {
            runtime,
            root,
            _root: PhantomData,
        })
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TreeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeBuilder")
            .field("config", &self.config)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}
