//! Arbor Core
//!
//! This crate provides a hierarchical, reactive state runtime. Application
//! state is a tree of declarative nodes; each node owns value fields and
//! declares its children from them. The runtime:
//!
//! - Attaches, updates and detaches nodes as their rules change
//! - Propagates scoped dependency values down the tree
//! - Runs cancellable asynchronous behaviors bound to a node's lifetime
//! - Emits fine-grained change events, optionally filtered by what an
//!   observer actually read
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `tree`: nodes, scopes, routes, reconciliation and the tree context
//! - `behavior`: asynchronous work, cancellation and interception hooks
//! - `emitter`: per-node change streams
//! - `storage`: the async key-value contract used by behaviors
//! - `config`: runtime tunables
//!
//! # Example
//!
//! ```rust,ignore
//! use arbor_core::{Fields, Node, Result, Route, Rules, Tree, Value};
//!
//! struct Chain {
//!     depth: Value<u32>,
//! }
//!
//! impl Node for Chain {
//!     type Props = u32;
//!
//!     fn init(depth: u32, fields: &mut Fields<'_>) -> Self {
//!         Chain { depth: fields.value(depth) }
//!     }
//!
//!     fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
//!         let depth = cx.get(&self.depth)?;
//!         Ok(if depth > 1 {
//!             Route::single::<Chain>(depth - 1)
//!         } else {
//!             Route::none()
//!         })
//!     }
//! }
//!
//! let tree = Tree::<Chain>::start(800)?;
//! assert_eq!(tree.live_scopes(), 800);
//! tree.dispose();
//! assert_eq!(tree.live_scopes(), 0);
//! ```

pub mod behavior;
pub mod config;
pub mod emitter;
pub mod error;
pub mod storage;
pub mod tree;

mod debug;

pub use behavior::{Behavior, BehaviorId, BehaviorInfo, Deferred, Handler, Hooks, Intercept, NoHooks};
pub use config::RuntimeConfig;
pub use debug::ScopeSnapshot;
pub use emitter::{Emitter, EventStream, ObservedStream, ReadSet, StreamKind, TreeEvent};
pub use error::{BehaviorCancelled, BehaviorError, Result, StoreError, TreeError};
pub use storage::{MemoryStore, Store};
pub use tree::{
    DependencyKey, DependencyValues, Entry, FieldId, FieldKind, Fields, Identity, Key, Node,
    NodeId, NodePath, Projection, Route, RouteKind, Rules, StateChangeMetadata, Transformer, Tree,
    TreeBuilder, TreeStats, Tx, Value, View,
};
