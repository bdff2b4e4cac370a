//! State Tree
//!
//! This module contains the tree runtime:
//!
//! - **Nodes**: declarative units of state that declare their children
//! - **Scopes**: the live instances of attached nodes
//! - **Routes**: the children a node declares, matched by identity
//! - **Runtime**: the serialized tree context that owns every scope
//!
//! # Architecture
//!
//! ```text
//!  Tx::set(field)                  rules(&Rules) -> Route
//!       │                                 ▲
//!       ▼                                 │
//!  ┌─────────┐   readers of field   ┌───────────┐   attach/update/detach
//!  │  Batch  │ ───────────────────► │  Router   │ ─────────────────────► Scopes
//!  └─────────┘                      └───────────┘
//!       │
//!       ▼
//!   Emitter (events dispatched inside the tree context)
//! ```
//!
//! Scopes live in an arena keyed by [`NodeId`]. Parents refer to children
//! by id and children to parents by id, so ownership has no cycles and
//! detaching is deterministic.

mod context;
mod dependency;
mod field;
mod handle;
mod id;
mod node;
mod route;
mod router;
mod runtime;
mod scheduler;
mod scope;

pub use context::{Rules, Tx, View};
pub use dependency::{DependencyKey, DependencyValues};
pub use field::{Fields, Projection, StateChangeMetadata, Transformer, Value};
pub use handle::{Tree, TreeBuilder};
pub use id::{FieldId, FieldKind, NodeId};
pub use node::Node;
pub use route::{Entry, Identity, Key, Route, RouteKind};
pub use runtime::TreeStats;
pub use scope::NodePath;

pub(crate) use runtime::{Runtime, TreeState};
