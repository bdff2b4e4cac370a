//! Change Notification
//!
//! This module implements the per-node change streams that observers (view
//! layers, tests, loggers) subscribe to.
//!
//! # Streams
//!
//! Each attached node exposes six streams:
//!
//! - `state_did_change`: one of the node's fields was written
//! - `routes_did_change`: the node attached or detached children
//! - `subtree_did_change`: anything at or below the node changed
//! - `validity_did_change`: the node's rules became valid or invalid
//! - `observed_state_did_change` / `observed_subtree_did_change`: like their
//!   base streams, but only when a field the observer actually read changed
//!
//! # Delivery
//!
//! Events are collected per mutation batch, deduplicated, and sent while the
//! tree context is still held, so every stream sees events in mutation order.
//! Within a batch, state events precede route and validity events, which
//! precede subtree events; subtree events run from the deepest node up.
//! Streams are unbounded channels: sending never blocks the tree, and a
//! dropped receiver is pruned on the next send. When a node detaches, its
//! streams end.
//!
//! # Read Tracking
//!
//! Observed streams carry a [`ReadSet`]. Reads made through
//! [`Tree::read_observed`](crate::Tree::read_observed) are recorded into it;
//! the stream fires when a batch changes one of the recorded fields, and the
//! set is cleared when it fires.

mod event;
mod registry;
mod stream;

pub use event::{StreamKind, TreeEvent};
pub use registry::Emitter;
pub use stream::{EventStream, ObservedStream, ReadSet};

pub(crate) use event::EventBatch;
