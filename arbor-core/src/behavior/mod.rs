//! Behaviors
//!
//! A behavior is a unit of asynchronous work started by node code and bound
//! to the lifetime of the node that owns it.
//!
//! # Execution Model
//!
//! The action runs as its own tokio task, away from the tree context. It
//! may await anything. When it finishes, its result is handed back to the
//! tree context and applied in a regular transaction, so behavior results
//! are serialized with every other mutation.
//!
//! # Cancellation
//!
//! Every scope owns a cancellation token; a behavior gets a child of its
//! owner's token. Detaching a scope cancels the tokens of every scope and
//! behavior below it. Cancellation is cooperative for the action (it can
//! watch the token it was given) and authoritative for the result: once the
//! token is cancelled the result handler never runs, and the cancel handler
//! runs exactly once instead.
//!
//! # Interception
//!
//! [`Hooks::would_run`] is consulted once per behavior, before its action
//! starts. It may let the behavior through, cancel it, or swap in another
//! action. Tests use this to make behaviors deterministic.

mod action;
mod hooks;
mod task;

pub use action::{Action, Behavior, BehaviorId, BehaviorInfo};
pub use hooks::{Hooks, Intercept, NoHooks, Swap};
pub use task::{Deferred, Handler};

pub(crate) use task::{defer, spawn_run, InFlight, Launch};
