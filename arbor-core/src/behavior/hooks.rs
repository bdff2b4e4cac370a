//! Instrumentation hooks.

use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;

use futures_util::FutureExt;

use super::action::{Action, BehaviorInfo};
use crate::tree::{NodePath, StateChangeMetadata};

/// Observes writes and intercepts behaviors.
///
/// Hooks are called from inside the tree context and must not call back
/// into the tree.
pub trait Hooks: Send + Sync {
    /// A field was written.
    fn did_write_change(&self, path: &NodePath, change: &StateChangeMetadata) {
        let _ = (path, change);
    }

    /// Decide what to do with a behavior before its action starts.
    fn would_run(&self, behavior: &BehaviorInfo) -> Intercept {
        let _ = behavior;
        Intercept::Passthrough
    }

    /// A behavior's outcome was delivered.
    fn did_run(&self, behavior: &BehaviorInfo) {
        let _ = behavior;
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl Hooks for NoHooks {}

/// A replacement action.
pub struct Swap {
    output: &'static str,
    action: Box<dyn Any + Send>,
}

impl Swap {
    /// Type name of the replacement's output.
    pub fn output(&self) -> &'static str {
        self.output
    }

    /// Recover the typed action, or the actual output type name on mismatch.
    pub(crate) fn into_action<T: 'static>(self) -> Result<Action<T>, &'static str> {
        let output = self.output;
        self.action
            .downcast::<Action<T>>()
            .map(|action| *action)
            .map_err(|_| output)
    }
}

impl fmt::Debug for Swap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Swap").field("output", &self.output).finish()
    }
}

/// Verdict of [`Hooks::would_run`].
#[derive(Debug, Default)]
pub enum Intercept {
    /// Run the real action.
    #[default]
    Passthrough,
    /// Do not run; report the behavior as cancelled.
    Cancel,
    /// Run this action instead. Its output type must match the behavior's.
    Swap(Swap),
}

impl Intercept {
    /// Replace the behavior's action.
    pub fn swap<T, F, Fut>(action: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let action: Action<T> = Box::new(move |_| action().boxed());
        Intercept::Swap(Swap {
            output: type_name::<T>(),
            action: Box::new(action),
        })
    }

    /// Replace the behavior's action with one that returns `value`.
    pub fn value<T: Send + 'static>(value: T) -> Self {
        Self::swap(move || async move { value })
    }
}
