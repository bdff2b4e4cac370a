//! Running behaviors and delivering their outcomes.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::action::{Action, Behavior, BehaviorInfo};
use super::hooks::{Hooks, Intercept};
use crate::error::{BehaviorCancelled, BehaviorError, Result, TreeError};
use crate::tree::{Runtime, Tx};

/// Counts a behavior as in flight until dropped.
pub(crate) struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    pub(crate) fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What a behavior carries out of the transaction that started it.
pub(crate) struct Launch {
    pub(crate) runtime: Weak<Runtime>,
    pub(crate) hooks: Arc<dyn Hooks>,
    /// Child of the owner scope's token.
    pub(crate) token: CancellationToken,
    pub(crate) handle: Handle,
    pub(crate) in_flight: InFlight,
}

type OnResult<T> = Box<dyn for<'a> FnOnce(T, &mut Tx<'a>) -> Result<()> + Send>;
type OnCancel = Box<dyn FnOnce(BehaviorCancelled) + Send>;

/// Callbacks for a fire-and-forget behavior. Exactly one of them runs.
pub struct Handler<T> {
    on_result: OnResult<T>,
    on_cancel: OnCancel,
}

impl<T> Handler<T> {
    /// Apply the behavior's output inside a transaction.
    pub fn on_result<F>(on_result: F) -> Self
    where
        F: for<'a> FnOnce(T, &mut Tx<'a>) -> Result<()> + Send + 'static,
    {
        Self {
            on_result: Box::new(on_result),
            on_cancel: Box::new(|_| {}),
        }
    }

    /// Discard the output.
    pub fn ignore() -> Self {
        Self::on_result(|_, _| Ok(()))
    }

    /// Called instead of the result handler when the behavior is cancelled.
    #[must_use]
    pub fn on_cancel<F>(mut self, on_cancel: F) -> Self
    where
        F: FnOnce(BehaviorCancelled) + Send + 'static,
    {
        self.on_cancel = Box::new(on_cancel);
        self
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

/// Consult the hooks once, before anything runs.
fn intercept<T: Send + 'static>(
    hooks: &dyn Hooks,
    behavior: Behavior<T>,
) -> (BehaviorInfo, Option<Action<T>>) {
    let (info, action) = behavior.into_parts();
    let action = match hooks.would_run(&info) {
        Intercept::Passthrough => Some(action),
        Intercept::Cancel => {
            debug!(behavior = %info, "cancelled by hook");
            None
        }
        Intercept::Swap(swap) => match swap.into_action::<T>() {
            Ok(action) => Some(action),
            Err(found) => {
                error!(
                    behavior = %info,
                    expected = info.output,
                    found,
                    "swapped action has the wrong output type"
                );
                None
            }
        },
    };
    (info, action)
}

/// Run `action` as its own task and race it against `token`.
///
/// On cancellation the task is left to finish on its own; its output is
/// dropped. A panicking action counts as cancelled.
async fn race<T: Send + 'static>(
    info: &BehaviorInfo,
    action: Action<T>,
    token: &CancellationToken,
    handle: &Handle,
) -> Option<T> {
    if token.is_cancelled() {
        return None;
    }
    let task = handle.spawn(action(token.clone()));
    tokio::select! {
        biased;
        () = token.cancelled() => None,
        joined = task => match joined {
            Ok(output) => Some(output),
            Err(err) => {
                error!(behavior = %info, %err, "behavior action failed");
                None
            }
        },
    }
}

/// Start a fire-and-forget behavior.
pub(crate) fn spawn_run<T: Send + 'static>(
    launch: Launch,
    behavior: Behavior<T>,
    handler: Handler<T>,
) {
    let Launch {
        runtime,
        hooks,
        token,
        handle,
        in_flight,
    } = launch;
    let (info, action) = intercept(&*hooks, behavior);
    let Handler {
        on_result,
        on_cancel,
    } = handler;

    let driver = handle.clone();
    driver.spawn(async move {
        let _in_flight = in_flight;
        let output = match action {
            Some(action) => race(&info, action, &token, &handle).await,
            None => None,
        };

        let applied = match (output, runtime.upgrade()) {
            (Some(output), Some(runtime)) => {
                match runtime.apply(&token, move |tx| on_result(output, tx)) {
                    Ok(true) => true,
                    Ok(false) => {
                        warn!(behavior = %info, "dropping result of a cancelled behavior");
                        false
                    }
                    Err(TreeError::Disposed) => false,
                    Err(err) => {
                        error!(behavior = %info, %err, "applying behavior result failed");
                        true
                    }
                }
            }
            _ => false,
        };

        if !applied {
            on_cancel(BehaviorCancelled {
                id: info.id.clone(),
            });
        }
        hooks.did_run(&info);
    });
}

/// Prepare a behavior for the caller to await.
pub(crate) fn defer<T: Send + 'static>(launch: Launch, behavior: Behavior<T>) -> Deferred<T> {
    let (info, action) = intercept(&*launch.hooks, behavior);
    Deferred {
        info,
        action,
        token: launch.token,
        hooks: launch.hooks,
        handle: launch.handle,
        _in_flight: launch.in_flight,
    }
}

/// A produced behavior. Nothing runs until it is resolved.
///
/// Resolution fails with [`BehaviorCancelled`] if the owner is detached
/// first (or already was), or if a hook cancelled the behavior.
#[must_use = "a deferred behavior does nothing until resolved"]
pub struct Deferred<T> {
    info: BehaviorInfo,
    action: Option<Action<T>>,
    token: CancellationToken,
    hooks: Arc<dyn Hooks>,
    handle: Handle,
    _in_flight: InFlight,
}

impl<T: Send + 'static> Deferred<T> {
    /// Description of the behavior.
    pub fn info(&self) -> &BehaviorInfo {
        &self.info
    }

    /// Whether the owner was detached since the behavior was produced.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run the action and wait for its output.
    pub async fn resolve(self) -> std::result::Result<T, BehaviorCancelled> {
        let output = match self.action {
            Some(action) => race(&self.info, action, &self.token, &self.handle).await,
            None => None,
        };
        self.hooks.did_run(&self.info);
        output.ok_or_else(|| BehaviorCancelled {
            id: self.info.id.clone(),
        })
    }

    /// Like [`resolve`](Self::resolve), but give up after `after`.
    ///
    /// On timeout the action keeps running; only the wait is abandoned.
    /// [`Hooks::did_run`] fires either way.
    pub async fn resolve_timeout(
        self,
        after: Duration,
    ) -> std::result::Result<T, BehaviorError> {
        let hooks = Arc::clone(&self.hooks);
        let info = self.info.clone();
        match tokio::time::timeout(after, self.resolve()).await {
            Ok(result) => result.map_err(BehaviorError::from),
            Err(_) => {
                hooks.did_run(&info);
                Err(BehaviorError::TimedOut { id: info.id, after })
            }
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("info", &self.info)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
