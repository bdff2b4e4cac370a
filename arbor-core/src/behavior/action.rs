//! Behavior values.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

/// The work a behavior performs. Receives the behavior's cancellation token.
pub type Action<T> = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, T> + Send>;

/// Identifier of a behavior, used in diagnostics and cancellation reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BehaviorId(Arc<str>);

impl BehaviorId {
    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BehaviorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BehaviorId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<String> for BehaviorId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// An asynchronous action with an id and the place it was created.
pub struct Behavior<T> {
    id: BehaviorId,
    action: Action<T>,
    location: &'static Location<'static>,
}

impl<T: Send + 'static> Behavior<T> {
    /// A behavior whose action ignores cancellation.
    ///
    /// ```rust,ignore
    /// let load = Behavior::new("load-todos", move || async move {
    ///     store.get("todos").await
    /// });
    /// ```
    #[track_caller]
    pub fn new<F, Fut>(id: impl Into<BehaviorId>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self::cancellable(id, move |_| action())
    }

    /// A behavior whose action watches its cancellation token.
    #[track_caller]
    pub fn cancellable<F, Fut>(id: impl Into<BehaviorId>, action: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self {
            id: id.into(),
            action: Box::new(move |token| action(token).boxed()),
            location: Location::caller(),
        }
    }
}

impl<T> Behavior<T> {
    /// The behavior's id.
    pub fn id(&self) -> &BehaviorId {
        &self.id
    }

    /// Where the behavior was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Diagnostic description of the behavior.
    pub fn info(&self) -> BehaviorInfo {
        BehaviorInfo {
            id: self.id.clone(),
            location: self.location,
            output: type_name::<T>(),
        }
    }

    pub(crate) fn into_parts(self) -> (BehaviorInfo, Action<T>) {
        let info = self.info();
        (info, self.action)
    }
}

impl<T> fmt::Debug for Behavior<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("id", &self.id)
            .field("location", &self.location)
            .finish()
    }
}

/// What hooks learn about a behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorInfo {
    /// The behavior's id.
    pub id: BehaviorId,
    /// Where it was created.
    pub location: &'static Location<'static>,
    /// Type name of its output.
    pub output: &'static str,
}

impl fmt::Display for BehaviorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.location)
    }
}
