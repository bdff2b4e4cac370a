//! The node authoring contract.

use std::any::{type_name, Any};
use std::sync::Arc;

use super::context::{Rules, Tx};
use super::field::Fields;
use super::route::Route;
use crate::error::Result;

/// A declarative unit of state.
///
/// A node owns value fields (allocated in [`init`](Node::init)) and declares
/// its children in [`rules`](Node::rules), a pure function of the fields and
/// dependencies it reads. The runtime re-evaluates `rules` whenever one of
/// the fields it read changes.
///
/// ```rust,ignore
/// struct Counter {
///     count: Value<i64>,
/// }
///
/// impl Node for Counter {
///     type Props = i64;
///
///     fn init(start: i64, fields: &mut Fields<'_>) -> Self {
///         Counter { count: fields.value(start) }
///     }
///
///     fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
///         if cx.get(&self.count)? > 10 {
///             Ok(Route::single::<Banner>(()))
///         } else {
///             Ok(Route::none())
///         }
///     }
/// }
/// ```
pub trait Node: Send + Sync + Sized + 'static {
    /// Constructor arguments supplied by the parent's route.
    type Props: 'static;

    /// Build the node when its scope is attached.
    fn init(props: Self::Props, fields: &mut Fields<'_>) -> Self;

    /// Receive fresh props when the parent re-routes to the same identity.
    ///
    /// Value fields keep their state; only what the node copies out of
    /// `props` changes. The default ignores the new props.
    fn update(&mut self, props: Self::Props) {
        let _ = props;
    }

    /// Declare children from the current state.
    fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
        let _ = cx;
        Ok(Route::none())
    }

    /// Runs once, after the pass that attached the node.
    fn did_start(&self, tx: &mut Tx<'_>) -> Result<()> {
        let _ = tx;
        Ok(())
    }

    /// Runs once, while the node is being detached.
    fn did_stop(&self) {}
}

/// Object-safe form of [`Node`] stored in a scope.
pub(crate) trait AnyNode: Send + Sync {
    fn rules(&self, cx: &mut Rules<'_>) -> Result<Route>;
    fn did_start(&self, tx: &mut Tx<'_>) -> Result<()>;
    fn did_stop(&self);
    /// Returns `false` if `props` is not this node's props type.
    fn update(&mut self, props: Box<dyn Any>) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<N: Node> AnyNode for N {
    fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
        Node::rules(self, cx)
    }

    fn did_start(&self, tx: &mut Tx<'_>) -> Result<()> {
        Node::did_start(self, tx)
    }

    fn did_stop(&self) {
        Node::did_stop(self)
    }

    fn update(&mut self, props: Box<dyn Any>) -> bool {
        match props.downcast::<N::Props>() {
            Ok(props) => {
                Node::update(self, *props);
                true
            }
            Err(_) => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        type_name::<N>()
    }
}

pub(crate) fn build_erased<N: Node>(
    props: Box<dyn Any>,
    fields: &mut Fields<'_>,
) -> Option<Arc<dyn AnyNode>> {
    let props = props.downcast::<N::Props>().ok()?;
    Some(Arc::new(N::init(*props, fields)))
}
