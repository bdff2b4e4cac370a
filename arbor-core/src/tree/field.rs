//! Value fields and projections.
//!
//! A node keeps its mutable state in value fields. The values themselves live
//! in the scope's [`FieldStore`]; the node only holds typed handles
//! ([`Value<T>`]) that it received from [`Fields`] when it was initialised.
//! Handles are `Copy`, can be passed to children as props, and are resolved
//! through the runtime on every access, so a handle to a detached node simply
//! fails with [`TreeError::Detached`].
//!
//! A [`Projection<T>`] is a bidirectional view over a value field. Reading
//! applies the transformer's `downstream` function, writing applies
//! `upstream` and marks the backing value field dirty. Both directions are
//! guarded by the transformer's validity predicate.

use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use super::dependency::{DependencyKey, DependencyValues};
use super::id::{FieldId, FieldKind, NodeId};
use crate::error::{Result, TreeError};

/// Typed handle to a value field.
pub struct Value<T> {
    id: FieldId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Value<T> {
    /// The field's id.
    pub fn id(&self) -> FieldId {
        self.id
    }
}

impl<T: Clone + 'static> Value<T> {
    pub(crate) fn read(&self, slot: &dyn Any) -> Result<T> {
        slot.downcast_ref::<T>()
            .cloned()
            .ok_or(TreeError::FieldType {
                field: self.id,
                expected: type_name::<T>(),
            })
    }

    pub(crate) fn get_mut<'s>(&self, slot: &'s mut dyn Any) -> Result<&'s mut T> {
        slot.downcast_mut::<T>().ok_or(TreeError::FieldType {
            field: self.id,
            expected: type_name::<T>(),
        })
    }

    pub(crate) fn write(&self, slot: &mut dyn Any, value: T) -> Result<()> {
        *self.get_mut(slot)? = value;
        Ok(())
    }
}

impl<T> Clone for Value<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Value<T> {}

impl<T> PartialEq for Value<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Value<T> {}

impl<T> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Value").field(&self.id).finish()
    }
}

/// A `downstream`/`upstream` function pair with a validity predicate.
pub struct Transformer<U, T> {
    downstream: Arc<dyn Fn(&U) -> T + Send + Sync>,
    upstream: Arc<dyn Fn(T) -> U + Send + Sync>,
    is_valid: Arc<dyn Fn(&U) -> bool + Send + Sync>,
}

impl<U, T> Transformer<U, T> {
    /// A transformer that is valid for every upstream value.
    pub fn new<D, P>(downstream: D, upstream: P) -> Self
    where
        D: Fn(&U) -> T + Send + Sync + 'static,
        P: Fn(T) -> U + Send + Sync + 'static,
    {
        Self {
            downstream: Arc::new(downstream),
            upstream: Arc::new(upstream),
            is_valid: Arc::new(|_| true),
        }
    }

    /// Replace the validity predicate.
    pub fn with_validity<V>(mut self, is_valid: V) -> Self
    where
        V: Fn(&U) -> bool + Send + Sync + 'static,
    {
        self.is_valid = Arc::new(is_valid);
        self
    }

    /// Apply the downstream function.
    pub fn downstream(&self, upstream: &U) -> T {
        (self.downstream)(upstream)
    }

    /// Apply the upstream function.
    pub fn upstream(&self, downstream: T) -> U {
        (self.upstream)(downstream)
    }

    /// Evaluate the validity predicate.
    pub fn is_valid(&self, upstream: &U) -> bool {
        (self.is_valid)(upstream)
    }
}

impl<T: Clone + 'static> Transformer<T, T> {
    /// Pass values through unchanged.
    pub fn identity() -> Self {
        Self::new(T::clone, |value| value)
    }
}

impl<T: Clone + Default + 'static> Transformer<Option<T>, T> {
    /// View an `Option<T>` as `T`; invalid while the option is `None`.
    pub fn unwrapping() -> Self {
        Self::new(|upstream: &Option<T>| upstream.clone().unwrap_or_default(), Some)
            .with_validity(Option::is_some)
    }
}

impl<U, T> Clone for Transformer<U, T> {
    fn clone(&self) -> Self {
        Self {
            downstream: Arc::clone(&self.downstream),
            upstream: Arc::clone(&self.upstream),
            is_valid: Arc::clone(&self.is_valid),
        }
    }
}

impl<U, T> fmt::Debug for Transformer<U, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("upstream", &type_name::<U>())
            .field("downstream", &type_name::<T>())
            .finish()
    }
}

/// Type-erased access to a projection's backing value.
trait Lens<T>: Send + Sync {
    /// `None` when the slot does not hold the upstream type.
    fn is_valid(&self, upstream: &dyn Any) -> Option<bool>;
    fn read(&self, upstream: &dyn Any) -> Option<T>;
    fn write(&self, value: T, upstream: &mut dyn Any) -> bool;
}

impl<U: 'static, T> Lens<T> for Transformer<U, T> {
    fn is_valid(&self, upstream: &dyn Any) -> Option<bool> {
        upstream.downcast_ref::<U>().map(|value| (self.is_valid)(value))
    }

    fn read(&self, upstream: &dyn Any) -> Option<T> {
        upstream.downcast_ref::<U>().map(|value| (self.downstream)(value))
    }

    fn write(&self, value: T, upstream: &mut dyn Any) -> bool {
        match upstream.downcast_mut::<U>() {
            Some(slot) => {
                *slot = (self.upstream)(value);
                true
            }
            None => false,
        }
    }
}

/// Typed handle to a projection field.
pub struct Projection<T> {
    id: FieldId,
    source: FieldId,
    lens: Arc<dyn Lens<T>>,
}

impl<T: 'static> Projection<T> {
    /// The projection's own id.
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// The value field this projection reads and writes through.
    pub fn source(&self) -> FieldId {
        self.source
    }

    pub(crate) fn is_valid(&self, upstream: &dyn Any) -> Result<bool> {
        self.lens.is_valid(upstream).ok_or_else(|| self.mismatch())
    }

    pub(crate) fn read(&self, upstream: &dyn Any) -> Result<T> {
        if !self.is_valid(upstream)? {
            return Err(TreeError::InvalidProjection(self.id));
        }
        self.lens.read(upstream).ok_or_else(|| self.mismatch())
    }

    pub(crate) fn write(&self, upstream: &mut dyn Any, value: T) -> Result<()> {
        if !self.is_valid(upstream)? {
            return Err(TreeError::InvalidProjection(self.id));
        }
        if self.lens.write(value, upstream) {
            Ok(())
        } else {
            Err(self.mismatch())
        }
    }

    fn mismatch(&self) -> TreeError {
        TreeError::FieldType {
            field: self.source,
            expected: "projection upstream",
        }
    }
}

impl<T> Clone for Projection<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            source: self.source,
            lens: Arc::clone(&self.lens),
        }
    }
}

impl<T> fmt::Debug for Projection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("id", &self.id)
            .field("source", &self.source)
            .finish()
    }
}

/// What a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChangeMetadata {
    /// A value field was written directly.
    Value(FieldId),
    /// A projection was written and resolved through a backing value field.
    Projection {
        /// The projection that was written.
        projection: FieldId,
        /// The value field that actually changed.
        value: FieldId,
    },
}

impl StateChangeMetadata {
    /// The value field whose storage changed.
    pub fn value_field(&self) -> FieldId {
        match *self {
            Self::Value(field) => field,
            Self::Projection { value, .. } => value,
        }
    }

    /// Every field id the change is reported under.
    pub fn fields(&self) -> SmallVec<[FieldId; 2]> {
        match *self {
            Self::Value(field) => smallvec![field],
            Self::Projection { projection, value } => smallvec![projection, value],
        }
    }
}

enum Slot {
    Value(Box<dyn Any + Send>),
    Projection,
}

/// Per-scope field storage.
#[derive(Default)]
pub(crate) struct FieldStore {
    slots: Vec<Slot>,
}

impl FieldStore {
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn values(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Value(_)))
            .count()
    }

    fn push(&mut self, node: NodeId, slot: Slot, kind: FieldKind) -> FieldId {
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(slot);
        FieldId::new(node, index, kind)
    }

    pub(crate) fn slot(&self, id: FieldId) -> Result<&dyn Any> {
        match self.slots.get(id.slot() as usize) {
            Some(Slot::Value(value)) if id.kind() == FieldKind::Value => Ok(&**value),
            _ => Err(TreeError::UnknownField(id)),
        }
    }

    pub(crate) fn slot_mut(&mut self, id: FieldId) -> Result<&mut dyn Any> {
        match self.slots.get_mut(id.slot() as usize) {
            Some(Slot::Value(value)) if id.kind() == FieldKind::Value => Ok(&mut **value),
            _ => Err(TreeError::UnknownField(id)),
        }
    }
}

/// Field allocator handed to [`Node::init`](super::Node::init).
pub struct Fields<'a> {
    node: NodeId,
    store: &'a mut FieldStore,
    dependencies: &'a DependencyValues,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(
        node: NodeId,
        store: &'a mut FieldStore,
        dependencies: &'a DependencyValues,
    ) -> Self {
        Self {
            node,
            store,
            dependencies,
        }
    }

    /// Id the node being initialised was assigned.
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Allocate a value field holding `initial`.
    pub fn value<T: Clone + Send + 'static>(&mut self, initial: T) -> Value<T> {
        let id = self
            .store
            .push(self.node, Slot::Value(Box::new(initial)), FieldKind::Value);
        Value {
            id,
            _marker: PhantomData,
        }
    }

    /// Allocate a projection over `source`, which may belong to any node.
    pub fn project<U, T>(
        &mut self,
        source: &Value<U>,
        transformer: Transformer<U, T>,
    ) -> Projection<T>
    where
        U: 'static,
        T: 'static,
    {
        let id = self
            .store
            .push(self.node, Slot::Projection, FieldKind::Projection);
        Projection {
            id,
            source: source.id(),
            lens: Arc::new(transformer),
        }
    }

    /// Resolve a dependency from the node's inherited map.
    pub fn dependency<K: DependencyKey>(&self) -> K::Value {
        self.dependencies.get::<K>()
    }
}
