//! Scoped dependency values.
//!
//! A [`DependencyValues`] map is handed from parent to child during
//! reconciliation. A route may inject overrides; the injected map is a new
//! value that shares every untouched entry with its source, and the source is
//! never modified. This is what keeps an injection invisible to siblings and
//! ancestors.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A type-level key into [`DependencyValues`].
///
/// Every key declares its default, so a lookup can never miss.
///
/// ```rust,ignore
/// struct ApiBase;
///
/// impl DependencyKey for ApiBase {
///     type Value = String;
///     fn default_value() -> String {
///         "https://localhost".into()
///     }
/// }
/// ```
pub trait DependencyKey: 'static {
    /// Type of the stored value.
    type Value: Clone + Send + Sync + 'static;

    /// Value reported when no ancestor injected one.
    fn default_value() -> Self::Value;
}

/// Immutable, type-keyed dependency map with copy-on-write injection.
#[derive(Clone, Default)]
pub struct DependencyValues {
    entries: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl DependencyValues {
    /// An empty map; every key resolves to its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `K`, falling back to its default.
    pub fn get<K: DependencyKey>(&self) -> K::Value {
        self.entries
            .get(&TypeId::of::<K>())
            .and_then(|value| value.downcast_ref::<K::Value>())
            .cloned()
            .unwrap_or_else(K::default_value)
    }

    /// Whether `K` was explicitly injected somewhere above.
    pub fn contains<K: DependencyKey>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<K>())
    }

    /// Return a new map with `K` set to `value`. `self` is left untouched.
    #[must_use]
    pub fn inject<K: DependencyKey>(&self, value: K::Value) -> Self {
        let mut entries = HashMap::clone(&self.entries);
        entries.insert(TypeId::of::<K>(), Arc::new(value));
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Number of injected keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key has been injected.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether both maps share the same underlying storage.
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl fmt::Debug for DependencyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyValues")
            .field("injected", &self.entries.len())
            .finish()
    }
}
