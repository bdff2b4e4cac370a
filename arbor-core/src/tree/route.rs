//! Routes: the children a node declares.
//!
//! A [`Route`] is plain data produced fresh by every rule evaluation. Each
//! entry carries an [`Identity`] (node type plus key) that the router uses to
//! match it against the previous evaluation. Entries without an explicit key
//! are identified by their position, which means inserting into the middle of
//! an unkeyed list shifts the identity of every later entry.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::dependency::{DependencyKey, DependencyValues};
use super::id::NodeId;
use super::node::{build_erased, AnyNode, Node};
use super::Fields;
use crate::error::{Result, TreeError};

/// The key half of an [`Identity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A caller-supplied stable key.
    Explicit(Arc<str>),
    /// A caller-supplied integer key. Never equal to a string key.
    Integer(i128),
    /// Fallback: the entry's index within its route.
    Position(usize),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Explicit(key) => write!(f, "[{key}]"),
            Key::Integer(key) => write!(f, "[{key}]"),
            Key::Position(index) => write!(f, "#{index}"),
        }
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::Explicit(Arc::from(key))
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::Explicit(Arc::from(key))
    }
}

macro_rules! key_from_integer {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Key {
            fn from(key: $ty) -> Self {
                Key::Integer(key as i128)
            }
        })*
    };
}

key_from_integer!(u32, u64, usize, i32, i64);

/// Identity of a routed child: its node type and key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    node_type: TypeId,
    type_name: &'static str,
    key: Key,
}

impl Identity {
    pub(crate) fn new(node_type: TypeId, type_name: &'static str, key: Key) -> Self {
        Self {
            node_type,
            type_name,
            key,
        }
    }

    /// Full type name of the routed node.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The entry's key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub(crate) fn short_name(&self) -> &'static str {
        short_type_name(self.type_name)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.short_name(), self.key)
    }
}

pub(crate) fn short_type_name(name: &'static str) -> &'static str {
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}

type Build = fn(Box<dyn Any>, &mut Fields<'_>) -> Option<Arc<dyn AnyNode>>;

/// One declared child: a node type, its props, and an optional key.
pub struct Entry {
    node_type: TypeId,
    type_name: &'static str,
    key: Option<Key>,
    props: Box<dyn Any>,
    build: Build,
}

impl Entry {
    /// An entry identified by its position in the route.
    pub fn new<N: Node>(props: N::Props) -> Self {
        Self {
            node_type: TypeId::of::<N>(),
            type_name: type_name::<N>(),
            key: None,
            props: Box::new(props),
            build: build_erased::<N>,
        }
    }

    /// An entry identified by an explicit stable key.
    pub fn keyed<N: Node>(key: impl Into<Key>, props: N::Props) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new::<N>(props)
        }
    }

    pub(crate) fn identity(&self, position: usize) -> Identity {
        let key = self.key.clone().unwrap_or(Key::Position(position));
        Identity::new(self.node_type, self.type_name, key)
    }

    pub(crate) fn into_props(self) -> Box<dyn Any> {
        self.props
    }

    pub(crate) fn build(self, fields: &mut Fields<'_>) -> Option<Arc<dyn AnyNode>> {
        (self.build)(self.props, fields)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("node", &short_type_name(self.type_name))
            .field("key", &self.key)
            .finish()
    }
}

/// Shape of a route.
#[derive(Debug)]
pub enum RouteKind {
    /// No children.
    None,
    /// Exactly one child.
    Single(Entry),
    /// An ordered sequence of children.
    List(Vec<Entry>),
}

type Injection = Box<dyn Fn(&DependencyValues) -> DependencyValues>;

/// The children a node declares, plus dependency overrides for them.
pub struct Route {
    kind: RouteKind,
    injections: Vec<Injection>,
}

impl Route {
    fn from_kind(kind: RouteKind) -> Self {
        Self {
            kind,
            injections: Vec::new(),
        }
    }

    /// Declare no children.
    pub fn none() -> Self {
        Self::from_kind(RouteKind::None)
    }

    /// Declare a single positional child.
    pub fn single<N: Node>(props: N::Props) -> Self {
        Self::from_kind(RouteKind::Single(Entry::new::<N>(props)))
    }

    /// Declare a single keyed child.
    pub fn keyed<N: Node>(key: impl Into<Key>, props: N::Props) -> Self {
        Self::from_kind(RouteKind::Single(Entry::keyed::<N>(key, props)))
    }

    /// Declare an ordered list of (possibly heterogeneous) children.
    pub fn list(entries: impl IntoIterator<Item = Entry>) -> Self {
        Self::from_kind(RouteKind::List(entries.into_iter().collect()))
    }

    /// Declare one keyed child of type `N` per item.
    pub fn each<N, K>(items: impl IntoIterator<Item = (K, N::Props)>) -> Self
    where
        N: Node,
        K: Into<Key>,
    {
        Self::list(
            items
                .into_iter()
                .map(|(key, props)| Entry::keyed::<N>(key, props)),
        )
    }

    /// Override `K` for every node in this route's subtrees.
    #[must_use]
    pub fn inject<K: DependencyKey>(self, value: K::Value) -> Self {
        self.inject_with(move |deps| deps.inject::<K>(value.clone()))
    }

    /// Derive the children's dependencies from the parent's.
    #[must_use]
    pub fn inject_with<F>(mut self, inject: F) -> Self
    where
        F: Fn(&DependencyValues) -> DependencyValues + 'static,
    {
        self.injections.push(Box::new(inject));
        self
    }

    /// The route's shape.
    pub fn kind(&self) -> &RouteKind {
        &self.kind
    }

    /// Number of declared children.
    pub fn len(&self) -> usize {
        match &self.kind {
            RouteKind::None => 0,
            RouteKind::Single(_) => 1,
            RouteKind::List(entries) => entries.len(),
        }
    }

    /// Whether the route declares no children.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assign identities and check them for uniqueness.
    pub(crate) fn resolve(self, parent: NodeId) -> Result<ResolvedRoute> {
        let entries = match self.kind {
            RouteKind::None => Vec::new(),
            RouteKind::Single(entry) => vec![entry],
            RouteKind::List(entries) => entries,
        };

        let mut resolved = IndexMap::with_capacity(entries.len());
        for (position, entry) in entries.into_iter().enumerate() {
            let identity = entry.identity(position);
            if resolved.contains_key(&identity) {
                return Err(TreeError::DuplicateIdentity { parent, identity });
            }
            resolved.insert(identity, entry);
        }

        Ok(ResolvedRoute {
            entries: resolved,
            injections: self.injections,
        })
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("kind", &self.kind)
            .field("injections", &self.injections.len())
            .finish()
    }
}

impl From<Option<Entry>> for Route {
    fn from(entry: Option<Entry>) -> Self {
        match entry {
            Some(entry) => Self::from_kind(RouteKind::Single(entry)),
            None => Self::none(),
        }
    }
}

/// A route whose entries carry resolved, unique identities.
pub(crate) struct ResolvedRoute {
    pub(crate) entries: IndexMap<Identity, Entry>,
    injections: Vec<Injection>,
}

impl ResolvedRoute {
    /// The dependency map the route's children inherit.
    pub(crate) fn dependencies(&self, parent: &DependencyValues) -> DependencyValues {
        self.injections
            .iter()
            .fold(parent.clone(), |deps, inject| inject(&deps))
    }
}
