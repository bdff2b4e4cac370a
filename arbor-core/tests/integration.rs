//! Integration Tests for the State Tree
//!
//! These tests drive whole trees through `Tree` and check that lifecycle,
//! reconciliation, dependency scoping, validity and events work together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use arbor_core::{
    Behavior, DependencyKey, Entry, Fields, Handler, Hooks, Node, NodeId, NodePath, Projection,
    Result, Route, Rules, RuntimeConfig, StateChangeMetadata, StreamKind, Transformer, Tree,
    TreeError, TreeEvent, Tx, Value,
};

fn children<N: Node>(tree: &Tree<N>, node: NodeId) -> Vec<NodeId> {
    tree.read(|view| view.children(node)).unwrap().unwrap()
}

// ---------------------------------------------------------------------------
// Chains
// ---------------------------------------------------------------------------

struct Chain {
    depth: Value<u32>,
}

impl Node for Chain {
    type Props = u32;

    fn init(depth: u32, fields: &mut Fields<'_>) -> Self {
        Chain {
            depth: fields.value(depth),
        }
    }

    fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
        let depth = cx.get(&self.depth)?;
        Ok(if depth > 1 {
            Route::single::<Chain>(depth - 1)
        } else {
            Route::none()
        })
    }
}

/// Test that a depth-800 chain attaches 800 scopes and disposes all of them.
#[test]
fn chain_of_800_tears_down_completely() {
    let tree = Tree::<Chain>::start(800).unwrap();
    assert_eq!(tree.live_scopes(), 800);
    assert_eq!(tree.stats().attached, 800);

    assert!(tree.dispose());
    assert_eq!(tree.live_scopes(), 0);

    let stats = tree.stats();
    assert_eq!(stats.attached, stats.detached);
    assert_eq!(stats.live(), 0);

    // Disposing is idempotent and the tree refuses further work.
    assert!(!tree.dispose());
    assert!(!tree.is_active());
    assert_eq!(tree.write(|_| Ok(())), Err(TreeError::Disposed));
}

/// Test that shrinking the root's route detaches the rest of the chain.
#[test]
fn truncating_a_chain_detaches_its_tail() {
    let tree = Tree::<Chain>::start(50).unwrap();
    let depth = tree.with_model(|chain| chain.depth).unwrap();

    tree.write(|tx| tx.set(&depth, 1)).unwrap();

    assert_eq!(tree.live_scopes(), 1);
    assert_eq!(tree.stats().detached, 49);
    assert!(children(&tree, tree.root_id()).is_empty());
}

/// Test that routing deeper than the configured limit is a fault.
#[test]
fn depth_limit_is_enforced() {
    let result = Tree::<Chain>::builder()
        .config(RuntimeConfig::default().with_max_depth(10))
        .start::<Chain>(50);
    assert!(matches!(result, Err(TreeError::DepthExceeded(10))));
}

/// Records teardown order and whether the deepest node's behavior was
/// already cancelled at each `did_stop`.
#[derive(Default)]
struct Teardown {
    token: Mutex<Option<CancellationToken>>,
    stops: Mutex<Vec<(&'static str, bool)>>,
}

impl Teardown {
    fn stopped(&self, name: &'static str) {
        let cancelled = self
            .token
            .lock()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled);
        self.stops.lock().push((name, cancelled));
    }
}

/// Shows an `Upper > Middle > Deepest` subtree while `show` is set.
struct Holder {
    show: Value<bool>,
    trace: Arc<Teardown>,
}

impl Node for Holder {
    type Props = Arc<Teardown>;

    fn init(trace: Arc<Teardown>, fields: &mut Fields<'_>) -> Self {
        Holder {
            show: fields.value(true),
            trace,
        }
    }

    fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
        Ok(if cx.get(&self.show)? {
            Route::single::<Upper>(Arc::clone(&self.trace))
        } else {
            Route::none()
        })
    }
}

struct Upper(Arc<Teardown>);

impl Node for Upper {
    type Props = Arc<Teardown>;

    fn init(trace: Arc<Teardown>, _fields: &mut Fields<'_>) -> Self {
        Upper(trace)
    }

    fn rules(&self, _cx: &mut Rules<'_>) -> Result<Route> {
        Ok(Route::single::<Middle>(Arc::clone(&self.0)))
    }

    fn did_stop(&self) {
        self.0.stopped("upper");
    }
}

struct Middle(Arc<Teardown>);

impl Node for Middle {
    type Props = Arc<Teardown>;

    fn init(trace: Arc<Teardown>, _fields: &mut Fields<'_>) -> Self {
        Middle(trace)
    }

    fn rules(&self, _cx: &mut Rules<'_>) -> Result<Route> {
        Ok(Route::single::<Deepest>(Arc::clone(&self.0)))
    }

    fn did_stop(&self) {
        self.0.stopped("middle");
    }
}

/// Holds a behavior open until it is cancelled.
struct Deepest {
    id: NodeId,
    trace: Arc<Teardown>,
}

impl Node for Deepest {
    type Props = Arc<Teardown>;

    fn init(trace: Arc<Teardown>, fields: &mut Fields<'_>) -> Self {
        Deepest {
            id: fields.node_id(),
            trace,
        }
    }

    fn did_start(&self, tx: &mut Tx<'_>) -> Result<()> {
        let trace = Arc::clone(&self.trace);
        tx.run(
            self.id,
            Behavior::cancellable("hold", move |token: CancellationToken| {
                *trace.token.lock() = Some(token.clone());
                async move { token.cancelled().await }
            }),
            Handler::ignore(),
        )
    }

    fn did_stop(&self) {
        self.trace.stopped("deepest");
    }
}

/// Test that detaching a subtree cancels its behaviors first, then stops
/// children before their parents.
#[tokio::test]
async fn detach_cancels_then_stops_children_first() {
    let trace = Arc::new(Teardown::default());
    let tree = Tree::<Holder>::start(Arc::clone(&trace)).unwrap();
    assert_eq!(tree.live_scopes(), 4);

    for _ in 0..100 {
        if trace.token.lock().is_some() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(trace.token.lock().is_some(), "behavior never started");

    let show = tree.with_model(|holder| holder.show).unwrap();
    tree.write(|tx| tx.set(&show, false)).unwrap();

    assert_eq!(tree.live_scopes(), 1);
    assert_eq!(
        *trace.stops.lock(),
        vec![("deepest", true), ("middle", true), ("upper", true)]
    );
}

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

struct TodoList {
    items: Value<Vec<(u64, String)>>,
    keyed: bool,
}

impl Node for TodoList {
    type Props = (bool, Vec<(u64, String)>);

    fn init((keyed, items): Self::Props, fields: &mut Fields<'_>) -> Self {
        TodoList {
            items: fields.value(items),
            keyed,
        }
    }

    fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
        let items = cx.get(&self.items)?;
        Ok(if self.keyed {
            Route::each::<Todo, _>(items)
        } else {
            Route::list(
                items
                    .into_iter()
                    .map(|(_, title)| Entry::new::<Todo>(title)),
            )
        })
    }
}

struct Todo {
    title: String,
    done: Value<bool>,
}

impl Node for Todo {
    type Props = String;

    fn init(title: String, fields: &mut Fields<'_>) -> Self {
        Todo {
            title,
            done: fields.value(false),
        }
    }

    fn update(&mut self, title: String) {
        self.title = title;
    }
}

fn items(ids: &[u64]) -> Vec<(u64, String)> {
    ids.iter().map(|id| (*id, format!("todo {id}"))).collect()
}

fn todo<N: Node, R>(tree: &Tree<N>, node: NodeId, f: impl FnOnce(&Todo) -> R) -> R {
    tree.with_node::<Todo, R>(node, f).unwrap()
}

/// Test that keyed entries keep their scopes (and state) across reorders.
#[test]
fn keyed_identity_is_preserved() {
    let tree = Tree::<TodoList>::start((true, items(&[1, 2, 3]))).unwrap();
    let root = tree.root_id();
    let list = tree.with_model(|list| list.items).unwrap();
    let before = children(&tree, root);

    let done = todo(&tree, before[1], |todo| todo.done);
    tree.write(|tx| tx.set(&done, true)).unwrap();

    tree.write(|tx| {
        tx.set(
            &list,
            vec![
                (3, "three, renamed".to_string()),
                (2, "todo 2".to_string()),
                (4, "todo 4".to_string()),
            ],
        )
    })
    .unwrap();

    let after = children(&tree, root);
    assert_eq!(after.len(), 3);
    assert_eq!(after[0], before[2]);
    assert_eq!(after[1], before[1]);
    assert!(!before.contains(&after[2]));

    // Props flow into kept scopes; value fields survive.
    assert_eq!(todo(&tree, after[0], |todo| todo.title.clone()), "three, renamed");
    assert!(tree.read(|view| view.get(&done)).unwrap().unwrap());
    assert!(!tree.read(|view| view.contains(before[0])).unwrap());
}

/// Test the positional fallback: inserting at the front of an unkeyed list
/// shifts identities, so state stays with positions rather than items.
#[test]
fn unkeyed_lists_match_by_position() {
    let tree = Tree::<TodoList>::start((false, items(&[1, 2]))).unwrap();
    let root = tree.root_id();
    let list = tree.with_model(|list| list.items).unwrap();
    let before = children(&tree, root);

    let first_done = todo(&tree, before[0], |todo| todo.done);
    tree.write(|tx| tx.set(&first_done, true)).unwrap();

    tree.write(|tx| tx.set(&list, items(&[0, 1, 2]))).unwrap();

    let after = children(&tree, root);
    assert_eq!(&after[..2], &before[..]);
    assert!(!before.contains(&after[2]));

    assert_eq!(todo(&tree, after[0], |todo| todo.title.clone()), "todo 0");
    assert!(tree.read(|view| view.get(&first_done)).unwrap().unwrap());
}

/// Test that duplicate identities in one route are reported, not resolved.
#[test]
fn duplicate_identities_are_faults() {
    let started = Tree::<TodoList>::start((true, items(&[7, 7])));
    assert!(matches!(started, Err(TreeError::DuplicateIdentity { .. })));

    let tree = Tree::<TodoList>::start((true, items(&[1]))).unwrap();
    let list = tree.with_model(|list| list.items).unwrap();
    let err = tree.write(|tx| tx.set(&list, items(&[5, 5]))).unwrap_err();
    match err {
        TreeError::DuplicateIdentity { parent, identity } => {
            assert_eq!(parent, tree.root_id());
            assert_eq!(identity.to_string(), "Todo[5]");
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

struct Theme;

impl DependencyKey for Theme {
    type Value = &'static str;

    fn default_value() -> &'static str {
        "light"
    }
}

struct Shell;

impl Node for Shell {
    type Props = ();

    fn init(_: (), _fields: &mut Fields<'_>) -> Self {
        Shell
    }

    fn rules(&self, _cx: &mut Rules<'_>) -> Result<Route> {
        Ok(Route::list([
            Entry::keyed::<Panel>("dark", Some("dark")),
            Entry::keyed::<Panel>("plain", None),
        ]))
    }
}

struct Panel {
    theme: Value<Option<&'static str>>,
}

impl Node for Panel {
    type Props = Option<&'static str>;

    fn init(theme: Option<&'static str>, fields: &mut Fields<'_>) -> Self {
        Panel {
            theme: fields.value(theme),
        }
    }

    fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
        let route = Route::single::<Frame>(());
        Ok(match cx.get(&self.theme)? {
            Some(theme) => route.inject::<Theme>(theme),
            None => route,
        })
    }
}

struct Frame;

impl Node for Frame {
    type Props = ();

    fn init(_: (), _fields: &mut Fields<'_>) -> Self {
        Frame
    }

    fn rules(&self, _cx: &mut Rules<'_>) -> Result<Route> {
        Ok(Route::single::<Label>(()))
    }
}

struct Label;

impl Node for Label {
    type Props = ();

    fn init(_: (), _fields: &mut Fields<'_>) -> Self {
        Label
    }
}

fn theme<N: Node>(tree: &Tree<N>, node: NodeId) -> &'static str {
    tree.read(|view| view.dependency::<Theme>(node))
        .unwrap()
        .unwrap()
}

fn leaf_below<N: Node>(tree: &Tree<N>, panel: NodeId) -> (NodeId, NodeId) {
    let frame = children(tree, panel)[0];
    (frame, children(tree, frame)[0])
}

/// Test that an injection reaches the whole subtree and nothing else.
#[test]
fn injections_are_scoped_to_the_subtree() {
    let tree = Tree::<Shell>::start(()).unwrap();
    let root = tree.root_id();
    let panels = children(&tree, root);
    let (dark_frame, dark_label) = leaf_below(&tree, panels[0]);
    let (_, plain_label) = leaf_below(&tree, panels[1]);

    assert_eq!(theme(&tree, root), "light");
    assert_eq!(theme(&tree, panels[0]), "light");
    assert_eq!(theme(&tree, dark_frame), "dark");
    assert_eq!(theme(&tree, dark_label), "dark");
    assert_eq!(theme(&tree, plain_label), "light");
}

/// Test that a changed injection reaches existing descendants on the next
/// reconciliation, without recreating them.
#[test]
fn injections_are_reapplied_on_update() {
    let tree = Tree::<Shell>::start(()).unwrap();
    let panels = children(&tree, tree.root_id());
    let (_, dark_label) = leaf_below(&tree, panels[0]);
    let (_, plain_label) = leaf_below(&tree, panels[1]);

    let plain = tree
        .with_node::<Panel, _>(panels[1], |panel| panel.theme)
        .unwrap();
    tree.write(|tx| tx.set(&plain, Some("contrast"))).unwrap();

    assert_eq!(leaf_below(&tree, panels[1]).1, plain_label);
    assert_eq!(theme(&tree, plain_label), "contrast");
    assert_eq!(theme(&tree, dark_label), "dark");
}

/// Test that dependencies given to the builder are seen by the whole tree.
#[test]
fn builder_dependencies_reach_the_root() {
    let tree = Tree::<Shell>::builder()
        .dependency::<Theme>("sepia")
        .start::<Shell>(())
        .unwrap();
    let panels = children(&tree, tree.root_id());

    assert_eq!(theme(&tree, tree.root_id()), "sepia");
    assert_eq!(theme(&tree, leaf_below(&tree, panels[1]).1), "sepia");
    assert_eq!(theme(&tree, leaf_below(&tree, panels[0]).1), "dark");
}

// ---------------------------------------------------------------------------
// Projections and validity
// ---------------------------------------------------------------------------

struct Gate {
    maybe: Value<Option<u32>>,
    value: Projection<u32>,
}

impl Node for Gate {
    type Props = Option<u32>;

    fn init(initial: Option<u32>, fields: &mut Fields<'_>) -> Self {
        let maybe = fields.value(initial);
        let value = fields.project(&maybe, Transformer::unwrapping());
        Gate { maybe, value }
    }

    fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
        let value = cx.get_projection(&self.value)?;
        Ok(Route::single::<Todo>(value.to_string()))
    }
}

/// Test that an invalid projection turns into validity state, and that
/// writing through it is a fault.
#[test]
fn invalid_projections_mark_the_node_invalid() {
    let tree = Tree::<Gate>::start(Some(1)).unwrap();
    let root = tree.root_id();
    let (maybe, value) = tree
        .with_model(|gate| (gate.maybe, gate.value.clone()))
        .unwrap();
    let mut validity = tree.emitter().validity_did_change(root);

    tree.write(|tx| tx.set(&maybe, None)).unwrap();
    assert_eq!(
        validity.drain(),
        vec![TreeEvent::ValidityDidChange {
            node: root,
            valid: false,
        }]
    );
    assert!(!tree.read(|view| view.is_node_valid(root)).unwrap().unwrap());
    assert_eq!(tree.live_scopes(), 2, "previous children are kept");

    assert_eq!(
        tree.write(|tx| tx.set_projection(&value, 3)),
        Err(TreeError::InvalidProjection(value.id()))
    );
    assert_eq!(
        tree.read(|view| view.get_projection(&value)).unwrap(),
        Err(TreeError::InvalidProjection(value.id()))
    );

    tree.write(|tx| tx.set(&maybe, Some(2))).unwrap();
    assert_eq!(
        validity.drain(),
        vec![TreeEvent::ValidityDidChange {
            node: root,
            valid: true,
        }]
    );

    tree.write(|tx| tx.set_projection(&value, 5)).unwrap();
    assert_eq!(tree.read(|view| view.get(&maybe)).unwrap().unwrap(), Some(5));
    let child = children(&tree, root)[0];
    assert_eq!(todo(&tree, child, |todo| todo.title.clone()), "5");
}

struct Form {
    name: Value<String>,
}

impl Node for Form {
    type Props = String;

    fn init(name: String, fields: &mut Fields<'_>) -> Self {
        Form {
            name: fields.value(name),
        }
    }

    fn rules(&self, _cx: &mut Rules<'_>) -> Result<Route> {
        Ok(Route::single::<Length>(self.name))
    }
}

struct Length {
    length: Projection<usize>,
}

impl Node for Length {
    type Props = Value<String>;

    fn init(name: Value<String>, fields: &mut Fields<'_>) -> Self {
        Length {
            length: fields.project(
                &name,
                Transformer::new(|name: &String| name.len(), |len: usize| "x".repeat(len)),
            ),
        }
    }
}

/// Test that a projection over another node's field reports the change to
/// both owners.
#[test]
fn projection_writes_resolve_through_the_backing_field() {
    let tree = Tree::<Form>::start("abc".to_string()).unwrap();
    let root = tree.root_id();
    let child = children(&tree, root)[0];
    let name = tree.with_model(|form| form.name).unwrap();
    let length = tree
        .with_node::<Length, _>(child, |length| length.length.clone())
        .unwrap();

    assert_eq!(tree.read(|view| view.get_projection(&length)).unwrap(), Ok(3));

    let mut all = tree.emitter().all();
    tree.write(|tx| tx.set_projection(&length, 5)).unwrap();
    assert_eq!(tree.read(|view| view.get(&name)).unwrap().unwrap(), "xxxxx");

    let change = StateChangeMetadata::Projection {
        projection: length.id(),
        value: name.id(),
    };
    let states: Vec<TreeEvent> = all
        .drain()
        .into_iter()
        .filter(|event| event.kind() == StreamKind::StateDidChange)
        .collect();
    assert_eq!(
        states,
        vec![
            TreeEvent::StateDidChange {
                node: child,
                changes: vec![change].into(),
            },
            TreeEvent::StateDidChange {
                node: root,
                changes: vec![change].into(),
            },
        ]
    );
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

struct Root;

impl Node for Root {
    type Props = ();

    fn init(_: (), _fields: &mut Fields<'_>) -> Self {
        Root
    }

    fn rules(&self, _cx: &mut Rules<'_>) -> Result<Route> {
        Ok(Route::list([
            Entry::keyed::<Branch>("left", ()),
            Entry::keyed::<Branch>("right", ()),
        ]))
    }
}

struct Branch;

impl Node for Branch {
    type Props = ();

    fn init(_: (), _fields: &mut Fields<'_>) -> Self {
        Branch
    }

    fn rules(&self, _cx: &mut Rules<'_>) -> Result<Route> {
        Ok(Route::single::<Counter>(0))
    }
}

struct Counter {
    count: Value<i32>,
    label: Value<String>,
}

impl Node for Counter {
    type Props = i32;

    fn init(start: i32, fields: &mut Fields<'_>) -> Self {
        Counter {
            count: fields.value(start),
            label: fields.value(String::new()),
        }
    }
}

struct Layout {
    root: NodeId,
    left: NodeId,
    right: NodeId,
    left_leaf: NodeId,
    count: Value<i32>,
    label: Value<String>,
}

fn layout(tree: &Tree<Root>) -> Layout {
    let root = tree.root_id();
    let branches = children(tree, root);
    let left_leaf = children(tree, branches[0])[0];
    let (count, label) = tree
        .with_node::<Counter, _>(left_leaf, |counter| (counter.count, counter.label))
        .unwrap();
    Layout {
        root,
        left: branches[0],
        right: branches[1],
        left_leaf,
        count,
        label,
    }
}

/// Test that a leaf's state change precedes every ancestor's subtree event,
/// repeated writes collapse, and siblings hear nothing.
#[test]
fn events_are_ordered_and_scoped() {
    let tree = Tree::<Root>::start(()).unwrap();
    let ids = layout(&tree);
    let mut all = tree.emitter().all();
    let mut right = tree.emitter().subtree_did_change(ids.right);

    tree.write(|tx| {
        tx.set(&ids.count, 1)?;
        tx.set(&ids.count, 2)
    })
    .unwrap();

    assert_eq!(
        all.drain(),
        vec![
            TreeEvent::StateDidChange {
                node: ids.left_leaf,
                changes: vec![StateChangeMetadata::Value(ids.count.id())].into(),
            },
            TreeEvent::SubtreeDidChange { node: ids.left_leaf },
            TreeEvent::SubtreeDidChange { node: ids.left },
            TreeEvent::SubtreeDidChange { node: ids.root },
        ]
    );
    assert!(right.drain().is_empty());
}

/// Test that observed streams only fire for fields read since the last
/// notification.
#[test]
fn observed_streams_follow_reads() {
    let tree = Tree::<Root>::start(()).unwrap();
    let ids = layout(&tree);
    let mut state = tree.emitter().observed_state_did_change(ids.left_leaf);
    let mut subtree = tree.emitter().observed_subtree_did_change(ids.root);

    tree.write(|tx| tx.set(&ids.count, 1)).unwrap();
    assert!(state.drain().is_empty(), "nothing was read yet");

    tree.read_observed(&state, |view| view.get(&ids.count))
        .unwrap()
        .unwrap();
    tree.read_observed(&subtree, |view| view.get(&ids.count))
        .unwrap()
        .unwrap();

    tree.write(|tx| tx.set(&ids.label, "unread".to_string()))
        .unwrap();
    assert!(state.drain().is_empty());
    assert!(subtree.drain().is_empty());

    tree.write(|tx| tx.set(&ids.count, 2)).unwrap();
    assert_eq!(
        state.drain(),
        vec![TreeEvent::ObservedStateDidChange { node: ids.left_leaf }]
    );
    assert_eq!(
        subtree.drain(),
        vec![TreeEvent::ObservedSubtreeDidChange { node: ids.root }]
    );

    // The read set was consumed by the notification.
    tree.write(|tx| tx.set(&ids.count, 3)).unwrap();
    assert!(state.drain().is_empty());
}

/// Test that an observed stream ignores reads of other nodes' fields, even
/// when the same transaction also writes one of its own unread fields.
#[test]
fn observed_streams_only_match_their_own_changes() {
    let tree = Tree::<Root>::start(()).unwrap();
    let ids = layout(&tree);
    let right_leaf = children(&tree, ids.right)[0];
    let right_count = tree
        .with_node::<Counter, _>(right_leaf, |counter| counter.count)
        .unwrap();

    let mut state = tree.emitter().observed_state_did_change(ids.left_leaf);
    let mut subtree = tree.emitter().observed_subtree_did_change(ids.left);
    for stream in [&state, &subtree] {
        tree.read_observed(stream, |view| {
            view.get(&ids.count)?;
            view.get(&right_count)
        })
        .unwrap()
        .unwrap();
    }

    tree.write(|tx| {
        tx.set(&ids.label, "unread".to_string())?;
        tx.set(&right_count, 5)
    })
    .unwrap();
    assert!(state.drain().is_empty());
    assert!(subtree.drain().is_empty());

    tree.write(|tx| tx.set(&ids.count, 1)).unwrap();
    assert_eq!(
        state.drain(),
        vec![TreeEvent::ObservedStateDidChange { node: ids.left_leaf }]
    );
    assert_eq!(
        subtree.drain(),
        vec![TreeEvent::ObservedSubtreeDidChange { node: ids.left }]
    );
}

/// Test that the streams of a detached node end.
#[tokio::test]
async fn detached_nodes_end_their_streams() {
    let tree = Tree::<TodoList>::start((true, items(&[1, 2]))).unwrap();
    let root = tree.root_id();
    let list = tree.with_model(|list| list.items).unwrap();
    let first = children(&tree, root)[0];
    let mut first_state = tree.emitter().state_did_change(first);
    let mut routes = tree.emitter().routes_did_change(root);

    tree.write(|tx| tx.set(&list, items(&[2]))).unwrap();

    assert_eq!(first_state.recv().await, None);
    assert_eq!(
        routes.recv().await,
        Some(TreeEvent::RoutesDidChange { node: root })
    );
}

/// Test that subscribing to a node after it was detached yields an ended
/// stream and leaves nothing registered.
#[tokio::test]
async fn subscribing_after_detach_ends_immediately() {
    let tree = Tree::<TodoList>::start((true, items(&[1, 2]))).unwrap();
    let list = tree.with_model(|list| list.items).unwrap();
    let first = children(&tree, tree.root_id())[0];
    tree.write(|tx| tx.set(&list, items(&[2]))).unwrap();
    assert_eq!(tree.emitter().subscriber_count(), 0);

    let mut late = tree.emitter().state_did_change(first);
    drop(tree.emitter().routes_did_change(first));
    assert_eq!(tree.emitter().subscriber_count(), 0);
    assert_eq!(late.recv().await, None);

    // A dropped stream on a node that stays quiet is pruned too.
    let second = children(&tree, tree.root_id())[0];
    drop(tree.emitter().routes_did_change(second));
    tree.write(|tx| tx.set(&list, items(&[2, 3]))).unwrap();
    assert_eq!(tree.emitter().subscriber_count(), 0);
}

// ---------------------------------------------------------------------------
// Hooks and settling
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Writes(Arc<Mutex<Vec<String>>>);

impl Hooks for Writes {
    fn did_write_change(&self, path: &NodePath, _change: &StateChangeMetadata) {
        self.0.lock().push(path.to_string());
    }
}

/// Test that hooks see the identity path of every written node.
#[test]
fn hooks_see_write_paths() {
    let writes = Writes::default();
    let tree = Tree::<Root>::builder()
        .hooks(writes.clone())
        .start::<Root>(())
        .unwrap();
    let ids = layout(&tree);

    tree.write(|tx| tx.set(&ids.count, 5)).unwrap();

    assert_eq!(
        *writes.0.lock(),
        vec!["/Root#0/Branch[left]/Counter#0".to_string()]
    );
}

struct Spawner {
    count: Value<u32>,
}

impl Node for Spawner {
    type Props = ();

    fn init(_: (), fields: &mut Fields<'_>) -> Self {
        Spawner {
            count: fields.value(0),
        }
    }

    fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
        let count = cx.get(&self.count)?;
        Ok(Route::keyed::<Bump>(count, self.count))
    }
}

/// Bumps its parent's counter on start, which re-keys itself.
struct Bump {
    target: Value<u32>,
}

impl Node for Bump {
    type Props = Value<u32>;

    fn init(target: Value<u32>, _fields: &mut Fields<'_>) -> Self {
        Bump { target }
    }

    fn did_start(&self, tx: &mut Tx<'_>) -> Result<()> {
        tx.update(&self.target, |count| *count += 1)
    }
}

/// Shows a failing node and a counting node once `open` is set.
struct Nursery {
    open: Value<bool>,
    starts: Arc<AtomicUsize>,
}

impl Node for Nursery {
    type Props = Arc<AtomicUsize>;

    fn init(starts: Arc<AtomicUsize>, fields: &mut Fields<'_>) -> Self {
        Nursery {
            open: fields.value(false),
            starts,
        }
    }

    fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
        Ok(if cx.get(&self.open)? {
            Route::list([
                Entry::new::<Failing>(()),
                Entry::new::<Starter>(Arc::clone(&self.starts)),
            ])
        } else {
            Route::none()
        })
    }
}

/// Starts a behavior, which fails without a tokio runtime.
struct Failing {
    id: NodeId,
}

impl Node for Failing {
    type Props = ();

    fn init(_: (), fields: &mut Fields<'_>) -> Self {
        Failing {
            id: fields.node_id(),
        }
    }

    fn did_start(&self, tx: &mut Tx<'_>) -> Result<()> {
        tx.run(self.id, Behavior::new("fail", || async {}), Handler::ignore())
    }
}

struct Starter(Arc<AtomicUsize>);

impl Node for Starter {
    type Props = Arc<AtomicUsize>;

    fn init(starts: Arc<AtomicUsize>, _fields: &mut Fields<'_>) -> Self {
        Starter(starts)
    }

    fn did_start(&self, _tx: &mut Tx<'_>) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Test that a failing `did_start` is reported without skipping its
/// siblings' starts.
#[test]
fn failed_starts_do_not_skip_siblings() {
    let starts = Arc::new(AtomicUsize::new(0));
    let tree = Tree::<Nursery>::start(Arc::clone(&starts)).unwrap();
    let open = tree.with_model(|nursery| nursery.open).unwrap();

    let err = tree.write(|tx| tx.set(&open, true)).unwrap_err();
    assert_eq!(err, TreeError::NoAsyncRuntime);
    assert_eq!(tree.live_scopes(), 3);
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    // Nothing is left pending for later transactions.
    tree.write(|_| Ok(())).unwrap();
    assert_eq!(starts.load(Ordering::SeqCst), 1);
}

/// Test that a tree that never settles is reported instead of looping.
#[test]
fn runaway_updates_are_unstable() {
    let started = Tree::<Spawner>::builder()
        .config(RuntimeConfig::default().with_max_flush_passes(8))
        .start::<Spawner>(());
    assert!(matches!(started, Err(TreeError::Unstable(8))));
}

/// Test the text and JSON dumps.
#[test]
fn dumps_describe_the_tree() {
    let tree = Tree::<Root>::start(()).unwrap();

    let dump = tree.dump();
    assert_eq!(dump.lines().count(), 5);
    assert!(dump.starts_with("Root#0"));
    assert!(dump.contains("  Branch[right]"));
    assert!(dump.contains("    Counter#0"));

    let json: serde_json::Value = serde_json::from_str(&tree.dump_json().unwrap()).unwrap();
    assert_eq!(json.as_array().map(Vec::len), Some(5));
    assert_eq!(json[0]["identity"], "Root#0");
    assert_eq!(json[2]["values"], 2);
    assert_eq!(json[3]["identity"], "Branch[right]");
}
