//! # Resolve
//!
//! Expands a component tree into a [`NodeTree`]. The walk is pre-order over
//! an explicit work stack, so it can stop at any component boundary and pick
//! up later from exactly where it stopped ([`PartialResolve::resume`]).
//!
//! For every element popped off the stack the resolver:
//!
//! 1. computes its global key and claims it (a duplicate is fatal),
//! 2. reuses the previous committed subtree when the component is pure,
//!    equivalent, sees the same tree props and nothing below it read a state
//!    slot that changed,
//! 3. otherwise renders it (following delegates down to a primitive) while
//!    recording state reads, hook values and event handlers,
//! 4. pushes the primitive's children.
//!
//! A render failure is offered to the enclosing error boundaries, nearest
//! first. A boundary's fallback takes the failed element's place; an
//! unhandled failure aborts the pass.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::cache::MeasuredResultCache;
use crate::component::{Deferred, Element, Primitive, Rendered};
use crate::context::{InterruptToken, ResolveContext};
use crate::error::{BoundaryChain, ComponentError, PipelineError, TreeId, catch_component};
use crate::events::EventHandlerRecord;
use crate::future::{Step, TreeWork};
use crate::key::{GlobalKey, KeyRegistry};
use crate::node::{Node, NodeFlags, NodeId, NodeKind, NodeTree, ScopedComponent};
use crate::perf::{PerfEvent, PerfLogger, PerfSpan};
use crate::reads;
use crate::scope::{RenderScope, ScopeEnv};
use crate::state::{CachedEntry, StateKey, StateSnapshot, StateValue, TreeState};
use crate::tree_props::TreePropContainer;

#[derive(Clone, Debug, Default)]
pub struct ResolveStats {
    /// Number of `render` calls made by the pass.
    pub rendered: usize,
    /// Heads of subtrees copied from the previous tree.
    pub reused: Vec<GlobalKey>,
}

/// Immutable output of a complete resolve.
pub struct ResolveResult {
    tree_id: TreeId,
    version: u64,
    root: Element,
    tree: NodeTree,
    state: StateSnapshot,
    tree_state: Arc<TreeState>,
    accessibility: bool,
    tree_props: TreePropContainer,
    inits: Vec<(StateKey, StateValue)>,
    cached: Vec<(StateKey, CachedEntry)>,
    handlers: Vec<EventHandlerRecord>,
    stats: ResolveStats,
    cache: Mutex<Option<MeasuredResultCache>>,
}

impl ResolveResult {
    pub fn tree_id(&self) -> TreeId {
        self.tree_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// Root node, `None` when the root rendered nothing.
    pub fn root_node(&self) -> Option<&Node> {
        self.tree.root().and_then(|id| self.tree.get(id))
    }

    /// The state this pass resolved against.
    pub fn state(&self) -> &StateSnapshot {
        &self.state
    }

    pub(crate) fn tree_state(&self) -> &Arc<TreeState> {
        &self.tree_state
    }

    pub fn accessibility(&self) -> bool {
        self.accessibility
    }

    pub fn tree_props(&self) -> &TreePropContainer {
        &self.tree_props
    }

    pub fn initial_states(&self) -> &[(StateKey, StateValue)] {
        &self.inits
    }

    pub fn cached_values(&self) -> &[(StateKey, CachedEntry)] {
        &self.cached
    }

    /// Every event handler in the tree, in pre-order.
    pub fn handlers(&self) -> &[EventHandlerRecord] {
        &self.handlers
    }

    pub fn stats(&self) -> &ResolveStats {
        &self.stats
    }

    /// Moves the measured-result cache out. Only the first caller gets it.
    pub fn consume_cache(&self) -> Result<MeasuredResultCache, PipelineError> {
        self.cache.lock().take().ok_or(PipelineError::CacheConsumed)
    }
}

impl std::fmt::Debug for ResolveResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveResult")
            .field("tree_id", &self.tree_id)
            .field("version", &self.version)
            .field("nodes", &self.tree.len())
            .field("stats", &self.stats)
            .finish()
    }
}

pub enum ResolveOutcome {
    Complete(ResolveResult),
    Partial(PartialResolve),
}

impl ResolveOutcome {
    pub fn is_partial_result(&self) -> bool {
        matches!(self, ResolveOutcome::Partial(_))
    }

    pub fn complete(self) -> Option<ResolveResult> {
        match self {
            ResolveOutcome::Complete(r) => Some(r),
            ResolveOutcome::Partial(_) => None,
        }
    }

    pub fn partial(self) -> Option<PartialResolve> {
        match self {
            ResolveOutcome::Complete(_) => None,
            ResolveOutcome::Partial(p) => Some(p),
        }
    }
}

/// An interrupted resolve, holding everything needed to continue it.
pub struct PartialResolve {
    walk: Walk,
}

impl PartialResolve {
    /// Continues the walk from where it stopped.
    pub fn resume(self) -> Result<ResolveOutcome, PipelineError> {
        log::debug!(
            "resuming resolve of tree {} v{} ({} pending)",
            self.walk.cx.tree_id,
            self.walk.cx.version,
            self.walk.stack.len()
        );
        self.walk.run()
    }

    /// Keys rendered so far, in render order.
    pub fn expanded_keys(&self) -> &[GlobalKey] {
        &self.walk.expanded
    }

    /// Elements still waiting to be expanded.
    pub fn pending(&self) -> usize {
        self.walk.stack.len()
    }

    pub fn token(&self) -> &Arc<InterruptToken> {
        &self.walk.cx.token
    }

    pub fn version(&self) -> u64 {
        self.walk.cx.version
    }
}

/// Resolves `root` as the root of a tree.
pub fn resolve(root: &Element, cx: ResolveContext) -> Result<ResolveOutcome, PipelineError> {
    let item = WorkItem {
        element: root.clone(),
        parent: None,
        parent_key: None,
        props: cx.tree_props.clone(),
        boundaries: BoundaryChain::default(),
        fallback: false,
        progress: None,
    };
    Walk::new(cx, root.clone(), item).run()
}

/// Resolves the content of a deferred node below `parent_key`.
pub(crate) fn resolve_nested(
    element: &Element,
    parent_key: &GlobalKey,
    boundaries: BoundaryChain,
    cx: ResolveContext,
) -> Result<ResolveOutcome, PipelineError> {
    let logger = cx.logger.clone();
    let span = PerfSpan::begin(logger.as_ref(), PerfEvent::NestedResolve, cx.tree_id);
    span.annotate("parent", parent_key);
    let item = WorkItem {
        element: element.clone(),
        parent: None,
        parent_key: Some(parent_key.clone()),
        props: cx.tree_props.clone(),
        boundaries,
        fallback: false,
        progress: None,
    };
    Walk::new(cx, element.clone(), item).run()
}

struct WorkItem {
    element: Element,
    parent: Option<NodeId>,
    parent_key: Option<GlobalKey>,
    props: TreePropContainer,
    boundaries: BoundaryChain,
    fallback: bool,
    /// Set when the walk yielded between two components of a delegate chain.
    progress: Option<Box<ChainProgress>>,
}

/// A delegate chain rendered up to `element`, whose key is already claimed.
struct ChainProgress {
    chain: SmallVec<[ScopedComponent; 2]>,
    handlers: SmallVec<[EventHandlerRecord; 1]>,
    inits: Vec<(StateKey, StateValue)>,
    cached: Vec<(StateKey, CachedEntry)>,
    element: Element,
    key: GlobalKey,
    props: TreePropContainer,
    boundaries: BoundaryChain,
}

impl ChainProgress {
    fn start(item: &WorkItem, key: GlobalKey) -> Self {
        Self {
            chain: SmallVec::new(),
            handlers: SmallVec::new(),
            inits: Vec::new(),
            cached: Vec::new(),
            element: item.element.clone(),
            key,
            props: item.props.clone(),
            boundaries: item.boundaries.clone(),
        }
    }
}

enum Terminal {
    Primitive(Primitive),
    Deferred(Deferred),
    Empty,
}

struct Walk {
    cx: ResolveContext,
    root: Element,
    keys: KeyRegistry,
    tree: NodeTree,
    stack: Vec<WorkItem>,
    cache: MeasuredResultCache,
    inits: Vec<(StateKey, StateValue)>,
    cached: Vec<(StateKey, CachedEntry)>,
    /// Hook values first created while a parent measured the component.
    seeded: HashMap<StateKey, StateValue>,
    expanded: Vec<GlobalKey>,
    stats: ResolveStats,
}

impl Walk {
    fn new(cx: ResolveContext, root: Element, first: WorkItem) -> Self {
        Self {
            cx,
            root,
            keys: KeyRegistry::default(),
            tree: NodeTree::default(),
            stack: vec![first],
            cache: MeasuredResultCache::new(),
            inits: Vec::new(),
            cached: Vec::new(),
            seeded: HashMap::new(),
            expanded: Vec::new(),
            stats: ResolveStats::default(),
        }
    }

    fn run(mut self) -> Result<ResolveOutcome, PipelineError> {
        let logger: Option<Arc<dyn PerfLogger>> = self.cx.logger.clone();
        let span = PerfSpan::begin(logger.as_ref(), PerfEvent::Resolve, self.cx.tree_id);

        while !self.stack.is_empty() {
            if self.cx.token.should_yield() {
                log::debug!(
                    "resolve of tree {} v{} yielded with {} pending",
                    self.cx.tree_id,
                    self.cx.version,
                    self.stack.len()
                );
                span.annotate("yielded", self.stack.len());
                return Ok(ResolveOutcome::Partial(PartialResolve { walk: self }));
            }
            if let Some(item) = self.stack.pop() {
                self.expand(item)?;
            }
        }

        span.annotate("rendered", self.stats.rendered);
        Ok(ResolveOutcome::Complete(self.finish()))
    }

    fn expand(&mut self, mut item: WorkItem) -> Result<(), PipelineError> {
        let ChainProgress {
            mut chain,
            mut handlers,
            mut inits,
            mut cached,
            mut element,
            mut key,
            mut props,
            mut boundaries,
        } = match item.progress.take() {
            Some(progress) => *progress,
            None => {
                let head_key = self.keys.key_for(item.parent_key.as_ref(), &item.element);
                self.keys.claim(&head_key)?;
                if self.try_reuse(&item, &head_key)? {
                    return Ok(());
                }
                ChainProgress::start(&item, head_key)
            }
        };

        let (terminal, child_props) = loop {
            self.stats.rendered += 1;
            self.expanded.push(key.clone());
            let env = ScopeEnv {
                generation: self.cx.version,
                accessibility: self.cx.accessibility,
                state: &self.cx.state,
                snapshot: &self.cx.snapshot,
                seeded: &self.seeded,
            };
            let ((result, out), state_reads) = reads::record_reads(|| {
                let mut scope = RenderScope::new(env, &key, &props, &mut self.cache);
                let r = catch_component(|| element.component().render(&mut scope));
                (r, scope.finish())
            });
            let rendered = match result {
                Ok(r) => r,
                Err(err) => return self.recover(item, key, boundaries, err),
            };

            // Hooks of children measured during the render, seen again when
            // those children are expanded.
            for (k, v) in out.inits.iter().filter(|(k, _)| k.owner != key) {
                self.seeded.entry(k.clone()).or_insert_with(|| v.clone());
            }
            inits.extend(out.inits);
            cached.extend(out.cached);
            handlers.extend(out.handlers);
            let child_props = out.child_props.unwrap_or_else(|| props.clone());
            if element.component().is_error_boundary() {
                boundaries = boundaries.push(key.clone(), element.clone());
            }
            chain.push(ScopedComponent {
                key: key.clone(),
                element: element.clone(),
                state_reads,
            });

            match rendered {
                Rendered::Delegate(next) => {
                    let next_key = self.keys.key_for(Some(&key), &next);
                    self.keys.claim(&next_key)?;
                    key = next_key;
                    element = next;
                    props = child_props;
                    if self.cx.token.should_yield() {
                        log::trace!("resolve yields before {key}");
                        item.progress = Some(Box::new(ChainProgress {
                            chain,
                            handlers,
                            inits,
                            cached,
                            element,
                            key,
                            props,
                            boundaries,
                        }));
                        self.stack.push(item);
                        return Ok(());
                    }
                }
                Rendered::Primitive(p) => break (Terminal::Primitive(p), child_props),
                Rendered::Deferred(d) => break (Terminal::Deferred(d), child_props),
                Rendered::Empty => break (Terminal::Empty, child_props),
            }
        };

        self.inits.extend(inits);
        self.cached.extend(cached);

        let mut flags = NodeFlags::empty();
        if item.fallback {
            flags |= NodeFlags::ERROR_FALLBACK;
        }
        let (kind, style, children, measure, baseline, render_unit) = match terminal {
            Terminal::Primitive(p) => (
                NodeKind::Standard,
                p.style,
                p.children,
                p.measure,
                p.baseline,
                p.render_unit,
            ),
            Terminal::Deferred(d) => {
                flags |= NodeFlags::DEFERRED;
                let style = d.style.clone();
                (NodeKind::Deferred(d), style, Vec::new(), None, None, None)
            }
            Terminal::Empty => return Ok(()),
        };
        if measure.is_some() {
            flags |= NodeFlags::HAS_MEASURE;
        }

        let id = self.tree.insert(Node {
            chain,
            kind,
            style,
            children: SmallVec::new(),
            parent: item.parent,
            measure,
            baseline,
            render_unit,
            handlers,
            props: item.props,
            child_props: child_props.clone(),
            boundaries: boundaries.clone(),
            flags,
        });

        for child in children.into_iter().rev() {
            self.stack.push(WorkItem {
                element: child,
                parent: Some(id),
                parent_key: Some(key.clone()),
                props: child_props.clone(),
                boundaries: boundaries.clone(),
                fallback: false,
                progress: None,
            });
        }
        Ok(())
    }

    /// Queues the nearest boundary's fallback in place of the failed element.
    fn recover(
        &mut self,
        item: WorkItem,
        failed_key: GlobalKey,
        boundaries: BoundaryChain,
        err: ComponentError,
    ) -> Result<(), PipelineError> {
        let Some((fallback, above)) = boundaries.handle(&failed_key, &err) else {
            log::warn!("unhandled render failure at {failed_key}: {err}");
            return Err(PipelineError::Render {
                key: failed_key,
                source: err,
            });
        };
        self.stack.push(WorkItem {
            element: fallback,
            parent: item.parent,
            parent_key: item.parent_key,
            props: item.props,
            boundaries: above,
            fallback: true,
            progress: None,
        });
        Ok(())
    }

    fn try_reuse(&mut self, item: &WorkItem, head_key: &GlobalKey) -> Result<bool, PipelineError> {
        if !self.cx.reuse_pure_subtrees || !item.element.component().is_pure() {
            return Ok(false);
        }
        let Some(prev) = self.cx.previous.clone() else {
            return Ok(false);
        };
        if prev.accessibility != self.cx.accessibility {
            return Ok(false);
        }
        let Some((pid, 0)) = prev.tree.find(head_key) else {
            return Ok(false);
        };
        let Some(pnode) = prev.tree.get(pid) else {
            return Ok(false);
        };
        if pnode.flags.contains(NodeFlags::ERROR_FALLBACK)
            || !pnode.head().element.is_equivalent_to(&item.element)
            || pnode.props != item.props
            || prev.tree.subtree_reads_any(pid, self.cx.snapshot.dirty())
        {
            return Ok(false);
        }

        self.tree
            .copy_subtree(&prev.tree, pid, item.parent, &item.boundaries, &mut self.keys)?;
        log::trace!("reused subtree {head_key}");
        self.stats.reused.push(head_key.clone());
        Ok(true)
    }

    fn finish(self) -> ResolveResult {
        let handlers: Vec<EventHandlerRecord> = self
            .tree
            .pre_order()
            .into_iter()
            .filter_map(|id| self.tree.get(id))
            .flat_map(|n| n.handlers.iter().cloned())
            .collect();
        log::debug!(
            "resolved tree {} v{}: {} nodes, {} rendered, {} reused",
            self.cx.tree_id,
            self.cx.version,
            self.tree.len(),
            self.stats.rendered,
            self.stats.reused.len()
        );
        ResolveResult {
            tree_id: self.cx.tree_id,
            version: self.cx.version,
            root: self.root,
            tree: self.tree,
            state: self.cx.snapshot,
            tree_state: self.cx.state,
            accessibility: self.cx.accessibility,
            tree_props: self.cx.tree_props,
            inits: self.inits,
            cached: self.cached,
            handlers,
            stats: self.stats,
            cache: Mutex::new(Some(self.cache)),
        }
    }
}

/// A resolve request for the tree future coordinator.
pub struct ResolveWork {
    root: Element,
    tree_id: TreeId,
    version: u64,
    state: Arc<TreeState>,
    snapshot: StateSnapshot,
    accessibility: bool,
    reuse_pure_subtrees: bool,
    previous: Option<Arc<ResolveResult>>,
    tree_props: TreePropContainer,
    logger: Option<Arc<dyn PerfLogger>>,
}

impl ResolveWork {
    /// Takes the state snapshot now; updates enqueued afterwards belong to
    /// the next request.
    pub fn new(root: Element, tree_id: TreeId, version: u64, state: Arc<TreeState>) -> Self {
        Self {
            root,
            tree_id,
            version,
            snapshot: state.snapshot(),
            state,
            accessibility: false,
            reuse_pure_subtrees: true,
            previous: None,
            tree_props: TreePropContainer::new(),
            logger: None,
        }
    }

    pub fn accessibility(mut self, enabled: bool) -> Self {
        self.accessibility = enabled;
        self
    }

    pub fn reuse_pure_subtrees(mut self, reuse: bool) -> Self {
        self.reuse_pure_subtrees = reuse;
        self
    }

    pub fn previous(mut self, previous: Option<Arc<ResolveResult>>) -> Self {
        self.previous = previous;
        self
    }

    pub fn tree_props(mut self, props: TreePropContainer) -> Self {
        self.tree_props = props;
        self
    }

    pub fn logger(mut self, logger: Option<Arc<dyn PerfLogger>>) -> Self {
        self.logger = logger;
        self
    }

    fn context(&self, token: &Arc<InterruptToken>) -> ResolveContext {
        ResolveContext::builder(self.tree_id, self.version, self.state.clone())
            .snapshot(self.snapshot.clone())
            .accessibility(self.accessibility)
            .reuse_pure_subtrees(self.reuse_pure_subtrees)
            .previous(self.previous.clone())
            .tree_props(self.tree_props.clone())
            .token(token.clone())
            .logger(self.logger.clone())
            .build()
    }
}

impl TreeWork for ResolveWork {
    type Output = ResolveResult;
    type Progress = PartialResolve;

    fn version(&self) -> u64 {
        self.version
    }

    fn is_equivalent_to(&self, other: &Self) -> bool {
        self.root.id() == other.root.id()
            && self.snapshot.consumed_seq() == other.snapshot.consumed_seq()
            && self.accessibility == other.accessibility
            && self.tree_props == other.tree_props
    }

    fn run(
        &self,
        progress: Option<PartialResolve>,
        token: &Arc<InterruptToken>,
    ) -> Result<Step<ResolveResult, PartialResolve>, PipelineError> {
        let outcome = match progress {
            Some(partial) => partial.resume()?,
            None => resolve(&self.root, self.context(token))?,
        };
        Ok(match outcome {
            ResolveOutcome::Complete(r) => Step::Done(r),
            ResolveOutcome::Partial(p) => Step::Interrupted(p),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, props_equal};
    use crate::geometry::Size;
    use crate::size_spec::SizeSpec;
    use crate::style::NodeStyle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct Parent(Vec<Element>);

    impl Component for Parent {
        fn type_name(&self) -> &'static str {
            "Parent"
        }

        fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            Ok(Rendered::Primitive(
                Primitive::new(NodeStyle::default()).children(self.0.iter().cloned()),
            ))
        }
    }

    #[derive(PartialEq)]
    struct Leaf(&'static str);

    impl Component for Leaf {
        fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            Ok(Rendered::Primitive(Primitive::new(NodeStyle::default())))
        }

        fn is_equivalent_to(&self, other: &dyn Component) -> bool {
            props_equal(self, other)
        }
    }

    struct Wrapper;

    impl Component for Wrapper {
        fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            Ok(Rendered::Delegate(Element::new(Leaf("inner"))))
        }
    }

    fn context(state: &Arc<TreeState>) -> ResolveContext {
        ResolveContext::builder(1, 1, state.clone()).build()
    }

    #[test]
    fn delegates_fold_into_one_node() {
        let state = Arc::new(TreeState::new());
        let root = Element::new(Parent(vec![Element::new(Wrapper)]));
        let r = resolve(&root, context(&state)).unwrap().complete().unwrap();

        assert_eq!(r.tree().len(), 2);
        let node = r.tree().node_by_key(&GlobalKey::from("Parent,Wrapper")).unwrap();
        assert_eq!(node.chain().len(), 2);
        assert_eq!(node.tail_key().as_str(), "Parent,Wrapper,Leaf");
        assert_eq!(
            r.tree().find(&GlobalKey::from("Parent,Wrapper,Leaf")).map(|(_, pos)| pos),
            Some(1)
        );
    }

    #[test]
    fn empty_root_resolves_to_no_node() {
        struct Nothing;
        impl Component for Nothing {
            fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
                Ok(Rendered::Empty)
            }
        }
        let state = Arc::new(TreeState::new());
        let r = resolve(&Element::new(Nothing), context(&state))
            .unwrap()
            .complete()
            .unwrap();
        assert!(r.root_node().is_none());
        assert_eq!(r.stats().rendered, 1);
    }

    #[test]
    fn cache_is_consumed_once() {
        let state = Arc::new(TreeState::new());
        let r = resolve(&Element::new(Parent(vec![])), context(&state))
            .unwrap()
            .complete()
            .unwrap();
        assert!(r.consume_cache().is_ok());
        assert!(matches!(r.consume_cache(), Err(PipelineError::CacheConsumed)));
    }

    #[test]
    fn equivalent_pure_subtrees_are_reused() {
        let state = Arc::new(TreeState::new());
        let leaf = |label: &'static str| Element::new(Leaf(label)).with_key(label);
        let first = resolve(
            &Element::new(Parent(vec![leaf("a"), leaf("b")])),
            context(&state),
        )
        .unwrap()
        .complete()
        .map(Arc::new)
        .unwrap();

        let cx = ResolveContext::builder(1, 2, state.clone())
            .previous(Some(first.clone()))
            .build();
        let second = resolve(&Element::new(Parent(vec![leaf("a"), leaf("c")])), cx)
            .unwrap()
            .complete()
            .unwrap();

        assert_eq!(second.stats().reused, vec![GlobalKey::from("Parent$a")]);
        assert!(second
            .tree()
            .node_by_key(&GlobalKey::from("Parent$a"))
            .unwrap()
            .flags()
            .contains(NodeFlags::REUSED));
        assert!(second.tree().contains_key(&GlobalKey::from("Parent$c")));
    }

    /// Measures its children before rendering them.
    struct Measuring(Vec<Element>);

    impl Component for Measuring {
        fn render(&self, cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            for child in &self.0 {
                cx.measure(child, SizeSpec::Unspecified, SizeSpec::Unspecified)?;
            }
            Ok(Rendered::Primitive(
                Primitive::new(NodeStyle::default()).children(self.0.iter().cloned()),
            ))
        }
    }

    struct Square {
        initial: f32,
        inits: Arc<AtomicUsize>,
    }

    impl Component for Square {
        fn render(&self, cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            let (initial, inits) = (self.initial, self.inits.clone());
            let side = cx
                .use_state(move || {
                    inits.fetch_add(1, Ordering::SeqCst);
                    initial
                })
                .get();
            Ok(Rendered::Primitive(Primitive::new(NodeStyle::default()).measure(
                move |w: SizeSpec, h: SizeSpec| Ok(Size::new(w.resolve(side), h.resolve(side))),
            )))
        }
    }

    #[test]
    fn measured_children_keep_their_hook_state() {
        let state = Arc::new(TreeState::new());
        let inits = Arc::new(AtomicUsize::new(0));
        let square = |initial| {
            Element::new(Square {
                initial,
                inits: inits.clone(),
            })
        };
        let root = Element::new(Measuring(vec![square(10.0), square(20.0)]));
        let r = resolve(&root, context(&state)).unwrap().complete().unwrap();

        assert_eq!(inits.load(Ordering::SeqCst), 2);
        let owners: Vec<_> = r
            .initial_states()
            .iter()
            .map(|(k, _)| k.owner.as_str())
            .collect();
        assert_eq!(owners, ["Measuring,Square", "Measuring,Square!1"]);
        assert!(r.tree().contains_key(&GlobalKey::from("Measuring,Square!1")));
    }

    /// Delegates down `depth` levels, asking `token` to stop at `stop_at`.
    struct Chain {
        depth: u32,
        stop_at: u32,
        token: Arc<InterruptToken>,
    }

    impl Component for Chain {
        fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            if self.depth == self.stop_at {
                self.token.request_interrupt();
            }
            if self.depth == 0 {
                return Ok(Rendered::Primitive(Primitive::new(NodeStyle::default())));
            }
            Ok(Rendered::Delegate(Element::new(Chain {
                depth: self.depth - 1,
                stop_at: self.stop_at,
                token: self.token.clone(),
            })))
        }
    }

    #[test]
    fn delegate_chains_yield_between_components() {
        let worker = thread::spawn(|| thread::current().id()).join().unwrap();
        let token = Arc::new(InterruptToken::new(worker));
        let state = Arc::new(TreeState::new());
        let root = Element::new(Chain {
            depth: 4,
            stop_at: 3,
            token: token.clone(),
        });
        let cx = ResolveContext::builder(1, 1, state).token(token).build();

        let partial = resolve(&root, cx).unwrap().partial().unwrap();
        assert_eq!(partial.expanded_keys().len(), 2);
        assert_eq!(partial.pending(), 1);

        partial.token().clear_interrupt();
        let r = partial.resume().unwrap().complete().unwrap();
        assert_eq!(r.stats().rendered, 5);
        assert_eq!(r.tree().len(), 1);
        let node = r.root_node().unwrap();
        assert_eq!(node.chain().len(), 5);
        assert_eq!(node.tail_key().as_str(), "Chain,Chain,Chain,Chain,Chain");
    }
}
