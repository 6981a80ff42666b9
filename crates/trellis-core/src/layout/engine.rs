use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use smallvec::SmallVec;
use taffy::TaffyTree;

use crate::cache::MeasuredResultCache;
use crate::component::Element;
use crate::context::{LayoutContext, ResolveContext};
use crate::diff::{DiffNode, DiffTree, MeasureRecord};
use crate::error::{BoundaryChain, ComponentError, PipelineError, catch_component};
use crate::events::EventHandlerRecord;
use crate::geometry::{Edges, Rect, Size};
use crate::key::GlobalKey;
use crate::node::{Node, NodeId, NodeKind, NodeTree};
use crate::perf::{PerfEvent, PerfSpan};
use crate::resolve::{ResolveOutcome, ResolveResult, resolve_nested};
use crate::size_spec::SizeSpec;
use crate::state::{CachedEntry, StateKey, StateValue};
use crate::style::{AlignItems, Length, NodeStyle};

use super::state::{
    LayoutKind, LayoutState, LayoutStats, MeasureSource, NodeLayout, ROOT_HOST_ID, RenderOutput,
    output_id,
};
use super::{LayoutOutcome, PartialLayout, calculate};

type SpecKey = (u8, u32);

#[derive(Clone, Copy)]
enum EngineCtx {
    Measure(NodeId),
    Deferred(NodeId),
}

/// Fallback laid out in place of a node whose measurement failed.
#[derive(Clone)]
struct Replacement {
    element: Element,
    boundaries: BoundaryChain,
}

/// Everything a pass has learnt so far. Kept across engine reruns and
/// across an interruption, so resumed work never measures twice.
#[derive(Default)]
struct Memo {
    sizes: HashMap<(NodeId, SpecKey, SpecKey), Size>,
    records: HashMap<NodeId, SmallVec<[MeasureRecord; 2]>>,
    sources: HashMap<NodeId, MeasureSource>,
    nested: HashMap<(NodeId, SpecKey, SpecKey), Arc<LayoutState>>,
    replaced: HashMap<NodeId, Replacement>,
    stats: LayoutStats,
}

impl Memo {
    fn forget(&mut self, id: NodeId) {
        self.sizes.retain(|(n, _, _), _| *n != id);
        self.nested.retain(|(n, _, _), _| *n != id);
        self.records.remove(&id);
        self.sources.remove(&id);
    }
}

enum Halt {
    Yield,
    /// User code failed; may be handled by an error boundary.
    Fail(NodeId, ComponentError),
    Abort(PipelineError),
}

struct EngineOutput {
    engine: TaffyTree<EngineCtx>,
    ids: HashMap<NodeId, taffy::NodeId>,
    baselines: HashMap<NodeId, f32>,
    nested: HashMap<NodeId, Arc<LayoutState>>,
}

enum Attempt {
    Done(Box<EngineOutput>),
    Yield,
    Retry,
}

pub(crate) struct LayoutPass {
    pub(crate) cx: LayoutContext,
    cache: MeasuredResultCache,
    memo: Memo,
}

impl LayoutPass {
    pub(crate) fn new(cx: LayoutContext) -> Result<Self, PipelineError> {
        let cache = match cx.resolve.consume_cache() {
            Ok(cache) => cache,
            Err(PipelineError::CacheConsumed) if cx.remeasure => {
                log::debug!("layout v{} of tree {}: remeasuring", cx.version, cx.tree_id);
                MeasuredResultCache::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            cx,
            cache,
            memo: Memo::default(),
        })
    }

    pub(crate) fn run(mut self) -> Result<LayoutOutcome, PipelineError> {
        let logger = self.cx.logger.clone();
        let span = PerfSpan::begin(logger.as_ref(), PerfEvent::Layout, self.cx.tree_id);
        let resolve = self.cx.resolve.clone();

        let Some(root) = resolve.tree().root() else {
            return Ok(LayoutOutcome::Complete(self.empty()));
        };
        loop {
            match self.attempt(&resolve, root)? {
                Attempt::Done(out) => {
                    let state = self.assemble(&resolve, root, *out)?;
                    span.annotate("outputs", state.outputs.len());
                    return Ok(LayoutOutcome::Complete(state));
                }
                Attempt::Yield => {
                    log::debug!(
                        "layout v{} of tree {} yielded after {} measurements",
                        self.cx.version,
                        self.cx.tree_id,
                        self.memo.sizes.len()
                    );
                    span.annotate("yielded", self.memo.sizes.len());
                    return Ok(LayoutOutcome::Interrupted(PartialLayout { pass: self }));
                }
                Attempt::Retry => {}
            }
        }
    }

    fn attempt(&mut self, resolve: &ResolveResult, root: NodeId) -> Result<Attempt, PipelineError> {
        let tree = resolve.tree();
        let mut engine: TaffyTree<EngineCtx> = TaffyTree::new();
        let mut ids: HashMap<NodeId, taffy::NodeId> = HashMap::new();
        let mut closed: HashSet<NodeId> = HashSet::new();

        for id in tree.pre_order() {
            if self.cx.token.should_yield() {
                return Ok(Attempt::Yield);
            }
            let Some(node) = tree.get(id) else {
                continue;
            };
            let parent = match node.parent {
                Some(p) if closed.contains(&p) => continue,
                Some(p) => match ids.get(&p) {
                    Some(t) => Some(*t),
                    None => continue,
                },
                None => None,
            };
            let style = if id == root {
                root_style(&node.style, self.cx.width, self.cx.height).to_taffy()
            } else {
                node.style.to_taffy()
            };
            let tid = if node.is_deferred() || self.memo.replaced.contains_key(&id) {
                closed.insert(id);
                engine.new_leaf_with_context(style, EngineCtx::Deferred(id))?
            } else if node.has_measure() && node.children.is_empty() {
                engine.new_leaf_with_context(style, EngineCtx::Measure(id))?
            } else {
                engine.new_leaf(style)?
            };
            if let Some(p) = parent {
                engine.add_child(p, tid)?;
            }
            ids.insert(id, tid);
        }

        let root_tid = ids
            .get(&root)
            .copied()
            .ok_or(PipelineError::Engine("root node was not built".into()))?;
        let available = taffy::geometry::Size {
            width: self.cx.width.to_available_space(),
            height: self.cx.height.to_available_space(),
        };

        self.memo.stats.engine_passes += 1;
        let mut halt: Option<Halt> = None;
        engine.compute_layout_with_measure(root_tid, available, |known, avail, _tid, ctx, _style| {
            let (Some(ctx), None) = (ctx, &halt) else {
                return taffy::geometry::Size::ZERO;
            };
            let width = SizeSpec::from_engine(known.width, avail.width);
            let height = SizeSpec::from_engine(known.height, avail.height);
            match self.measure_ctx(resolve, *ctx, width, height) {
                Ok(size) => taffy::geometry::Size {
                    width: size.width,
                    height: size.height,
                },
                Err(h) => {
                    halt = Some(h);
                    taffy::geometry::Size::ZERO
                }
            }
        })?;

        let mut nested = HashMap::new();
        let mut baselines = HashMap::new();
        if halt.is_none() {
            match self.finalize(resolve, &engine, &ids, &closed) {
                Ok((n, b)) => {
                    nested = n;
                    baselines = b;
                }
                Err(h) => halt = Some(h),
            }
        }

        match halt {
            None => Ok(Attempt::Done(Box::new(EngineOutput {
                engine,
                ids,
                baselines,
                nested,
            }))),
            Some(Halt::Yield) => Ok(Attempt::Yield),
            Some(Halt::Abort(e)) => Err(e),
            Some(Halt::Fail(id, err)) => {
                self.recover(resolve, id, err)?;
                Ok(Attempt::Retry)
            }
        }
    }

    /// Lays out deferred nodes at their final size and computes baselines.
    #[allow(clippy::type_complexity)]
    fn finalize(
        &mut self,
        resolve: &ResolveResult,
        engine: &TaffyTree<EngineCtx>,
        ids: &HashMap<NodeId, taffy::NodeId>,
        closed: &HashSet<NodeId>,
    ) -> Result<(HashMap<NodeId, Arc<LayoutState>>, HashMap<NodeId, f32>), Halt> {
        let tree = resolve.tree();
        let mut nested = HashMap::new();
        let mut baselines = HashMap::new();

        for (&id, &tid) in ids {
            let Some(node) = tree.get(id) else {
                continue;
            };
            let l = engine
                .layout(tid)
                .map_err(|e| Halt::Abort(PipelineError::from(e)))?;
            let padding = Edges::from(l.padding);
            let border = Edges::from(l.border);
            let content_w = (l.size.width - padding.horizontal() - border.horizontal()).max(0.0);
            let content_h = (l.size.height - padding.vertical() - border.vertical()).max(0.0);

            if closed.contains(&id) {
                let state = self.nested(
                    resolve,
                    id,
                    node,
                    SizeSpec::Exactly(content_w),
                    SizeSpec::Exactly(content_h),
                )?;
                nested.insert(id, state);
                continue;
            }

            if let Some(f) = &node.baseline
                && aligns_by_baseline(tree, node)
            {
                let f = f.clone();
                let b = catch_unwind(AssertUnwindSafe(|| f.baseline(content_w, content_h)))
                    .map_err(|p| Halt::Fail(id, ComponentError::from_panic(p)))?;
                baselines.insert(id, b + padding.top + border.top);
            }
        }
        Ok((nested, baselines))
    }

    fn measure_ctx(
        &mut self,
        resolve: &ResolveResult,
        ctx: EngineCtx,
        width: SizeSpec,
        height: SizeSpec,
    ) -> Result<Size, Halt> {
        let (id, deferred) = match ctx {
            EngineCtx::Measure(id) => (id, false),
            EngineCtx::Deferred(id) => (id, true),
        };
        let memo_key = (id, width.cache_key(), height.cache_key());
        if let Some(size) = self.memo.sizes.get(&memo_key) {
            return Ok(*size);
        }
        if self.cx.token.should_yield() {
            return Err(Halt::Yield);
        }
        let node = resolve.tree().get(id).ok_or(Halt::Abort(PipelineError::Engine(format!(
            "measured node {id:?} is not in the tree"
        ))))?;

        let (size, source) = if deferred {
            let state = self.nested(resolve, id, node, width, height)?;
            (state.size, MeasureSource::Nested)
        } else {
            self.measure_leaf(id, node, width, height)?
        };

        self.memo.sizes.insert(memo_key, size);
        self.memo.sources.insert(id, source);
        if !self.memo.replaced.contains_key(&id) {
            let records = self.memo.records.entry(id).or_default();
            let record = MeasureRecord {
                width_spec: width,
                height_spec: height,
                size,
            };
            if !records.contains(&record) {
                records.push(record);
            }
        }
        Ok(size)
    }

    fn measure_leaf(
        &mut self,
        id: NodeId,
        node: &Node,
        width: SizeSpec,
        height: SizeSpec,
    ) -> Result<(Size, MeasureSource), Halt> {
        if let Some(size) = self.cache.get(node.head().element.id(), width, height) {
            self.memo.stats.resolve_cache_hits += 1;
            return Ok((size, MeasureSource::ResolveCache));
        }
        let key = node.tail_key();
        if let Some(size) = self
            .cx
            .diff
            .as_ref()
            .and_then(|d| d.lookup(key, &node.tail().element, width, height))
        {
            log::trace!("{key}: diff hit for ({width}, {height})");
            *self.memo.stats.cache_hits.entry(key.clone()).or_default() += 1;
            return Ok((size, MeasureSource::DiffTree));
        }

        let Some(measure) = node.measure.clone() else {
            return Err(Halt::Abort(PipelineError::Engine(format!(
                "`{key}` has no measure function"
            ))));
        };
        let span = PerfSpan::begin(self.cx.logger.as_ref(), PerfEvent::Measure, self.cx.tree_id);
        span.annotate("key", key);
        self.memo.stats.measure_invocations += 1;
        *self.memo.stats.measured.entry(key.clone()).or_default() += 1;
        let size = catch_component(|| measure.measure(width, height))
            .map_err(|e| Halt::Fail(id, e))?;
        Ok((size, MeasureSource::Measured))
    }

    /// Resolves and lays out the content of a deferred (or replaced) node for
    /// the given specs.
    fn nested(
        &mut self,
        resolve: &ResolveResult,
        id: NodeId,
        node: &Node,
        width: SizeSpec,
        height: SizeSpec,
    ) -> Result<Arc<LayoutState>, Halt> {
        let memo_key = (id, width.cache_key(), height.cache_key());
        if let Some(state) = self.memo.nested.get(&memo_key) {
            return Ok(state.clone());
        }

        let (content, boundaries) = match (self.memo.replaced.get(&id), &node.kind) {
            (Some(r), _) => (r.element.clone(), r.boundaries.clone()),
            (None, NodeKind::Deferred(d)) => {
                let f = d.content.clone();
                let element = catch_component(|| Ok(f(width, height))).map_err(|e| Halt::Fail(id, e))?;
                (element, node.boundaries.clone())
            }
            (None, NodeKind::Standard) => {
                return Err(Halt::Abort(PipelineError::Engine(format!(
                    "`{}` has no nested content",
                    node.key()
                ))));
            }
        };

        self.memo.stats.nested_resolves += 1;
        let rcx = ResolveContext::builder(self.cx.tree_id, self.cx.version, resolve.tree_state().clone())
            .snapshot(resolve.state().clone())
            .accessibility(resolve.accessibility())
            .reuse_pure_subtrees(false)
            .tree_props(node.child_props.clone())
            .token(self.cx.token.clone())
            .logger(self.cx.logger.clone())
            .build();
        let result = match resolve_nested(&content, node.tail_key(), boundaries, rcx).map_err(Halt::Abort)? {
            ResolveOutcome::Complete(r) => r,
            ResolveOutcome::Partial(_) => return Err(Halt::Yield),
        };

        let lcx = LayoutContext::new(self.cx.version, Arc::new(result), width, height)
            .with_diff(self.cx.diff.clone())
            .with_token(self.cx.token.clone())
            .with_logger(self.cx.logger.clone());
        let state = match calculate(lcx).map_err(Halt::Abort)? {
            LayoutOutcome::Complete(s) => Arc::new(s),
            LayoutOutcome::Interrupted(_) => return Err(Halt::Yield),
        };
        self.memo.nested.insert(memo_key, state.clone());
        Ok(state)
    }

    /// Offers a measurement failure to the node's error boundaries. A
    /// fallback is laid out as the node's nested content on the next run.
    fn recover(&mut self, resolve: &ResolveResult, id: NodeId, err: ComponentError) -> Result<(), PipelineError> {
        let node = resolve
            .tree()
            .get(id)
            .ok_or(PipelineError::Engine(format!("failed node {id:?} is not in the tree")))?;
        let boundaries = match self.memo.replaced.get(&id) {
            Some(r) => r.boundaries.clone(),
            None => node.boundaries.clone(),
        };
        let key = node.tail_key();
        match boundaries.handle(key, &err) {
            Some((element, above)) => {
                log::debug!("measure of {key} failed ({err}); laying out fallback");
                self.memo.forget(id);
                self.memo.replaced.insert(
                    id,
                    Replacement {
                        element,
                        boundaries: above,
                    },
                );
                Ok(())
            }
            None => {
                log::warn!("unhandled measure failure at {key}: {err}");
                Err(PipelineError::Measure {
                    key: key.clone(),
                    source: err,
                })
            }
        }
    }

    fn assemble(
        mut self,
        resolve: &Arc<ResolveResult>,
        root: NodeId,
        out: EngineOutput,
    ) -> Result<LayoutState, PipelineError> {
        let tree = resolve.tree();
        let EngineOutput {
            engine,
            ids,
            baselines,
            nested,
        } = out;

        let root_tid = ids
            .get(&root)
            .copied()
            .ok_or(PipelineError::Engine("root node was not built".into()))?;
        let root_size = engine.layout(root_tid)?.size;
        let size = Size::new(root_size.width, root_size.height);
        let root_key = tree.get(root).map(|n| n.key().clone());

        let mut merged = Merged {
            outputs: vec![RenderOutput {
                id: ROOT_HOST_ID,
                key: root_key.clone().unwrap_or_else(|| resolve.root().type_name().into()),
                bounds: Rect::new(0.0, 0.0, size.width, size.height),
                unit: None,
            }],
            layouts: HashMap::new(),
            diff: DiffTree::default(),
            stats: std::mem::take(&mut self.memo.stats),
            handlers: Vec::new(),
            inits: Vec::new(),
            cached: Vec::new(),
            live: tree.keys().cloned().collect(),
        };
        merged.stats.reused_subtrees += resolve.stats().reused.len();

        let mut absolute: HashMap<NodeId, (f32, f32)> = HashMap::new();
        for id in tree.pre_order() {
            let (Some(&tid), Some(node)) = (ids.get(&id), tree.get(id)) else {
                continue;
            };
            let l = engine.layout(tid)?;
            let (px, py) = node
                .parent
                .and_then(|p| absolute.get(&p))
                .copied()
                .unwrap_or((0.0, 0.0));
            let (ax, ay) = (px + l.location.x, py + l.location.y);
            absolute.insert(id, (ax, ay));
            let bounds = Rect::new(ax, ay, l.size.width, l.size.height);
            let padding = Edges::from(l.padding);
            let border = Edges::from(l.border);

            let output = node.render_unit.as_ref().map(|unit| {
                let oid = output_id(node.tail_key());
                merged.outputs.push(RenderOutput {
                    id: oid,
                    key: node.tail_key().clone(),
                    bounds,
                    unit: Some(unit.clone()),
                });
                oid
            });

            let mut children = Vec::new();
            let kind = match nested.get(&id) {
                Some(state) => {
                    let (ox, oy) = (padding.left + border.left, padding.top + border.top);
                    if let Some(k) = state.root_key() {
                        children.push((k.clone(), ox, oy));
                    }
                    merged.nested(tree.keys(), state, ax + ox, ay + oy)?;
                    LayoutKind::Deferred
                }
                None => {
                    for c in node.children() {
                        if let (Some(ct), Some(cn)) = (ids.get(c), tree.get(*c)) {
                            let cl = engine.layout(*ct)?;
                            children.push((cn.key().clone(), cl.location.x, cl.location.y));
                        }
                    }
                    LayoutKind::Standard
                }
            };

            let layout = Arc::new(NodeLayout {
                key: node.key().clone(),
                tail_key: node.tail_key().clone(),
                kind,
                x: l.location.x,
                y: l.location.y,
                width: l.size.width,
                height: l.size.height,
                absolute: bounds,
                padding,
                border,
                baseline: baselines.get(&id).copied(),
                measure_source: self.memo.sources.get(&id).copied(),
                output,
                children,
            });
            for c in node.chain() {
                merged.layouts.insert(c.key.clone(), layout.clone());
            }
            merged.diff.insert(
                node.tail_key().clone(),
                DiffNode {
                    element: node.tail().element.clone(),
                    measurements: self.memo.records.remove(&id).unwrap_or_default(),
                    output,
                    bounds,
                },
            );
        }

        log::debug!(
            "laid out tree {} v{}: {}x{}, {} outputs, {} measured, {} diff hits",
            self.cx.tree_id,
            self.cx.version,
            size.width,
            size.height,
            merged.outputs.len(),
            merged.stats.measure_invocations,
            merged.stats.cache_hits.values().sum::<usize>()
        );

        Ok(LayoutState {
            tree_id: self.cx.tree_id,
            version: self.cx.version,
            resolve: resolve.clone(),
            width_spec: self.cx.width,
            height_spec: self.cx.height,
            size,
            root_key,
            outputs: merged.outputs,
            layouts: merged.layouts,
            diff: Arc::new(merged.diff),
            stats: merged.stats,
            nested_handlers: merged.handlers,
            nested_inits: merged.inits,
            nested_cached: merged.cached,
            live_keys: merged.live,
        })
    }

    fn empty(mut self) -> LayoutState {
        let size = Size::new(self.cx.width.resolve(0.0), self.cx.height.resolve(0.0));
        let resolve = self.cx.resolve.clone();
        LayoutState {
            tree_id: self.cx.tree_id,
            version: self.cx.version,
            width_spec: self.cx.width,
            height_spec: self.cx.height,
            size,
            root_key: None,
            outputs: vec![RenderOutput {
                id: ROOT_HOST_ID,
                key: resolve.root().type_name().into(),
                bounds: Rect::new(0.0, 0.0, size.width, size.height),
                unit: None,
            }],
            layouts: HashMap::new(),
            diff: Arc::new(DiffTree::default()),
            stats: std::mem::take(&mut self.memo.stats),
            nested_handlers: Vec::new(),
            nested_inits: Vec::new(),
            nested_cached: Vec::new(),
            live_keys: resolve.tree().keys().cloned().collect(),
            resolve,
        }
    }
}

/// Accumulates the outer tree's results and the nested trees inlined into it.
struct Merged {
    outputs: Vec<RenderOutput>,
    layouts: HashMap<GlobalKey, Arc<NodeLayout>>,
    diff: DiffTree,
    stats: LayoutStats,
    handlers: Vec<EventHandlerRecord>,
    inits: Vec<(StateKey, StateValue)>,
    cached: Vec<(StateKey, CachedEntry)>,
    live: HashSet<GlobalKey>,
}

impl Merged {
    /// Inlines a nested tree whose content box starts at (`dx`, `dy`).
    fn nested<'a>(
        &mut self,
        mut outer_keys: impl Iterator<Item = &'a GlobalKey>,
        state: &LayoutState,
        dx: f32,
        dy: f32,
    ) -> Result<(), PipelineError> {
        if let Some(key) = state
            .live_keys
            .iter()
            .find(|k| self.layouts.contains_key(*k))
            .or_else(|| outer_keys.find(|k| state.live_keys.contains(*k)))
        {
            return Err(PipelineError::DuplicateGlobalKey { key: key.clone() });
        }

        self.outputs.extend(state.outputs.iter().skip(1).map(|o| RenderOutput {
            bounds: o.bounds.offset(dx, dy),
            ..o.clone()
        }));

        let mut moved: HashMap<*const NodeLayout, Arc<NodeLayout>> = HashMap::new();
        for (key, layout) in &state.layouts {
            let shifted = moved
                .entry(Arc::as_ptr(layout))
                .or_insert_with(|| {
                    let mut l = (**layout).clone();
                    l.absolute = l.absolute.offset(dx, dy);
                    Arc::new(l)
                })
                .clone();
            self.layouts.insert(key.clone(), shifted);
        }

        self.diff.extend((*state.diff).clone());
        self.stats.merge(&state.stats);
        self.handlers.extend(state.resolve.handlers().iter().cloned());
        self.handlers.extend(state.nested_handlers.iter().cloned());
        self.inits.extend(state.resolve.initial_states().iter().cloned());
        self.inits.extend(state.nested_inits.iter().cloned());
        self.cached.extend(state.resolve.cached_values().iter().cloned());
        self.cached.extend(state.nested_cached.iter().cloned());
        self.live.extend(state.live_keys.iter().cloned());
        Ok(())
    }
}

/// Applies the root size specs to the root's own style.
fn root_style(style: &NodeStyle, width: SizeSpec, height: SizeSpec) -> NodeStyle {
    let mut s = style.clone();
    match width {
        SizeSpec::Exactly(v) => s.size.width = Length::Points(v),
        SizeSpec::AtMost(v) => s.max_size.width = Length::Points(v),
        SizeSpec::Unspecified => {}
    }
    match height {
        SizeSpec::Exactly(v) => s.size.height = Length::Points(v),
        SizeSpec::AtMost(v) => s.max_size.height = Length::Points(v),
        SizeSpec::Unspecified => {}
    }
    s
}

fn aligns_by_baseline(tree: &NodeTree, node: &Node) -> bool {
    node.style.align_self == Some(AlignItems::Baseline)
        || node
            .parent
            .and_then(|p| tree.get(p))
            .is_some_and(|p| p.style.align_items == Some(AlignItems::Baseline))
}
