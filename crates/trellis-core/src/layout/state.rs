use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::component::RenderUnit;
use crate::diff::DiffTree;
use crate::error::{PipelineError, TreeId};
use crate::events::EventHandlerRecord;
use crate::geometry::{Edges, Rect, Size};
use crate::key::GlobalKey;
use crate::resolve::ResolveResult;
use crate::size_spec::SizeSpec;
use crate::state::{CachedEntry, StateKey, StateValue};

/// Stable id of a mountable output. Derived from the global key of the
/// component that produced it, so it survives across generations.
pub type OutputId = u64;

/// The host the whole tree is mounted into.
pub const ROOT_HOST_ID: OutputId = 0;

pub(crate) fn output_id(key: &GlobalKey) -> OutputId {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    h.finish().max(1)
}

/// One entry of the mount list.
#[derive(Clone, Debug)]
pub struct RenderOutput {
    pub id: OutputId,
    pub key: GlobalKey,
    /// Absolute bounds within the root host.
    pub bounds: Rect,
    /// `None` only for the root host.
    pub unit: Option<RenderUnit>,
}

/// Where the size of a measured node came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeasureSource {
    /// Measured while resolving, through `RenderScope::measure`.
    ResolveCache,
    /// Compatible measurement of the previous committed layout.
    DiffTree,
    /// The node's measure function ran.
    Measured,
    /// Laid out as a nested tree.
    Nested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutKind {
    Standard,
    /// Has exactly one child: the root of its nested tree.
    Deferred,
}

#[derive(Clone, Debug)]
pub struct NodeLayout {
    /// Key of the first component of the node's chain.
    pub key: GlobalKey,
    pub tail_key: GlobalKey,
    pub kind: LayoutKind,
    /// Position relative to the parent's border box.
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub absolute: Rect,
    pub padding: Edges,
    pub border: Edges,
    pub baseline: Option<f32>,
    pub measure_source: Option<MeasureSource>,
    pub output: Option<OutputId>,
    pub(crate) children: Vec<(GlobalKey, f32, f32)>,
}

impl NodeLayout {
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn child_keys(&self) -> impl Iterator<Item = &GlobalKey> {
        self.children.iter().map(|(k, _, _)| k)
    }

    /// Position of the child at `index`, relative to this node.
    pub fn child_position(&self, index: usize) -> Result<(f32, f32), PipelineError> {
        let valid = match self.kind {
            LayoutKind::Deferred => index == 0,
            LayoutKind::Standard => true,
        };
        match self.children.get(index) {
            Some((_, x, y)) if valid => Ok((*x, *y)),
            _ => Err(PipelineError::InvalidChildIndex {
                key: self.key.clone(),
                index,
            }),
        }
    }

    pub fn content_size(&self) -> Size {
        Size::new(
            (self.width - self.padding.horizontal() - self.border.horizontal()).max(0.0),
            (self.height - self.padding.vertical() - self.border.vertical()).max(0.0),
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct LayoutStats {
    /// Calls into measure functions.
    pub measure_invocations: usize,
    pub measured: HashMap<GlobalKey, usize>,
    /// Measurements served by the previous layout's diff tree.
    pub cache_hits: HashMap<GlobalKey, usize>,
    pub resolve_cache_hits: usize,
    pub nested_resolves: usize,
    /// Layout engine runs, including reruns after error recovery.
    pub engine_passes: usize,
    pub reused_subtrees: usize,
}

impl LayoutStats {
    pub fn cache_hit_count(&self, key: &GlobalKey) -> usize {
        self.cache_hits.get(key).copied().unwrap_or(0)
    }

    pub fn measure_count(&self, key: &GlobalKey) -> usize {
        self.measured.get(key).copied().unwrap_or(0)
    }

    pub(crate) fn merge(&mut self, other: &LayoutStats) {
        self.measure_invocations += other.measure_invocations;
        for (k, n) in &other.measured {
            *self.measured.entry(k.clone()).or_default() += n;
        }
        for (k, n) in &other.cache_hits {
            *self.cache_hits.entry(k.clone()).or_default() += n;
        }
        self.resolve_cache_hits += other.resolve_cache_hits;
        self.nested_resolves += other.nested_resolves;
        self.engine_passes += other.engine_passes;
        self.reused_subtrees += other.reused_subtrees;
    }
}

/// Immutable result of a layout pass, ready to be mounted.
pub struct LayoutState {
    pub(crate) tree_id: TreeId,
    pub(crate) version: u64,
    pub(crate) resolve: Arc<ResolveResult>,
    pub(crate) width_spec: SizeSpec,
    pub(crate) height_spec: SizeSpec,
    pub(crate) size: Size,
    pub(crate) root_key: Option<GlobalKey>,
    pub(crate) outputs: Vec<RenderOutput>,
    pub(crate) layouts: HashMap<GlobalKey, Arc<NodeLayout>>,
    pub(crate) diff: Arc<DiffTree>,
    pub(crate) stats: LayoutStats,
    pub(crate) nested_handlers: Vec<EventHandlerRecord>,
    pub(crate) nested_inits: Vec<(StateKey, StateValue)>,
    pub(crate) nested_cached: Vec<(StateKey, CachedEntry)>,
    pub(crate) live_keys: HashSet<GlobalKey>,
}

impl LayoutState {
    pub fn tree_id(&self) -> TreeId {
        self.tree_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// The resolve this layout was computed from.
    pub fn resolve(&self) -> &Arc<ResolveResult> {
        &self.resolve
    }

    pub fn resolve_version(&self) -> u64 {
        self.resolve.version()
    }

    pub fn size_specs(&self) -> (SizeSpec, SizeSpec) {
        (self.width_spec, self.height_spec)
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn width(&self) -> f32 {
        self.size.width
    }

    pub fn height(&self) -> f32 {
        self.size.height
    }

    pub fn root_key(&self) -> Option<&GlobalKey> {
        self.root_key.as_ref()
    }

    /// Mount list: the root host first, then every render unit in tree
    /// order, nested trees inlined after their deferred node.
    pub fn outputs(&self) -> &[RenderOutput] {
        &self.outputs
    }

    pub fn output(&self, id: OutputId) -> Option<&RenderOutput> {
        self.outputs.iter().find(|o| o.id == id)
    }

    /// Layout of the node holding the component with `key`. Every key of a
    /// node's chain maps to the same layout.
    pub fn layout(&self, key: &GlobalKey) -> Option<&NodeLayout> {
        self.layouts.get(key).map(|l| &**l)
    }

    pub fn layouts(&self) -> impl Iterator<Item = (&GlobalKey, &NodeLayout)> {
        self.layouts.iter().map(|(k, l)| (k, &**l))
    }

    pub fn child_position(&self, key: &GlobalKey, index: usize) -> Result<(f32, f32), PipelineError> {
        self.layout(key)
            .ok_or(PipelineError::MissingContext("layout for key"))?
            .child_position(index)
    }

    /// Topmost output containing the point.
    pub fn output_at(&self, x: f32, y: f32) -> Option<&RenderOutput> {
        self.outputs
            .iter()
            .skip(1)
            .rev()
            .find(|o| o.bounds.contains(x, y))
    }

    /// Shadow tree used by the next pass to skip measurements.
    pub fn diff(&self) -> &Arc<DiffTree> {
        &self.diff
    }

    pub fn stats(&self) -> &LayoutStats {
        &self.stats
    }

    /// Handlers registered by components of nested trees.
    pub fn nested_handlers(&self) -> &[EventHandlerRecord] {
        &self.nested_handlers
    }

    pub fn nested_initial_states(&self) -> &[(StateKey, StateValue)] {
        &self.nested_inits
    }

    pub fn nested_cached_values(&self) -> &[(StateKey, CachedEntry)] {
        &self.nested_cached
    }

    /// Every component key in the tree, nested trees included.
    pub fn live_keys(&self) -> &HashSet<GlobalKey> {
        &self.live_keys
    }
}

impl std::fmt::Debug for LayoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutState")
            .field("tree_id", &self.tree_id)
            .field("version", &self.version)
            .field("resolve_version", &self.resolve.version())
            .field("size", &self.size)
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(kind: LayoutKind, children: usize) -> NodeLayout {
        NodeLayout {
            key: GlobalKey::from("Root"),
            tail_key: GlobalKey::from("Root"),
            kind,
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 40.0,
            absolute: Rect::new(0.0, 0.0, 100.0, 40.0),
            padding: Edges {
                left: 4.0,
                top: 4.0,
                right: 4.0,
                bottom: 4.0,
            },
            border: Edges::default(),
            baseline: None,
            measure_source: None,
            output: None,
            children: (0..children)
                .map(|i| (GlobalKey::new(format!("Root,C!{i}")), 4.0, 4.0 + i as f32 * 10.0))
                .collect(),
        }
    }

    #[test]
    fn deferred_nodes_only_expose_child_zero() {
        let l = layout(LayoutKind::Deferred, 1);
        assert_eq!(l.child_position(0).unwrap(), (4.0, 4.0));
        assert!(matches!(
            l.child_position(1),
            Err(PipelineError::InvalidChildIndex { index: 1, .. })
        ));
    }

    #[test]
    fn standard_nodes_bound_check_children() {
        let l = layout(LayoutKind::Standard, 2);
        assert_eq!(l.child_position(1).unwrap(), (4.0, 14.0));
        assert!(l.child_position(2).is_err());
        assert_eq!(l.content_size(), Size::new(92.0, 32.0));
    }

    #[test]
    fn output_ids_never_collide_with_the_root_host() {
        let a = output_id(&GlobalKey::from("Root,Text"));
        assert_ne!(a, ROOT_HOST_ID);
        assert_eq!(a, output_id(&GlobalKey::from("Root,Text")));
    }
}
