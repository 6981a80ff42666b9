//! # Node tree
//!
//! The output of a resolve: one [`Node`] per primitive (or deferred) component,
//! stored in an arena. A node remembers the chain of composite components that
//! rendered down to it, so every component in the chain can be found by its
//! global key and reused on the next pass.
//!
//! Parents own their children by id; the `parent` link is only used to walk
//! up during lookups.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use bitflags::bitflags;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;
use std::sync::Arc;

use crate::component::{BaselineFunction, Deferred, Element, MeasureFunction, RenderUnit};
use crate::error::{BoundaryChain, PipelineError};
use crate::events::EventHandlerRecord;
use crate::key::{GlobalKey, KeyRegistry};
use crate::reads::StateReads;
use crate::state::StateKey;
use crate::style::NodeStyle;
use crate::tree_props::TreePropContainer;

new_key_type! {
    pub struct NodeId;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u8 {
        /// Copied from the previous tree without rendering.
        const REUSED = 1 << 0;
        const HAS_MEASURE = 1 << 1;
        /// Produced by an error boundary in place of a failed subtree.
        const ERROR_FALLBACK = 1 << 2;
        const DEFERRED = 1 << 3;
    }
}

/// One component in a node's chain, with the state it read while rendering.
#[derive(Clone, Debug)]
pub struct ScopedComponent {
    pub key: GlobalKey,
    pub element: Element,
    pub state_reads: StateReads,
}

#[derive(Clone)]
pub enum NodeKind {
    Standard,
    /// Content is produced from the final size specs during layout.
    Deferred(Deferred),
}

#[derive(Clone)]
pub struct Node {
    pub(crate) chain: SmallVec<[ScopedComponent; 2]>,
    pub(crate) kind: NodeKind,
    pub(crate) style: NodeStyle,
    pub(crate) children: SmallVec<[NodeId; 4]>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) measure: Option<Arc<dyn MeasureFunction>>,
    pub(crate) baseline: Option<Arc<dyn BaselineFunction>>,
    pub(crate) render_unit: Option<RenderUnit>,
    pub(crate) handlers: SmallVec<[EventHandlerRecord; 1]>,
    /// Tree props the first component of the chain received.
    pub(crate) props: TreePropContainer,
    /// Tree props handed to children.
    pub(crate) child_props: TreePropContainer,
    pub(crate) boundaries: BoundaryChain,
    pub(crate) flags: NodeFlags,
}

impl Node {
    /// Key of the first component of the chain (the node's position).
    pub fn key(&self) -> &GlobalKey {
        &self.chain[0].key
    }

    /// Key of the component that produced the primitive.
    pub fn tail_key(&self) -> &GlobalKey {
        &self.tail().key
    }

    pub fn head(&self) -> &ScopedComponent {
        &self.chain[0]
    }

    pub fn tail(&self) -> &ScopedComponent {
        &self.chain[self.chain.len() - 1]
    }

    pub fn chain(&self) -> &[ScopedComponent] {
        &self.chain
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.kind, NodeKind::Deferred(_))
    }

    pub fn style(&self) -> &NodeStyle {
        &self.style
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn has_measure(&self) -> bool {
        self.measure.is_some()
    }

    pub fn render_unit(&self) -> Option<&RenderUnit> {
        self.render_unit.as_ref()
    }

    pub fn handlers(&self) -> &[EventHandlerRecord] {
        &self.handlers
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn reads(&self) -> impl Iterator<Item = &StateKey> {
        self.chain.iter().flat_map(|c| c.state_reads.iter())
    }
}

#[derive(Clone, Default)]
pub struct NodeTree {
    nodes: SlotMap<NodeId, Node>,
    root: Option<NodeId>,
    by_key: HashMap<GlobalKey, (NodeId, usize)>,
}

impl NodeTree {
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node holding the component with `key`, and that component's position
    /// in the node's chain.
    pub fn find(&self, key: &GlobalKey) -> Option<(NodeId, usize)> {
        self.by_key.get(key).copied()
    }

    pub fn node_by_key(&self, key: &GlobalKey) -> Option<&Node> {
        self.find(key).and_then(|(id, _)| self.nodes.get(id))
    }

    pub fn contains_key(&self, key: &GlobalKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Every component key in the tree.
    pub fn keys(&self) -> impl Iterator<Item = &GlobalKey> {
        self.by_key.keys()
    }

    /// Node ids in pre-order.
    pub fn pre_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(n) = self.nodes.get(id) {
                stack.extend(n.children.iter().rev().copied());
            }
        }
        out
    }

    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        let parent = node.parent;
        let chain_keys: SmallVec<[GlobalKey; 2]> = node.chain.iter().map(|c| c.key.clone()).collect();
        let id = self.nodes.insert(node);
        for (pos, key) in chain_keys.into_iter().enumerate() {
            self.by_key.insert(key, (id, pos));
        }
        match parent.and_then(|p| self.nodes.get_mut(p)) {
            Some(p) => p.children.push(id),
            None => {
                if self.root.is_none() {
                    self.root = Some(id);
                }
            }
        }
        id
    }

    /// Copies the subtree at `src` out of `from`, attaching it under `parent`.
    /// Every copied key except the subtree root's head (already claimed by
    /// the caller) is claimed in `keys`. Copied nodes answer to the error
    /// boundaries of their own subtree first, then to `boundaries`.
    pub(crate) fn copy_subtree(
        &mut self,
        from: &NodeTree,
        src: NodeId,
        parent: Option<NodeId>,
        boundaries: &BoundaryChain,
        keys: &mut KeyRegistry,
    ) -> Result<NodeId, PipelineError> {
        let mut top = None;
        let mut inside: HashSet<GlobalKey> = HashSet::new();
        let mut stack = vec![(src, parent, true)];
        while let Some((sid, new_parent, is_top)) = stack.pop() {
            let Some(orig) = from.nodes.get(sid) else {
                continue;
            };
            for (pos, c) in orig.chain.iter().enumerate() {
                if !(is_top && pos == 0) {
                    keys.claim(&c.key)?;
                }
                inside.insert(c.key.clone());
            }
            let mut node = orig.clone();
            node.boundaries = orig.boundaries.rebase(boundaries, |k| inside.contains(k));
            node.parent = new_parent;
            node.children.clear();
            node.flags |= NodeFlags::REUSED;
            let id = self.insert(node);
            if is_top {
                top = Some(id);
            }
            stack.extend(orig.children.iter().rev().map(|c| (*c, Some(id), false)));
        }
        top.ok_or(PipelineError::Engine(format!("missing node {src:?} in previous tree")))
    }

    /// Whether any component in the subtree read a state key in `dirty`.
    pub(crate) fn subtree_reads_any(&self, id: NodeId, dirty: &HashSet<StateKey>) -> bool {
        if dirty.is_empty() {
            return false;
        }
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let Some(n) = self.nodes.get(id) else {
                continue;
            };
            if n.reads().any(|k| dirty.contains(k)) {
                return true;
            }
            stack.extend(n.children.iter().copied());
        }
        false
    }

    /// Indented outline of the tree, one node per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let mut stack: Vec<(NodeId, usize)> = self.root.map(|r| (r, 0)).into_iter().collect();
        while let Some((id, depth)) = stack.pop() {
            let Some(n) = self.nodes.get(id) else {
                continue;
            };
            let chain: Vec<&str> = n.chain.iter().map(|c| c.element.type_name()).collect();
            let _ = writeln!(
                out,
                "{:indent$}{} [{}]{}",
                "",
                n.key(),
                chain.join(" > "),
                if n.flags.is_empty() {
                    String::new()
                } else {
                    format!(" {:?}", n.flags)
                },
                indent = depth * 2
            );
            stack.extend(n.children.iter().rev().map(|c| (*c, depth + 1)));
        }
        out
    }

    /// Same shape, same keys, same component types in every chain.
    pub fn is_structurally_equivalent(&self, other: &NodeTree) -> bool {
        let a = self.pre_order();
        let b = other.pre_order();
        a.len() == b.len()
            && a.iter().zip(&b).all(|(x, y)| {
                match (self.nodes.get(*x), other.nodes.get(*y)) {
                    (Some(x), Some(y)) => {
                        x.children.len() == y.children.len()
                            && x.chain.len() == y.chain.len()
                            && x.chain.iter().zip(&y.chain).all(|(p, q)| {
                                p.key == q.key && p.element.type_name() == q.element.type_name()
                            })
                    }
                    _ => false,
                }
            })
    }
}

impl std::fmt::Debug for NodeTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}
