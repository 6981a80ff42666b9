//! Shadow of the last committed layout, indexed by global key. A new layout
//! pass only reads it: an equivalent component measured under compatible
//! specs gets its previous size back without calling its measure function.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::component::Element;
use crate::geometry::{Rect, Size};
use crate::key::GlobalKey;
use crate::layout::OutputId;
use crate::size_spec::SizeSpec;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeasureRecord {
    pub width_spec: SizeSpec,
    pub height_spec: SizeSpec,
    pub size: Size,
}

#[derive(Clone, Debug)]
pub struct DiffNode {
    pub(crate) element: Element,
    pub(crate) measurements: SmallVec<[MeasureRecord; 2]>,
    pub(crate) output: Option<OutputId>,
    pub(crate) bounds: Rect,
}

impl DiffNode {
    /// The component that produced the measured node.
    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn measurements(&self) -> &[MeasureRecord] {
        &self.measurements
    }

    pub fn last_width_spec(&self) -> Option<SizeSpec> {
        self.measurements.last().map(|r| r.width_spec)
    }

    pub fn last_height_spec(&self) -> Option<SizeSpec> {
        self.measurements.last().map(|r| r.height_spec)
    }

    pub fn last_measured_size(&self) -> Option<Size> {
        self.measurements.last().map(|r| r.size)
    }

    pub fn output(&self) -> Option<OutputId> {
        self.output
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// A previous measurement that is still valid under the given specs.
    pub fn find_compatible(&self, width: SizeSpec, height: SizeSpec) -> Option<Size> {
        self.measurements
            .iter()
            .rev()
            .find(|r| {
                SizeSpec::is_compatible(r.width_spec, width, r.size.width)
                    && SizeSpec::is_compatible(r.height_spec, height, r.size.height)
            })
            .map(|r| r.size)
    }
}

#[derive(Clone, Debug, Default)]
pub struct DiffTree {
    nodes: HashMap<GlobalKey, DiffNode>,
}

impl DiffTree {
    pub fn get(&self, key: &GlobalKey) -> Option<&DiffNode> {
        self.nodes.get(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &GlobalKey> {
        self.nodes.keys()
    }

    pub(crate) fn insert(&mut self, key: GlobalKey, node: DiffNode) {
        self.nodes.insert(key, node);
    }

    pub(crate) fn extend(&mut self, other: DiffTree) {
        self.nodes.extend(other.nodes);
    }

    /// Cached size for `element` at `key` under the given specs, if the
    /// previous pass measured an equivalent component compatibly.
    pub(crate) fn lookup(
        &self,
        key: &GlobalKey,
        element: &Element,
        width: SizeSpec,
        height: SizeSpec,
    ) -> Option<Size> {
        let node = self.nodes.get(key)?;
        if !node.element.is_equivalent_to(element) {
            return None;
        }
        node.find_compatible(width, height)
    }
}
