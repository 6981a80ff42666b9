use std::collections::HashMap;

use crate::component::ComponentId;
use crate::geometry::Size;
use crate::size_spec::SizeSpec;

type Key = (ComponentId, (u8, u32), (u8, u32));

/// Measurements taken while resolving (through `RenderScope::measure`), handed
/// to the layout pass so it does not measure the same component again.
#[derive(Clone, Debug, Default)]
pub struct MeasuredResultCache {
    entries: HashMap<Key, Size>,
}

impl MeasuredResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ComponentId, width: SizeSpec, height: SizeSpec) -> Option<Size> {
        self.entries
            .get(&(id, width.cache_key(), height.cache_key()))
            .copied()
    }

    pub fn insert(&mut self, id: ComponentId, width: SizeSpec, height: SizeSpec, size: Size) {
        self.entries
            .insert((id, width.cache_key(), height.cache_key()), size);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
