pub use crate::component::{
    AsAny, Component, ContentAllocator, Deferred, Element, Primitive, RenderUnit, Rendered, props_equal,
};
pub use crate::config::TreeConfig;
pub use crate::error::{ComponentError, ErrorContext, PipelineError};
pub use crate::events::EventHandler;
pub use crate::geometry::{Edges, Rect, Size};
pub use crate::key::GlobalKey;
pub use crate::layout::LayoutState;
pub use crate::scope::RenderScope;
pub use crate::size_spec::SizeSpec;
pub use crate::state::{StateHandle, StateUpdater, UpdateMode};
pub use crate::tree::{RenderOutcome, RenderTree};
pub use crate::tree_props::TreePropContainer;
pub use crate::style::{
    AlignContent, AlignItems, AlignSelf, Axes, FlexDirection, FlexWrap, JustifyContent, Length,
    NodeStyle, Sides,
};
