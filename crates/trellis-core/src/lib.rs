//! # Trellis core
//!
//! Trellis turns a tree of immutable components into a mountable layout in two
//! phases:
//!
//! - **resolve** expands composite components into a [`NodeTree`] of
//!   primitives, recording state reads, hook values and event handlers;
//! - **layout** runs the resolved tree through the layout engine (taffy) and
//!   produces an immutable, versioned [`LayoutState`].
//!
//! Both phases are cooperative: they poll an [`InterruptToken`] at every
//! component boundary and hand back a partial result that can be resumed
//! later, on another thread if need be.
//!
//! ## Components
//!
//! ```rust
//! use trellis_core::prelude::*;
//!
//! struct Label(String);
//!
//! impl Component for Label {
//!     fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
//!         let len = self.0.len() as f32;
//!         Ok(Rendered::Primitive(Primitive::new(NodeStyle::default()).measure(
//!             move |w: SizeSpec, h: SizeSpec| Ok(Size::new(w.resolve(len * 8.0), h.resolve(16.0))),
//!         )))
//!     }
//! }
//!
//! let tree = RenderTree::new(TreeConfig::default());
//! tree.set_root(Element::new(Label("hello".into())));
//! tree.set_size_specs(SizeSpec::AtMost(200.0), SizeSpec::Unspecified);
//! let layout = tree.render_sync().unwrap();
//! assert_eq!(layout.layout().unwrap().width(), 40.0);
//! ```
//!
//! ## State
//!
//! `RenderScope::use_state` returns a [`StateHandle`]. Updates are queued on
//! the tree's [`TreeState`] and become visible to the next resolve only; a
//! render never observes its own writes.
//!
//! ## Generations
//!
//! Every resolve and layout gets a version from the tree's [`VersionClock`].
//! [`RenderTree`] commits a result only if it is newer than what is already
//! committed, so a slow background pass can never overwrite a newer one.

pub mod cache;
pub mod component;
pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod events;
pub mod future;
pub mod geometry;
pub mod key;
pub mod layout;
pub mod node;
pub mod perf;
pub mod prelude;
mod reads;
pub mod resolve;
pub mod scope;
pub mod size_spec;
pub mod state;
pub mod style;
pub mod tree;
pub mod tree_props;

pub use cache::MeasuredResultCache;
pub use component::{
    Component, ComponentId, ContentAllocator, Deferred, Element, Primitive, RenderUnit, Rendered,
    props_equal,
};
pub use config::TreeConfig;
pub use context::{InterruptToken, LayoutContext, ResolveContext};
pub use diff::{DiffNode, DiffTree};
pub use error::{ComponentError, ErrorContext, PipelineError, TreeId};
pub use events::{EventHandler, EventHandlersController};
pub use future::{
    Executor, FutureResult, InlineExecutor, RunMode, ThreadExecutor, TreeFuture,
    TreeFutureCoordinator, TreeWork, VersionClock,
};
pub use geometry::{Edges, Rect, Size};
pub use key::GlobalKey;
pub use layout::{LayoutOutcome, LayoutState, LayoutWork, NodeLayout, calculate};
pub use node::{Node, NodeTree};
pub use perf::{PerfEvent, PerfLogger, PerfMarker};
pub use resolve::{ResolveOutcome, ResolveResult, ResolveWork, resolve};
pub use scope::RenderScope;
pub use size_spec::SizeSpec;
pub use state::{StateHandle, StateKey, StateUpdater, TreeState, UpdateMode};
pub use style::{Axes, Length, NodeStyle, Sides};
pub use tree::{RenderOutcome, RenderTree, RenderTreeBuilder};
pub use tree_props::TreePropContainer;

/// Re-exported for the engine's style enums and geometry.
pub use taffy;
