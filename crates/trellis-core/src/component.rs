//! # Components
//!
//! A [`Component`] is an immutable description of what to render. Its
//! [`Component::render`] returns one of:
//!
//! - [`Rendered::Delegate`]: a composite: "render this other element instead".
//! - [`Rendered::Primitive`]: a node the layout engine sees: style, ordered
//!   children, and optionally a measure function and a render unit to mount.
//! - [`Rendered::Deferred`]: a node whose content depends on the size specs it
//!   receives, resolved as a nested tree during layout.
//! - [`Rendered::Empty`]: nothing.
//!
//! Components are placed in a tree as [`Element`]s, which add an explicit key
//! and a process-unique [`ComponentId`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ComponentError, ErrorContext};
use crate::geometry::Size;
use crate::scope::RenderScope;
use crate::size_spec::SizeSpec;
use crate::style::NodeStyle;

pub type ComponentId = u64;

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub trait Component: AsAny + Send + Sync + 'static {
    /// Short type name used to build global keys.
    fn type_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    fn render(&self, cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError>;

    /// Same type and equal props. Equivalent pure components may have their
    /// previous output reused without rendering.
    fn is_equivalent_to(&self, _other: &dyn Component) -> bool {
        false
    }

    fn is_pure(&self) -> bool {
        true
    }

    /// Makes this component an error boundary for its descendants.
    fn is_error_boundary(&self) -> bool {
        false
    }

    /// Called for failures below an error boundary. Returning an element
    /// substitutes it for the failed subtree; `None` passes the error on.
    fn on_error(&self, _cx: &ErrorContext, _error: &ComponentError) -> Option<Element> {
        None
    }
}

/// `is_equivalent_to` for components whose props are their `PartialEq`.
pub fn props_equal<T: Component + PartialEq>(this: &T, other: &dyn Component) -> bool {
    other
        .as_any()
        .downcast_ref::<T>()
        .is_some_and(|other| this == other)
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A component placed in the tree.
#[derive(Clone)]
pub struct Element {
    id: ComponentId,
    component: Arc<dyn Component>,
    key: Option<Arc<str>>,
}

impl Element {
    pub fn new(component: impl Component) -> Self {
        Self::from_arc(Arc::new(component))
    }

    pub fn from_arc(component: Arc<dyn Component>) -> Self {
        Self {
            id: NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed),
            component,
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn component(&self) -> &dyn Component {
        &*self.component
    }

    pub fn type_name(&self) -> &'static str {
        self.component.type_name()
    }

    pub fn is_equivalent_to(&self, other: &Element) -> bool {
        if self.id == other.id {
            return true;
        }
        self.key == other.key
            && (Arc::ptr_eq(&self.component, &other.component)
                || self.component().is_equivalent_to(other.component()))
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("type", &self.type_name())
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}

pub enum Rendered {
    Empty,
    Delegate(Element),
    Primitive(Primitive),
    Deferred(Deferred),
}

impl fmt::Debug for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rendered::Empty => write!(f, "Empty"),
            Rendered::Delegate(e) => f.debug_tuple("Delegate").field(e).finish(),
            Rendered::Primitive(p) => f
                .debug_struct("Primitive")
                .field("children", &p.children.len())
                .field("measure", &p.measure.is_some())
                .field("render_unit", &p.render_unit)
                .finish(),
            Rendered::Deferred(_) => write!(f, "Deferred"),
        }
    }
}

pub trait MeasureFunction: Send + Sync {
    fn measure(&self, width: SizeSpec, height: SizeSpec) -> Result<Size, ComponentError>;
}

impl<F> MeasureFunction for F
where
    F: Fn(SizeSpec, SizeSpec) -> Result<Size, ComponentError> + Send + Sync,
{
    fn measure(&self, width: SizeSpec, height: SizeSpec) -> Result<Size, ComponentError> {
        self(width, height)
    }
}

pub trait BaselineFunction: Send + Sync {
    fn baseline(&self, width: f32, height: f32) -> f32;
}

impl<F> BaselineFunction for F
where
    F: Fn(f32, f32) -> f32 + Send + Sync,
{
    fn baseline(&self, width: f32, height: f32) -> f32 {
        self(width, height)
    }
}

/// Creates the platform content for a render unit; implemented by the mount
/// layer. Mount code recovers the concrete type through `as_any`.
pub trait ContentAllocator: AsAny + fmt::Debug + Send + Sync {
    fn content_type(&self) -> &'static str;

    fn pool_size(&self) -> usize {
        3
    }
}

/// What the mount layer should put on screen for a node.
#[derive(Clone)]
pub struct RenderUnit {
    pub content: Arc<dyn ContentAllocator>,
    pub layout_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl RenderUnit {
    pub fn new(content: Arc<dyn ContentAllocator>) -> Self {
        Self {
            content,
            layout_data: None,
        }
    }

    pub fn with_layout_data(mut self, data: impl Any + Send + Sync) -> Self {
        self.layout_data = Some(Arc::new(data));
        self
    }

    pub fn content_as<T: ContentAllocator + 'static>(&self) -> Option<&T> {
        (*self.content).as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for RenderUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderUnit")
            .field("content", &self.content.content_type())
            .field("layout_data", &self.layout_data.is_some())
            .finish()
    }
}

pub struct Primitive {
    pub style: NodeStyle,
    pub children: Vec<Element>,
    pub measure: Option<Arc<dyn MeasureFunction>>,
    pub baseline: Option<Arc<dyn BaselineFunction>>,
    pub render_unit: Option<RenderUnit>,
}

impl Primitive {
    pub fn new(style: NodeStyle) -> Self {
        Self {
            style,
            children: Vec::new(),
            measure: None,
            baseline: None,
            render_unit: None,
        }
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn measure(
        mut self,
        f: impl Fn(SizeSpec, SizeSpec) -> Result<Size, ComponentError> + Send + Sync + 'static,
    ) -> Self {
        self.measure = Some(Arc::new(f));
        self
    }

    /// Like [`Primitive::measure`] for a shared measure implementation.
    pub fn measure_with(mut self, f: Arc<dyn MeasureFunction>) -> Self {
        self.measure = Some(f);
        self
    }

    pub fn baseline(mut self, f: impl Fn(f32, f32) -> f32 + Send + Sync + 'static) -> Self {
        self.baseline = Some(Arc::new(f));
        self
    }

    pub fn render_unit(mut self, unit: RenderUnit) -> Self {
        self.render_unit = Some(unit);
        self
    }
}

pub type DeferredContent = Arc<dyn Fn(SizeSpec, SizeSpec) -> Element + Send + Sync>;

/// A node whose single child is produced from the size specs it is measured
/// with.
#[derive(Clone)]
pub struct Deferred {
    pub style: NodeStyle,
    pub content: DeferredContent,
}

impl Deferred {
    pub fn new(
        style: NodeStyle,
        content: impl Fn(SizeSpec, SizeSpec) -> Element + Send + Sync + 'static,
    ) -> Self {
        Self {
            style,
            content: Arc::new(content),
        }
    }

    /// A deferred node that always produces `element`.
    pub(crate) fn fixed(style: NodeStyle, element: Element) -> Self {
        Self::new(style, move |_, _| element.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(PartialEq)]
    struct Label {
        text: String,
    }

    impl Component for Label {
        fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            Ok(Rendered::Empty)
        }

        fn is_equivalent_to(&self, other: &dyn Component) -> bool {
            props_equal(self, other)
        }
    }

    #[test]
    fn type_name_is_shortened() {
        let e = Element::new(Label { text: "a".into() });
        assert_eq!(e.type_name(), "Label");
    }

    #[test]
    fn equivalence_follows_props_and_keys() {
        let a = Element::new(Label { text: "a".into() });
        let a2 = Element::new(Label { text: "a".into() });
        let b = Element::new(Label { text: "b".into() });
        assert_ne!(a.id(), a2.id());
        assert!(a.is_equivalent_to(&a2));
        assert!(!a.is_equivalent_to(&b));
        assert!(!a.clone().with_key("x").is_equivalent_to(&a2));
        assert!(a.is_equivalent_to(&a.clone()));
    }
}
