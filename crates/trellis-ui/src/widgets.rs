use std::fmt;
use std::sync::Arc;

use trellis_core::component::DeferredContent;
use trellis_core::prelude::*;

use crate::IntoChildren;
use crate::modifier::{ContainerKind, Modifier, PaddingValues};
use crate::text::Text;

/// Flex container. Build one with [`Box`], [`Row`] or [`Column`].
#[derive(Clone)]
pub struct Container {
    kind: ContainerKind,
    modifier: Modifier,
    children: Vec<Element>,
}

pub fn Box(modifier: Modifier) -> Container {
    Container::new(ContainerKind::Box, modifier)
}

pub fn Row(modifier: Modifier) -> Container {
    Container::new(ContainerKind::Row, modifier)
}

pub fn Column(modifier: Modifier) -> Container {
    Container::new(ContainerKind::Column, modifier)
}

pub fn Spacer() -> Container {
    Box(Modifier::new().flex_grow(1.0))
}

impl Container {
    fn new(kind: ContainerKind, modifier: Modifier) -> Self {
        Self {
            kind,
            modifier,
            children: Vec::new(),
        }
    }

    pub fn child(mut self, children: impl IntoChildren) -> Self {
        self.children.extend(children.into_children());
        self
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }
}

impl Component for Container {
    fn type_name(&self) -> &'static str {
        match self.kind {
            ContainerKind::Box => "Box",
            ContainerKind::Row => "Row",
            ContainerKind::Column => "Column",
        }
    }

    fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
        Ok(Rendered::Primitive(
            Primitive::new(self.modifier.to_style(self.kind)).children(self.children.iter().cloned()),
        ))
    }

    fn is_equivalent_to(&self, other: &dyn Component) -> bool {
        let Some(o) = other.as_any().downcast_ref::<Container>() else {
            return false;
        };
        o.kind == self.kind
            && o.modifier == self.modifier
            && o.children.len() == self.children.len()
            && o.children
                .iter()
                .zip(&self.children)
                .all(|(a, b)| a.is_equivalent_to(b))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFit {
    Contain,
    Cover,
    Fill,
}

#[derive(Debug)]
pub struct ImageContent {
    pub source: Arc<str>,
    pub fit: ImageFit,
}

impl ContentAllocator for ImageContent {
    fn content_type(&self) -> &'static str {
        "image"
    }
}

/// A bitmap with a known intrinsic size. Without an explicit size it is
/// scaled down to fit the constraints, keeping its aspect ratio.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    source: Arc<str>,
    intrinsic: Size,
    fit: ImageFit,
    modifier: Modifier,
}

pub fn Image(modifier: Modifier, source: impl Into<Arc<str>>, intrinsic: Size) -> Image {
    Image {
        source: source.into(),
        intrinsic,
        fit: ImageFit::Contain,
        modifier,
    }
}

impl Image {
    pub fn fit(mut self, fit: ImageFit) -> Self {
        self.fit = fit;
        self
    }
}

fn fit_within(intrinsic: Size, w: SizeSpec, h: SizeSpec) -> Size {
    let scale_w = w.size().map_or(1.0, |m| (m / intrinsic.width).min(1.0));
    let scale_h = h.size().map_or(1.0, |m| (m / intrinsic.height).min(1.0));
    let scale = match (w, h) {
        (SizeSpec::Unspecified, SizeSpec::Unspecified) => 1.0,
        _ => scale_w.min(scale_h),
    };
    let scale = if scale.is_finite() { scale } else { 0.0 };
    Size::new(
        w.resolve(intrinsic.width * scale),
        h.resolve(intrinsic.height * scale),
    )
}

impl Component for Image {
    fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
        let intrinsic = self.intrinsic;
        if intrinsic.width <= 0.0 || intrinsic.height <= 0.0 {
            return Err(ComponentError::new(format!(
                "image `{}` has no intrinsic size",
                self.source
            )));
        }
        Ok(Rendered::Primitive(
            Primitive::new(self.modifier.to_style(ContainerKind::Box))
                .measure(move |w: SizeSpec, h: SizeSpec| Ok(fit_within(intrinsic, w, h)))
                .render_unit(RenderUnit::new(Arc::new(ImageContent {
                    source: self.source.clone(),
                    fit: self.fit,
                }))),
        ))
    }

    fn is_equivalent_to(&self, other: &dyn Component) -> bool {
        props_equal(self, other)
    }
}

/// A node whose content is picked once its size is known. `content` gets the
/// exact specs of the node's content box.
#[derive(Clone)]
pub struct Responsive {
    modifier: Modifier,
    content: DeferredContent,
}

pub fn Responsive<E: Into<Element>>(
    modifier: Modifier,
    content: impl Fn(SizeSpec, SizeSpec) -> E + Send + Sync + 'static,
) -> Responsive {
    Responsive {
        modifier,
        content: Arc::new(move |w, h| Into::<Element>::into(content(w, h))),
    }
}

impl Component for Responsive {
    fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
        let content = self.content.clone();
        Ok(Rendered::Deferred(Deferred::new(
            self.modifier.to_style(ContainerKind::Box),
            move |w, h| content(w, h),
        )))
    }
}

/// Event delivered to a button's click handler.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Click {
    pub x: f32,
    pub y: f32,
}

/// Mounted content of a button: the mount layer dispatches [`Click`] events
/// to `on_click` through the tree.
#[derive(Debug)]
pub struct ButtonContent {
    pub on_click: EventHandler,
}

impl ContentAllocator for ButtonContent {
    fn content_type(&self) -> &'static str {
        "button"
    }
}

#[derive(Clone)]
pub struct Button {
    label: Arc<str>,
    modifier: Modifier,
    on_click: Arc<dyn Fn(&Click) + Send + Sync>,
}

pub fn Button(
    label: impl Into<Arc<str>>,
    on_click: impl Fn(&Click) + Send + Sync + 'static,
) -> Button {
    Button {
        label: label.into(),
        modifier: Modifier::new().padding_values(PaddingValues {
            left: 12.0,
            right: 12.0,
            top: 6.0,
            bottom: 6.0,
        }),
        on_click: Arc::new(on_click),
    }
}

impl Button {
    pub fn modifier(mut self, modifier: Modifier) -> Self {
        self.modifier = modifier;
        self
    }
}

impl Component for Button {
    fn render(&self, cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
        let on_click = self.on_click.clone();
        let handler = cx.event_handler("click", move |e: &Click| on_click(e));
        Ok(Rendered::Primitive(
            Primitive::new(self.modifier.to_style(ContainerKind::Row))
                .child(Element::new(Text(self.label.clone())))
                .render_unit(RenderUnit::new(Arc::new(ButtonContent { on_click: handler }))),
        ))
    }

    fn is_pure(&self) -> bool {
        // The click callback is not comparable.
        false
    }
}

impl fmt::Debug for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Button")
            .field("label", &self.label)
            .field("modifier", &self.modifier)
            .finish()
    }
}

type FallbackFn = Arc<dyn Fn(&ErrorContext, &ComponentError) -> Option<Element> + Send + Sync>;

/// Catches render and measure failures below `child`. `fallback` may return a
/// replacement for the failed component; `None` passes the failure upwards.
#[derive(Clone)]
pub struct ErrorBoundary {
    child: Element,
    fallback: FallbackFn,
}

pub fn ErrorBoundary<E: Into<Element>>(
    child: impl Into<Element>,
    fallback: impl Fn(&ErrorContext, &ComponentError) -> Option<E> + Send + Sync + 'static,
) -> ErrorBoundary {
    ErrorBoundary {
        child: child.into(),
        fallback: Arc::new(move |cx: &ErrorContext, err: &ComponentError| {
            fallback(cx, err).map(Into::<Element>::into)
        }),
    }
}

impl Component for ErrorBoundary {
    fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
        Ok(Rendered::Delegate(self.child.clone()))
    }

    fn is_error_boundary(&self) -> bool {
        true
    }

    fn on_error(&self, cx: &ErrorContext, error: &ComponentError) -> Option<Element> {
        log::debug!("boundary {} caught {}: {error}", cx.boundary_key, cx.failed_key);
        (self.fallback)(cx, error)
    }

    fn is_pure(&self) -> bool {
        false
    }
}
