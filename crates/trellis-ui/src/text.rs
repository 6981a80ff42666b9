use std::sync::Arc;

use trellis_core::prelude::*;

use crate::modifier::{ContainerKind, Modifier};

/// Advance of one character as a fraction of the font size.
const CHAR_ADVANCE: f32 = 0.6;
const LINE_HEIGHT: f32 = 1.3;
const ASCENT: f32 = 0.8;

/// Inherited text defaults. Provide it with [`WithTextStyle`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextStyle {
    pub font_size: f32,
    pub color: u32,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: 16.0,
            color: 0xFFFF_FFFF,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextMetrics {
    pub width: f32,
    pub height: f32,
    pub lines: usize,
    pub line_height: f32,
}

/// Monospace-style estimate: every character has the same advance and text
/// wraps at character boundaries.
pub fn measure_text(
    text: &str,
    font_size: f32,
    max_width: Option<f32>,
    max_lines: Option<usize>,
) -> TextMetrics {
    let advance = font_size * CHAR_ADVANCE;
    let line_height = font_size * LINE_HEIGHT;
    let chars = text.chars().count();
    let natural = chars as f32 * advance;

    let per_line = match max_width {
        Some(w) if w < natural && advance > 0.0 => ((w / advance).floor() as usize).max(1),
        _ => chars.max(1),
    };
    let mut lines = chars.div_ceil(per_line).max(1);
    if let Some(max) = max_lines {
        lines = lines.min(max.max(1));
    }
    let width = if lines > 1 {
        per_line as f32 * advance
    } else {
        natural
    };
    TextMetrics {
        width,
        height: lines as f32 * line_height,
        lines,
        line_height,
    }
}

/// What the mount layer draws for a text node.
#[derive(Debug)]
pub struct TextContent {
    pub text: Arc<str>,
    pub style: TextStyle,
    pub max_lines: Option<usize>,
}

impl ContentAllocator for TextContent {
    fn content_type(&self) -> &'static str {
        "text"
    }

    fn pool_size(&self) -> usize {
        8
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Text {
    text: Arc<str>,
    font_size: Option<f32>,
    color: Option<u32>,
    max_lines: Option<usize>,
    modifier: Modifier,
}

pub fn Text(text: impl Into<Arc<str>>) -> Text {
    Text {
        text: text.into(),
        font_size: None,
        color: None,
        max_lines: None,
        modifier: Modifier::new(),
    }
}

impl Text {
    pub fn size(mut self, font_size: f32) -> Self {
        self.font_size = Some(font_size);
        self
    }

    pub fn color(mut self, argb: u32) -> Self {
        self.color = Some(argb);
        self
    }

    pub fn max_lines(mut self, n: usize) -> Self {
        self.max_lines = Some(n);
        self
    }

    pub fn single_line(self) -> Self {
        self.max_lines(1)
    }

    pub fn modifier(mut self, modifier: Modifier) -> Self {
        self.modifier = modifier;
        self
    }
}

impl Component for Text {
    fn render(&self, cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
        let inherited = cx.tree_prop::<TextStyle>().copied().unwrap_or_default();
        let style = TextStyle {
            font_size: self.font_size.unwrap_or(inherited.font_size),
            color: self.color.unwrap_or(inherited.color),
        };
        if !(style.font_size.is_finite() && style.font_size > 0.0) {
            return Err(ComponentError::new(format!(
                "invalid font size {}",
                style.font_size
            )));
        }

        let text = self.text.clone();
        let max_lines = self.max_lines;
        let font_size = style.font_size;
        let content = TextContent {
            text: self.text.clone(),
            style,
            max_lines,
        };
        Ok(Rendered::Primitive(
            Primitive::new(self.modifier.to_style(ContainerKind::Box))
                .measure(move |w: SizeSpec, h: SizeSpec| {
                    let m = measure_text(&text, font_size, w.size(), max_lines);
                    Ok(Size::new(w.resolve(m.width), h.resolve(m.height)))
                })
                .baseline(move |_w, _h| font_size * ((LINE_HEIGHT - 1.0) / 2.0 + ASCENT))
                .render_unit(RenderUnit::new(Arc::new(content))),
        ))
    }

    fn is_equivalent_to(&self, other: &dyn Component) -> bool {
        props_equal(self, other)
    }
}

/// Provides a [`TextStyle`] to everything below `child`.
#[derive(Clone)]
pub struct WithTextStyle {
    style: TextStyle,
    child: Element,
}

pub fn WithTextStyle(style: TextStyle, child: impl Into<Element>) -> WithTextStyle {
    WithTextStyle {
        style,
        child: child.into(),
    }
}

impl Component for WithTextStyle {
    fn render(&self, cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
        cx.provide(self.style);
        Ok(Rendered::Delegate(self.child.clone()))
    }

    fn is_equivalent_to(&self, other: &dyn Component) -> bool {
        other
            .as_any()
            .downcast_ref::<WithTextStyle>()
            .is_some_and(|o| o.style == self.style && o.child.is_equivalent_to(&self.child))
    }
}
