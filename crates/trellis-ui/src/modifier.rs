use taffy::style::{Display, Position};
use taffy::{AlignContent, AlignItems, AlignSelf, FlexDirection, FlexWrap, JustifyContent};

use trellis_core::Size;
use trellis_core::style::{Axes, Length, NodeStyle, Sides};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PaddingValues {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionType {
    Relative,
    Absolute,
}

/// How a container lays out its children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    Box,
    Row,
    Column,
}

/// Layout parameters for a node, applied on top of the container defaults.
/// Props of a component, so it compares by value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Modifier {
    pub size: Option<Size>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub fill_max: bool,
    pub fill_max_w: bool,
    pub fill_max_h: bool,
    pub padding: Option<f32>,
    pub padding_values: Option<PaddingValues>,
    pub border_width: Option<f32>,
    pub min_width: Option<f32>,
    pub min_height: Option<f32>,
    pub max_width: Option<f32>,
    pub max_height: Option<f32>,
    pub flex_grow: Option<f32>,
    pub flex_shrink: Option<f32>,
    pub flex_basis: Option<f32>,
    pub flex_wrap: Option<FlexWrap>,
    pub align_self: Option<AlignSelf>,
    pub justify_content: Option<JustifyContent>,
    pub align_items_container: Option<AlignItems>,
    pub align_content: Option<AlignContent>,
    pub gap: Option<f32>,
    pub position_type: Option<PositionType>,
    pub offset_left: Option<f32>,
    pub offset_right: Option<f32>,
    pub offset_top: Option<f32>,
    pub offset_bottom: Option<f32>,
    pub margin_left: Option<f32>,
    pub margin_right: Option<f32>,
    pub margin_top: Option<f32>,
    pub margin_bottom: Option<f32>,
    pub aspect_ratio: Option<f32>,
}

impl Modifier {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn size(mut self, w: f32, h: f32) -> Self {
        self.size = Some(Size::new(w, h));
        self
    }
    pub fn width(mut self, w: f32) -> Self {
        self.width = Some(w);
        self
    }
    pub fn height(mut self, h: f32) -> Self {
        self.height = Some(h);
        self
    }
    pub fn fill_max_size(mut self) -> Self {
        self.fill_max = true;
        self
    }
    pub fn fill_max_width(mut self) -> Self {
        self.fill_max_w = true;
        self
    }
    pub fn fill_max_height(mut self) -> Self {
        self.fill_max_h = true;
        self
    }
    pub fn padding(mut self, v: f32) -> Self {
        self.padding = Some(v);
        self
    }
    pub fn padding_values(mut self, padding: PaddingValues) -> Self {
        self.padding_values = Some(padding);
        self
    }
    pub fn border(mut self, width: f32) -> Self {
        self.border_width = Some(width);
        self
    }
    pub fn min_size(mut self, w: f32, h: f32) -> Self {
        self.min_width = Some(w);
        self.min_height = Some(h);
        self
    }
    pub fn max_size(mut self, w: f32, h: f32) -> Self {
        self.max_width = Some(w);
        self.max_height = Some(h);
        self
    }
    pub fn min_width(mut self, w: f32) -> Self {
        self.min_width = Some(w);
        self
    }
    pub fn min_height(mut self, h: f32) -> Self {
        self.min_height = Some(h);
        self
    }
    pub fn max_width(mut self, w: f32) -> Self {
        self.max_width = Some(w);
        self
    }
    pub fn max_height(mut self, h: f32) -> Self {
        self.max_height = Some(h);
        self
    }
    pub fn flex_grow(mut self, v: f32) -> Self {
        self.flex_grow = Some(v);
        self
    }
    pub fn flex_shrink(mut self, v: f32) -> Self {
        self.flex_shrink = Some(v);
        self
    }
    pub fn flex_basis(mut self, v: f32) -> Self {
        self.flex_basis = Some(v);
        self
    }
    pub fn flex_wrap(mut self, w: FlexWrap) -> Self {
        self.flex_wrap = Some(w);
        self
    }
    pub fn align_self(mut self, a: AlignSelf) -> Self {
        self.align_self = Some(a);
        self
    }
    pub fn align_self_center(mut self) -> Self {
        self.align_self = Some(AlignSelf::Center);
        self
    }
    /// Lines this node up with its siblings' first baselines.
    pub fn align_self_baseline(mut self) -> Self {
        self.align_self = Some(AlignSelf::Baseline);
        self
    }
    pub fn justify_content(mut self, j: JustifyContent) -> Self {
        self.justify_content = Some(j);
        self
    }
    pub fn align_items(mut self, a: AlignItems) -> Self {
        self.align_items_container = Some(a);
        self
    }
    pub fn align_content(mut self, a: AlignContent) -> Self {
        self.align_content = Some(a);
        self
    }
    pub fn gap(mut self, v: f32) -> Self {
        self.gap = Some(v);
        self
    }
    pub fn absolute(mut self) -> Self {
        self.position_type = Some(PositionType::Absolute);
        self
    }
    pub fn offset(
        mut self,
        left: Option<f32>,
        top: Option<f32>,
        right: Option<f32>,
        bottom: Option<f32>,
    ) -> Self {
        self.offset_left = left;
        self.offset_top = top;
        self.offset_right = right;
        self.offset_bottom = bottom;
        self
    }
    pub fn margin(mut self, v: f32) -> Self {
        self.margin_left = Some(v);
        self.margin_right = Some(v);
        self.margin_top = Some(v);
        self.margin_bottom = Some(v);
        self
    }
    pub fn margin_horizontal(mut self, v: f32) -> Self {
        self.margin_left = Some(v);
        self.margin_right = Some(v);
        self
    }
    pub fn margin_vertical(mut self, v: f32) -> Self {
        self.margin_top = Some(v);
        self.margin_bottom = Some(v);
        self
    }
    pub fn aspect_ratio(mut self, ratio: f32) -> Self {
        self.aspect_ratio = Some(ratio);
        self
    }

    /// Node style for a container of `kind` carrying this modifier.
    pub fn to_style(&self, kind: ContainerKind) -> NodeStyle {
        let mut s = NodeStyle {
            display: Display::Flex,
            flex_direction: match kind {
                ContainerKind::Row => FlexDirection::Row,
                ContainerKind::Column | ContainerKind::Box => FlexDirection::Column,
            },
            align_items: Some(match kind {
                ContainerKind::Box => AlignItems::FlexStart,
                ContainerKind::Row | ContainerKind::Column => AlignItems::Stretch,
            }),
            justify_content: Some(JustifyContent::FlexStart),
            ..Default::default()
        };

        if let Some(r) = self.aspect_ratio {
            s.aspect_ratio = Some(r.max(0.0));
        }
        if let Some(g) = self.flex_grow {
            s.flex_grow = g;
        }
        if let Some(sh) = self.flex_shrink {
            s.flex_shrink = sh;
        }
        if let Some(b) = self.flex_basis {
            s.flex_basis = Length::Points(b.max(0.0));
        }
        if let Some(w) = self.flex_wrap {
            s.flex_wrap = w;
        }
        if let Some(a) = self.align_self {
            s.align_self = Some(a);
        }
        if let Some(a) = self.align_items_container {
            s.align_items = Some(a);
        }
        if let Some(j) = self.justify_content {
            s.justify_content = Some(j);
        }
        if let Some(a) = self.align_content {
            s.align_content = Some(a);
        }
        if let Some(g) = self.gap {
            s.gap = Axes::both(Length::Points(g));
        }

        if self.position_type == Some(PositionType::Absolute) {
            s.position = Position::Absolute;
            s.inset = Sides {
                left: offset(self.offset_left),
                right: offset(self.offset_right),
                top: offset(self.offset_top),
                bottom: offset(self.offset_bottom),
            };
        }
        s.margin = Sides {
            left: Length::Points(self.margin_left.unwrap_or(0.0)),
            right: Length::Points(self.margin_right.unwrap_or(0.0)),
            top: Length::Points(self.margin_top.unwrap_or(0.0)),
            bottom: Length::Points(self.margin_bottom.unwrap_or(0.0)),
        };

        if let Some(pv) = self.padding_values {
            s.padding = Sides {
                left: Length::Points(pv.left),
                right: Length::Points(pv.right),
                top: Length::Points(pv.top),
                bottom: Length::Points(pv.bottom),
            };
        } else if let Some(p) = self.padding {
            s.padding = Sides::all(Length::Points(p));
        }
        if let Some(b) = self.border_width {
            s.border = Sides::all(Length::Points(b));
        }

        // Explicit size wins over fill.
        let mut width_set = false;
        let mut height_set = false;
        if let Some(sz) = self.size {
            if sz.width.is_finite() {
                s.size.width = Length::Points(sz.width.max(0.0));
                width_set = true;
            }
            if sz.height.is_finite() {
                s.size.height = Length::Points(sz.height.max(0.0));
                height_set = true;
            }
        }
        if let Some(w) = self.width {
            s.size.width = Length::Points(w.max(0.0));
            width_set = true;
        }
        if let Some(h) = self.height {
            s.size.height = Length::Points(h.max(0.0));
            height_set = true;
        }

        // Fill: main axis grows, cross axis is pinned to the parent.
        let want_fill_w = self.fill_max || self.fill_max_w;
        let want_fill_h = self.fill_max || self.fill_max_h;
        let (fill_main, fill_cross, main_set, cross_set) = match kind {
            ContainerKind::Row => (want_fill_w, want_fill_h, width_set, height_set),
            ContainerKind::Column | ContainerKind::Box => {
                (want_fill_h, want_fill_w, height_set, width_set)
            }
        };
        if fill_main && !main_set {
            s.flex_grow = s.flex_grow.max(1.0);
            s.flex_shrink = s.flex_shrink.max(1.0);
            s.flex_basis = Length::ZERO;
            *main_axis(&mut s.min_size, kind) = Length::ZERO;
        }
        if fill_cross && !cross_set {
            *cross_axis(&mut s.min_size, kind) = Length::Percent(1.0);
            *cross_axis(&mut s.max_size, kind) = Length::Percent(1.0);
        }

        if let Some(v) = self.min_width {
            s.min_size.width = Length::Points(v.max(0.0));
        }
        if let Some(v) = self.min_height {
            s.min_size.height = Length::Points(v.max(0.0));
        }
        if let Some(v) = self.max_width {
            s.max_size.width = Length::Points(v.max(0.0));
        }
        if let Some(v) = self.max_height {
            s.max_size.height = Length::Points(v.max(0.0));
        }

        s
    }
}

fn offset(v: Option<f32>) -> Length {
    v.map_or(Length::Auto, Length::Points)
}

fn main_axis(axes: &mut Axes<Length>, kind: ContainerKind) -> &mut Length {
    match kind {
        ContainerKind::Row => &mut axes.width,
        ContainerKind::Column | ContainerKind::Box => &mut axes.height,
    }
}

fn cross_axis(axes: &mut Axes<Length>, kind: ContainerKind) -> &mut Length {
    match kind {
        ContainerKind::Row => &mut axes.height,
        ContainerKind::Column | ContainerKind::Box => &mut axes.width,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_size_beats_fill() {
        let s = Modifier::new()
            .fill_max_size()
            .width(40.0)
            .to_style(ContainerKind::Column);
        assert_eq!(s.size.width, Length::Points(40.0));
        assert_eq!(s.flex_grow, 1.0);
        assert_eq!(s.min_size.width, Length::Auto);
    }

    #[test]
    fn row_fill_grows_horizontally() {
        let s = Modifier::new().fill_max_width().to_style(ContainerKind::Row);
        assert_eq!(s.flex_direction, FlexDirection::Row);
        assert_eq!(s.flex_grow, 1.0);
        assert_eq!(s.flex_basis, Length::ZERO);
        assert_eq!(s.min_size.height, Length::Auto);
    }

    #[test]
    fn modifiers_compare_by_value() {
        assert_eq!(Modifier::new().padding(4.0), Modifier::new().padding(4.0));
        assert_ne!(Modifier::new().padding(4.0), Modifier::new().padding(5.0));
    }
}
