//! # Node style
//!
//! [`NodeStyle`] is the layout description a primitive carries through
//! resolve. It is plain data (lengths and enums) so resolved trees and layout
//! states can move between threads; the engine's own style is built from it
//! only while a layout pass constructs its engine tree.

use taffy::geometry;
use taffy::prelude::{auto, length, percent};
use taffy::style::{Dimension, LengthPercentage, LengthPercentageAuto, Style};
pub use taffy::style::{
    AlignContent, AlignItems, AlignSelf, Display, FlexDirection, FlexWrap, JustifyContent,
    Position,
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Length {
    #[default]
    Auto,
    Points(f32),
    /// Fraction of the parent's size, `1.0` being all of it.
    Percent(f32),
}

impl Length {
    pub const ZERO: Length = Length::Points(0.0);

    fn dimension(self) -> Dimension {
        match self {
            Length::Auto => auto(),
            Length::Points(v) => length(v),
            Length::Percent(p) => percent(p),
        }
    }

    fn length_percentage_auto(self) -> LengthPercentageAuto {
        match self {
            Length::Auto => auto(),
            Length::Points(v) => length(v),
            Length::Percent(p) => percent(p),
        }
    }

    /// Padding and borders have no `auto`; it counts as zero.
    fn length_percentage(self) -> LengthPercentage {
        match self {
            Length::Auto => length(0.0),
            Length::Points(v) => length(v),
            Length::Percent(p) => percent(p),
        }
    }
}

impl From<f32> for Length {
    fn from(v: f32) -> Self {
        Length::Points(v)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Axes<T> {
    pub width: T,
    pub height: T,
}

impl<T: Copy> Axes<T> {
    pub fn both(v: T) -> Self {
        Self {
            width: v,
            height: v,
        }
    }

    fn map<U>(self, f: impl Fn(T) -> U) -> geometry::Size<U> {
        geometry::Size {
            width: f(self.width),
            height: f(self.height),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sides<T> {
    pub left: T,
    pub right: T,
    pub top: T,
    pub bottom: T,
}

impl<T: Copy> Sides<T> {
    pub fn all(v: T) -> Self {
        Self {
            left: v,
            right: v,
            top: v,
            bottom: v,
        }
    }

    fn map<U>(self, f: impl Fn(T) -> U) -> geometry::Rect<U> {
        geometry::Rect {
            left: f(self.left),
            right: f(self.right),
            top: f(self.top),
            bottom: f(self.bottom),
        }
    }
}

/// Flexbox layout parameters of a node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeStyle {
    pub display: Display,
    pub position: Position,
    pub flex_direction: FlexDirection,
    pub flex_wrap: FlexWrap,
    pub flex_grow: f32,
    pub flex_shrink: f32,
    pub flex_basis: Length,
    pub align_items: Option<AlignItems>,
    pub align_self: Option<AlignSelf>,
    pub align_content: Option<AlignContent>,
    pub justify_content: Option<JustifyContent>,
    pub size: Axes<Length>,
    pub min_size: Axes<Length>,
    pub max_size: Axes<Length>,
    pub aspect_ratio: Option<f32>,
    pub margin: Sides<Length>,
    /// Offsets of a positioned node.
    pub inset: Sides<Length>,
    pub padding: Sides<Length>,
    pub border: Sides<Length>,
    pub gap: Axes<Length>,
}

impl Default for NodeStyle {
    fn default() -> Self {
        Self {
            display: Display::Flex,
            position: Position::Relative,
            flex_direction: FlexDirection::Row,
            flex_wrap: FlexWrap::NoWrap,
            flex_grow: 0.0,
            flex_shrink: 1.0,
            flex_basis: Length::Auto,
            align_items: None,
            align_self: None,
            align_content: None,
            justify_content: None,
            size: Axes::both(Length::Auto),
            min_size: Axes::both(Length::Auto),
            max_size: Axes::both(Length::Auto),
            aspect_ratio: None,
            margin: Sides::all(Length::ZERO),
            inset: Sides::all(Length::Auto),
            padding: Sides::all(Length::ZERO),
            border: Sides::all(Length::ZERO),
            gap: Axes::both(Length::ZERO),
        }
    }
}

impl NodeStyle {
    /// Builds the engine style for this node.
    pub fn to_taffy(&self) -> Style {
        Style {
            display: self.display,
            position: self.position,
            flex_direction: self.flex_direction,
            flex_wrap: self.flex_wrap,
            flex_grow: self.flex_grow,
            flex_shrink: self.flex_shrink,
            flex_basis: self.flex_basis.dimension(),
            align_items: self.align_items,
            align_self: self.align_self,
            align_content: self.align_content,
            justify_content: self.justify_content,
            size: self.size.map(Length::dimension),
            min_size: self.min_size.map(Length::dimension),
            max_size: self.max_size.map(Length::dimension),
            aspect_ratio: self.aspect_ratio,
            margin: self.margin.map(Length::length_percentage_auto),
            inset: self.inset.map(Length::length_percentage_auto),
            padding: self.padding.map(Length::length_percentage),
            border: self.border.map(Length::length_percentage),
            gap: self.gap.map(Length::length_percentage),
            ..Style::default()
        }
    }
}
