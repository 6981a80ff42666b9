#![allow(non_snake_case)]
//! Primitive components for Trellis: flex containers, text, images, buttons
//! and error boundaries, styled through [`Modifier`].
//!
//! ```rust
//! use trellis_core::prelude::*;
//! use trellis_ui::*;
//!
//! let tree = RenderTree::new(TreeConfig::default());
//! tree.set_root(
//!     Column(Modifier::new().padding(8.0))
//!         .child((Text("Title").size(20.0), Spacer(), Text("body")))
//!         .into(),
//! );
//! tree.set_size_specs(SizeSpec::Exactly(320.0), SizeSpec::Exactly(240.0));
//! assert!(tree.render_sync().unwrap().is_committed());
//! ```

pub mod modifier;
pub mod text;
pub mod widgets;

pub use modifier::{ContainerKind, Modifier, PaddingValues, PositionType};
pub use text::{Text, TextContent, TextMetrics, TextStyle, WithTextStyle, measure_text};
pub use widgets::{
    Box, Button, ButtonContent, Click, Column, Container, ErrorBoundary, Image, ImageContent,
    ImageFit, Responsive, Row, Spacer,
};

use trellis_core::Element;

pub trait IntoChildren {
    fn into_children(self) -> Vec<Element>;
}

impl IntoChildren for Element {
    fn into_children(self) -> Vec<Element> {
        vec![self]
    }
}

impl IntoChildren for Vec<Element> {
    fn into_children(self) -> Vec<Element> {
        self
    }
}

impl<const N: usize> IntoChildren for [Element; N] {
    fn into_children(self) -> Vec<Element> {
        self.into()
    }
}

macro_rules! impl_widget {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Element {
                fn from(w: $t) -> Element {
                    Element::new(w)
                }
            }

            impl IntoChildren for $t {
                fn into_children(self) -> Vec<Element> {
                    vec![Element::new(self)]
                }
            }
        )+
    };
}

impl_widget!(
    Container,
    Text,
    WithTextStyle,
    Image,
    Responsive,
    Button,
    ErrorBoundary
);

// Tuple implementations
macro_rules! impl_into_children_tuple {
    ($($idx:tt $t:ident),+) => {
        impl<$($t: IntoChildren),+> IntoChildren for ($($t,)+) {
            fn into_children(self) -> Vec<Element> {
                let mut v = Vec::new();
                $(v.extend(self.$idx.into_children());)+
                v
            }
        }
    };
}

impl_into_children_tuple!(0 A, 1 B);
impl_into_children_tuple!(0 A, 1 B, 2 C);
impl_into_children_tuple!(0 A, 1 B, 2 C, 3 D);
impl_into_children_tuple!(0 A, 1 B, 2 C, 3 D, 4 E);
impl_into_children_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_into_children_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_into_children_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);
