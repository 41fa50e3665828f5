//! DjVu text zones.
//!
//! The hidden text layer of a DjVu page is a tree of typed rectangles
//! ([`Zone`]) whose leaves carry text. This module holds the tree model, its
//! geometry ([`BBox`], rotation), and its `djvused` serialization.

pub mod bbox;
pub mod rotation;
pub mod sexpr;
pub mod zone;

pub use bbox::BBox;
pub use rotation::AffineTransform;
pub use sexpr::Expr;
pub use zone::{Zone, ZoneChild, ZoneType, group_words};
