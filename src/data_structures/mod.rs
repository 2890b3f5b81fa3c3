//! Engine data structures: geometry, styles and render objects.
//!
//! - `geometry` holds sizes, rectangles, uv rects and the sizing rules used by pooling and the blur chain
//! - `style` is the immutable look of a blurred region
//! - `render_object` holds one record per blurred on-screen region

pub mod geometry;
pub mod render_object;
pub mod style;
