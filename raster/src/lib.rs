//! Software rasterizer for a fixed-function, tile-parallel 3D pipeline:
//! perspective-correct scanline rasterization over a 256x192 framebuffer,
//! split into four 48-line tiles that the [`scheduler::Renderer`] can draw
//! concurrently.

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
pub mod bitwise;

pub mod fixed;

pub mod color;

pub mod memory;

#[allow(clippy::similar_names)]
pub mod texture;

pub mod polygon;

pub mod registers;

pub mod scanline;

pub mod frame;

pub mod scheduler;

pub use polygon::{CombineMode, Polygon, Vertex};
pub use scheduler::Renderer;
