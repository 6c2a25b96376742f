//! Image processing in pure Rust, with no system libraries.
//!
//! | Step | Behavior |
//! |---|---|
//! | **Verify upload** | full decode of the first frame |
//! | **Flatten** | alpha composited onto opaque white |
//! | **Resize** | Lanczos3, width capped (default 800px) |
//! | **Encode** | baseline JPEG, quality 85, optimized Huffman tables, no EXIF |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension and pixel math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend, OptimizedImage};
pub use calculations::{calculate_capped_dimensions, composite_over_white};
pub use operations::{OptimizeConfig, create_optimized, plan_optimize};
pub use params::{OptimizeParams, Quality};
pub use rust_backend::RustBackend;
