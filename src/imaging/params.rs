//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the high-level [`operations`](super::operations) module
//! (which decides what derivative to create) and the [`backend`](super::backend)
//! (which does the actual pixel work).
//!
//! ## Types
//!
//! - [`Quality`]: lossy encoding quality (1–100, default 85). Clamped on construction.
//! - [`OptimizeParams`]: full specification for one derivative: source, width cap, quality.

use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Quality as the `u8` the JPEG encoder takes.
    pub fn as_u8(self) -> u8 {
        self.0.clamp(1, 100) as u8
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// Parameters for producing one optimized derivative.
///
/// The target height is not part of the parameters: it depends on the
/// source dimensions, which are only known once the backend has decoded
/// the file.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeParams {
    pub source: PathBuf,
    /// Images wider than this are scaled down to exactly this width.
    pub max_width: u32,
    pub quality: Quality,
}
