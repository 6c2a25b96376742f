//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations every backend must
//! support: verify and optimize.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend): pure Rust, built on the
//! `image` crate. Everything is statically linked into the binary.

use super::params::OptimizeParams;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Pixel dimensions of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// A re-encoded derivative held in memory until it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedImage {
    /// Encoded JPEG bytes.
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// The rest of the codebase only talks to this trait, so the pipeline can be
/// exercised against a recording mock without decoding real images.
pub trait ImageBackend: Send + Sync {
    /// Check that an in-memory payload decodes as a raster image.
    fn verify(&self, bytes: &[u8]) -> Result<Dimensions, BackendError>;

    /// Produce the optimized derivative for the source named in `params`.
    fn optimize(&self, params: &OptimizeParams) -> Result<OptimizedImage, BackendError>;
}
