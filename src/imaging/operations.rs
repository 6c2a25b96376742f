//! High-level image operations.
//!
//! These functions combine configuration with backend execution.
//! They take configuration, compute parameters, and call the backend.

use super::backend::{BackendError, ImageBackend, OptimizedImage};
use super::params::{OptimizeParams, Quality};
use crate::config::ImagesConfig;
use std::path::Path;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Configuration for derivative generation.
#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    pub max_width: u32,
    pub quality: Quality,
}

impl OptimizeConfig {
    pub fn from_images_config(config: &ImagesConfig) -> Self {
        Self {
            max_width: config.max_width,
            quality: Quality::new(config.quality),
        }
    }
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self::from_images_config(&ImagesConfig::default())
    }
}

/// Plan an optimize operation without executing it.
pub fn plan_optimize(source: &Path, config: &OptimizeConfig) -> OptimizeParams {
    OptimizeParams {
        source: source.to_path_buf(),
        max_width: config.max_width,
        quality: config.quality,
    }
}

/// Create the optimized derivative for a stored source image.
///
/// Returns the encoded bytes; persisting them is the caller's concern.
pub fn create_optimized(
    backend: &(impl ImageBackend + ?Sized),
    source: &Path,
    config: &OptimizeConfig,
) -> Result<OptimizedImage> {
    backend.optimize(&plan_optimize(source, config))
}
