//! Pure calculation functions for image dimensions and pixel math.
//!
//! All functions here are pure and testable without any I/O or images.

/// Calculate the output dimensions for a width-capped derivative.
///
/// Sources no wider than `max_width` keep their dimensions. Wider sources are
/// scaled to exactly `max_width`, with the height rounded to the nearest
/// pixel so the aspect ratio is preserved. The height never drops below 1.
///
/// # Examples
/// ```
/// # use cardmart::imaging::calculate_capped_dimensions;
/// assert_eq!(calculate_capped_dimensions((1600, 1200), 800), (800, 600));
/// assert_eq!(calculate_capped_dimensions((640, 480), 800), (640, 480));
/// ```
pub fn calculate_capped_dimensions(source: (u32, u32), max_width: u32) -> (u32, u32) {
    let (src_w, src_h) = source;
    if src_w <= max_width {
        return (src_w, src_h);
    }
    let h = (src_h as f64 * max_width as f64 / src_w as f64).round() as u32;
    (max_width, h.max(1))
}

/// Composite one 8-bit channel value with the given alpha onto opaque white.
///
/// `out = c·a + 255·(1 − a)`, with `a` normalized to `0.0..=1.0` and the
/// result rounded to the nearest integer.
pub fn composite_over_white(channel: u8, alpha: u8) -> u8 {
    let c = channel as u32;
    let a = alpha as u32;
    ((c * a + 255 * (255 - a) + 127) / 255) as u8
}
