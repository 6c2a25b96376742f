//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, WebP) | `image` crate (pure Rust decoders) |
//! | Flatten alpha / palette | `to_rgba8` + composite onto white |
//! | Resize | `image::imageops::resize` with `Lanczos3` filter |
//! | Encode → JPEG | `jpeg_encoder::Encoder` with optimized Huffman tables |
//!
//! ## Orientation
//!
//! The `image` decoders never apply the EXIF orientation tag on their own and
//! this backend never calls `apply_orientation`, so pixels are used exactly as
//! stored. The JPEG encoder writes only a JFIF header; no APP1/EXIF segment is
//! emitted, so the tag cannot survive into the derivative.
//!
//! Huffman tables are computed per image rather than taken from the
//! standard set. The output stays baseline JPEG.

use super::backend::{BackendError, Dimensions, ImageBackend, OptimizedImage};
use super::calculations::{calculate_capped_dimensions, composite_over_white};
use super::params::{OptimizeParams, Quality};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage};
use jpeg_encoder::{ColorType, Encoder};
use std::io::Cursor;
use std::sync::LazyLock;

/// Extensions accepted for upload, paired with the decoder that must be compiled in.
const UPLOAD_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("gif", ImageFormat::Gif),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    UPLOAD_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of upload extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode an in-memory payload, sniffing the format from its content.
pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, BackendError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(BackendError::Io)?
        .decode()
        .map_err(|e| BackendError::Decode(e.to_string()))
}

/// Convert any color model to opaque 3-channel RGB.
///
/// Images with an alpha channel are composited onto white. Palette images are
/// expanded to RGBA by the decoders, so they take the same path when their
/// palette carries transparency.
fn flatten_onto_white(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }
    let rgba = img.into_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        Rgb([
            composite_over_white(r, a),
            composite_over_white(g, a),
            composite_over_white(b, a),
        ])
    })
}

/// Encode RGB pixels as a metadata-free baseline JPEG with optimized
/// Huffman tables.
fn encode_jpeg(img: &RgbImage, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let (width, height) = match (u16::try_from(img.width()), u16::try_from(img.height())) {
        (Ok(w), Ok(h)) => (w, h),
        _ => {
            return Err(BackendError::Encode(format!(
                "{}x{} exceeds the JPEG size limit of 65535",
                img.width(),
                img.height()
            )));
        }
    };
    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf, quality.as_u8());
    encoder.set_optimized_huffman_tables(true);
    encoder
        .encode(img.as_raw(), width, height, ColorType::Rgb)
        .map_err(|e| BackendError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Run the full optimization on an in-memory payload.
///
/// Decode → flatten onto white → cap width → encode JPEG. Exposed separately
/// from [`ImageBackend::optimize`] so callers holding bytes (and tests) do not
/// need a file on disk.
pub fn optimize_bytes(
    bytes: &[u8],
    max_width: u32,
    quality: Quality,
) -> Result<OptimizedImage, BackendError> {
    let decoded = decode_bytes(bytes)?;
    let rgb = flatten_onto_white(decoded);

    let (width, height) = calculate_capped_dimensions(rgb.dimensions(), max_width);
    let sized = if (width, height) == rgb.dimensions() {
        rgb
    } else {
        image::imageops::resize(&rgb, width, height, FilterType::Lanczos3)
    };

    let bytes = encode_jpeg(&sized, quality)?;
    Ok(OptimizedImage {
        bytes,
        width,
        height,
    })
}

impl ImageBackend for RustBackend {
    fn verify(&self, bytes: &[u8]) -> Result<Dimensions, BackendError> {
        let img = decode_bytes(bytes)?;
        Ok(Dimensions {
            width: img.width(),
            height: img.height(),
        })
    }

    fn optimize(&self, params: &OptimizeParams) -> Result<OptimizedImage, BackendError> {
        let bytes = std::fs::read(&params.source)?;
        optimize_bytes(&bytes, params.max_width, params.quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;

    #[test]
    fn supported_extensions_match_upload_formats() {
        let exts = supported_input_extensions();
        for expected in &["jpg", "jpeg", "png", "gif", "webp"] {
            assert!(
                exts.contains(expected),
                "expected {expected} in supported extensions"
            );
        }
    }

    #[test]
    fn verify_synthetic_jpeg() {
        let dims = RustBackend::new().verify(&jpeg_bytes(200, 150)).unwrap();
        assert_eq!(dims, Dimensions { width: 200, height: 150 });
    }

    #[test]
    fn verify_rejects_garbage() {
        let result = RustBackend::new().verify(b"definitely not an image");
        assert!(result.is_err());
    }

    #[test]
    fn verify_rejects_truncated_png() {
        let png = png_rgba_bytes(64, 64, 255);
        let result = RustBackend::new().verify(&png[..png.len() / 2]);
        assert!(result.is_err());
    }

    #[test]
    fn wide_image_is_capped_to_800() {
        let out = optimize_bytes(&jpeg_bytes(1600, 1200), 800, Quality::default()).unwrap();
        assert_eq!((out.width, out.height), (800, 600));
        assert_eq!(decoded_dimensions(&out.bytes), (800, 600));
    }

    #[test]
    fn wide_image_height_is_rounded() {
        let out = optimize_bytes(&jpeg_bytes(1200, 1003), 800, Quality::default()).unwrap();
        assert_eq!(decoded_dimensions(&out.bytes), (800, 669));
    }

    #[test]
    fn narrow_image_keeps_dimensions_but_is_reencoded() {
        let source = png_rgba_bytes(300, 200, 255);
        let out = optimize_bytes(&source, 800, Quality::default()).unwrap();
        assert_eq!(decoded_dimensions(&out.bytes), (300, 200));
        assert!(is_jpeg(&out.bytes));
    }

    #[test]
    fn transparent_png_is_composited_on_white() {
        // Fully transparent black → should come out white
        let out = optimize_bytes(&png_rgba_bytes(64, 64, 0), 800, Quality::default()).unwrap();
        let img = decode_bytes(&out.bytes).unwrap();
        assert_eq!(img.color(), image::ColorType::Rgb8);
        for p in img.to_rgb8().pixels() {
            assert!(p.0.iter().all(|&c| c >= 250), "expected white, got {:?}", p.0);
        }
    }

    #[test]
    fn palette_gif_is_flattened_to_rgb() {
        let out = optimize_bytes(&gif_bytes(40, 30), 800, Quality::default()).unwrap();
        let img = decode_bytes(&out.bytes).unwrap();
        assert_eq!(img.color(), image::ColorType::Rgb8);
        assert_eq!((img.width(), img.height()), (40, 30));
    }

    #[test]
    fn grayscale_alpha_is_flattened_to_rgb() {
        let out = optimize_bytes(&png_luma_alpha_bytes(50, 20), 800, Quality::default()).unwrap();
        let img = decode_bytes(&out.bytes).unwrap();
        assert_eq!(img.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn exif_orientation_is_ignored_and_stripped() {
        let source = jpeg_with_orientation(1600, 1200, 6);
        assert!(has_exif_segment(&source));

        let out = optimize_bytes(&source, 800, Quality::default()).unwrap();
        // Not rotated: a Rotate90 tag would have produced 600x800
        assert_eq!(decoded_dimensions(&out.bytes), (800, 600));
        assert!(!has_exif_segment(&out.bytes));
    }

    #[test]
    fn output_is_a_fixpoint() {
        let first = optimize_bytes(&jpeg_bytes(2000, 1000), 800, Quality::default()).unwrap();
        let second = optimize_bytes(&first.bytes, 800, Quality::default()).unwrap();
        assert_eq!((second.width, second.height), (first.width, first.height));
        assert!(!has_exif_segment(&second.bytes));
    }

    #[test]
    fn optimize_reads_source_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("card.jpg");
        std::fs::write(&source, jpeg_bytes(900, 300)).unwrap();

        let out = RustBackend::new()
            .optimize(&OptimizeParams {
                source,
                max_width: 800,
                quality: Quality::default(),
            })
            .unwrap();
        assert_eq!((out.width, out.height), (800, 267));
    }

    #[test]
    fn optimize_missing_source_is_io_error() {
        let result = RustBackend::new().optimize(&OptimizeParams {
            source: "/nonexistent/card.jpg".into(),
            max_width: 800,
            quality: Quality::default(),
        });
        assert!(matches!(result, Err(BackendError::Io(_))));
    }

    #[test]
    fn encoder_writes_jfif_without_app1() {
        let out = optimize_bytes(&png_rgba_bytes(120, 80, 200), 800, Quality::default()).unwrap();
        assert!(is_jpeg(&out.bytes));
        // SOI followed directly by the JFIF APP0 segment
        assert_eq!(&out.bytes[2..4], &[0xFF, 0xE0]);
        assert_eq!(&out.bytes[6..11], b"JFIF\0");
        assert!(!has_exif_segment(&out.bytes));
        assert_eq!(decoded_dimensions(&out.bytes), (120, 80));
    }

    #[test]
    fn optimized_tables_are_no_larger_than_standard() {
        let img = decode_bytes(&jpeg_bytes(400, 300)).unwrap().into_rgb8();
        let optimized = encode_jpeg(&img, Quality::default()).unwrap();

        let mut standard = Vec::new();
        Encoder::new(&mut standard, Quality::default().as_u8())
            .encode(img.as_raw(), 400, 300, ColorType::Rgb)
            .unwrap();
        assert!(
            optimized.len() <= standard.len(),
            "optimized {} > standard {}",
            optimized.len(),
            standard.len()
        );
    }

    #[test]
    fn oversized_height_is_encode_error() {
        let img = RgbImage::new(1, 70_000);
        let result = encode_jpeg(&img, Quality::default());
        assert!(matches!(result, Err(BackendError::Encode(_))));
    }

    // =========================================================================
    // Properties over the whole optimization
    // =========================================================================

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(24))]

        #[test]
        fn prop_output_width_is_capped(w in 1u32..=1200, h in 1u32..=120) {
            let out = optimize_bytes(&jpeg_bytes(w, h), 800, Quality::default()).unwrap();
            let expected = calculate_capped_dimensions((w, h), 800);
            prop_assert!(out.width <= 800);
            prop_assert_eq!((out.width, out.height), expected);
            prop_assert_eq!(decoded_dimensions(&out.bytes), expected);
            if w <= 800 {
                prop_assert_eq!(expected, (w, h));
            }
        }

        #[test]
        fn prop_alpha_is_flattened_onto_white(w in 1u32..=900, h in 1u32..=60, alpha in any::<u8>()) {
            let out = optimize_bytes(&png_rgba_bytes(w, h, alpha), 800, Quality::default()).unwrap();
            let img = decode_bytes(&out.bytes).unwrap();
            prop_assert!(!img.color().has_alpha());
            // Black at `alpha` over white
            let expected = composite_over_white(0, alpha) as i16;
            for p in img.to_rgb8().pixels() {
                for &c in &p.0 {
                    prop_assert!((c as i16 - expected).abs() <= 4, "{} vs {}", c, expected);
                }
            }
        }

        #[test]
        fn prop_palette_is_flattened(w in 1u32..=900, h in 1u32..=60) {
            let out = optimize_bytes(&gif_bytes(w, h), 800, Quality::default()).unwrap();
            let img = decode_bytes(&out.bytes).unwrap();
            prop_assert_eq!(img.color(), image::ColorType::Rgb8);
            prop_assert_eq!((img.width(), img.height()), calculate_capped_dimensions((w, h), 800));
        }

        #[test]
        fn prop_output_is_a_fixpoint(w in 1u32..=1200, h in 1u32..=120) {
            let first = optimize_bytes(&jpeg_bytes(w, h), 800, Quality::default()).unwrap();
            let second = optimize_bytes(&first.bytes, 800, Quality::default()).unwrap();
            prop_assert_eq!((second.width, second.height), (first.width, first.height));
            prop_assert!(!has_exif_segment(&second.bytes));
        }
    }
}
