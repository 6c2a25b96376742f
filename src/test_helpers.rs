//! Shared test utilities for the cardmart test suite.
//!
//! Provides synthetic image payloads (built with the `image` crate, never
//! checked-in binaries), JPEG marker inspection, and card/store fixtures.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let (tmp, store, media) = setup_store();
//! let stored = media.save_raw("card.jpg", &jpeg_bytes(1600, 1200)).unwrap();
//! let card = store.insert(new_card("Dark Magician", &stored)).unwrap();
//! ```

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageReader, RgbImage, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

use crate::media::MediaStore;
use crate::model::{Condition, NewCard, Rarity, SaleStatus};
use crate::store::CardStore;

// =========================================================================
// Image payloads
// =========================================================================

/// A gradient JPEG of the given size.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 90)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

/// A solid black RGBA PNG with every pixel at the given alpha.
pub fn png_rgba_bytes(width: u32, height: u32, alpha: u8) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, alpha]));
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgba8)
        .unwrap();
    buf
}

/// A grayscale-with-alpha PNG, left half transparent.
pub fn png_luma_alpha_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut raw = Vec::with_capacity((width * height * 2) as usize);
    for _ in 0..height {
        for x in 0..width {
            let alpha = if x < width / 2 { 0 } else { 255 };
            raw.extend_from_slice(&[40, alpha]);
        }
    }
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(&raw, width, height, ExtendedColorType::La8)
        .unwrap();
    buf
}

/// A single-frame GIF (palette image).
pub fn gif_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, _| {
        if x % 2 == 0 {
            image::Rgba([255, 0, 0, 255])
        } else {
            image::Rgba([0, 0, 255, 255])
        }
    });
    let mut buf = Vec::new();
    {
        // The trailer is written when the encoder is dropped
        let mut encoder = GifEncoder::new(&mut buf);
        encoder
            .encode(img.as_raw(), width, height, ExtendedColorType::Rgba8)
            .unwrap();
    }
    buf
}

/// A JPEG carrying an EXIF APP1 segment with the given orientation tag.
pub fn jpeg_with_orientation(width: u32, height: u32, orientation: u8) -> Vec<u8> {
    let plain = jpeg_bytes(width, height);
    #[rustfmt::skip]
    let app1: [u8; 36] = [
        0xFF, 0xE1, 0x00, 0x22,
        b'E', b'x', b'i', b'f', 0x00, 0x00,
        b'M', b'M', 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08,
        0x00, 0x01,
        0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, orientation, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
    ];
    let mut out = Vec::with_capacity(plain.len() + app1.len());
    out.extend_from_slice(&plain[..2]);
    out.extend_from_slice(&app1);
    out.extend_from_slice(&plain[2..]);
    out
}

// =========================================================================
// JPEG inspection
// =========================================================================

pub fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0xD8, 0xFF])
}

/// Whether the JPEG header (everything before start-of-scan) holds an APP1 segment.
pub fn has_exif_segment(bytes: &[u8]) -> bool {
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return false;
        }
        let marker = bytes[pos + 1];
        if marker == 0xDA {
            return false;
        }
        if marker == 0xE1 {
            return true;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        pos += 2 + len;
    }
    false
}

pub fn decoded_dimensions(bytes: &[u8]) -> (u32, u32) {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .unwrap()
        .decode()
        .unwrap();
    (img.width(), img.height())
}

// =========================================================================
// Card fixtures
// =========================================================================

/// A valid card record pointing at `image`.
pub fn new_card(name: &str, image: &str) -> NewCard {
    NewCard {
        name: name.to_string(),
        serial_number: None,
        image: image.to_string(),
        condition: Condition::A,
        rarity: Rarity::Normal,
        price: 1000,
        sale_status: SaleStatus::Available,
    }
}

/// An in-memory store and a media store rooted in a fresh temp directory.
pub fn setup_store() -> (TempDir, Arc<CardStore>, MediaStore) {
    let tmp = TempDir::new().unwrap();
    let media = MediaStore::new(tmp.path().join("media"));
    (tmp, Arc::new(CardStore::in_memory()), media)
}
