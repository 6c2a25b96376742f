//! Input validation for card writes.
//!
//! Uploads are checked in a fixed order: size first, then extension, then a
//! full decode. An oversized payload is rejected before any decoding work is
//! spent on it. Field validators return the normalized value on success.

use crate::imaging::rust_backend::supported_input_extensions;
use crate::imaging::{Dimensions, ImageBackend};
use crate::model::{Condition, Rarity, SaleStatus};
use crate::naming::{file_extension, sanitize_upload_name};
use std::io::Cursor;
use thiserror::Error;

pub const MAX_NAME_CHARS: usize = 200;
pub const MAX_SERIAL_CHARS: usize = 50;
pub const MAX_PRICE: i64 = 9_999_999_999;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `size` counts the bytes received before the upload was refused.
    #[error("image must be {limit} bytes or smaller")]
    TooLarge { size: u64, limit: u64 },
    #[error("unsupported image format '{extension}' (allowed: {allowed})")]
    UnsupportedFormat { extension: String, allowed: String },
    #[error("not a valid image file: {0}")]
    CorruptImage(String),
    #[error("invalid card name: {0}")]
    InvalidName(&'static str),
    #[error("invalid price: {0}")]
    InvalidPrice(&'static str),
    #[error("serial number must be 50 characters or fewer")]
    InvalidSerialNumber,
    #[error("invalid {field} '{value}'")]
    InvalidChoice { field: &'static str, value: String },
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
}

impl ValidationError {
    /// Request field the error refers to.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::TooLarge { .. }
            | ValidationError::UnsupportedFormat { .. }
            | ValidationError::CorruptImage(_) => "image",
            ValidationError::InvalidName(_) => "name",
            ValidationError::InvalidPrice(_) => "price",
            ValidationError::InvalidSerialNumber => "serial_number",
            ValidationError::InvalidChoice { field, .. } => *field,
            ValidationError::MissingField(field) => *field,
        }
    }
}

/// An upload that passed every check, ready to be stored and optimized.
///
/// The payload is owned, so it can be re-read from the start as often as
/// needed (once for persistence, once more by the pipeline).
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    /// Sanitized file name to store the upload under.
    pub filename: String,
    pub dimensions: Dimensions,
    bytes: Vec<u8>,
}

impl ValidatedImage {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A fresh reader positioned at the first byte.
    pub fn reader(&self) -> Cursor<&[u8]> {
        Cursor::new(self.bytes.as_slice())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Validate an uploaded image: size, then extension, then decodability.
pub fn validate_upload(
    backend: &(impl ImageBackend + ?Sized),
    filename: &str,
    bytes: Vec<u8>,
    max_bytes: u64,
) -> Result<ValidatedImage, ValidationError> {
    let size = bytes.len() as u64;
    if size > max_bytes {
        return Err(ValidationError::TooLarge {
            size,
            limit: max_bytes,
        });
    }

    let allowed = supported_input_extensions();
    let extension = file_extension(filename).unwrap_or_default();
    if !allowed.contains(&extension.as_str()) {
        return Err(ValidationError::UnsupportedFormat {
            extension,
            allowed: allowed.join(", "),
        });
    }

    let dimensions = backend
        .verify(&bytes)
        .map_err(|e| ValidationError::CorruptImage(e.to_string()))?;

    Ok(ValidatedImage {
        filename: sanitize_upload_name(filename),
        dimensions,
        bytes,
    })
}

/// Validate a card name and return it trimmed.
pub fn validate_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidName("name is required"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ValidationError::InvalidName(
            "name must be 200 characters or fewer",
        ));
    }
    if name.contains(['<', '>']) {
        return Err(ValidationError::InvalidName(
            "name contains disallowed characters",
        ));
    }
    Ok(trimmed.to_string())
}

/// Validate a price that must be present and within range.
pub fn validate_price(price: Option<i64>) -> Result<i64, ValidationError> {
    let price = price.ok_or(ValidationError::InvalidPrice("price is required"))?;
    if price < 0 {
        return Err(ValidationError::InvalidPrice("price must be 0 or more"));
    }
    if price > MAX_PRICE {
        return Err(ValidationError::InvalidPrice("price is too large"));
    }
    Ok(price)
}

/// Parse a price from form input. Only whole numbers are accepted.
pub fn parse_price(raw: &str) -> Result<i64, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::InvalidPrice("price is required"));
    }
    raw.parse::<i64>()
        .map_err(|_| ValidationError::InvalidPrice("price must be a whole number"))
}

/// Validate an optional serial number. Blank input means "no serial number".
pub fn validate_serial_number(raw: &str) -> Result<Option<String>, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_SERIAL_CHARS {
        return Err(ValidationError::InvalidSerialNumber);
    }
    Ok(Some(trimmed.to_string()))
}

pub fn parse_condition(raw: &str) -> Result<Condition, ValidationError> {
    raw.parse().map_err(|_| ValidationError::InvalidChoice {
        field: "condition",
        value: raw.to_string(),
    })
}

pub fn parse_rarity(raw: &str) -> Result<Rarity, ValidationError> {
    raw.parse().map_err(|_| ValidationError::InvalidChoice {
        field: "rarity",
        value: raw.to_string(),
    })
}

pub fn parse_sale_status(raw: &str) -> Result<SaleStatus, ValidationError> {
    raw.parse().map_err(|_| ValidationError::InvalidChoice {
        field: "sale_status",
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::RustBackend;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::test_helpers::*;
    use std::io::Read;

    const LIMIT: u64 = 20 * 1024 * 1024;

    #[test]
    fn accepts_valid_jpeg() {
        let img = validate_upload(&RustBackend::new(), "card.jpg", jpeg_bytes(64, 48), LIMIT)
            .unwrap();
        assert_eq!(img.filename, "card.jpg");
        assert_eq!(img.dimensions, Dimensions { width: 64, height: 48 });
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        validate_upload(&RustBackend::new(), "CARD.PNG", png_rgba_bytes(8, 8, 255), LIMIT)
            .unwrap();
    }

    #[test]
    fn rejects_oversized_before_decoding() {
        let backend = MockBackend::new();
        let payload = vec![0u8; (21 * 1024 * 1024) as usize];
        let err = validate_upload(&backend, "big.jpg", payload, LIMIT).unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { .. }));
        assert_eq!(err.field(), "image");
        assert!(backend.get_operations().is_empty());
    }

    #[test]
    fn exactly_at_limit_is_accepted_by_size_check() {
        let backend = MockBackend::new();
        let payload = vec![0u8; 1024];
        validate_upload(&backend, "a.jpg", payload, 1024).unwrap();
        assert_eq!(backend.get_operations(), vec![RecordedOp::Verify(1024)]);
    }

    #[test]
    fn rejects_unsupported_extension() {
        let err = validate_upload(&MockBackend::new(), "card.bmp", vec![1, 2, 3], LIMIT)
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFormat { ref extension, .. } if extension == "bmp"));
    }

    #[test]
    fn rejects_missing_extension() {
        let err = validate_upload(&MockBackend::new(), "card", vec![1, 2, 3], LIMIT).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFormat { .. }));
    }

    #[test]
    fn rejects_corrupt_bytes() {
        let err = validate_upload(&RustBackend::new(), "card.png", b"not a png".to_vec(), LIMIT)
            .unwrap_err();
        assert!(matches!(err, ValidationError::CorruptImage(_)));
    }

    #[test]
    fn reader_always_starts_at_zero() {
        let img = validate_upload(&RustBackend::new(), "a.jpg", jpeg_bytes(16, 16), LIMIT).unwrap();
        let mut first = Vec::new();
        img.reader().read_to_end(&mut first).unwrap();
        let mut second = Vec::new();
        img.reader().read_to_end(&mut second).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), img.len());
        assert!(!img.is_empty());
    }

    #[test]
    fn upload_name_is_sanitized() {
        let img = validate_upload(
            &RustBackend::new(),
            "../My Card.jpg",
            jpeg_bytes(8, 8),
            LIMIT,
        )
        .unwrap();
        assert_eq!(img.filename, "My_Card.jpg");
    }

    #[test]
    fn name_is_trimmed() {
        assert_eq!(validate_name("  Dark Magician ").unwrap(), "Dark Magician");
    }

    #[test]
    fn name_blank_rejected() {
        assert!(matches!(validate_name("   "), Err(ValidationError::InvalidName(_))));
        assert!(validate_name("").is_err());
    }

    #[test]
    fn name_length_limit() {
        assert!(validate_name(&"a".repeat(200)).is_ok());
        assert!(validate_name(&"a".repeat(201)).is_err());
        // Counted in characters, not bytes
        assert!(validate_name(&"블".repeat(200)).is_ok());
    }

    #[test]
    fn name_rejects_markup() {
        assert!(validate_name("<script>").is_err());
        assert!(validate_name("a > b").is_err());
    }

    #[test]
    fn price_bounds() {
        assert_eq!(validate_price(Some(0)), Ok(0));
        assert_eq!(validate_price(Some(MAX_PRICE)), Ok(MAX_PRICE));
        assert!(validate_price(Some(-1)).is_err());
        assert!(validate_price(Some(MAX_PRICE + 1)).is_err());
        assert!(matches!(
            validate_price(None),
            Err(ValidationError::InvalidPrice(_))
        ));
    }

    #[test]
    fn price_parsing() {
        assert_eq!(parse_price(" 1500 "), Ok(1500));
        assert!(parse_price("12.5").is_err());
        assert!(parse_price("").is_err());
        assert_eq!(parse_price("abc").unwrap_err().field(), "price");
    }

    #[test]
    fn serial_number_rules() {
        assert_eq!(validate_serial_number(""), Ok(None));
        assert_eq!(
            validate_serial_number(" LOB-001 "),
            Ok(Some("LOB-001".to_string()))
        );
        assert_eq!(
            validate_serial_number(&"x".repeat(51)),
            Err(ValidationError::InvalidSerialNumber)
        );
    }

    #[test]
    fn choice_parsing_reports_field() {
        assert_eq!(parse_condition("S"), Ok(Condition::S));
        assert_eq!(parse_rarity("SE"), Ok(Rarity::SecretRare));
        assert_eq!(parse_sale_status("sold"), Ok(SaleStatus::Sold));

        let err = parse_rarity("ZZ").unwrap_err();
        assert_eq!(err.field(), "rarity");
    }
}
