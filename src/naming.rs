//! Centralized filename handling for stored card images.
//!
//! Raw uploads keep a cleaned-up version of the name the client sent. The
//! derivative of a raw image is always named after the raw image's stem:
//!
//! - `cards/blue-eyes.png` → `blue-eyes_optimized.jpg`
//! - `cards/Dark_Magician.v2.JPG` → `Dark_Magician.v2_optimized.jpg`
//!
//! When a name is already taken in storage, a short content digest is
//! appended to the stem (`blue-eyes_3fa94c1.png`) so names stay stable for the
//! same bytes.

use std::path::Path;

/// Suffix appended to the raw image stem to name its derivative.
pub const OPTIMIZED_SUFFIX: &str = "_optimized";

/// Lowercased extension of a file name, without the dot.
pub fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// Base name of a stored name with its extension removed.
///
/// `cards/optimized/a.b.jpg` → `a.b`
pub fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Name of the derivative generated from a raw image.
pub fn optimized_filename(raw_name: &str) -> String {
    format!("{}{}.jpg", file_stem(raw_name), OPTIMIZED_SUFFIX)
}

/// Reduce a client-supplied file name to a safe base name.
///
/// Directory components are dropped, whitespace becomes `_`, and anything
/// other than letters, digits, `-`, `_` and `.` is removed. Leading dots are
/// stripped so the result is never a hidden file. Falls back to `upload` when
/// nothing usable remains.
pub fn sanitize_upload_name(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                Some(c)
            } else {
                None
            }
        })
        .collect();
    let (stem, ext) = match cleaned.rfind('.') {
        Some(i) => (&cleaned[..i], &cleaned[i + 1..]),
        None => (cleaned.as_str(), ""),
    };
    let stem = match stem.trim_start_matches('.') {
        "" => "upload",
        s => s,
    };
    if ext.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{ext}")
    }
}

/// Alternative name used when `name` is already taken: `tag` is appended to the stem.
pub fn disambiguated_name(name: &str, tag: &str) -> String {
    match file_extension(name) {
        Some(ext) => format!("{}_{}.{}", file_stem(name), tag, ext),
        None => format!("{}_{}", file_stem(name), tag),
    }
}
