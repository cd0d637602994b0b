//! Document extraction: content-type sniffing, text cracking, and
//! normalized-image descriptors.
//!
//! Detection order (first match wins):
//! `%PDF` → `application/pdf`; `PK\x03\x04` → Office Open XML (docx by
//! default); PNG/JPEG magic → image types; leading `{`/`[` in valid UTF-8 →
//! `application/json`; leading `<` with `html` nearby → `text/html`; any
//! UTF-8-decodable payload → `text/plain`; otherwise
//! `application/octet-stream`.
//!
//! Binary formats (PDF, Office) are cracked through [`BinaryCracker`]; the
//! default no-op implementation reflects that real binary parsing lives
//! outside the core.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde_json::{Value, json};

/// Default bounding box for normalized images.
pub const DEFAULT_MAX_IMAGE_EDGE: u32 = 2000;

/// Cracked content produced from raw bytes.
#[derive(Debug, Clone, Default)]
pub struct CrackedContent {
    /// Extracted text.
    pub text: String,
    /// Non-fatal extraction warnings.
    pub warnings: Vec<String>,
}

/// Hook for out-of-core binary crackers (PDF, Office).
pub trait BinaryCracker: Send + Sync {
    /// Crack a binary payload, or `None` when the format is unsupported.
    fn crack(&self, content_type: &str, bytes: &[u8]) -> Option<CrackedContent>;
}

/// The default cracker: binary formats produce no text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBinaryCracker;

impl BinaryCracker for NoopBinaryCracker {
    fn crack(&self, _content_type: &str, _bytes: &[u8]) -> Option<CrackedContent> {
        None
    }
}

/// Detect the content type of a payload by magic bytes.
#[must_use]
pub fn detect_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"%PDF") {
        return "application/pdf";
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
    }
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png";
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg";
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return "application/json";
        }
        if trimmed.starts_with('<') && text.get(..512).unwrap_or(text).to_ascii_lowercase().contains("html") {
            return "text/html";
        }
        return "text/plain";
    }
    "application/octet-stream"
}

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));

/// Crack a payload into text given its detected content type.
#[must_use]
pub fn crack_text(content_type: &str, bytes: &[u8], cracker: &dyn BinaryCracker) -> CrackedContent {
    match content_type {
        "text/plain" | "application/json" => CrackedContent {
            text: String::from_utf8_lossy(bytes).into_owned(),
            warnings: Vec::new(),
        },
        "text/html" => {
            let raw = String::from_utf8_lossy(bytes);
            let stripped = TAG.replace_all(&raw, " ");
            CrackedContent {
                text: stripped
                    .replace("&amp;", "&")
                    .replace("&lt;", "<")
                    .replace("&gt;", ">")
                    .replace("&quot;", "\"")
                    .replace("&nbsp;", " ")
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" "),
                warnings: Vec::new(),
            }
        }
        "image/png" | "image/jpeg" => CrackedContent::default(),
        other => cracker.crack(other, bytes).unwrap_or_else(|| CrackedContent {
            text: String::new(),
            warnings: vec![format!("no cracker available for content type '{other}'")],
        }),
    }
}

/// Raw pixel dimensions parsed from an image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
}

/// Parse image dimensions from a PNG or JPEG header.
#[must_use]
pub fn image_dimensions(content_type: &str, bytes: &[u8]) -> Option<ImageDimensions> {
    match content_type {
        "image/png" => png_dimensions(bytes),
        "image/jpeg" => jpeg_dimensions(bytes),
        _ => None,
    }
}

/// PNG: the IHDR chunk directly follows the signature; width and height are
/// the first eight bytes of its payload.
fn png_dimensions(bytes: &[u8]) -> Option<ImageDimensions> {
    if bytes.len() < 24 || !bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return None;
    }
    if &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    (width > 0 && height > 0).then_some(ImageDimensions { width, height })
}

/// JPEG: scan markers for the first SOFn frame header.
fn jpeg_dimensions(bytes: &[u8]) -> Option<ImageDimensions> {
    let mut i = 2usize;
    while i + 9 < bytes.len() {
        if bytes[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = bytes[i + 1];
        // Standalone markers carry no length.
        if (0xD0..=0xD9).contains(&marker) || marker == 0x01 || marker == 0xFF {
            i += 2;
            continue;
        }
        let length = usize::from(u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]));
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let height = u32::from(u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]));
            let width = u32::from(u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]));
            return (width > 0 && height > 0).then_some(ImageDimensions { width, height });
        }
        i += 2 + length;
    }
    None
}

/// Scale dimensions to fit a bounding box, preserving the aspect ratio.
/// Images already inside the box keep their size.
#[must_use]
pub fn fit_within(original: ImageDimensions, max_width: u32, max_height: u32) -> ImageDimensions {
    if original.width <= max_width && original.height <= max_height {
        return original;
    }
    let width_ratio = f64::from(max_width) / f64::from(original.width);
    let height_ratio = f64::from(max_height) / f64::from(original.height);
    let ratio = width_ratio.min(height_ratio);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    ImageDimensions {
        width: ((f64::from(original.width) * ratio).round() as u32).max(1),
        height: ((f64::from(original.height) * ratio).round() as u32).max(1),
    }
}

/// Build one normalized-image descriptor for an image payload.
#[must_use]
pub fn normalized_image(
    content_type: &str,
    bytes: &[u8],
    max_width: u32,
    max_height: u32,
    page_number: u32,
) -> Option<Value> {
    let original = image_dimensions(content_type, bytes)?;
    let resized = fit_within(original, max_width, max_height);
    Some(json!({
        "data": BASE64.encode(bytes),
        "width": resized.width,
        "height": resized.height,
        "originalWidth": original.width,
        "originalHeight": original.height,
        "rotationFromOriginal": 0,
        "contentOffset": 0,
        "pageNumber": page_number,
        "boundingPolygon": [],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
        bytes
    }

    #[test]
    fn detection_table() {
        assert_eq!(detect_content_type(b"%PDF-1.7 ..."), "application/pdf");
        assert_eq!(
            detect_content_type(b"PK\x03\x04rest"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_eq!(detect_content_type(b"{\"a\": 1}"), "application/json");
        assert_eq!(detect_content_type(b"  [1, 2]"), "application/json");
        assert_eq!(
            detect_content_type(b"<!DOCTYPE html><body>x</body>"),
            "text/html"
        );
        assert_eq!(detect_content_type(b"plain words"), "text/plain");
        assert_eq!(detect_content_type(&[0xFE, 0x00, 0x81]), "application/octet-stream");
        assert_eq!(detect_content_type(&png_header(10, 10)), "image/png");
        assert_eq!(detect_content_type(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
    }

    #[test]
    fn xml_without_html_is_plain_text() {
        assert_eq!(detect_content_type(b"<note><to>x</to></note>"), "text/plain");
    }

    #[test]
    fn cracks_text_and_html() {
        let cracker = NoopBinaryCracker;
        let plain = crack_text("text/plain", b"hello world", &cracker);
        assert_eq!(plain.text, "hello world");

        let html = crack_text(
            "text/html",
            b"<html><body><h1>Title</h1><p>Body &amp; more</p></body></html>",
            &cracker,
        );
        assert_eq!(html.text, "Title Body & more");
    }

    #[test]
    fn binary_without_cracker_warns() {
        let cracked = crack_text("application/pdf", b"%PDF-1.7", &NoopBinaryCracker);
        assert!(cracked.text.is_empty());
        assert_eq!(cracked.warnings.len(), 1);
    }

    #[test]
    fn png_dimensions_parse() {
        let dims = image_dimensions("image/png", &png_header(640, 480)).unwrap();
        assert_eq!(dims, ImageDimensions { width: 640, height: 480 });
    }

    #[test]
    fn jpeg_dimensions_parse() {
        // Minimal JPEG: SOI, APP0 (empty-ish), SOF0 with 480x640, EOI.
        let mut bytes = vec![0xFF, 0xD8];
        bytes.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]);
        bytes.extend_from_slice(&[
            0xFF, 0xC0, 0x00, 0x11, 0x08, 0x01, 0xE0, 0x02, 0x80, 0x03, 0x01, 0x22, 0x00, 0x02,
            0x11, 0x01, 0x03, 0x11, 0x01,
        ]);
        bytes.extend_from_slice(&[0xFF, 0xD9]);
        let dims = image_dimensions("image/jpeg", &bytes).unwrap();
        assert_eq!(dims, ImageDimensions { width: 640, height: 480 });
    }

    #[test]
    fn fit_preserves_aspect_ratio() {
        let original = ImageDimensions { width: 4000, height: 1000 };
        let fitted = fit_within(original, 2000, 2000);
        assert_eq!(fitted, ImageDimensions { width: 2000, height: 500 });

        let small = ImageDimensions { width: 300, height: 200 };
        assert_eq!(fit_within(small, 2000, 2000), small);
    }

    #[test]
    fn normalized_image_descriptor_shape() {
        let bytes = png_header(4000, 2000);
        let descriptor = normalized_image("image/png", &bytes, 2000, 2000, 0).unwrap();
        assert_eq!(descriptor["originalWidth"], 4000);
        assert_eq!(descriptor["originalHeight"], 2000);
        assert_eq!(descriptor["width"], 2000);
        assert_eq!(descriptor["height"], 1000);
        assert_eq!(descriptor["rotationFromOriginal"], 0);
        assert!(descriptor["data"].is_string());
    }
}
