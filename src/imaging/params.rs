//! Parameter types for the transform pipeline.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 80). Clamped on construction.
//! - [`Format`]: The three raster formats the proxy decodes and re-encodes.
//! - [`Target`]: Validated output dimensions for a cover-fit.

use super::transform::TransformError;

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
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

/// Image container format, detected from content and reused for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Jpeg,
    Png,
    Gif,
}

impl Format {
    /// Sniff the format from leading bytes. Returns `None` for anything
    /// that is not JPEG, PNG or GIF.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Gif => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }

    pub(crate) fn image_format(self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
            Self::Gif => image::ImageFormat::Gif,
        }
    }
}

/// Output dimensions that passed [`validate_target`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub width: u32,
    pub height: u32,
}

impl Target {
    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Largest side accepted unless configured otherwise.
pub const DEFAULT_MAX_DIMENSION: u32 = 10_000;

/// Check requested dimensions: both must be positive and at most `max`.
///
/// This is the single place where dimension semantics live; the query
/// parser only checks integer syntax.
pub fn validate_target(width: i64, height: i64, max: u32) -> Result<Target, TransformError> {
    let in_range = |v: i64| v > 0 && v <= max as i64;
    if !in_range(width) || !in_range(height) {
        return Err(TransformError::InvalidDimensions { width, height });
    }
    Ok(Target {
        width: width as u32,
        height: height as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_80() {
        assert_eq!(Quality::default().value(), 80);
    }

    #[test]
    fn detect_by_magic_bytes() {
        assert_eq!(Format::detect(b"\xFF\xD8\xFF\xE0rest"), Some(Format::Jpeg));
        assert_eq!(
            Format::detect(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
            Some(Format::Png)
        );
        assert_eq!(Format::detect(b"GIF89a\x01\x00"), Some(Format::Gif));
    }

    #[test]
    fn detect_rejects_unsupported() {
        assert_eq!(Format::detect(b"<html><body>not found</body></html>"), None);
        assert_eq!(Format::detect(b"BM\x00\x00"), None);
        assert_eq!(Format::detect(b""), None);
    }

    #[test]
    fn mime_types() {
        assert_eq!(Format::Jpeg.mime(), "image/jpeg");
        assert_eq!(Format::Png.mime(), "image/png");
        assert_eq!(Format::Gif.mime(), "image/gif");
    }

    #[test]
    fn validate_target_accepts_positive() {
        let t = validate_target(300, 200, DEFAULT_MAX_DIMENSION).unwrap();
        assert_eq!(t.as_tuple(), (300, 200));
    }

    #[test]
    fn validate_target_rejects_zero_and_negative() {
        for (w, h) in [(0, 10), (10, 0), (-1000, -1200), (-1, 5)] {
            assert!(matches!(
                validate_target(w, h, DEFAULT_MAX_DIMENSION),
                Err(TransformError::InvalidDimensions { .. })
            ));
        }
    }

    #[test]
    fn validate_target_rejects_above_ceiling() {
        assert!(validate_target(101, 50, 100).is_err());
        assert!(validate_target(100, 100, 100).is_ok());
    }
}
