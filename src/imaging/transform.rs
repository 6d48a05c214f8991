//! Bytes-in, bytes-out cover-fit transform.
//!
//! | Step | Crate / function |
//! |---|---|
//! | Sniff | `image::guess_format` (magic bytes, never the URL) |
//! | Decode | `image::load_from_memory_with_format` |
//! | Resize | `DynamicImage::resize_exact` with `Triangle` (bilinear), pixel-budgeted |
//! | Crop | `DynamicImage::crop_imm` (copies into a fresh buffer) |
//! | Encode | `JpegEncoder` at [`Quality`], PNG/GIF via `write_to` |

use super::calculations::{CropRect, check_crop, plan_cover};
use super::params::{Format, Quality, Target, validate_target};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("unsupported image format")]
    UnsupportedFormat,
    #[error("failed to decode {format:?} image: {source}")]
    DecodeFailed {
        format: Format,
        #[source]
        source: ImageError,
    },
    #[error("invalid target dimensions {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },
    #[error("crop window {rect:?} outside {bounds:?}")]
    InvalidCrop { rect: CropRect, bounds: (u32, u32) },
    #[error("failed to encode {format:?} image: {source}")]
    EncodeFailed {
        format: Format,
        #[source]
        source: ImageError,
    },
}

/// Options shared by every transform call.
#[derive(Debug, Clone, Copy)]
pub struct TransformOptions {
    pub quality: Quality,
    pub max_dimension: u32,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            max_dimension: super::params::DEFAULT_MAX_DIMENSION,
        }
    }
}

/// A finished rendition: encoded bytes plus the format they are in.
#[derive(Debug, Clone)]
pub struct Rendition {
    pub format: Format,
    pub bytes: Vec<u8>,
}

/// Produce a `width`×`height` rendition of `bytes`, preserving aspect and
/// cropping the excess from the center.
///
/// Dimensions are checked before the bytes are even sniffed, so a bad
/// target fails the same way whatever the payload. Output is re-encoded in
/// the source's own format. The function is pure: identical input and
/// options give identical output.
pub fn transform(
    bytes: &[u8],
    width: i64,
    height: i64,
    options: &TransformOptions,
) -> Result<Rendition, TransformError> {
    let target = validate_target(width, height, options.max_dimension)?;
    let format = Format::detect(bytes).ok_or(TransformError::UnsupportedFormat)?;
    let img = decode(bytes, format)?;
    let max_pixels = u64::from(options.max_dimension).pow(2);
    let filled = cover_fit(img, target, max_pixels)?;
    let bytes = encode(&filled, format, options.quality)?;
    Ok(Rendition { format, bytes })
}

/// Decode with the sniffed format's codec.
fn decode(bytes: &[u8], format: Format) -> Result<DynamicImage, TransformError> {
    image::load_from_memory_with_format(bytes, format.image_format())
        .map_err(|source| TransformError::DecodeFailed { format, source })
}

/// Resize-then-crop so the result is exactly `target`, keeping the
/// intermediate raster within `max_pixels`.
pub(crate) fn cover_fit(
    img: DynamicImage,
    target: Target,
    max_pixels: u64,
) -> Result<DynamicImage, TransformError> {
    let plan = plan_cover((img.width(), img.height()), target.as_tuple(), max_pixels);
    let img = match plan.source_crop {
        Some(window) => crop(&img, window)?,
        None => img,
    };
    let (resize_w, resize_h) = plan.resize;
    let resized = if (img.width(), img.height()) == plan.resize {
        img
    } else {
        img.resize_exact(resize_w, resize_h, FilterType::Triangle)
    };

    match plan.crop {
        Some(rect) => crop(&resized, rect),
        None => Ok(resized),
    }
}

fn crop(img: &DynamicImage, rect: CropRect) -> Result<DynamicImage, TransformError> {
    check_crop(&rect, (img.width(), img.height()))?;
    Ok(img.crop_imm(rect.x, rect.y, rect.width, rect.height))
}

fn encode(img: &DynamicImage, format: Format, quality: Quality) -> Result<Vec<u8>, TransformError> {
    let mut out = Cursor::new(Vec::new());
    let result = match format {
        // The JPEG encoder rejects alpha; flatten to RGB first.
        Format::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut out, quality.value() as u8);
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)
        }
        Format::Png | Format::Gif => img.write_to(&mut out, format.image_format()),
    };
    result.map_err(|source| TransformError::EncodeFailed { format, source })?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{gif_bytes, jpeg_bytes, png_bytes};
    use image::GenericImageView;

    fn opts() -> TransformOptions {
        TransformOptions::default()
    }

    fn dims_of(bytes: &[u8]) -> (u32, u32) {
        image::load_from_memory(bytes).unwrap().dimensions()
    }

    // =========================================================================
    // Format dispatch
    // =========================================================================

    #[test]
    fn jpeg_stays_jpeg() {
        let out = transform(&jpeg_bytes(800, 600), 50, 50, &opts()).unwrap();
        assert_eq!(out.format, Format::Jpeg);
        assert_eq!(Format::detect(&out.bytes), Some(Format::Jpeg));
        assert_eq!(dims_of(&out.bytes), (50, 50));
    }

    #[test]
    fn png_stays_png() {
        let out = transform(&png_bytes(120, 40), 30, 30, &opts()).unwrap();
        assert_eq!(out.format, Format::Png);
        assert_eq!(dims_of(&out.bytes), (30, 30));
    }

    #[test]
    fn gif_stays_gif() {
        let out = transform(&gif_bytes(40, 120), 20, 10, &opts()).unwrap();
        assert_eq!(out.format, Format::Gif);
        assert_eq!(dims_of(&out.bytes), (20, 10));
    }

    #[test]
    fn unsupported_bytes_rejected() {
        let err = transform(b"<html>404</html>", 50, 50, &opts()).unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedFormat));
    }

    #[test]
    fn truncated_jpeg_fails_decode() {
        let mut bytes = jpeg_bytes(64, 64);
        bytes.truncate(40);
        let err = transform(&bytes, 10, 10, &opts()).unwrap_err();
        assert!(matches!(err, TransformError::DecodeFailed { .. }));
    }

    // =========================================================================
    // Dimensions
    // =========================================================================

    #[test]
    fn non_positive_dimensions_rejected() {
        let src = png_bytes(10, 10);
        for (w, h) in [(0, 0), (-1000, -1200), (10, 0), (0, 10)] {
            let err = transform(&src, w, h, &opts()).unwrap_err();
            assert!(
                matches!(err, TransformError::InvalidDimensions { .. }),
                "{w}x{h} gave {err:?}"
            );
        }
    }

    #[test]
    fn dimensions_checked_before_format() {
        let err = transform(b"not an image", 0, 10, &opts()).unwrap_err();
        assert!(matches!(err, TransformError::InvalidDimensions { .. }));
    }

    #[test]
    fn oversize_dimensions_rejected() {
        let options = TransformOptions {
            max_dimension: 100,
            ..opts()
        };
        let err = transform(&png_bytes(10, 10), 101, 10, &options).unwrap_err();
        assert!(matches!(err, TransformError::InvalidDimensions { .. }));
    }

    #[test]
    fn output_bounds_match_target() {
        let src = png_bytes(800, 600);
        for (w, h) in [(300, 200), (1600, 1200), (1, 1), (50, 500), (500, 50), (400, 300)] {
            let out = transform(&src, w, h, &opts()).unwrap();
            assert_eq!(dims_of(&out.bytes), (w as u32, h as u32));
        }
    }

    #[test]
    fn transform_is_deterministic() {
        let src = jpeg_bytes(640, 480);
        let a = transform(&src, 100, 150, &opts()).unwrap();
        let b = transform(&src, 100, 150, &opts()).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    // =========================================================================
    // Cover-fit content
    // =========================================================================

    #[test]
    fn crop_takes_center_of_wide_source() {
        // Left third red, middle third green, right third blue.
        let img = image::RgbImage::from_fn(300, 100, |x, _| match x {
            0..100 => image::Rgb([255, 0, 0]),
            100..200 => image::Rgb([0, 255, 0]),
            _ => image::Rgb([0, 0, 255]),
        });
        let target = Target {
            width: 100,
            height: 100,
        };
        let out = cover_fit(DynamicImage::ImageRgb8(img), target, u64::MAX).unwrap();
        assert_eq!(out.dimensions(), (100, 100));
        let center = out.to_rgb8().get_pixel(50, 50).0;
        assert_eq!(center, [0, 255, 0]);
    }

    #[test]
    fn extreme_aspect_source_stays_within_budget() {
        // A 1000x1 strip covering 10x10000 must not build a 10,000,000-wide raster.
        let out = transform(&png_bytes(1000, 1), 10, 10_000, &opts()).unwrap();
        assert_eq!(dims_of(&out.bytes), (10, 10_000));
    }

    #[test]
    fn source_cut_keeps_center_content() {
        let img = image::RgbImage::from_fn(300, 100, |x, _| match x {
            0..100 => image::Rgb([255, 0, 0]),
            100..200 => image::Rgb([0, 255, 0]),
            _ => image::Rgb([0, 0, 255]),
        });
        let target = Target {
            width: 100,
            height: 100,
        };
        // Budget below the 300x100 fill forces the cut-first path.
        let out = cover_fit(DynamicImage::ImageRgb8(img), target, 20_000).unwrap();
        assert_eq!(out.dimensions(), (100, 100));
        assert_eq!(out.to_rgb8().get_pixel(50, 50).0, [0, 255, 0]);
    }

    #[test]
    fn crop_copies_into_exact_buffer() {
        let img = DynamicImage::new_rgb8(67, 50);
        let rect = CropRect {
            x: 8,
            y: 0,
            width: 50,
            height: 50,
        };
        let out = crop(&img, rect).unwrap();
        assert_eq!(out.dimensions(), (50, 50));
    }

    #[test]
    fn crop_out_of_bounds_is_error_not_clamp() {
        let img = DynamicImage::new_rgb8(1000, 1000);
        let rect = CropRect {
            x: 100,
            y: 0,
            width: 1900,
            height: 1000,
        };
        assert!(matches!(
            crop(&img, rect),
            Err(TransformError::InvalidCrop { .. })
        ));
    }
}
