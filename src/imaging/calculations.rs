//! Pure calculation functions for cover-fit geometry.
//!
//! All functions here are pure and testable without any I/O or images.

use super::transform::TransformError;

/// A crop window inside a resized raster: top-left corner plus extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// How a source raster becomes an exact `target` raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverPlan {
    /// Window cut from the source before resizing. Only set when resizing
    /// the whole source would exceed the pixel budget.
    pub source_crop: Option<CropRect>,
    /// Dimensions of the aspect-preserving resize.
    pub resize: (u32, u32),
    /// Center crop applied after the resize; `None` when aspects already match.
    pub crop: Option<CropRect>,
}

/// Smallest aspect-preserving size that covers `target`.
///
/// Exactly one side matches the target unless the aspects are equal, in which
/// case the result is `target` itself. Ratios are compared by
/// cross-multiplication so 800x600 against 400x300 is recognized as equal
/// without float rounding.
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_cross = src_w as u64 * tgt_h as u64;
    let tgt_cross = tgt_w as u64 * src_h as u64;
    let src_aspect = src_w as f64 / src_h as f64;

    if src_cross > tgt_cross {
        // Wider: height matches, width overshoots
        let h = tgt_h;
        let w = (h as f64 * src_aspect).round() as u32;
        (w.max(tgt_w), h)
    } else if src_cross < tgt_cross {
        // Taller: width matches, height overshoots
        let w = tgt_w;
        let h = (w as f64 / src_aspect).round() as u32;
        (w, h.max(tgt_h))
    } else {
        (tgt_w, tgt_h)
    }
}

/// Center a `target`-sized window inside a `resized` raster.
///
/// Odd excess leaves the extra pixel on the right/bottom, matching integer
/// division of the offset.
pub fn center_crop(resized: (u32, u32), target: (u32, u32)) -> CropRect {
    let (res_w, res_h) = resized;
    let (tgt_w, tgt_h) = target;
    CropRect {
        x: res_w.saturating_sub(tgt_w) / 2,
        y: res_h.saturating_sub(tgt_h) / 2,
        width: tgt_w,
        height: tgt_h,
    }
}

/// Largest centered window of `source` with the aspect ratio of `target`.
///
/// The cut side is rounded to the nearest pixel and never drops below one.
pub fn aspect_window(source: (u32, u32), target: (u32, u32)) -> CropRect {
    let (src_w, src_h) = (source.0 as u64, source.1 as u64);
    let (tgt_w, tgt_h) = (target.0 as u64, target.1 as u64);

    let (width, height) = if src_w * tgt_h > tgt_w * src_h {
        let w = (2 * src_h * tgt_w + tgt_h) / (2 * tgt_h);
        (w.clamp(1, src_w), src_h)
    } else {
        let h = (2 * src_w * tgt_h + tgt_w) / (2 * tgt_w);
        (src_w, h.clamp(1, src_h))
    };
    // Both sides are clamped to the source, so they fit in u32.
    center_crop(source, (width as u32, height as u32))
}

/// Plan the cover-fit ("fill") transformation for a source and target size.
///
/// The source is normally resized to cover the target and then
/// center-cropped. When that intermediate raster would hold more than
/// `max_pixels`, the same center window is cut from the source first and
/// resized straight to `target`, so memory stays bounded by the source and
/// the target.
///
/// Both sides of both sizes must be non-zero; callers validate targets
/// before planning and decoders never produce empty rasters.
pub fn plan_cover(source: (u32, u32), target: (u32, u32), max_pixels: u64) -> CoverPlan {
    let resize = calculate_fill_dimensions(source, target);
    if resize.0 as u64 * resize.1 as u64 > max_pixels {
        return CoverPlan {
            source_crop: Some(aspect_window(source, target)),
            resize: target,
            crop: None,
        };
    }
    let crop = (resize != target).then(|| center_crop(resize, target));
    CoverPlan {
        source_crop: None,
        resize,
        crop,
    }
}

/// Verify that a crop window lies entirely within `bounds`.
///
/// The cover-fit math never produces an out-of-bounds window; this guard
/// turns an arithmetic slip into an error instead of a clamped image.
pub fn check_crop(rect: &CropRect, bounds: (u32, u32)) -> Result<(), TransformError> {
    let right = rect.x as u64 + rect.width as u64;
    let bottom = rect.y as u64 + rect.height as u64;
    if rect.width == 0 || rect.height == 0 || right > bounds.0 as u64 || bottom > bounds.1 as u64
    {
        return Err(TransformError::InvalidCrop {
            rect: *rect,
            bounds,
        });
    }
    Ok(())
}
