//! Image processing in pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Sniff** | `image::guess_format` |
//! | **Decode** | `image` JPEG / PNG / GIF decoders |
//! | **Cover-fit** | `resize_exact` (Triangle) + `crop_imm` |
//! | **Encode** | same format as the source, JPEG at quality 80 |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for cover-fit geometry (unit testable)
//! - **Parameters**: Quality, format tags and validated targets
//! - **Transform**: The bytes → bytes pipeline and its error type

mod calculations;
mod params;
mod transform;

pub use calculations::{CoverPlan, CropRect, plan_cover};
pub use params::{DEFAULT_MAX_DIMENSION, Format, Quality, Target, validate_target};
pub use transform::{Rendition, TransformError, TransformOptions, transform};
