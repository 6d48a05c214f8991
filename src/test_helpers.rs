//! Shared test utilities: in-memory images and a scripted origin.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let origin = MockOrigin::new()
//!     .respond("http://example.com/a.jpg", StatusCode::OK, jpeg_bytes(800, 600));
//! // ... run requests ...
//! assert_eq!(origin.call_count(), 1);
//! ```

use crate::origin::{Origin, OriginError, OriginResponse};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;
use url::Url;

// =========================================================================
// Images
// =========================================================================

/// Gradient so resizes and crops produce non-uniform output.
fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    })
}

fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(DynamicImage::ImageRgb8(gradient(width, height)), ImageFormat::Jpeg)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(DynamicImage::ImageRgb8(gradient(width, height)), ImageFormat::Png)
}

pub fn gif_bytes(width: u32, height: u32) -> Vec<u8> {
    let rgba = RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 64, 255])
    });
    encode(DynamicImage::ImageRgba8(rgba), ImageFormat::Gif)
}

/// Decode and return `(width, height)`.
pub fn dimensions_of(bytes: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(bytes).unwrap();
    (img.width(), img.height())
}

// =========================================================================
// Origin
// =========================================================================

#[derive(Debug, Clone)]
enum Canned {
    Respond(StatusCode, Bytes),
    Unreachable,
}

/// One recorded fetch.
#[derive(Debug, Clone)]
pub struct RecordedFetch {
    pub url: String,
    pub headers: HeaderMap,
}

/// Origin that answers from a table and records every call.
///
/// Unknown URLs get a 404. An optional delay is applied before answering,
/// which keeps concurrent requests overlapping in dedupe tests.
#[derive(Debug, Default)]
pub struct MockOrigin {
    routes: HashMap<String, Canned>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedFetch>>,
}

impl MockOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url: &str, status: StatusCode, body: impl Into<Bytes>) -> Self {
        self.routes
            .insert(url.to_string(), Canned::Respond(status, body.into()));
        self
    }

    pub fn unreachable(mut self, url: &str) -> Self {
        self.routes.insert(url.to_string(), Canned::Unreachable);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedFetch> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Origin for MockOrigin {
    async fn fetch(
        &self,
        url: &Url,
        headers: &HeaderMap,
        _timeout: Duration,
    ) -> Result<OriginResponse, OriginError> {
        self.calls.lock().push(RecordedFetch {
            url: url.to_string(),
            headers: headers.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.routes.get(url.as_str()).cloned() {
            Some(Canned::Respond(status, body)) => Ok(OriginResponse { status, body }),
            Some(Canned::Unreachable) => Err(OriginError::Unreachable {
                url: url.to_string(),
                source: "connection refused".into(),
            }),
            None => Ok(OriginResponse {
                status: StatusCode::NOT_FOUND,
                body: Bytes::from_static(b"not found"),
            }),
        }
    }
}
