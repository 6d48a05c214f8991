//! # thumbproxy
//!
//! An HTTP proxy that produces resized, center-cropped renditions of images
//! hosted elsewhere, and keeps the most recently used ones on disk.
//!
//! ```text
//! GET /fill/300/200/images.example.com/photos/cat.jpg
//!       │
//!       ├─ cached?  ──yes──► 200 + X-From-Appcache: true
//!       │
//!       └─ no ─► GET http://images.example.com/photos/cat.jpg
//!                 ─► cover-fit to 300×200 ─► store ─► 200
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`query`] | Request path → width, height and origin URL; cache key derivation |
//! | [`cache`] | Capacity-bounded LRU of rendition files, with an arena linked list for recency |
//! | [`imaging`] | Pure-Rust cover-fit transform: sniff, decode, resize, crop, encode |
//! | [`origin`] | The `Origin` seam and its reqwest client with per-fetch timeout |
//! | [`inflight`] | Collapses concurrent identical misses into one origin fetch |
//! | [`previewer`] | The request state machine and error → status mapping |
//! | [`server`] | hyper accept loop, method gate and access log |
//! | [`config`] | TOML config merged over stock defaults and validated |
//! | [`logging`] | `tracing` subscriber from the `[log]` section |
//!
//! # Design Decisions
//!
//! ## Dimensions Are Checked Before Any I/O
//!
//! Width and height are only parsed as integers by [`query`]. Whether they
//! are usable is decided once, by [`imaging::validate_target`], which both
//! the request flow (immediately after parsing) and [`imaging::transform`]
//! call. A request for `0×50` is a 400 that never reaches the cache or the
//! origin.
//!
//! ## Availability Over Caching
//!
//! A rendition that can't be written to disk is still served; the error is
//! logged. Origin failures and non-200 answers are never cached, so the next
//! request tries again.
//!
//! ## Blocking Work Off the Reactor
//!
//! Cache file I/O and image decoding run on tokio's blocking pool. The cache
//! guards its index with one `parking_lot` mutex held for the whole of each
//! call, and that lock is never held across an `await`.

pub mod cache;
pub mod config;
pub mod imaging;
pub mod inflight;
pub mod logging;
pub mod origin;
pub mod previewer;
pub mod query;
pub mod server;

#[cfg(test)]
pub(crate) mod test_helpers;
