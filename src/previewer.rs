//! Per-request flow: path in, [`Reply`] out.
//!
//! ```text
//! parse ──► check dims ──► cache lookup ──hit──► 200 (X-From-Appcache)
//!                              │miss
//!                              ▼
//!                    join or lead the flight for this key
//!                              │leader
//!                              ▼
//!          re-check cache ► fetch origin ► transform ► store ► 200
//! ```
//!
//! Every failure becomes a reply with a fixed status and a short message;
//! the full error only goes to the log. Status mapping:
//!
//! | Failure | Status |
//! |---|---|
//! | Malformed path, non-integer or out-of-range dimensions | 400 |
//! | Cache read | 500 |
//! | Origin unreachable or timed out | 502 |
//! | Origin answered anything but 200 | that status |
//! | Decode, crop or encode | 500 |
//!
//! A rendition that can't be written to the cache is still served. The
//! write error is logged and the next request for it will fetch again.

use crate::cache::{CacheError, DiskCache};
use crate::imaging::{Format, TransformError, TransformOptions, transform, validate_target};
use crate::inflight::{InFlight, Role};
use crate::origin::{Origin, OriginError};
use crate::query::{Query, QueryError};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{self, JoinError};
use tracing::{debug, error, info, warn};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("rejected target: {0}")]
    Dimensions(#[source] TransformError),
    #[error("cache read failed: {0}")]
    CacheRead(#[source] CacheError),
    #[error(transparent)]
    Origin(#[from] OriginError),
    #[error("origin answered {0}")]
    OriginStatus(StatusCode),
    #[error("transform failed: {0}")]
    Transform(#[source] TransformError),
    #[error("background task failed: {0}")]
    Task(#[from] JoinError),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Query(_) | Self::Dimensions(_) => StatusCode::BAD_REQUEST,
            Self::Origin(_) => StatusCode::BAD_GATEWAY,
            Self::OriginStatus(status) => *status,
            Self::CacheRead(_) | Self::Transform(_) | Self::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show the client: no file paths, no internal detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::Query(e) => e.to_string(),
            Self::Dimensions(e) => e.to_string(),
            Self::CacheRead(_) => "cache unavailable".to_string(),
            Self::Origin(OriginError::Timeout { .. }) => "origin timed out".to_string(),
            Self::Origin(_) => "origin unreachable".to_string(),
            Self::OriginStatus(status) => format!("origin responded {status}"),
            Self::Transform(TransformError::UnsupportedFormat) => {
                "unsupported image format".to_string()
            }
            Self::Transform(_) => "failed to process image".to_string(),
            Self::Task(_) => "internal error".to_string(),
        }
    }
}

/// What goes back to the client. Cheap to clone: waiting callers of a
/// shared flight each get a copy.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Bytes,
    pub content_type: &'static str,
    pub from_cache: bool,
}

impl Reply {
    fn image(format: Option<Format>, body: Bytes, from_cache: bool) -> Self {
        Self {
            status: StatusCode::OK,
            body,
            content_type: format.map_or(OCTET_STREAM, Format::mime),
            from_cache,
        }
    }

    fn error(err: &ProxyError) -> Self {
        Self {
            status: err.status(),
            body: Bytes::from(err.public_message()),
            content_type: TEXT_PLAIN,
            from_cache: false,
        }
    }
}

/// Per-process knobs for the request flow.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Bound on one origin fetch, connect through last body byte.
    pub timeout: Duration,
    pub transform: TransformOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            transform: TransformOptions::default(),
        }
    }
}

/// Serves renditions from the cache, filling misses from the origin.
#[derive(Debug)]
pub struct Previewer<O> {
    cache: Arc<DiskCache>,
    origin: O,
    settings: Settings,
    flights: InFlight<Reply>,
}

impl<O: Origin> Previewer<O> {
    pub fn new(cache: Arc<DiskCache>, origin: O, settings: Settings) -> Self {
        Self {
            cache,
            origin,
            settings,
            flights: InFlight::new(),
        }
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    pub fn origin(&self) -> &O {
        &self.origin
    }

    /// Answer one request path. `headers` are the caller's request headers,
    /// passed on to the origin on a miss. Never fails: errors become replies.
    pub async fn handle(&self, path: &str, headers: &HeaderMap) -> Reply {
        match self.serve(path, headers).await {
            Ok(reply) => reply,
            Err(err) => reject(path, &err),
        }
    }

    async fn serve(&self, path: &str, headers: &HeaderMap) -> Result<Reply, ProxyError> {
        let query = Query::parse(path)?;
        validate_target(
            query.width,
            query.height,
            self.settings.transform.max_dimension,
        )
        .map_err(ProxyError::Dimensions)?;

        let key = query.cache_key();
        if let Some(reply) = self.lookup(&key).await? {
            debug!(key = %key, "served from cache");
            return Ok(reply);
        }

        let (reply, role) = self
            .flights
            .run(&key, async {
                match self.fill(&query, &key, headers).await {
                    Ok(reply) => reply,
                    Err(err) => reject(path, &err),
                }
            })
            .await;
        if role == Role::Follower {
            debug!(key = %key, status = %reply.status, "shared result of in-flight request");
        }
        Ok(reply)
    }

    /// Leader path for a miss.
    async fn fill(
        &self,
        query: &Query,
        key: &str,
        headers: &HeaderMap,
    ) -> Result<Reply, ProxyError> {
        // A flight that finished after our first lookup may have stored it.
        if let Some(reply) = self.lookup(key).await? {
            return Ok(reply);
        }

        let response = self
            .origin
            .fetch(&query.origin, headers, self.settings.timeout)
            .await?;
        if response.status != StatusCode::OK {
            return Err(ProxyError::OriginStatus(response.status));
        }

        let source = response.body;
        let source_len = source.len();
        let (width, height) = (query.width, query.height);
        let options = self.settings.transform;
        let rendition = task::spawn_blocking(move || transform(&source, width, height, &options))
            .await?
            .map_err(ProxyError::Transform)?;

        let body = Bytes::from(rendition.bytes);
        self.store(key, body.clone()).await;
        info!(
            key,
            origin = %query.origin,
            format = ?rendition.format,
            source_bytes = source_len,
            bytes = body.len(),
            "rendition created"
        );
        Ok(Reply::image(Some(rendition.format), body, false))
    }

    async fn lookup(&self, key: &str) -> Result<Option<Reply>, ProxyError> {
        let cache = Arc::clone(&self.cache);
        let key = key.to_string();
        let found = task::spawn_blocking(move || cache.get(&key))
            .await?
            .map_err(ProxyError::CacheRead)?;
        Ok(found.map(|bytes| Reply::image(Format::detect(&bytes), Bytes::from(bytes), true)))
    }

    async fn store(&self, key: &str, body: Bytes) {
        let cache = Arc::clone(&self.cache);
        let owned = key.to_string();
        match task::spawn_blocking(move || cache.set(&owned, &body)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(key, error = %e, "rendition not cached, serving anyway"),
            Err(e) => error!(key, error = %e, "cache write task failed, serving anyway"),
        }
    }
}

fn reject(path: &str, err: &ProxyError) -> Reply {
    let status = err.status();
    if status.is_server_error() && !matches!(err, ProxyError::OriginStatus(_)) {
        error!(path, %status, error = %err, "request failed");
    } else {
        warn!(path, %status, error = %err, "request rejected");
    }
    Reply::error(err)
}
