//! Request path → rendition query.
//!
//! The path shape is `/<verb>/<width>/<height>/<host-and-path...>`:
//!
//! ```text
//! /fill/300/200/images.example.com:8080/photos/cat.jpg
//!  ^^^^ ^^^ ^^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^
//!  verb  w   h  origin, fetched as http://<that>
//! ```
//!
//! Width and height only need to be base-10 integers here. Whether they are
//! usable sizes is decided by [`crate::imaging::validate_target`].

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::{Position, Url};

/// The only operation the proxy knows: cover-fit to exact dimensions.
pub const VERB_FILL: &str = "fill";

/// Scheme prepended to the origin segments.
const ORIGIN_SCHEME: &str = "http://";

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("malformed query: {0}")]
    Malformed(&'static str),
    #[error("{axis} must be an integer, got {value:?}")]
    DimensionSyntax { axis: &'static str, value: String },
    #[error("invalid origin url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// A parsed rendition request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub width: i64,
    pub height: i64,
    pub origin: Url,
}

impl Query {
    /// Parse a request path (no query string) into a [`Query`].
    pub fn parse(path: &str) -> Result<Self, QueryError> {
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() < 5 {
            return Err(QueryError::Malformed(
                "expected /fill/<width>/<height>/<origin>",
            ));
        }
        if segments[1] != VERB_FILL {
            return Err(QueryError::Malformed("unsupported operation, expected fill"));
        }
        let width = parse_dimension("width", segments[2])?;
        let height = parse_dimension("height", segments[3])?;

        let raw = format!("{ORIGIN_SCHEME}{}", segments[4..].join("/"));
        let origin = Url::parse(&raw).map_err(|source| QueryError::InvalidUrl {
            url: raw.clone(),
            source,
        })?;
        if origin.host_str().is_none_or(str::is_empty) {
            return Err(QueryError::InvalidUrl {
                url: raw,
                source: url::ParseError::EmptyHost,
            });
        }

        Ok(Self {
            width,
            height,
            origin,
        })
    }

    /// Cache key for this rendition: `<w>x<h>-<sha256(host[:port]/path)>`.
    ///
    /// Identical (dimensions, source) pairs always map to the same key;
    /// the digest keeps arbitrary origin paths down to one safe file name.
    pub fn cache_key(&self) -> String {
        let source = &self.origin[Position::BeforeHost..Position::AfterPath];
        let digest = Sha256::digest(source.as_bytes());
        format!("{}x{}-{:x}", self.width, self.height, digest)
    }
}

fn parse_dimension(axis: &'static str, value: &str) -> Result<i64, QueryError> {
    value.parse().map_err(|_| QueryError::DimensionSyntax {
        axis,
        value: value.to_string(),
    })
}
