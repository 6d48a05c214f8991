//! Fetching source images from the origin server.
//!
//! [`Origin`] is the seam between the request flow and the network: the
//! production [`HttpOrigin`] issues one bounded GET per call over a fresh
//! connection, while tests substitute a recording mock.
//!
//! The fetcher does not judge status codes. Any HTTP response, 404 and 500
//! included, comes back as an [`OriginResponse`]; only failing to get a
//! response at all is an [`OriginError`].

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName};
use http::StatusCode;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use url::Url;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum OriginError {
    #[error("can't build http client: {0}")]
    Client(#[source] BoxError),
    #[error("origin {url} did not answer within {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("origin {url} unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: BoxError,
    },
}

/// Status and full body of an origin response.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Anything that can GET a source image.
pub trait Origin: Send + Sync {
    /// Fetch `url`, forwarding `headers`, failing if no complete response
    /// arrives within `timeout`.
    fn fetch(
        &self,
        url: &Url,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> impl Future<Output = Result<OriginResponse, OriginError>> + Send;
}

/// Headers that describe the inbound hop or the proxy itself, never the
/// image request. Accept-Encoding goes too: the body must arrive as raw
/// image bytes.
fn dropped_headers() -> [HeaderName; 11] {
    [
        header::HOST,
        header::CONNECTION,
        HeaderName::from_static("keep-alive"),
        header::CONTENT_LENGTH,
        header::TRANSFER_ENCODING,
        header::TE,
        header::TRAILER,
        header::UPGRADE,
        header::PROXY_AUTHORIZATION,
        header::PROXY_AUTHENTICATE,
        header::ACCEPT_ENCODING,
    ]
}

/// Copy of `headers` minus hop-by-hop and proxy-specific entries.
/// Everything else is passed through untouched.
pub fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in dropped_headers() {
        out.remove(name);
    }
    out
}

/// reqwest-backed origin client.
///
/// Idle pooling is disabled and every request says `Connection: close`, so
/// each fetch gets its own connection and an origin can't pin a stale one.
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    client: reqwest::Client,
}

impl HttpOrigin {
    pub fn new() -> Result<Self, OriginError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| OriginError::Client(Box::new(e)))?;
        Ok(Self { client })
    }
}

impl Origin for HttpOrigin {
    async fn fetch(
        &self,
        url: &Url,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<OriginResponse, OriginError> {
        let fail = |e: reqwest::Error| {
            if e.is_timeout() {
                OriginError::Timeout {
                    url: url.to_string(),
                    timeout,
                }
            } else {
                OriginError::Unreachable {
                    url: url.to_string(),
                    source: Box::new(e),
                }
            }
        };

        let response = self
            .client
            .get(url.clone())
            .headers(forwardable(headers))
            .header(header::CONNECTION, "close")
            .timeout(timeout)
            .send()
            .await
            .map_err(fail)?;
        let status = response.status();
        let body = response.bytes().await.map_err(fail)?;
        Ok(OriginResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn forwardable_keeps_request_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"abc\""));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        headers.insert("x-custom", HeaderValue::from_static("1"));

        let out = forwardable(&headers);
        assert_eq!(out.len(), 4);
        assert_eq!(out[header::AUTHORIZATION], "Bearer t");
        assert_eq!(out["x-custom"], "1");
    }

    #[test]
    fn forwardable_drops_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("image/*"));

        let out = forwardable(&headers);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key(header::ACCEPT));
    }

    #[tokio::test]
    async fn unreachable_origin_is_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = Url::parse(&format!("http://127.0.0.1:{port}/a.jpg")).unwrap();
        let origin = HttpOrigin::new().unwrap();
        let err = origin
            .fetch(&url, &HeaderMap::new(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, OriginError::Unreachable { .. }));
    }
}
