//! HTTP/1.1 front end: accept loop, method gate, response headers and the
//! access log.
//!
//! All request semantics live in [`Previewer`]; this module only turns its
//! [`Reply`] into a hyper response.

use crate::origin::Origin;
use crate::previewer::{Previewer, Reply};
use bytes::Bytes;
use http::header::{ALLOW, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Set to `true` on responses served straight from the cache.
pub const FROM_CACHE_HEADER: &str = "x-from-appcache";

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections on `listener` until `shutdown` resolves.
///
/// Each connection runs on its own task. Connections already accepted are
/// left to finish on their own when the loop stops.
pub async fn serve<O, S>(
    listener: TcpListener,
    previewer: Arc<Previewer<O>>,
    shutdown: S,
) -> io::Result<()>
where
    O: Origin + 'static,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
            () = &mut shutdown => {
                info!("shutting down, no longer accepting connections");
                return Ok(());
            }
        };

        let previewer = Arc::clone(&previewer);
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let previewer = Arc::clone(&previewer);
                async move { Ok::<_, Infallible>(respond(&previewer, req, peer).await) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}

async fn respond<O: Origin>(
    previewer: &Previewer<O>,
    req: Request<Incoming>,
    peer: SocketAddr,
) -> Response<Full<Bytes>> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = if method == Method::GET || method == Method::HEAD {
        into_response(previewer.handle(&path, req.headers()).await)
    } else {
        method_not_allowed()
    };

    info!(
        %method,
        %peer,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// hyper drops the body itself for HEAD, keeping Content-Length.
fn into_response(reply: Reply) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(reply.body));
    *response.status_mut() = reply.status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(reply.content_type));
    if reply.from_cache {
        headers.insert(
            HeaderName::from_static(FROM_CACHE_HEADER),
            HeaderValue::from_static("true"),
        );
    }
    response
}

fn method_not_allowed() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"method not allowed")));
    *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
    let headers = response.headers_mut();
    headers.insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
