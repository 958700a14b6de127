//! Forwards matched requests to their backend origin.
//!
//! The outbound request keeps the inbound method, headers and streaming body.
//! Only the scheme, authority, path and `Host` header are rewritten. The backend
//! response is handed back untouched; any failure to reach the backend turns into
//! a `502 Bad Gateway` for this request alone.

use crate::common::{ProxyBody, ResponseBuilder};
use crate::error::ProxyError;
use crate::route_table::Backend;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HOST, HeaderValue};
use hyper::{Request, Response, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::{error, info};
use tokio::time::{Duration, timeout};

pub struct Forwarder {
    client: Client<HttpsConnector<HttpConnector>, Incoming>,
    backend_timeout: Option<Duration>,
}

impl Forwarder {
    /// Both timeouts are optional; `None` waits as long as the transport does.
    pub fn new(connect_timeout_secs: Option<u64>, backend_timeout_secs: Option<u64>) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(connect_timeout_secs.map(Duration::from_secs));

        Self {
            client: Client::builder(TokioExecutor::new())
                .build(HttpsConnector::new_with_connector(http)),
            backend_timeout: backend_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Sends `req` to `backend` with its path replaced by `remainder_path` and
    /// returns the backend response, or a 502 when the backend cannot be reached.
    pub async fn forward(
        &self,
        backend: &Backend,
        remainder_path: &str,
        req: Request<Incoming>,
    ) -> Response<ProxyBody> {
        info!(
            "{} {} host={} -> {}{}",
            req.method(),
            req.uri().path(),
            crate::dispatcher::request_host(&req),
            backend,
            remainder_path
        );

        match self.send(backend, remainder_path, req).await {
            Ok(response) => response.map(|body| body.boxed()),
            Err(e) => {
                error!("Forwarding to {} failed: {}", backend, e);
                ResponseBuilder::bad_gateway()
            }
        }
    }

    async fn send(
        &self,
        backend: &Backend,
        remainder_path: &str,
        req: Request<Incoming>,
    ) -> Result<Response<Incoming>, ProxyError> {
        let outbound = rewrite_request(backend, remainder_path, req)?;
        let request = self.client.request(outbound);

        let result = match self.backend_timeout {
            Some(limit) => timeout(limit, request).await.map_err(|_| {
                ProxyError::BackendUnreachable(format!("no response within {:?}", limit))
            })?,
            None => request.await,
        };

        result.map_err(|e| ProxyError::BackendUnreachable(e.to_string()))
    }
}

/// Points `req` at `backend`, replacing the path with `remainder_path` and keeping
/// the query string. Headers other than `Host` pass through as they are.
pub fn rewrite_request<B>(
    backend: &Backend,
    remainder_path: &str,
    req: Request<B>,
) -> Result<Request<B>, ProxyError> {
    let (mut parts, body) = req.into_parts();

    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{}?{}", remainder_path, query),
        None => remainder_path.to_string(),
    };

    parts.uri = Uri::builder()
        .scheme(backend.scheme().clone())
        .authority(backend.authority().clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::Uri(format!("Failed to build upstream URI: {}", e)))?;

    let host = HeaderValue::from_str(backend.authority().as_str())
        .map_err(|e| ProxyError::Uri(format!("Invalid Host header: {}", e)))?;
    parts.headers.insert(HOST, host);

    // The client picks the wire version from the connection
    parts.version = hyper::Version::HTTP_11;

    Ok(Request::from_parts(parts, body))
}
