//! Plain-HTTP listener that sends every request to its HTTPS equivalent.
//!
//! Runs on its own port next to the TLS listener and never touches the route
//! table: method and path are irrelevant, every request gets a `302`.

use crate::common::{ProxyBody, ResponseBuilder, recover_accept_error};
use crate::config::normalize_listen_addr;
use crate::dispatcher::request_host;
use crate::error::ProxyError;
use hyper::body::Incoming;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct RedirectListener {
    addr: String,
    canonical_domain: Option<String>,
}

impl RedirectListener {
    /// An empty `canonical_domain` means "redirect to the request's own host".
    pub fn new(addr: &str, canonical_domain: &str) -> Self {
        Self {
            addr: normalize_listen_addr(addr),
            canonical_domain: if canonical_domain.is_empty() {
                None
            } else {
                Some(canonical_domain.to_string())
            },
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Accept loop on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        info!("HTTPS redirect listener on http://{}", listener.local_addr()?);
        let this = Arc::new(self);

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    recover_accept_error("Redirect listener", &e).await;
                    continue;
                }
            };
            let this = this.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                if let Err(err) = ServerBuilder::new()
                    .serve_connection(
                        io,
                        service_fn(move |req: Request<Incoming>| {
                            let this = this.clone();
                            async move { Ok::<_, Infallible>(this.handle(&req)) }
                        }),
                    )
                    .await
                {
                    error!("Redirect connection error from {}: {}", remote_addr, err);
                }
            });
        }
    }

    pub fn handle<B>(&self, req: &Request<B>) -> Response<ProxyBody> {
        match redirect_location(self.canonical_domain.as_deref(), req) {
            Some(location) => {
                debug!("Redirecting {} {} to {}", req.method(), req.uri(), location);
                ResponseBuilder::found(&location)
            }
            None => ResponseBuilder::bad_request("Missing Host header"),
        }
    }
}

/// `https://<domain><path-and-query>`, with the domain taken from configuration
/// or from the request's Host (port removed). `None` when neither is known.
pub fn redirect_location<B>(canonical_domain: Option<&str>, req: &Request<B>) -> Option<String> {
    let domain = match canonical_domain {
        Some(domain) => domain,
        None => strip_port(request_host(req)),
    };
    if domain.is_empty() {
        return None;
    }

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Some(format!("https://{}{}", domain, path_and_query))
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 literals keep their colons
    if let Some(end) = host.find(']') {
        return &host[..=end];
    }
    host.split(':').next().unwrap_or(host)
}
