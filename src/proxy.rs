use crate::common::{ProxyBody, TlsConfig, recover_accept_error};
use crate::config::{Config, normalize_listen_addr};
use crate::config_validation::ConfigValidator;
use crate::dispatcher::{Dispatcher, MatchResult, request_host};
use crate::error::ProxyError;
use crate::fallback::FallbackHandler;
use crate::forwarder::Forwarder;
use crate::redirect::RedirectListener;
use crate::route_table::RouteTable;
use hyper::body::Incoming;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Per-request pipeline: dispatch, then forward or fall back.
pub struct Gateway {
    dispatcher: Dispatcher,
    forwarder: Forwarder,
    fallback: FallbackHandler,
}

impl Gateway {
    pub fn new(dispatcher: Dispatcher, forwarder: Forwarder, fallback: FallbackHandler) -> Self {
        Self {
            dispatcher,
            forwarder,
            fallback,
        }
    }

    pub async fn handle(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        // Owned copies, the request itself moves into the forwarder
        let path = req.uri().path().to_string();
        let host = request_host(&req).to_string();

        match self.dispatcher.dispatch(&path, &host) {
            MatchResult::Matched {
                backend,
                remainder_path,
            } => self.forwarder.forward(backend, remainder_path, req).await,
            MatchResult::NoMatch => self.fallback.handle_unmatched(&req),
        }
    }
}

/// Main listener plus the optional HTTPS redirect listener.
///
/// Everything that can fail because of configuration is checked in
/// [`ProxyServer::from_config`], before any socket is bound.
pub struct ProxyServer {
    gateway: Arc<Gateway>,
    addr: String,
    tls: Option<TlsAcceptor>,
    redirect: Option<RedirectListener>,
}

impl ProxyServer {
    pub fn from_config(config: &Config) -> Result<Self, ProxyError> {
        info!("Creating proxy server for {} entries", config.entries.len());

        let warnings = ConfigValidator::new(config).validate().into_result()?;
        for warning in &warnings {
            warn!("{}", warning);
        }

        let table = RouteTable::build(&config.entries)?;
        debug!("Route table compiled with {} path prefixes", table.len());

        let fallback = FallbackHandler::new(config.noroute_target())?;
        if let Some(target) = fallback.redirect_target() {
            info!("Unmatched requests redirect to {}", target);
        }

        let tls = if config.https {
            debug!("Loading TLS certificate from: {}", config.cert_path);
            debug!("Loading TLS private key from: {}", config.private_key_path);
            let tls_config =
                TlsConfig::create_config(&config.private_key_path, &config.cert_path)?;
            Some(TlsAcceptor::from(Arc::new(tls_config)))
        } else {
            None
        };

        let redirect = if config.redirect_enabled() {
            Some(RedirectListener::new(&config.http_port, &config.default_https_domain))
        } else {
            None
        };

        let gateway = Gateway::new(
            Dispatcher::new(Arc::new(table)),
            Forwarder::new(config.connect_timeout_secs, config.backend_timeout_secs),
            fallback,
        );

        Ok(Self {
            gateway: Arc::new(gateway),
            addr: normalize_listen_addr(&config.port),
            tls,
            redirect,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn redirect_listener(&self) -> Option<&RedirectListener> {
        self.redirect.as_ref()
    }

    /// Binds the configured addresses and serves until the process stops.
    pub async fn run(mut self) -> Result<(), ProxyError> {
        if let Some(redirect) = self.redirect.take() {
            let listener = TcpListener::bind(redirect.addr()).await?;
            tokio::spawn(async move {
                if let Err(e) = redirect.serve(listener).await {
                    error!("Redirect listener stopped: {}", e);
                }
            });
        }

        info!("Binding listener to: {}", self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener).await
    }

    /// Accept loop on an already bound listener, TLS or plain depending on config.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        info!("Reverse proxy listening on: {}://{}", scheme, listener.local_addr()?);

        loop {
            let (tcp_stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    recover_accept_error("Reverse proxy", &e).await;
                    continue;
                }
            };
            let gateway = self.gateway.clone();

            match &self.tls {
                Some(acceptor) => {
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        match acceptor.accept(tcp_stream).await {
                            Ok(tls_stream) => {
                                serve_connection(TokioIo::new(tls_stream), gateway, remote_addr)
                                    .await
                            }
                            Err(e) => warn!(
                                "Error establishing TLS connection from {}: {}",
                                remote_addr, e
                            ),
                        }
                    });
                }
                None => {
                    tokio::spawn(serve_connection(TokioIo::new(tcp_stream), gateway, remote_addr));
                }
            }
        }
    }
}

async fn serve_connection<I>(io: I, gateway: Arc<Gateway>, remote_addr: std::net::SocketAddr)
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let gateway = gateway.clone();
        async move { Ok::<_, Infallible>(gateway.handle(req).await) }
    });

    if let Err(e) = ServerBuilder::new()
        .keep_alive(true)
        .serve_connection(io, service)
        .await
    {
        error!("Error serving connection from {}: {}", remote_addr, e);
    }
}
