use crate::error::ProxyError;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::header::LOCATION;
use hyper::{Response, StatusCode};
use rustls::ServerConfig;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::time::Duration;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Response body shared by every handler: either a streamed backend body or a
/// small locally generated one.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Locally generated responses.
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Creates a bad gateway response
    pub fn bad_gateway() -> Response<ProxyBody> {
        Self::error(StatusCode::BAD_GATEWAY, "Bad Gateway")
    }

    /// Creates a not found response with an empty body
    pub fn not_found() -> Response<ProxyBody> {
        Self::status(StatusCode::NOT_FOUND)
    }

    pub fn bad_request(message: &str) -> Response<ProxyBody> {
        Self::error(StatusCode::BAD_REQUEST, message)
    }

    /// Creates a `302 Found` pointing at `location`
    pub fn found(location: &str) -> Response<ProxyBody> {
        let mut response = Self::status(StatusCode::FOUND);
        match location.parse() {
            Ok(value) => {
                response.headers_mut().insert(LOCATION, value);
                response
            }
            Err(_) => {
                log::error!("Refusing to redirect to invalid location {:?}", location);
                Self::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }

    /// Creates a generic error response with custom status and message
    pub fn error(status: StatusCode, message: &str) -> Response<ProxyBody> {
        let mut response = Response::new(full(message.to_string()));
        *response.status_mut() = status;
        response
    }

    pub fn status(status: StatusCode) -> Response<ProxyBody> {
        let mut response = Response::new(empty());
        *response.status_mut() = status;
        response
    }
}

/// Delay before an accept loop retries after `err`. Errors that belong to one
/// aborted connection retry at once; anything else (out of file descriptors,
/// out of buffers) pauses the loop so it does not spin on a full backlog.
pub fn accept_backoff(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionRefused
        | ErrorKind::Interrupted => None,
        _ => Some(ACCEPT_ERROR_BACKOFF),
    }
}

/// Logs a failed `accept` and waits out the backoff. Accept loops call this and
/// carry on; a listener only stops with the process.
pub async fn recover_accept_error(listener: &str, err: &io::Error) {
    match accept_backoff(err) {
        Some(delay) => {
            log::error!(
                "{} failed to accept a connection, retrying in {:?}: {}",
                listener,
                delay,
                err
            );
            tokio::time::sleep(delay).await;
        }
        None => log::debug!("{} dropped a connection during accept: {}", listener, err),
    }
}

/// TLS configuration utilities
pub struct TlsConfig;

impl TlsConfig {
    /// Creates a TLS configuration from certificate and key files
    pub fn create_config(
        private_key_path: &str,
        cert_path: &str,
    ) -> Result<ServerConfig, ProxyError> {
        let mut private_key_file = BufReader::new(File::open(private_key_path).map_err(|e| {
            ProxyError::Config(format!(
                "Failed to open private key file {}: {}",
                private_key_path, e
            ))
        })?);

        let mut cert_file = BufReader::new(File::open(cert_path).map_err(|e| {
            ProxyError::Config(format!("Failed to open certificate file {}: {}", cert_path, e))
        })?);

        // Load certificate chain
        let certs = rustls_pemfile::certs(&mut cert_file)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ProxyError::Config(format!("Failed to read certificate: {}", e)))?;

        if certs.is_empty() {
            return Err(ProxyError::Config(format!("No valid certificate found in {}", cert_path)));
        }

        // PKCS#1, PKCS#8 or SEC1
        let private_key = rustls_pemfile::private_key(&mut private_key_file)
            .map_err(|e| ProxyError::Config(format!("Failed to read private key: {}", e)))?
            .ok_or_else(|| {
                ProxyError::Config(format!("No valid private key found in {}", private_key_path))
            })?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, private_key)
            .map_err(|e| ProxyError::Config(format!("Failed to create TLS config: {}", e)))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(config)
    }

    /// Validates TLS files exist and are readable before starting server
    pub fn validate_tls_files(private_key_path: &str, cert_path: &str) -> Result<(), ProxyError> {
        File::open(private_key_path)
            .map_err(|e| ProxyError::Config(format!("Private key file not accessible: {}", e)))?;

        File::open(cert_path)
            .map_err(|e| ProxyError::Config(format!("Certificate file not accessible: {}", e)))?;

        Ok(())
    }
}
