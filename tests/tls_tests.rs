//! TLS termination and the HTTPS redirect listener started by `ProxyServer::run`.

use bytes::Bytes;
use gatekeeper::config::{Config, Entry};
use gatekeeper::proxy::ProxyServer;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::{HOST, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rcgen::{CertifiedKey, generate_simple_self_signed};
use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, ServerName};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;

/// Self-signed certificate for `localhost`, written out as PEM files.
struct TestCert {
    der: CertificateDer<'static>,
    cert_file: NamedTempFile,
    key_file: NamedTempFile,
}

impl TestCert {
    fn generate() -> Self {
        let CertifiedKey { cert, signing_key } =
            generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

        let mut cert_file = NamedTempFile::new().unwrap();
        cert_file.write_all(cert.pem().as_bytes()).unwrap();
        let mut key_file = NamedTempFile::new().unwrap();
        key_file.write_all(signing_key.serialize_pem().as_bytes()).unwrap();

        Self {
            der: cert.der().clone(),
            cert_file,
            key_file,
        }
    }

    fn apply(&self, config: &mut Config) {
        config.https = true;
        config.cert_path = self.cert_file.path().to_str().unwrap().to_string();
        config.private_key_path = self.key_file.path().to_str().unwrap().to_string();
    }
}

async fn start_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let body = format!("backend saw {}", req.uri());
                    Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(body))))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// GET over TLS, trusting only `cert`.
async fn https_get(
    addr: SocketAddr,
    cert: &CertificateDer<'static>,
    path: &str,
) -> (StatusCode, String) {
    let mut roots = RootCertStore::empty();
    roots.add(cert.clone()).unwrap();
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let tcp = TcpStream::connect(addr).await.unwrap();
    let domain = ServerName::try_from("localhost").unwrap();
    let tls = connector.connect(domain, tcp).await.unwrap();

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
        .await
        .unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = Request::builder()
        .uri(path)
        .header(HOST, "a.com")
        .body(Empty::<Bytes>::new())
        .unwrap();
    let response = sender.send_request(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

async fn http_get(addr: SocketAddr, path: &str, host: &str) -> Response<Incoming> {
    let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();
    let req = Request::builder()
        .uri(format!("http://{}{}", addr, path))
        .header(HOST, host)
        .body(Empty::new())
        .unwrap();
    client.request(req).await.unwrap()
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..50 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("nothing listening on {}", addr);
}

#[tokio::test]
async fn test_tls_termination() {
    let cert = TestCert::generate();
    let backend = start_backend().await;

    let mut config = Config {
        entries: vec![Entry::new(&format!("http://{}", backend), "/api", "")],
        ..Config::default()
    };
    cert.apply(&mut config);

    let server = ProxyServer::from_config(&config).unwrap();
    assert!(server.is_tls());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));

    let (status, body) = https_get(addr, &cert.der, "/api/users?id=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "backend saw /users?id=7");
}

#[tokio::test]
async fn test_plain_http_rejected_on_tls_port() {
    let cert = TestCert::generate();
    let backend = start_backend().await;

    let mut config = Config {
        entries: vec![Entry::new(&format!("http://{}", backend), "/", "")],
        ..Config::default()
    };
    cert.apply(&mut config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(ProxyServer::from_config(&config).unwrap().serve(listener));

    let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();
    let req = Request::builder()
        .uri(format!("http://{}/", addr))
        .body(Empty::new())
        .unwrap();
    assert!(client.request(req).await.is_err());

    // The failed handshake does not affect other connections
    let (status, _) = https_get(addr, &cert.der, "/").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_run_starts_redirect_listener() {
    let cert = TestCert::generate();
    let backend = start_backend().await;
    let https_port = free_port();
    let http_port = free_port();

    let mut config = Config {
        port: format!("127.0.0.1:{}", https_port),
        http_port: format!("127.0.0.1:{}", http_port),
        entries: vec![Entry::new(&format!("http://{}", backend), "/", "")],
        always_https: true,
        default_https_domain: "example.com".to_string(),
        ..Config::default()
    };
    cert.apply(&mut config);

    let server = ProxyServer::from_config(&config).unwrap();
    assert_eq!(
        server.redirect_listener().map(|r| r.addr()),
        Some(config.http_port.as_str())
    );
    tokio::spawn(server.run());

    let https_addr: SocketAddr = config.port.parse().unwrap();
    let http_addr: SocketAddr = config.http_port.parse().unwrap();
    wait_for_listener(https_addr).await;
    wait_for_listener(http_addr).await;

    let response = http_get(http_addr, "/cart?item=3", "shop.example.org").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "https://example.com/cart?item=3");

    let (status, body) = https_get(https_addr, &cert.der, "/cart").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "backend saw /cart");
}
