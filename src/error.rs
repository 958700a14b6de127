use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("URI error: {0}")]
    Uri(String),
}
