use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "./config.json";

fn default_port() -> String {
    ":8080".to_string()
}

fn default_http_port() -> String {
    ":80".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutputType {
    Stdout,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTarget {
    #[serde(rename = "type")]
    pub output_type: LogOutputType,
    pub path: Option<PathBuf>,
    pub level: Option<LogLevel>,
}

/// Optional `logging` section. Without it the binary falls back to env_logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<LogLevel>,
    pub format: Option<LogFormat>,
    pub targets: Option<Vec<LogTarget>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Some(LogLevel::Info),
            format: Some(LogFormat::Text),
            targets: Some(vec![LogTarget {
                output_type: LogOutputType::Stdout,
                path: None,
                level: None,
            }]),
        }
    }
}

/// One routing rule: requests under `path` whose Host equals `domain` go to `address`.
///
/// An empty `domain` matches any host not claimed by an exact-domain entry
/// registered under the same path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub address: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub domain: String,
}

impl Entry {
    pub fn new(address: &str, path: &str, domain: &str) -> Self {
        Self {
            address: address.to_string(),
            path: path.to_string(),
            domain: domain.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Primary listen address, `host:port` or `:port`.
    #[serde(default = "default_port")]
    pub port: String,
    /// Listen address of the HTTP to HTTPS redirect listener.
    #[serde(default = "default_http_port")]
    pub http_port: String,
    #[serde(default)]
    pub entries: Vec<Entry>,
    /// Redirect target for unmatched requests; empty disables the redirect.
    #[serde(default)]
    pub noroute_route: String,
    #[serde(default)]
    pub https: bool,
    #[serde(default)]
    pub cert_path: String,
    #[serde(default)]
    pub private_key_path: String,
    #[serde(default)]
    pub always_https: bool,
    /// Host used in HTTPS redirects; empty means the request's own Host.
    #[serde(default)]
    pub default_https_domain: String,
    // Backend timeouts, unset means no timeout
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub backend_timeout_secs: Option<u64>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            http_port: default_http_port(),
            entries: Vec::new(),
            noroute_route: String::new(),
            https: false,
            cert_path: String::new(),
            private_key_path: String::new(),
            always_https: false,
            default_https_domain: String::new(),
            connect_timeout_secs: None,
            backend_timeout_secs: None,
            logging: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ProxyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("Failed to read {}: {}", path, e)))?;
        Self::from_json(&content)
            .map_err(|e| ProxyError::Config(format!("{} in {}", e, path)))
    }

    pub fn from_json(content: &str) -> Result<Self, ProxyError> {
        serde_json::from_str(content)
            .map_err(|e| ProxyError::Config(format!("Failed to decode JSON: {}", e)))
    }

    pub fn to_file(&self, path: &str) -> Result<(), ProxyError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProxyError::Config(format!("Failed to encode JSON: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The fallback redirect target, if one is configured.
    pub fn noroute_target(&self) -> Option<&str> {
        if self.noroute_route.is_empty() {
            None
        } else {
            Some(&self.noroute_route)
        }
    }

    /// Whether the HTTP to HTTPS redirect listener should run.
    pub fn redirect_enabled(&self) -> bool {
        self.https && self.always_https
    }
}

/// Turns a listen address into something `TcpListener::bind` accepts.
///
/// `:443` binds all interfaces, anything else is passed through.
pub fn normalize_listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}
