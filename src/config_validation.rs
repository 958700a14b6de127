//! Startup validation of the proxy configuration.
//!
//! Collects every problem in one pass so a broken config file reports all of its
//! errors at once. Runs before the route table is compiled and before any
//! listener binds.

use crate::common::TlsConfig;
use crate::config::{Config, normalize_listen_addr};
use crate::error::ProxyError;
use crate::route_table::{Backend, ignored_address_path};

/// Validation result
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
            warnings: vec![],
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Joins all errors into one `ProxyError::Config`, or hands back the warnings.
    pub fn into_result(self) -> Result<Vec<String>, ProxyError> {
        if self.is_valid {
            Ok(self.warnings)
        } else {
            Err(ProxyError::Config(self.errors.join("; ")))
        }
    }
}

pub struct ConfigValidator<'a> {
    config: &'a Config,
}

impl<'a> ConfigValidator<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::success();

        self.validate_entries(&mut result);
        self.validate_listen_addresses(&mut result);
        self.validate_tls(&mut result);

        result
    }

    fn validate_entries(&self, result: &mut ValidationResult) {
        if self.config.entries.is_empty() {
            result.add_error("No entries configured".to_string());
            return;
        }

        for (index, entry) in self.config.entries.iter().enumerate() {
            match Backend::from_address(&entry.address) {
                Ok(_) => {
                    if let Some(path) = ignored_address_path(&entry.address) {
                        result.add_warning(format!(
                            "Entry #{} address {} has path '{}', which is ignored; \
                             requests are forwarded to the matched remainder",
                            index, entry.address, path
                        ));
                    }
                }
                Err(e) => result.add_error(format!(
                    "Entry #{} has invalid address '{}': {}",
                    index, entry.address, e
                )),
            }

            if entry.domain.contains('/') {
                result.add_warning(format!(
                    "Entry #{} domain '{}' contains '/', it is compared against \
                     the Host header and will never match",
                    index, entry.domain
                ));
            }
        }
    }

    fn validate_listen_addresses(&self, result: &mut ValidationResult) {
        if let Err(e) = validate_listen_addr(&self.config.port) {
            result.add_error(format!("port: {}", e));
        }

        if self.config.redirect_enabled() {
            if let Err(e) = validate_listen_addr(&self.config.http_port) {
                result.add_error(format!("http_port: {}", e));
            } else if listen_addrs_conflict(&self.config.port, &self.config.http_port) {
                result.add_error(format!(
                    "port {} and http_port {} bind the same address",
                    self.config.port, self.config.http_port
                ));
            }
        }
    }

    fn validate_tls(&self, result: &mut ValidationResult) {
        let config = self.config;

        if !config.https {
            if config.always_https {
                result.add_warning(
                    "always_https is ignored because https is disabled".to_string(),
                );
            }
            result.add_warning(
                "HTTPS not configured - connections will be unencrypted".to_string(),
            );
            return;
        }

        if config.cert_path.is_empty() || config.private_key_path.is_empty() {
            result.add_error("https requires both cert_path and private_key_path".to_string());
        } else if let Err(e) =
            TlsConfig::validate_tls_files(&config.private_key_path, &config.cert_path)
        {
            result.add_error(e.to_string());
        }

        if config.always_https && config.default_https_domain.is_empty() {
            result.add_warning(
                "default_https_domain is empty, HTTPS redirects will use the request Host"
                    .to_string(),
            );
        }
    }
}

/// Validates a `host:port` or `:port` listen address
pub fn validate_listen_addr(addr: &str) -> Result<(), ProxyError> {
    if addr.is_empty() {
        return Err(ProxyError::Config("Listen address cannot be empty".to_string()));
    }

    let (host, port_str) = addr.rsplit_once(':').ok_or_else(|| {
        ProxyError::Config(format!(
            "Invalid address format '{}'. Expected HOST:PORT or :PORT",
            addr
        ))
    })?;

    let port: u16 = port_str
        .parse()
        .map_err(|_| ProxyError::Config(format!("Invalid port number: {}", port_str)))?;

    if port < 1024 {
        log::warn!("Using privileged port {} - may require elevated privileges", port);
    }

    if host.contains(char::is_whitespace) {
        return Err(ProxyError::Config(format!("Invalid host in listen address '{}'", addr)));
    }

    Ok(())
}

/// Whether two listen addresses would compete for the same socket. A wildcard
/// host (`:port`, `0.0.0.0`, `[::]`) collides with any host on the same port.
pub fn listen_addrs_conflict(a: &str, b: &str) -> bool {
    let a = normalize_listen_addr(a);
    let b = normalize_listen_addr(b);
    if a == b {
        return true;
    }

    match (a.rsplit_once(':'), b.rsplit_once(':')) {
        (Some((host_a, port_a)), Some((host_b, port_b))) => {
            port_a == port_b && (is_wildcard_host(host_a) || is_wildcard_host(host_b))
        }
        _ => false,
    }
}

fn is_wildcard_host(host: &str) -> bool {
    matches!(host, "0.0.0.0" | "[::]")
}
