//! Compiled routing table.
//!
//! Entries are grouped by normalized path prefix. Each group holds a map of exact
//! host names plus an optional wildcard backend for entries without a domain.
//! The table is built once at startup and only read afterwards, so it is shared
//! between connection tasks behind an `Arc` without any locking.
//!
//! Precedence rules:
//!
//! * when several entries share a path and a domain, the one registered last wins;
//! * entries sharing a path but naming different domains all stay in the table;
//! * an exact domain beats the wildcard of the same path.

use crate::config::Entry;
use crate::error::ProxyError;
use http::uri::{Authority, Scheme};
use log::debug;
use std::collections::HashMap;
use url::Url;

/// Pre-parsed backend origin. Parsing happens at build time so that rewriting a
/// request URI cannot fail on the address later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    scheme: Scheme,
    authority: Authority,
}

impl Backend {
    pub fn from_address(address: &str) -> Result<Self, ProxyError> {
        let url = Url::parse(address)?;

        let scheme = match url.scheme() {
            "http" => Scheme::HTTP,
            "https" => Scheme::HTTPS,
            other => {
                return Err(ProxyError::Config(format!("unsupported scheme '{}'", other)));
            }
        };

        if url.host_str().is_none_or(|h| h.is_empty()) {
            return Err(ProxyError::Config("address has no host".to_string()));
        }

        // Url drops default ports, so take the authority as written
        let uri: http::Uri = address
            .trim()
            .parse()
            .map_err(|e| ProxyError::Config(format!("invalid URI: {}", e)))?;
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| ProxyError::Config("address has no authority".to_string()))?;

        Ok(Self { scheme, authority })
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}

/// All backends registered under one path prefix.
#[derive(Debug, Clone)]
pub struct PathRoute {
    prefix: String,
    exact: HashMap<String, Backend>,
    wildcard: Option<Backend>,
}

impl PathRoute {
    fn new(prefix: String) -> Self {
        Self {
            prefix,
            exact: HashMap::new(),
            wildcard: None,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Exact host first, then the wildcard.
    pub fn backend_for(&self, host: &str) -> Option<&Backend> {
        self.exact
            .get(&host.to_ascii_lowercase())
            .or(self.wildcard.as_ref())
    }

    /// Strips this prefix from `path` on a segment boundary. Returns the remainder
    /// with its leading slash, or `None` when the path lies outside the prefix.
    pub fn strip_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.prefix == "/" {
            return Some(if path.is_empty() { "/" } else { path });
        }

        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    fn insert(&mut self, domain: &str, backend: Backend) -> Option<Backend> {
        if domain.is_empty() {
            self.wildcard.replace(backend)
        } else {
            self.exact.insert(domain.to_ascii_lowercase(), backend)
        }
    }
}

/// Immutable prefix → host → backend lookup.
#[derive(Debug, Clone)]
pub struct RouteTable {
    // Longest prefix first
    routes: Vec<PathRoute>,
}

impl RouteTable {
    /// Compiles the entry list. Fails on an empty list or on any address that is not
    /// an absolute http(s) URL.
    pub fn build(entries: &[Entry]) -> Result<Self, ProxyError> {
        if entries.is_empty() {
            return Err(ProxyError::Config("No entries configured".to_string()));
        }

        let mut by_prefix: HashMap<String, PathRoute> = HashMap::new();

        for (index, entry) in entries.iter().enumerate() {
            let backend = Backend::from_address(&entry.address).map_err(|e| {
                ProxyError::Config(format!(
                    "Entry #{} has invalid address '{}': {}",
                    index, entry.address, e
                ))
            })?;

            let prefix = normalize_path(&entry.path);
            let route = by_prefix
                .entry(prefix.clone())
                .or_insert_with(|| PathRoute::new(prefix.clone()));

            if let Some(previous) = route.insert(&entry.domain, backend) {
                debug!(
                    "Entry #{} overrides {} for path '{}' domain '{}'",
                    index,
                    previous,
                    prefix,
                    display_domain(&entry.domain)
                );
            }
        }

        let mut routes: Vec<PathRoute> = by_prefix.into_values().collect();
        routes.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then_with(|| a.prefix.cmp(&b.prefix))
        });

        for route in &routes {
            for (domain, backend) in &route.exact {
                debug!("Route {} [{}] -> {}", route.prefix, domain, backend);
            }
            if let Some(backend) = &route.wildcard {
                debug!("Route {} [*] -> {}", route.prefix, backend);
            }
        }

        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[PathRoute] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Path component of a backend address when it is anything other than `/`.
/// Forwarded requests always carry the matched remainder, so this path is dropped.
pub fn ignored_address_path(address: &str) -> Option<String> {
    Url::parse(address)
        .ok()
        .map(|url| url.path().to_string())
        .filter(|path| path != "/")
}

fn display_domain(domain: &str) -> &str {
    if domain.is_empty() { "*" } else { domain }
}

/// Normalizes a configured path prefix: empty becomes `/`, a leading slash is
/// added, repeated slashes collapse and a trailing slash is dropped.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route<'a>(table: &'a RouteTable, prefix: &str) -> &'a PathRoute {
        table
            .routes()
            .iter()
            .find(|r| r.prefix() == prefix)
            .unwrap()
    }

    #[test]
    fn test_empty_entries_rejected() {
        let result = RouteTable::build(&[]);
        assert!(matches!(result, Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_invalid_address_rejected() {
        let entries = vec![
            Entry::new("http://localhost:9000", "/ok", ""),
            Entry::new("not a url", "/bad", ""),
        ];
        match RouteTable::build(&entries) {
            Err(ProxyError::Config(msg)) => {
                assert!(msg.contains("#1"));
                assert!(msg.contains("not a url"));
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let entries = vec![Entry::new("ftp://files.local", "/", "")];
        assert!(RouteTable::build(&entries).is_err());
    }

    #[test]
    fn test_backend_from_address() {
        let backend = Backend::from_address("http://10.0.0.5:9000").unwrap();
        assert_eq!(backend.scheme(), &Scheme::HTTP);
        assert_eq!(backend.authority().as_str(), "10.0.0.5:9000");
        assert_eq!(backend.to_string(), "http://10.0.0.5:9000");

        let backend = Backend::from_address("https://api.example.com").unwrap();
        assert_eq!(backend.authority().as_str(), "api.example.com");
    }

    #[test]
    fn test_ignored_address_path() {
        assert_eq!(ignored_address_path("http://h:80"), None);
        assert_eq!(ignored_address_path("http://h:80/"), None);
        assert_eq!(ignored_address_path("http://h:80/base"), Some("/base".to_string()));
        assert_eq!(ignored_address_path("not a url"), None);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("api"), "/api");
        assert_eq!(normalize_path("/api/"), "/api");
        assert_eq!(normalize_path("//api//v2/"), "/api/v2");
    }

    #[test]
    fn test_last_registered_wins() {
        let entries = vec![
            Entry::new("http://h1:80", "/svc", "a.com"),
            Entry::new("http://h2:80", "/svc", "a.com"),
        ];
        let table = RouteTable::build(&entries).unwrap();
        let backend = route(&table, "/svc").backend_for("a.com").unwrap();
        assert_eq!(backend.authority().as_str(), "h2:80");
    }

    #[test]
    fn test_every_domain_retained() {
        let entries = vec![
            Entry::new("http://h1:80", "/svc", "a.com"),
            Entry::new("http://h2:80", "/svc", "b.com"),
            Entry::new("http://h3:80", "/svc/", "c.com"),
        ];
        let table = RouteTable::build(&entries).unwrap();
        assert_eq!(table.len(), 1);

        let svc = route(&table, "/svc");
        assert_eq!(svc.backend_for("a.com").unwrap().authority().as_str(), "h1:80");
        assert_eq!(svc.backend_for("b.com").unwrap().authority().as_str(), "h2:80");
        assert_eq!(svc.backend_for("c.com").unwrap().authority().as_str(), "h3:80");
        assert!(svc.backend_for("d.com").is_none());
    }

    #[test]
    fn test_exact_domain_beats_wildcard() {
        let entries = vec![
            Entry::new("http://exact:80", "/", "a.com"),
            Entry::new("http://any:80", "", ""),
        ];
        let table = RouteTable::build(&entries).unwrap();
        let root = route(&table, "/");
        assert_eq!(root.backend_for("a.com").unwrap().authority().as_str(), "exact:80");
        assert_eq!(root.backend_for("A.COM").unwrap().authority().as_str(), "exact:80");
        assert_eq!(root.backend_for("b.com").unwrap().authority().as_str(), "any:80");
    }

    #[test]
    fn test_routes_sorted_longest_first() {
        let entries = vec![
            Entry::new("http://a:80", "/", ""),
            Entry::new("http://b:80", "/api/v2", ""),
            Entry::new("http://c:80", "/api", ""),
        ];
        let table = RouteTable::build(&entries).unwrap();
        let prefixes: Vec<&str> = table.routes().iter().map(|r| r.prefix()).collect();
        assert_eq!(prefixes, vec!["/api/v2", "/api", "/"]);
    }

    #[test]
    fn test_strip_prefix() {
        let api = PathRoute::new("/api".to_string());
        assert_eq!(api.strip_prefix("/api"), Some("/"));
        assert_eq!(api.strip_prefix("/api/"), Some("/"));
        assert_eq!(api.strip_prefix("/api/users"), Some("/users"));
        assert_eq!(api.strip_prefix("/apix"), None);
        assert_eq!(api.strip_prefix("/other"), None);

        let root = PathRoute::new("/".to_string());
        assert_eq!(root.strip_prefix("/xyz"), Some("/xyz"));
        assert_eq!(root.strip_prefix(""), Some("/"));
    }
}
