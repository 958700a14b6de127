use crate::route_table::{Backend, RouteTable};
use hyper::Request;
use hyper::header::HOST;
use std::sync::Arc;

/// Outcome of matching a request against the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult<'a> {
    Matched {
        backend: &'a Backend,
        /// Request path with the matched prefix removed, always starting with `/`.
        remainder_path: &'a str,
    },
    NoMatch,
}

impl MatchResult<'_> {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }
}

/// Matches request path and Host against a shared, read-only [`RouteTable`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: Arc<RouteTable>,
}

impl Dispatcher {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }

    /// Picks the longest prefix containing `path`, then the backend for `host`
    /// within that prefix. A host miss under the longest prefix is a miss overall;
    /// shorter prefixes are not consulted.
    pub fn dispatch<'a>(&'a self, path: &'a str, host: &str) -> MatchResult<'a> {
        let Some((route, remainder_path)) = self
            .table
            .routes()
            .iter()
            .find_map(|route| route.strip_prefix(path).map(|rest| (route, rest)))
        else {
            return MatchResult::NoMatch;
        };

        match route.backend_for(host) {
            Some(backend) => MatchResult::Matched {
                backend,
                remainder_path,
            },
            None => MatchResult::NoMatch,
        }
    }
}

/// Host used for dispatch: the Host header, else the URI authority, else empty.
pub fn request_host<B>(req: &Request<B>) -> &str {
    req.headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .unwrap_or("")
}
