pub mod common;
pub mod config;
pub mod config_validation;
pub mod dispatcher;
pub mod error;
pub mod fallback;
pub mod forwarder;
pub mod logging;
pub mod proxy;
pub mod redirect;
pub mod route_table;

pub use config::{Config, Entry};
pub use dispatcher::{Dispatcher, MatchResult};
pub use error::ProxyError;
pub use proxy::ProxyServer;
pub use route_table::RouteTable;
