use crate::common::{ProxyBody, ResponseBuilder};
use crate::error::ProxyError;
use hyper::header::HeaderValue;
use hyper::{Request, Response};
use log::debug;

/// Answers requests that matched no route: a `302` to the configured target, or
/// a bare `404` when no target is set.
#[derive(Debug, Clone, Default)]
pub struct FallbackHandler {
    redirect_to: Option<String>,
}

impl FallbackHandler {
    /// The target is used verbatim as the `Location` header, so it has to be a
    /// valid header value.
    pub fn new(redirect_to: Option<&str>) -> Result<Self, ProxyError> {
        if let Some(target) = redirect_to {
            HeaderValue::from_str(target).map_err(|_| {
                ProxyError::Config(format!("noroute_route {:?} is not a valid Location", target))
            })?;
        }

        Ok(Self {
            redirect_to: redirect_to.map(str::to_string),
        })
    }

    pub fn redirect_target(&self) -> Option<&str> {
        self.redirect_to.as_deref()
    }

    pub fn handle_unmatched<B>(&self, req: &Request<B>) -> Response<ProxyBody> {
        debug!(
            "No route for {} {} host={}",
            req.method(),
            req.uri().path(),
            crate::dispatcher::request_host(req)
        );

        match &self.redirect_to {
            Some(target) => ResponseBuilder::found(target),
            None => ResponseBuilder::not_found(),
        }
    }
}
