//! The `/Plugin.Activate` handshake.
//!
//! A host discovers what a plugin implements by calling the activation path
//! once after connecting. The answer lists every registered driver name and
//! never changes for the lifetime of a serve call.

use http::{HeaderValue, header};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::router::{ROUTER_TARGET, Request, Response, RouteHandler};

/// Reserved path of the activation handshake.
pub const ACTIVATE_PATH: &str = "/Plugin.Activate";

/// Media type of version 1 of the plugin protocol.
pub const CONTENT_TYPE_V1: &str = "application/vnd.docker.plugins.v1+json";

/// Media type of version 1.1 of the plugin protocol, used for all responses.
pub const CONTENT_TYPE_V1_1: &str = "application/vnd.docker.plugins.v1.1+json";

/// Payload returned by the activation handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationResponse {
    /// Names of the implemented drivers.
    #[serde(rename = "Implements")]
    pub implements: Vec<String>,
}

impl ActivationResponse {
    /// Builds a response advertising `implements`.
    #[must_use]
    pub const fn new(implements: Vec<String>) -> Self {
        Self { implements }
    }
}

/// Serves a pre-encoded [`ActivationResponse`] for any method.
#[derive(Debug, Clone)]
pub(crate) struct ActivationHandler {
    body: Vec<u8>,
}

impl ActivationHandler {
    pub(crate) fn new(response: &ActivationResponse) -> Self {
        let body = serde_json::to_vec(response).unwrap_or_else(|error| {
            warn!(
                target: ROUTER_TARGET,
                error = %error,
                "failed to encode activation response; serving an empty body"
            );
            Vec::new()
        });
        Self { body }
    }
}

impl RouteHandler for ActivationHandler {
    fn handle(&self, _request: &Request) -> Response {
        let mut response = Response::new(self.body.clone());
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(CONTENT_TYPE_V1_1),
        );
        response
    }
}
