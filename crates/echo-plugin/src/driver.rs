//! The echo driver.

use serde_json::Value;
use tracing::debug;

use plugin_sdk::{PluginServer, Request, Response, decode_request, encode_response};

/// Name advertised during activation.
pub const DRIVER_NAME: &str = "EchoDriver";

/// Path answering with the posted JSON body.
pub const ECHO_PATH: &str = "/EchoDriver.Echo";

const DRIVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::driver");

/// Registers the echo driver on `server`.
pub fn register(server: &mut PluginServer) {
    server.register_driver(DRIVER_NAME, |router| {
        router.handle_func(ECHO_PATH, echo);
    });
}

fn echo(request: &Request) -> Response {
    match decode_request::<Value>(request) {
        Ok(payload) => {
            debug!(target: DRIVER_TARGET, bytes = request.body().len(), "echoing payload");
            encode_response(&payload, false)
        }
        Err(decode_error) => decode_error.to_response(),
    }
}
