//! Helpers for writing plugins for a container host.
//!
//! A plugin is a process that serves HTTP on a TCP socket, a Unix domain
//! socket or a Windows named pipe. The host discovers it through a socket in
//! the plugin socket directory or a `<name>.spec` file, then posts to
//! `/Plugin.Activate` to learn which drivers the plugin implements. Every
//! further call is a POST to a driver path such as `/VolumeDriver.Create`.
//!
//! [`PluginServer`] ties those pieces together:
//!
//! 1. drivers are registered with [`PluginServer::register_driver`]; each
//!    driver's initializer binds its paths on a [`Router`];
//! 2. a serve call provisions a listener for the chosen
//!    [`TransportConfig`](plugin_sdk_config::TransportConfig) and publishes
//!    its discovery artifact;
//! 3. initializers run, the activation handshake is installed and the server
//!    accepts connections until its [`ShutdownHandle`] fires;
//! 4. the discovery artifact is removed before the serve call returns.
//!
//! Driver handlers receive [`Request`] values and return [`Response`]
//! values; [`decode_request`] and [`encode_response`] cover the usual JSON
//! bodies.

mod activation;
mod encoding;
mod provision;
mod registry;
mod router;
mod server;
mod service;
pub mod telemetry;
mod transport;

pub use activation::{ACTIVATE_PATH, ActivationResponse, CONTENT_TYPE_V1, CONTENT_TYPE_V1_1};
pub use encoding::{DecodeError, ErrorResponse, decode_request, encode_response, error_response};
pub use provision::{ListenerProvisioner, ProvisionedListener, SystemProvisioner};
pub use registry::DriverRegistry;
pub use router::{Request, Response, RouteHandler, Router};
pub use server::{PluginServer, ServeError, ShutdownHandle};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{ListenerError, PluginListener};

#[cfg(test)]
mod tests;
