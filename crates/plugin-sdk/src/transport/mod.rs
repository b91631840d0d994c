//! Listening endpoints for plugin transports.
//!
//! The transport module binds TCP sockets, Unix domain sockets and (on
//! Windows) named pipes. Binding is synchronous so provisioning can fail
//! before anything is published; a serve call then registers the listener
//! with its runtime and accepts [`Connection`]s from the resulting
//! [`Incoming`].

mod errors;
mod incoming;
mod listener;
#[cfg(windows)]
mod pipe;

pub use self::errors::ListenerError;
pub(crate) use self::incoming::{Connection, Incoming};
pub use self::listener::PluginListener;

pub(crate) const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
