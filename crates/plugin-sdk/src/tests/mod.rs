//! Test suites for the plugin server.

mod server_behaviour;
