//! Gateway: HTTP front of the device host.
//!
//! Serves the web UI, hands out anti-forgery tokens, and exposes typed JSON
//! API endpoints registered in a [`api::DispatchTable`]. Every API call must
//! be a `POST` carrying a valid `XSRF-TOKEN` cookie issued to the same peer.
//!
//! Lifecycle:
//! 1. Build a `DispatchTable` and a `GatewayBuilder` (from config or by hand)
//! 2. `GatewayBuilder::start` binds the listener and serves in the background
//! 3. `GatewayServer::close` stops accepting and drains in-flight requests

pub mod api;
pub mod content;
pub mod error;
pub mod middleware;
pub mod server;
pub mod state;
pub mod xsrf;

pub use {
    api::DispatchTable,
    error::GatewayError,
    server::{GatewayBuilder, GatewayServer, ServerState},
    state::{DriverFailure, DriverState},
    xsrf::XsrfAuthority,
};
