//! HTTP and WebSocket gateway for the Parley translation pipeline.
//!
//! Each WebSocket connection becomes a [`session::Session`] bound to one
//! pipeline mode: `/ws` uses the configured default, `/ws/stream` and
//! `/ws/parallel` force streaming and parallel. REST routes expose health,
//! cached audio, capabilities and a plain text translation endpoint.

pub mod api;
pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod session;
pub mod state;

pub use server::{build_router, serve, start_gateway};
pub use state::GatewayState;
