//! chartfeed-gateway - server-mode stream endpoint.
//!
//! Browsers cannot hold the upstream credential, so the gateway does it for
//! them: each `POST {stream_path}` opens one subscription on the shared
//! upstream socket and relays its events as a `text/event-stream` body.
//!
//! ```text
//!  client ── POST /api/stream {streamType, payload} ──► gateway
//!  client ◄── data: {"event":"connected",...}        ──  gateway
//!  client ◄── data: {...} (one frame per event)      ──  gateway ◄── upstream socket
//! ```
//!
//! Dropping the response body (client disconnect) unsubscribes upstream.

mod config;
mod error;
mod server;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use server::{create_router, run_server, AppState, ConnectionGuard, ConnectionLimiter};
