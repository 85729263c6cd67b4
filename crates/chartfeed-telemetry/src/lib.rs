//! Prometheus metrics and structured logging for chartfeed.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus counters/gauges for bar requests, stream frames, live bars
//!   and gateway connections

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{encode_metrics, Metrics};
