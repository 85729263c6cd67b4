//! chartfeed application.
//!
//! Wires configuration, transports and the feed together:
//! - `serve`: runs the stream gateway in front of the upstream socket
//! - `watch`: drives a [`chartfeed_feed::Datafeed`] from the terminal

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, WatchOptions};
pub use config::{AppConfig, StreamConfig, API_KEY_ENV, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
pub use error::{AppError, AppResult};
