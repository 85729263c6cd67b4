//! Stream request and socket message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kind of live stream requested from the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    /// Live OHLCV bars for one asset and resolution.
    Ohlcv,
    /// Live trades for one asset.
    Trades,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ohlcv => "ohlcv",
            Self::Trades => "trades",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ohlcv" => Ok(Self::Ohlcv),
            "trades" => Ok(Self::Trades),
            other => Err(format!("unknown stream type: {other}")),
        }
    }
}

/// Body of the server-mode stream request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub stream_type: StreamType,
    pub payload: Value,
}

/// Client to server message on the upstream socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SocketRequest {
    #[serde(rename_all = "camelCase")]
    Subscribe {
        subscription_id: String,
        stream_type: StreamType,
        payload: Value,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribe { subscription_id: String },
    Ping,
}

/// Server to client message on the upstream socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SocketMessage {
    /// Event for one subscription.
    Data {
        #[serde(rename = "subscriptionId")]
        subscription_id: String,
        data: Value,
    },
    /// Control message (`pong`, `error`, acknowledgements).
    Control {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        message: Option<String>,
    },
    Other(Value),
}

impl SocketMessage {
    pub fn is_pong(&self) -> bool {
        matches!(self, Self::Control { kind, .. } if kind == "pong")
    }
}

/// Whether a stream payload is the initial `{"event":"connected"}` handshake.
pub fn is_handshake(value: &Value) -> bool {
    value.get("event").and_then(Value::as_str) == Some("connected")
}
