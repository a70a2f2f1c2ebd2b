// ABOUTME: Error type shared by the relay transports and cost aggregator
// ABOUTME: Covers HTTP stream failures, socket failures and configuration problems

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stream endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Stream response has no body")]
    MissingBody,

    #[error("WebSocket error: {0}")]
    Connection(String),

    #[error("Gave up reconnecting after {0} attempts")]
    ReconnectExhausted(u32),

    #[error("Socket is not connected")]
    NotConnected,

    #[error("Failed to decode frame: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid pricing table: {0}")]
    Pricing(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
