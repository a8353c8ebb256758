//! Transport errors.
//!
//! None of these ever reach callers of the feed: the transport manager logs
//! them and schedules a reconnect. They exist so event sources can report
//! why a stream ended.

use std::time::Duration;

use casefeed_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the body could not be read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server responded with status {0}")]
    Status(u16),

    /// No response headers arrived within the handshake deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The server sent bytes the frame decoder refused.
    #[error("malformed stream: {0}")]
    Protocol(#[from] ProtocolError),

    /// The stream broke or was closed by the server.
    #[error("stream error: {0}")]
    Stream(String),
}

impl TransportError {
    /// Server closed the stream cleanly.
    pub fn closed() -> Self {
        TransportError::Stream("closed by server".to_string())
    }
}
