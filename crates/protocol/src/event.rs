//! Typed events and frame classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::sse::SseFrame;
use crate::topic::{Topic, CONNECTED_MARKER, HEARTBEAT_MARKER};

/// A decoded event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    /// Opaque keyed data; the client never interprets it.
    pub payload: serde_json::Value,
    /// Time the client decoded the frame.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(topic: Topic, payload: serde_json::Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            topic,
            payload,
            timestamp,
        }
    }

    /// Parse the text payload of a catalog frame.
    ///
    /// An empty payload decodes to `null` so data-less notifications still
    /// reach subscribers.
    pub fn decode(
        topic: Topic,
        data: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ProtocolError> {
        let payload = if data.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(data)
                .map_err(|source| ProtocolError::InvalidPayload { topic, source })?
        };
        Ok(Self::new(topic, payload, timestamp))
    }
}

/// What a raw frame means to the client, before any payload is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The server confirmed the stream is live.
    Connected,
    /// Liveness only, carries nothing.
    Heartbeat,
    /// A catalog topic whose payload should be decoded.
    Topic(Topic),
    /// Not in the catalog; dropped without decoding.
    Unknown,
}

impl FrameKind {
    pub fn of(frame: &SseFrame) -> Self {
        match frame.event.as_str() {
            CONNECTED_MARKER => FrameKind::Connected,
            HEARTBEAT_MARKER => FrameKind::Heartbeat,
            name => Topic::from_wire(name).map_or(FrameKind::Unknown, FrameKind::Topic),
        }
    }
}
