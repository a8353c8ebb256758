//! Protocol-level errors.

use thiserror::Error;

use crate::topic::Topic;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A name that is neither a catalog topic nor the wildcard.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// The frame named a catalog topic but its data was not valid JSON.
    #[error("invalid payload for {topic}: {source}")]
    InvalidPayload {
        topic: Topic,
        #[source]
        source: serde_json::Error,
    },

    /// The stream sent more than the decoder will buffer for one frame.
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
}
