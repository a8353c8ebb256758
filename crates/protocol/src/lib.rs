//! Casefeed Protocol - wire vocabulary for the practice event feed
//!
//! This crate contains the types shared by everything that reads the feed:
//! - The closed topic catalog and the reserved control markers
//! - The typed [`Event`] delivered to subscribers
//! - An incremental `text/event-stream` frame decoder
//!
//! It has no async runtime dependency; transports live in `casefeed-client`.

pub mod error;
pub mod event;
pub mod sse;
pub mod topic;

pub use error::ProtocolError;
pub use event::{Event, FrameKind};
pub use sse::{FrameDecoder, SseFrame, DEFAULT_EVENT, DEFAULT_FRAME_LIMIT};
pub use topic::{Topic, TopicFilter, CONNECTED_MARKER, HEARTBEAT_MARKER, WILDCARD};
