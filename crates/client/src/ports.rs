//! Outbound ports for the feed.
//!
//! The transport manager depends only on these traits, so tests can drive it
//! with scripted streams, fixed clocks and toggled credentials.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use url::Url;

use casefeed_protocol::SseFrame;

use crate::error::TransportError;

/// Frames from one open stream. The stream ending, or yielding an error,
/// means the connection is gone.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame, TransportError>> + Send>>;

/// Synchronous accessor for the caller's access credential.
///
/// `None` means "do not connect"; it is not an error.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait CredentialPort: Send + Sync {
    fn credential(&self) -> Option<String>;
}

/// Opens a server-pushed frame stream.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventSourcePort: Send + Sync {
    /// Issue the streaming request. Resolves once response headers arrive.
    async fn open(&self, url: &Url) -> Result<FrameStream, TransportError>;
}

/// Source of event timestamps.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
