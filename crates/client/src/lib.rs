//! Casefeed client
//!
//! Keeps one authenticated server-sent event stream open for a signed-in
//! session and routes each decoded event to the handlers registered for its
//! topic.
//!
//! ## Layout
//!
//! - [`transport`]: connection state machine, backoff and retry timer
//! - [`dispatcher`]: topic and wildcard handler registry with isolated fan-out
//! - [`feed`]: the [`RealtimeFeed`] facade hosting code talks to
//! - [`ports`]: seams for the credential, the stream source and the clock
//! - [`http`]: `reqwest` implementation of the stream source

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod backoff;
pub mod clock;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod http;
pub mod ports;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backoff::Backoff;
pub use clock::SystemClock;
pub use config::{ConfigError, FeedConfig, RetryConfig};
pub use connection::{ConnectionState, ConnectionStateObserver};
pub use credentials::{EnvCredential, SessionCredential};
pub use dispatcher::{
    DispatchSummary, Dispatcher, EventHandler, HandlerOutcome, PayloadHandler, Unsubscribe,
};
pub use error::TransportError;
pub use feed::RealtimeFeed;
pub use http::HttpEventSource;
pub use ports::{ClockPort, CredentialPort, EventSourcePort, FrameStream};
pub use transport::TransportManager;

pub use casefeed_protocol::{Event, Topic, TopicFilter};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Handlers run outside every lock, so poisoning can only come from a bug in
/// this crate; the guarded state stays consistent either way.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
