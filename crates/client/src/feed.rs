//! Session-level facade over the transport manager and dispatcher.
//!
//! Hosting code creates one `RealtimeFeed` per signed-in session, calls
//! [`RealtimeFeed::connect`] once a credential exists, and hands
//! [`Dispatcher`] clones to feature code that wants to subscribe.

use std::sync::Arc;

use casefeed_protocol::{Event, Topic};

use crate::clock::SystemClock;
use crate::config::FeedConfig;
use crate::connection::{ConnectionState, ConnectionStateObserver};
use crate::dispatcher::{Dispatcher, EventHandler, PayloadHandler, Unsubscribe};
use crate::http::HttpEventSource;
use crate::ports::{ClockPort, CredentialPort, EventSourcePort};
use crate::transport::TransportManager;

pub struct RealtimeFeed {
    transport: TransportManager,
}

impl RealtimeFeed {
    /// Feed over HTTP with the system clock.
    pub fn new(config: FeedConfig, credentials: Arc<dyn CredentialPort>) -> Self {
        let source = HttpEventSource::with_timeout(config.handshake_timeout);
        Self::with_ports(
            config,
            credentials,
            Arc::new(source),
            Arc::new(SystemClock::new()),
        )
    }

    pub fn with_ports(
        config: FeedConfig,
        credentials: Arc<dyn CredentialPort>,
        source: Arc<dyn EventSourcePort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            transport: TransportManager::new(config, credentials, source, clock, Dispatcher::new()),
        }
    }

    pub fn connect(&self) {
        self.transport.connect();
    }

    pub fn disconnect(&self) {
        self.transport.disconnect();
    }

    /// Tear down the connection and drop every registration.
    ///
    /// Outstanding [`Unsubscribe`] handles stay valid and become no-ops.
    pub fn dispose(&self) {
        self.transport.disconnect();
        self.transport.dispatcher().clear();
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn last_event(&self) -> Option<Event> {
        self.transport.last_event()
    }

    pub fn subscribe(&self, topic: Topic, handler: PayloadHandler) -> Unsubscribe {
        self.transport.dispatcher().subscribe(topic, handler)
    }

    pub fn subscribe_all(&self, handler: EventHandler) -> Unsubscribe {
        self.transport.dispatcher().subscribe_all(handler)
    }

    pub fn on<F>(&self, topic: Topic, handler: F) -> Unsubscribe
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.transport.dispatcher().on(topic, handler)
    }

    pub fn on_any<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.transport.dispatcher().on_any(handler)
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.transport.dispatcher().clone()
    }

    pub fn observer(&self) -> ConnectionStateObserver {
        self.transport.observer()
    }
}
