//! Transport manager for the practice event stream.
//!
//! Owns at most one streaming connection and at most one retry timer, never
//! both at once. Connection failures are never surfaced to callers: they are
//! logged, and a reconnect is scheduled with exponential backoff. Observers
//! only see `is_connected()` go false.
//!
//! Every connection attempt is tagged with a generation number. Callbacks from
//! a connection or timer whose generation is no longer current are discarded,
//! so a slow-to-fail old connection cannot disturb a newer one.
//!
//! Dispatch runs under a read guard on a gate that `disconnect()` takes for
//! writing after bumping the generation. Once `disconnect()` returns, every
//! dispatch that had started has finished and no new one can begin. A handler
//! that disconnects its own feed skips the wait, since the dispatch it would
//! wait on is its own.
//!
//! All methods must be called from within a Tokio runtime.

use std::cell::Cell;
use std::sync::atomic::AtomicU8;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use url::Url;

use casefeed_protocol::{Event, FrameKind, SseFrame};

use crate::backoff::Backoff;
use crate::config::{redacted, FeedConfig};
use crate::connection::{publish_state, ConnectionState, ConnectionStateObserver};
use crate::dispatcher::Dispatcher;
use crate::error::TransportError;
use crate::lock;
use crate::ports::{ClockPort, CredentialPort, EventSourcePort};

thread_local! {
    /// Address of the `Shared` whose handlers this thread is running, or 0.
    static DISPATCHING: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as dispatching for one manager until dropped.
struct DispatchScope {
    previous: usize,
}

impl DispatchScope {
    fn enter(shared: &Shared) -> Self {
        let previous = DISPATCHING.with(|current| current.replace(shared.address()));
        Self { previous }
    }
}

impl Drop for DispatchScope {
    fn drop(&mut self) {
        DISPATCHING.with(|current| current.set(self.previous));
    }
}

struct Control {
    state: ConnectionState,
    generation: u64,
    backoff: Backoff,
    connection: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
}

struct Shared {
    config: FeedConfig,
    credentials: Arc<dyn CredentialPort>,
    source: Arc<dyn EventSourcePort>,
    clock: Arc<dyn ClockPort>,
    dispatcher: Dispatcher,
    published: Arc<AtomicU8>,
    control: Mutex<Control>,
    dispatch_gate: RwLock<()>,
}

/// Maintains the single stream connection for one session.
///
/// Dropping the manager tears the connection down, same as [`disconnect`].
///
/// [`disconnect`]: TransportManager::disconnect
pub struct TransportManager {
    shared: Arc<Shared>,
}

impl TransportManager {
    pub fn new(
        config: FeedConfig,
        credentials: Arc<dyn CredentialPort>,
        source: Arc<dyn EventSourcePort>,
        clock: Arc<dyn ClockPort>,
        dispatcher: Dispatcher,
    ) -> Self {
        let backoff = Backoff::new(config.retry);
        Self {
            shared: Arc::new(Shared {
                config,
                credentials,
                source,
                clock,
                dispatcher,
                published: Arc::new(AtomicU8::new(ConnectionState::Idle.to_u8())),
                control: Mutex::new(Control {
                    state: ConnectionState::Idle,
                    generation: 0,
                    backoff,
                    connection: None,
                    retry_timer: None,
                }),
                dispatch_gate: RwLock::new(()),
            }),
        }
    }

    /// Start the stream if idle and a credential is available.
    ///
    /// A no-op in any other state, and a no-op (staying idle) without a
    /// credential.
    pub fn connect(&self) {
        self.shared.connect();
    }

    /// Close the connection, cancel any pending retry and return to idle.
    ///
    /// Idempotent. After it returns, nothing from earlier attempts can
    /// reconnect, change state or start a dispatch.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.control).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Retries scheduled since the stream was last confirmed open.
    pub fn attempt(&self) -> u32 {
        lock(&self.shared.control).backoff.attempt()
    }

    pub fn observer(&self) -> ConnectionStateObserver {
        ConnectionStateObserver::new(Arc::clone(&self.shared.published))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    pub fn last_event(&self) -> Option<Event> {
        self.shared.dispatcher.last_event()
    }
}

impl Drop for TransportManager {
    fn drop(&mut self) {
        self.shared.disconnect();
    }
}

impl Shared {
    fn connect(self: &Arc<Self>) {
        let mut control = lock(&self.control);
        if control.state != ConnectionState::Idle {
            tracing::debug!(state = %control.state, "Connect ignored, stream already active");
            return;
        }
        self.start_attempt(&mut control);
    }

    fn disconnect(&self) {
        {
            let mut control = lock(&self.control);
            control.generation += 1;
            if let Some(connection) = control.connection.take() {
                connection.abort();
            }
            if let Some(timer) = control.retry_timer.take() {
                timer.abort();
            }
            control.backoff.reset();

            let previous = control.state;
            self.set_state(&mut control, ConnectionState::Idle);
            if previous != ConnectionState::Idle {
                tracing::info!(previous = %previous, "Event stream disconnected");
            }
        }

        if DISPATCHING.with(Cell::get) == self.address() {
            tracing::debug!("Disconnect from inside a handler, not waiting for dispatch");
            return;
        }
        // Wait out any dispatch that passed its generation check before the bump.
        drop(
            self.dispatch_gate
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
    }

    fn address(&self) -> usize {
        self as *const Shared as usize
    }

    fn set_state(&self, control: &mut Control, state: ConnectionState) {
        control.state = state;
        publish_state(&self.published, state);
    }

    /// Issue a new streaming request. Caller holds the control lock.
    fn start_attempt(self: &Arc<Self>, control: &mut Control) {
        let Some(credential) = self.credentials.credential() else {
            tracing::info!("No credential available, event stream stays idle");
            if let Some(timer) = control.retry_timer.take() {
                timer.abort();
            }
            control.backoff.reset();
            self.set_state(control, ConnectionState::Idle);
            return;
        };

        if let Some(timer) = control.retry_timer.take() {
            timer.abort();
        }
        if let Some(connection) = control.connection.take() {
            connection.abort();
        }

        control.generation += 1;
        let generation = control.generation;
        self.set_state(control, ConnectionState::Connecting);

        let url = self.config.stream_url(&credential);
        tracing::info!(
            generation,
            attempt = control.backoff.attempt(),
            endpoint = %redacted(&url),
            "Opening event stream"
        );

        let shared = Arc::clone(self);
        control.connection = Some(tokio::spawn(async move {
            shared.run_connection(generation, url).await;
        }));
    }

    async fn run_connection(self: Arc<Self>, generation: u64, url: Url) {
        let deadline = self.config.handshake_timeout;
        let mut frames = match tokio::time::timeout(deadline, self.source.open(&url)).await {
            Ok(Ok(frames)) => frames,
            Ok(Err(error)) => {
                self.on_error(generation, error);
                return;
            }
            Err(_) => {
                self.on_error(generation, TransportError::Timeout(deadline));
                return;
            }
        };

        while let Some(item) = frames.next().await {
            match item {
                Ok(frame) => {
                    if !self.on_frame(generation, frame) {
                        return;
                    }
                }
                Err(error) => {
                    self.on_error(generation, error);
                    return;
                }
            }
        }

        self.on_error(generation, TransportError::closed());
    }

    /// Handle one frame. Returns false when the connection is stale and the
    /// reader should stop.
    fn on_frame(&self, generation: u64, frame: SseFrame) -> bool {
        match FrameKind::of(&frame) {
            FrameKind::Connected => {
                let mut control = lock(&self.control);
                if control.generation != generation {
                    return false;
                }
                if control.state == ConnectionState::Connecting {
                    control.backoff.reset();
                    self.set_state(&mut control, ConnectionState::Open);
                    tracing::info!(generation, "Event stream open");
                }
                true
            }
            FrameKind::Heartbeat => {
                if !self.is_current(generation) {
                    return false;
                }
                tracing::trace!(generation, "Heartbeat");
                true
            }
            FrameKind::Topic(topic) => match Event::decode(topic, &frame.data, self.clock.now()) {
                Ok(event) => self.dispatch_current(generation, &event),
                Err(error) => {
                    tracing::warn!(topic = %topic, error = %error, "Dropping malformed event");
                    self.is_current(generation)
                }
            },
            FrameKind::Unknown => {
                tracing::trace!(event = %frame.event, "Ignoring frame outside the topic catalog");
                true
            }
        }
    }

    /// Dispatch unless the generation went stale. Returns false when it did.
    fn dispatch_current(&self, generation: u64, event: &Event) -> bool {
        let _gate = self
            .dispatch_gate
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.is_current(generation) {
            return false;
        }
        let _scope = DispatchScope::enter(self);
        tracing::debug!(topic = %event.topic, "Dispatching event");
        self.dispatcher.dispatch(event);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        let control = lock(&self.control);
        control.generation == generation
            && matches!(
                control.state,
                ConnectionState::Connecting | ConnectionState::Open
            )
    }

    fn on_error(self: &Arc<Self>, generation: u64, error: TransportError) {
        let mut control = lock(&self.control);
        if control.generation != generation {
            tracing::debug!(generation, error = %error, "Discarding failure from superseded connection");
            return;
        }

        // The reader task calling us is finishing; just release its handle.
        control.connection = None;

        let delay = control.backoff.next_delay();
        tracing::warn!(
            generation,
            error = %error,
            attempt = control.backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Event stream failed, scheduling reconnect"
        );
        self.set_state(&mut control, ConnectionState::ReconnectPending);

        let shared = Arc::clone(self);
        control.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.on_timer(generation);
        }));
    }

    fn on_timer(self: &Arc<Self>, generation: u64) {
        let mut control = lock(&self.control);
        if control.generation != generation || control.state != ConnectionState::ReconnectPending
        {
            return;
        }
        // This task is the timer; dropping its own handle is enough.
        control.retry_timer = None;
        self.start_attempt(&mut control);
    }
}
