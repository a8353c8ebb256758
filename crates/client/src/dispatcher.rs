//! Subscription dispatcher for decoded feed events.
//!
//! Feature code registers handlers by topic (or for every topic) and gets back
//! an [`Unsubscribe`] handle. The transport manager hands each decoded event to
//! [`Dispatcher::dispatch`], which fans it out:
//!
//! - specific-topic handlers first, then wildcard handlers
//! - registration order within each group
//! - a handler that errors or panics is logged and skipped; siblings still run
//!
//! The registry is independent of any connection. It survives reconnects and
//! may outlive the transport manager that feeds it.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use casefeed_protocol::{Event, Topic, TopicFilter};

use crate::lock;

/// Handler for one topic; receives the event payload only.
pub type PayloadHandler = Arc<dyn Fn(&serde_json::Value) -> anyhow::Result<()> + Send + Sync>;

/// Wildcard handler; receives the whole event so it can tell topics apart.
pub type EventHandler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Payload(PayloadHandler),
    Event(EventHandler),
}

impl Handler {
    /// Handler identity is the identity of its `Arc`.
    fn same_as(&self, other: &Handler) -> bool {
        match (self, other) {
            (Handler::Payload(a), Handler::Payload(b)) => Arc::ptr_eq(a, b),
            (Handler::Event(a), Handler::Event(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn call(&self, event: &Event) -> anyhow::Result<()> {
        match self {
            Handler::Payload(handler) => handler(&event.payload),
            Handler::Event(handler) => handler(event),
        }
    }
}

struct Registration {
    id: u64,
    handler: Handler,
    /// Cleared on removal so an in-flight dispatch skips it.
    active: AtomicBool,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: HashMap<TopicFilter, Vec<Arc<Registration>>>,
}

impl Registry {
    fn insert(&mut self, filter: TopicFilter, handler: Handler) -> u64 {
        let registrations = self.entries.entry(filter).or_default();
        if let Some(existing) = registrations
            .iter()
            .find(|registration| registration.handler.same_as(&handler))
        {
            return existing.id;
        }

        self.next_id += 1;
        let id = self.next_id;
        registrations.push(Arc::new(Registration {
            id,
            handler,
            active: AtomicBool::new(true),
        }));
        id
    }

    fn remove(&mut self, filter: TopicFilter, id: u64) -> bool {
        let Some(registrations) = self.entries.get_mut(&filter) else {
            return false;
        };
        let Some(index) = registrations.iter().position(|r| r.id == id) else {
            return false;
        };

        let removed = registrations.remove(index);
        removed.active.store(false, Ordering::SeqCst);
        if registrations.is_empty() {
            self.entries.remove(&filter);
        }
        true
    }

    fn snapshot(&self, filter: TopicFilter) -> Vec<Arc<Registration>> {
        self.entries.get(&filter).cloned().unwrap_or_default()
    }
}

struct Inner {
    registry: Mutex<Registry>,
    last_event: Mutex<Option<Event>>,
}

/// Result of one handler invocation. Used for logging only; it never changes
/// which handlers run.
#[derive(Debug)]
pub enum HandlerOutcome {
    Delivered,
    Failed(anyhow::Error),
    Panicked(String),
}

/// Tally of one [`Dispatcher::dispatch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

/// Topic → handler registry with isolated fan-out.
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a new Dispatcher with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                last_event: Mutex::new(None),
            }),
        }
    }

    /// Register `handler` for one topic.
    ///
    /// Registering the same `Arc` twice for the same topic is a no-op; both
    /// returned handles remove the single registration.
    pub fn subscribe(&self, topic: Topic, handler: PayloadHandler) -> Unsubscribe {
        self.register(TopicFilter::Only(topic), Handler::Payload(handler))
    }

    /// Register `handler` for every topic.
    pub fn subscribe_all(&self, handler: EventHandler) -> Unsubscribe {
        self.register(TopicFilter::Any, Handler::Event(handler))
    }

    /// Register a whole-event handler under a parsed filter, so `"*"` and
    /// topic names read from configuration share one entry point.
    pub fn subscribe_filter(&self, filter: TopicFilter, handler: EventHandler) -> Unsubscribe {
        self.register(filter, Handler::Event(handler))
    }

    /// Closure form of [`Dispatcher::subscribe`].
    pub fn on<F>(&self, topic: Topic, handler: F) -> Unsubscribe
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(topic, Arc::new(handler))
    }

    /// Closure form of [`Dispatcher::subscribe_all`].
    pub fn on_any<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_all(Arc::new(handler))
    }

    fn register(&self, filter: TopicFilter, handler: Handler) -> Unsubscribe {
        let id = lock(&self.inner.registry).insert(filter, handler);
        tracing::debug!(topic = %filter, id, "Handler subscribed");
        Unsubscribe {
            registry: Arc::downgrade(&self.inner),
            filter,
            id,
            done: AtomicBool::new(false),
        }
    }

    /// Deliver `event` to every matching handler.
    ///
    /// The registry lock is released before any handler runs, so handlers may
    /// subscribe or unsubscribe (themselves or others) freely. A handler
    /// removed before its turn in this dispatch is skipped; one added during
    /// the dispatch first sees the next event.
    pub fn dispatch(&self, event: &Event) -> DispatchSummary {
        let (specific, wildcard) = {
            let registry = lock(&self.inner.registry);
            (
                registry.snapshot(TopicFilter::Only(event.topic)),
                registry.snapshot(TopicFilter::Any),
            )
        };

        *lock(&self.inner.last_event) = Some(event.clone());

        let mut summary = DispatchSummary::default();
        for registration in specific.iter().chain(wildcard.iter()) {
            if !registration.active.load(Ordering::SeqCst) {
                continue;
            }

            match invoke(registration, event) {
                HandlerOutcome::Delivered => summary.delivered += 1,
                HandlerOutcome::Failed(error) => {
                    summary.failed += 1;
                    tracing::warn!(
                        topic = %event.topic,
                        handler = registration.id,
                        error = %error,
                        "Event handler failed"
                    );
                }
                HandlerOutcome::Panicked(message) => {
                    summary.failed += 1;
                    tracing::error!(
                        topic = %event.topic,
                        handler = registration.id,
                        panic = %message,
                        "Event handler panicked"
                    );
                }
            }
        }
        summary
    }

    /// Most recently dispatched event.
    pub fn last_event(&self) -> Option<Event> {
        lock(&self.inner.last_event).clone()
    }

    /// Total number of live registrations across all topics.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.registry).entries.values().map(Vec::len).sum()
    }

    /// Number of topics (including the wildcard) with at least one handler.
    pub fn topic_count(&self) -> usize {
        lock(&self.inner.registry).entries.len()
    }

    /// Remove every registration. Outstanding handles become no-ops.
    pub fn clear(&self) {
        let mut registry = lock(&self.inner.registry);
        for registration in registry.entries.values().flatten() {
            registration.active.store(false, Ordering::SeqCst);
        }
        registry.entries.clear();
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn invoke(registration: &Registration, event: &Event) -> HandlerOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| registration.handler.call(event))) {
        Ok(Ok(())) => HandlerOutcome::Delivered,
        Ok(Err(error)) => HandlerOutcome::Failed(error),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            HandlerOutcome::Panicked(message)
        }
    }
}

/// Removes exactly one registration.
///
/// Calling [`Unsubscribe::unsubscribe`] more than once has no further effect.
/// Dropping the handle leaves the registration in place.
pub struct Unsubscribe {
    registry: Weak<Inner>,
    filter: TopicFilter,
    id: u64,
    done: AtomicBool,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        if lock(&inner.registry).remove(self.filter, self.id) {
            tracing::debug!(topic = %self.filter, id = self.id, "Handler unsubscribed");
        }
    }

    pub fn topic(&self) -> TopicFilter {
        self.filter
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("topic", &self.filter)
            .field("id", &self.id)
            .field("done", &self.done.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn event(topic: Topic) -> Event {
        Event::new(topic, json!({ "id": "doc-1" }), Utc::now())
    }

    fn counter() -> (
        Arc<AtomicU32>,
        impl Fn(&serde_json::Value) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = Arc::clone(&count);
        (count, move |_payload: &serde_json::Value| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_specific_handler_receives_payload() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        let _sub = dispatcher.on(Topic::DocumentUploaded, move |payload| {
            lock(&seen_clone).push(payload.clone());
            Ok(())
        });

        dispatcher.dispatch(&event(Topic::DocumentUploaded));
        dispatcher.dispatch(&event(Topic::MatterCreated));

        assert_eq!(*lock(&seen), vec![json!({ "id": "doc-1" })]);
    }

    #[test]
    fn test_wildcard_receives_full_event() {
        let dispatcher = Dispatcher::new();
        let topics = Arc::new(Mutex::new(Vec::new()));

        let topics_clone = Arc::clone(&topics);
        let _sub = dispatcher.on_any(move |event| {
            lock(&topics_clone).push(event.topic);
            Ok(())
        });

        dispatcher.dispatch(&event(Topic::DocumentUploaded));
        dispatcher.dispatch(&event(Topic::InvoicePaid));

        assert_eq!(
            *lock(&topics),
            vec![Topic::DocumentUploaded, Topic::InvoicePaid]
        );
    }

    #[test]
    fn test_specific_before_wildcard_exactly_once() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        // Wildcard registered first to show ordering is by group, not by time.
        let order_b = Arc::clone(&order);
        let _b = dispatcher.on_any(move |_| {
            lock(&order_b).push("B");
            Ok(())
        });
        let order_a = Arc::clone(&order);
        let _a = dispatcher.on(Topic::DocumentUploaded, move |_| {
            lock(&order_a).push("A");
            Ok(())
        });

        let summary = dispatcher.dispatch(&event(Topic::DocumentUploaded));

        assert_eq!(*lock(&order), vec!["A", "B"]);
        assert_eq!(summary, DispatchSummary { delivered: 2, failed: 0 });
    }

    #[test]
    fn test_registration_order_within_topic() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut subs = Vec::new();
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            subs.push(dispatcher.on(Topic::MatterUpdated, move |_| {
                lock(&order).push(label);
                Ok(())
            }));
        }

        dispatcher.dispatch(&event(Topic::MatterUpdated));
        assert_eq!(*lock(&order), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let dispatcher = Dispatcher::new();
        let (count, handler) = counter();
        let (other_count, other) = counter();

        let sub = dispatcher.on(Topic::MatterClosed, handler);
        let _other = dispatcher.on(Topic::MatterClosed, other);

        sub.unsubscribe();
        sub.unsubscribe();

        dispatcher.dispatch(&event(Topic::MatterClosed));

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(other_count.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.subscriber_count(), 1);
    }

    #[test]
    fn test_duplicate_registration_is_a_noop() {
        let dispatcher = Dispatcher::new();
        let (count, handler) = counter();
        let handler: PayloadHandler = Arc::new(handler);

        let first = dispatcher.subscribe(Topic::InvoiceCreated, Arc::clone(&handler));
        let second = dispatcher.subscribe(Topic::InvoiceCreated, Arc::clone(&handler));
        assert_eq!(dispatcher.subscriber_count(), 1);

        dispatcher.dispatch(&event(Topic::InvoiceCreated));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        second.unsubscribe();
        first.unsubscribe();
        assert_eq!(dispatcher.subscriber_count(), 0);

        dispatcher.dispatch(&event(Topic::InvoiceCreated));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_handler_on_two_topics_is_two_registrations() {
        let dispatcher = Dispatcher::new();
        let (count, handler) = counter();
        let handler: PayloadHandler = Arc::new(handler);

        let _a = dispatcher.subscribe(Topic::MatterCreated, Arc::clone(&handler));
        let _b = dispatcher.subscribe(Topic::MatterClosed, handler);

        dispatcher.dispatch(&event(Topic::MatterCreated));
        dispatcher.dispatch(&event(Topic::MatterClosed));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_removing_wildcard_keeps_specific() {
        let dispatcher = Dispatcher::new();
        let (specific_count, specific) = counter();
        let wildcard_count = Arc::new(AtomicU32::new(0));

        let _specific = dispatcher.on(Topic::DocumentUploaded, specific);
        let wildcard_clone = Arc::clone(&wildcard_count);
        let wildcard = dispatcher.on_any(move |_| {
            wildcard_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.dispatch(&event(Topic::DocumentUploaded));
        wildcard.unsubscribe();
        dispatcher.dispatch(&event(Topic::DocumentUploaded));

        assert_eq!(specific_count.load(Ordering::SeqCst), 2);
        assert_eq!(wildcard_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_and_panicking_handlers_are_isolated() {
        let dispatcher = Dispatcher::new();
        let (count, handler) = counter();
        let wildcard_count = Arc::new(AtomicU32::new(0));

        let _err = dispatcher.on(Topic::PaymentReceived, |_| {
            Err(anyhow::anyhow!("ledger unavailable"))
        });
        let _panic = dispatcher.on(Topic::PaymentReceived, |_| panic!("handler bug"));
        let _ok = dispatcher.on(Topic::PaymentReceived, handler);
        let wildcard_clone = Arc::clone(&wildcard_count);
        let _wild = dispatcher.on_any(move |_| {
            wildcard_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let summary = dispatcher.dispatch(&event(Topic::PaymentReceived));

        assert_eq!(summary, DispatchSummary { delivered: 2, failed: 2 });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_can_unsubscribe_itself_during_dispatch() {
        let dispatcher = Dispatcher::new();
        let count = Arc::new(AtomicU32::new(0));
        let slot: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));

        let count_clone = Arc::clone(&count);
        let slot_clone = Arc::clone(&slot);
        let sub = dispatcher.on(Topic::NotificationCreated, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = lock(&slot_clone).as_ref() {
                sub.unsubscribe();
            }
            Ok(())
        });
        *lock(&slot) = Some(sub);

        dispatcher.dispatch(&event(Topic::NotificationCreated));
        dispatcher.dispatch(&event(Topic::NotificationCreated));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.topic_count(), 0);
    }

    #[test]
    fn test_sibling_removed_mid_dispatch_is_skipped() {
        let dispatcher = Dispatcher::new();
        let (count, victim) = counter();
        let slot: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));

        let slot_clone = Arc::clone(&slot);
        let _remover = dispatcher.on(Topic::CalendarReminder, move |_| {
            if let Some(sub) = lock(&slot_clone).as_ref() {
                sub.unsubscribe();
            }
            Ok(())
        });
        *lock(&slot) = Some(dispatcher.on(Topic::CalendarReminder, victim));

        let summary = dispatcher.dispatch(&event(Topic::CalendarReminder));

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(summary.delivered, 1);
    }

    #[test]
    fn test_subscribe_during_dispatch_applies_to_next_event() {
        let dispatcher = Dispatcher::new();
        let (count, late) = counter();
        let late: PayloadHandler = Arc::new(late);
        let late_subs = Arc::new(Mutex::new(Vec::new()));

        let dispatcher_clone = dispatcher.clone();
        let late_subs_clone = Arc::clone(&late_subs);
        let _adder = dispatcher.on(Topic::PresenceUpdated, move |_| {
            let sub = dispatcher_clone.subscribe(Topic::PresenceUpdated, Arc::clone(&late));
            lock(&late_subs_clone).push(sub);
            Ok(())
        });

        dispatcher.dispatch(&event(Topic::PresenceUpdated));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        dispatcher.dispatch(&event(Topic::PresenceUpdated));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_event_and_clear() {
        let dispatcher = Dispatcher::new();
        assert!(dispatcher.last_event().is_none());

        let (count, handler) = counter();
        let sub = dispatcher.on(Topic::AgentProgress, handler);
        let progress = event(Topic::AgentProgress);
        dispatcher.dispatch(&progress);
        assert_eq!(dispatcher.last_event(), Some(progress));

        dispatcher.clear();
        assert_eq!(dispatcher.subscriber_count(), 0);
        sub.unsubscribe();
        dispatcher.dispatch(&event(Topic::AgentProgress));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_filter_accepts_parsed_names() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["*", "matter.closed"] {
            let filter: TopicFilter = name.parse().expect("known filter");
            let seen = Arc::clone(&seen);
            let sub = dispatcher.subscribe_filter(
                filter,
                Arc::new(move |event: &Event| {
                    lock(&seen).push((name, event.topic));
                    Ok(())
                }),
            );
            assert_eq!(sub.topic(), filter);
        }

        dispatcher.dispatch(&event(Topic::MatterClosed));
        dispatcher.dispatch(&event(Topic::MatterCreated));

        assert_eq!(
            *lock(&seen),
            vec![
                ("matter.closed", Topic::MatterClosed),
                ("*", Topic::MatterClosed),
                ("*", Topic::MatterCreated),
            ]
        );
    }

    #[test]
    fn test_handle_outliving_dispatcher_is_harmless() {
        let dispatcher = Dispatcher::new();
        let (_count, handler) = counter();
        let sub = dispatcher.on(Topic::MatterCreated, handler);
        drop(dispatcher);
        sub.unsubscribe();
    }
}
