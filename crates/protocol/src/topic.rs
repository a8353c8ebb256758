//! Topic catalog for the practice event feed.
//!
//! The catalog is closed: the client only knows the topics listed here, and
//! frames carrying any other name are ignored at the protocol level. Two names
//! are reserved for control frames and never become events.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Event name the server sends once the stream is live.
pub const CONNECTED_MARKER: &str = "connected";

/// Event name the server sends periodically to prove liveness.
pub const HEARTBEAT_MARKER: &str = "heartbeat";

/// Wildcard spelling accepted by [`TopicFilter::from_str`].
pub const WILDCARD: &str = "*";

// =============================================================================
// Topic
// =============================================================================

/// A topic from the closed event catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    // Document lifecycle
    DocumentUploaded,
    DocumentUpdated,
    DocumentDeleted,
    DocumentProcessed,

    // Matter lifecycle
    MatterCreated,
    MatterUpdated,
    MatterClosed,

    // Billing lifecycle
    TimeEntryCreated,
    InvoiceCreated,
    InvoicePaid,
    PaymentReceived,

    // Notifications
    NotificationCreated,

    // Calendar
    CalendarEventCreated,
    CalendarEventUpdated,
    CalendarEventDeleted,
    CalendarReminder,

    // Presence
    PresenceUpdated,

    // Background agent activity
    AgentTaskStarted,
    AgentProgress,
    AgentTaskCompleted,
    AgentTaskFailed,
}

impl Topic {
    /// Every catalog topic, in catalog order.
    pub const ALL: [Topic; 21] = [
        Topic::DocumentUploaded,
        Topic::DocumentUpdated,
        Topic::DocumentDeleted,
        Topic::DocumentProcessed,
        Topic::MatterCreated,
        Topic::MatterUpdated,
        Topic::MatterClosed,
        Topic::TimeEntryCreated,
        Topic::InvoiceCreated,
        Topic::InvoicePaid,
        Topic::PaymentReceived,
        Topic::NotificationCreated,
        Topic::CalendarEventCreated,
        Topic::CalendarEventUpdated,
        Topic::CalendarEventDeleted,
        Topic::CalendarReminder,
        Topic::PresenceUpdated,
        Topic::AgentTaskStarted,
        Topic::AgentProgress,
        Topic::AgentTaskCompleted,
        Topic::AgentTaskFailed,
    ];

    /// Wire name of the topic.
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::DocumentUploaded => "document.uploaded",
            Topic::DocumentUpdated => "document.updated",
            Topic::DocumentDeleted => "document.deleted",
            Topic::DocumentProcessed => "document.processed",
            Topic::MatterCreated => "matter.created",
            Topic::MatterUpdated => "matter.updated",
            Topic::MatterClosed => "matter.closed",
            Topic::TimeEntryCreated => "billing.time_entry_created",
            Topic::InvoiceCreated => "billing.invoice_created",
            Topic::InvoicePaid => "billing.invoice_paid",
            Topic::PaymentReceived => "billing.payment_received",
            Topic::NotificationCreated => "notification.created",
            Topic::CalendarEventCreated => "calendar.event_created",
            Topic::CalendarEventUpdated => "calendar.event_updated",
            Topic::CalendarEventDeleted => "calendar.event_deleted",
            Topic::CalendarReminder => "calendar.reminder",
            Topic::PresenceUpdated => "presence.updated",
            Topic::AgentTaskStarted => "agent.task_started",
            Topic::AgentProgress => "agent.progress",
            Topic::AgentTaskCompleted => "agent.task_completed",
            Topic::AgentTaskFailed => "agent.task_failed",
        }
    }

    /// Look up a wire name in the catalog.
    ///
    /// Returns `None` for control markers and for anything outside the catalog.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|topic| topic.as_str() == name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s).ok_or_else(|| ProtocolError::UnknownTopic(s.to_string()))
    }
}

impl TryFrom<String> for Topic {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.as_str().to_string()
    }
}

// =============================================================================
// Topic Filter
// =============================================================================

/// Registry key for subscriptions: one catalog topic, or every topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicFilter {
    Only(Topic),
    Any,
}

impl TopicFilter {
    pub fn matches(self, topic: Topic) -> bool {
        match self {
            TopicFilter::Only(expected) => expected == topic,
            TopicFilter::Any => true,
        }
    }
}

impl From<Topic> for TopicFilter {
    fn from(topic: Topic) -> Self {
        TopicFilter::Only(topic)
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicFilter::Only(topic) => topic.fmt(f),
            TopicFilter::Any => f.write_str(WILDCARD),
        }
    }
}

impl FromStr for TopicFilter {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == WILDCARD {
            Ok(TopicFilter::Any)
        } else {
            s.parse().map(TopicFilter::Only)
        }
    }
}
