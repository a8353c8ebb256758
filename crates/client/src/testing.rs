//! Scripted event source for driving the transport manager in tests.
//!
//! Each call to `open` consumes the next scripted step. When the script runs
//! out, `open` returns a stream that never yields, which looks like a server
//! that accepted the request and went quiet.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_channel::mpsc;
use tokio::time::Instant;
use url::Url;

use casefeed_protocol::{SseFrame, CONNECTED_MARKER, HEARTBEAT_MARKER};

use crate::error::TransportError;
use crate::lock;
use crate::ports::{EventSourcePort, FrameStream};

type FrameResult = Result<SseFrame, TransportError>;

enum ScriptStep {
    Refuse(u16),
    Stall,
    Stream(mpsc::UnboundedReceiver<FrameResult>),
}

/// One recorded call to `open`.
#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub url: Url,
    pub at: Instant,
}

#[derive(Default)]
pub struct ScriptedEventSource {
    script: Mutex<VecDeque<ScriptStep>>,
    opened: Mutex<Vec<OpenRecord>>,
}

impl ScriptedEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `open` fails with the given HTTP status.
    pub fn refuse(&self, status: u16) {
        lock(&self.script).push_back(ScriptStep::Refuse(status));
    }

    /// Next `open` never resolves, like a server that accepts the socket and
    /// never answers.
    pub fn stall(&self) {
        lock(&self.script).push_back(ScriptStep::Stall);
    }

    /// Next `open` succeeds; frames are pushed through the returned feeder.
    pub fn accept(&self) -> StreamFeeder {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.script).push_back(ScriptStep::Stream(rx));
        StreamFeeder { tx }
    }

    pub fn open_count(&self) -> usize {
        lock(&self.opened).len()
    }

    pub fn opened(&self) -> Vec<OpenRecord> {
        lock(&self.opened).clone()
    }
}

#[async_trait]
impl EventSourcePort for ScriptedEventSource {
    async fn open(&self, url: &Url) -> Result<FrameStream, TransportError> {
        lock(&self.opened).push(OpenRecord {
            url: url.clone(),
            at: Instant::now(),
        });

        let step = lock(&self.script).pop_front();
        match step {
            Some(ScriptStep::Refuse(status)) => Err(TransportError::Status(status)),
            Some(ScriptStep::Stall) => std::future::pending().await,
            Some(ScriptStep::Stream(rx)) => Ok(Box::pin(rx)),
            None => Ok(Box::pin(futures_util::stream::pending())),
        }
    }
}

/// Server side of a scripted stream. Dropping it closes the stream.
pub struct StreamFeeder {
    tx: mpsc::UnboundedSender<FrameResult>,
}

impl StreamFeeder {
    pub fn frame(&self, event: &str, data: &str) {
        let _ = self.tx.unbounded_send(Ok(SseFrame {
            event: event.to_string(),
            data: data.to_string(),
            id: None,
        }));
    }

    pub fn confirm(&self) {
        self.frame(CONNECTED_MARKER, "");
    }

    pub fn heartbeat(&self) {
        self.frame(HEARTBEAT_MARKER, "");
    }

    /// Break the stream with a transport error.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .tx
            .unbounded_send(Err(TransportError::Stream(reason.to_string())));
    }

    /// Whether the client side still holds the stream.
    pub fn is_attached(&self) -> bool {
        !self.tx.is_closed()
    }
}
