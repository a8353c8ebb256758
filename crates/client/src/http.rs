//! HTTP event source backed by `reqwest`.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use url::Url;

use casefeed_protocol::FrameDecoder;

use crate::config::DEFAULT_HANDSHAKE_TIMEOUT_MS;
use crate::error::TransportError;
use crate::ports::{EventSourcePort, FrameStream};

/// Opens the stream with a long-lived GET and decodes the body as it arrives.
///
/// Only connection setup and response headers are bounded in time; the body
/// is expected to stay open indefinitely.
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: Client,
    handshake_timeout: Duration,
}

impl HttpEventSource {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS))
    }

    /// Bound TCP/TLS setup and the wait for response headers.
    pub fn with_timeout(handshake_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(handshake_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            handshake_timeout,
        }
    }

    /// Use a preconfigured client (proxies, TLS roots, default headers).
    pub fn with_client(client: Client, handshake_timeout: Duration) -> Self {
        Self {
            client,
            handshake_timeout,
        }
    }
}

impl Default for HttpEventSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSourcePort for HttpEventSource {
    async fn open(&self, url: &Url) -> Result<FrameStream, TransportError> {
        let request = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send();
        let response = tokio::time::timeout(self.handshake_timeout, request)
            .await
            .map_err(|_| TransportError::Timeout(self.handshake_timeout))??;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = Box::pin(response.bytes_stream());
        let frames = futures_util::stream::unfold(
            (body, FrameDecoder::new(), VecDeque::new(), false),
            |(mut body, mut decoder, mut ready, done)| async move {
                loop {
                    if let Some(frame) = ready.pop_front() {
                        return Some((Ok(frame), (body, decoder, ready, done)));
                    }
                    if done {
                        return None;
                    }

                    let error = match body.next().await {
                        Some(Ok(chunk)) => match decoder.push(&chunk) {
                            Ok(frames) => {
                                ready.extend(frames);
                                continue;
                            }
                            Err(error) => TransportError::from(error),
                        },
                        Some(Err(error)) => TransportError::from(error),
                        None => {
                            if decoder.buffered_len() > 0 {
                                tracing::debug!(
                                    bytes = decoder.buffered_len(),
                                    "Discarding partial frame at end of stream"
                                );
                            }
                            return None;
                        }
                    };
                    return Some((Err(error), (body, decoder, ready, true)));
                }
            },
        );

        Ok(Box::pin(frames))
    }
}
