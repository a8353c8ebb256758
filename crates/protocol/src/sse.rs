//! Incremental `text/event-stream` decoder.
//!
//! Bytes arrive in arbitrary chunks from the transport. The decoder buffers
//! them, splits on line endings (`\n` or `\r\n`) and assembles frames field by
//! field. A blank line terminates a frame.

use bytes::BytesMut;

use crate::error::ProtocolError;

/// Event name used when a frame carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// One complete frame from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, or [`DEFAULT_EVENT`].
    pub event: String,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// Value of the last `id:` field, if any.
    pub id: Option<String>,
}

/// Upper bound on one frame: buffered bytes awaiting a line ending plus the
/// data already collected for the frame being assembled.
pub const DEFAULT_FRAME_LIMIT: usize = 1024 * 1024;

/// Stateful line and frame assembler.
///
/// A trailing partial frame left in the buffer when the stream ends is
/// discarded, never emitted.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Prefix of `buffer` already known to hold no line ending.
    scanned: usize,
    limit: usize,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    id: Option<String>,
    has_fields: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_FRAME_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            scanned: 0,
            limit,
            event: None,
            data: Vec::new(),
            data_len: 0,
            id: None,
            has_fields: false,
        }
    }

    /// Feed a chunk and collect every frame it completes.
    ///
    /// Fails once the frame being assembled outgrows the limit; the decoder
    /// must not be used after that.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, ProtocolError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let newline_pos = self.scanned + offset;
            self.scanned = 0;

            let mut line_bytes = self.buffer.split_to(newline_pos + 1);
            line_bytes.truncate(line_bytes.len() - 1);
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.truncate(line_bytes.len() - 1);
            }

            // Invalid UTF-8 lines are skipped, the frame keeps assembling.
            let Ok(line) = std::str::from_utf8(&line_bytes) else {
                continue;
            };

            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() + self.data_len > self.limit {
            return Err(ProtocolError::FrameTooLarge { limit: self.limit });
        }
        Ok(frames)
    }

    /// Number of bytes held back waiting for a line ending.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.take_frame();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => {
                self.event = Some(value.to_string());
                self.has_fields = true;
            }
            "data" => {
                self.data_len += value.len();
                self.data.push(value.to_string());
                self.has_fields = true;
            }
            "id" if !value.contains('\0') => {
                self.id = Some(value.to_string());
            }
            // `retry:` is ignored: reconnect timing is owned by the client.
            _ => {}
        }
        None
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if !self.has_fields {
            return None;
        }
        self.has_fields = false;

        let event = self
            .event
            .take()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT.to_string());
        let data = std::mem::take(&mut self.data).join("\n");
        self.data_len = 0;

        Some(SseFrame {
            event,
            data,
            id: self.id.clone(),
        })
    }
}
