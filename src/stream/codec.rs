//! Frame decoder for generation streams.
//!
//! A frame is an `event: <name>` line followed by a `data: <json>` line.
//! [`FrameCodec`] splits the incoming bytes on `\n` with
//! [`LinesCodec`], holds the event name until its data line arrives, and
//! yields a typed [`StreamEvent`]. Chunks may split anywhere, including
//! inside a multi-byte character; only complete lines are interpreted.
//!
//! | Event      | Payload                         | Yields                     |
//! |------------|---------------------------------|----------------------------|
//! | `start`    | `{"chatId": ...}`               | [`StreamEvent::Start`]     |
//! | `word`     | `{"word": ..., "index": ...}`   | [`StreamEvent::Word`]      |
//! | `complete` | `{"totalWords": ...}`           | [`StreamEvent::Complete`]  |
//! | *(other)*  | anything                        | nothing; logged at `DEBUG` |
//!
//! Malformed payloads, invalid UTF-8 and over-long lines drop the frame
//! with a warning.
//! They never surface as errors, so one bad frame cannot abort a stream.

use std::io;

use bytes::BytesMut;
use serde::Deserialize;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::models::event::StreamEvent;
use crate::AppError;

/// Maximum line length accepted by the decoder: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPayload {
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct WordPayload {
    word: String,
    index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletePayload {
    total_words: u64,
}

/// Incremental `event:`/`data:` frame decoder.
///
/// Use with [`tokio_util::codec::FramedRead`] or feed a [`BytesMut`]
/// directly through [`Decoder::decode`].
#[derive(Debug)]
pub struct FrameCodec {
    lines: LinesCodec,
    pending_event: Option<String>,
}

impl FrameCodec {
    /// Decoder with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_BYTES),
            pending_event: None,
        }
    }

    /// Event name waiting for its data line, if any.
    #[must_use]
    pub fn pending_event(&self) -> Option<&str> {
        self.pending_event.as_deref()
    }

    /// Interpret one complete line.
    fn accept_line(&mut self, line: &str) -> Option<StreamEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(name) = strip_field(line, "event") {
            self.pending_event = Some(name.to_owned());
            return None;
        }

        if let Some(data) = strip_field(line, "data") {
            // A data line without a preceding event line is not a frame.
            let name = self.pending_event.take()?;
            return parse_payload(&name, data);
        }

        None
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = StreamEvent;
    type Error = AppError;

    /// Decode the next complete frame from `src`.
    ///
    /// Returns `Ok(None)` when `src` holds no complete frame yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StreamEvent>, AppError> {
        loop {
            let line = match self.lines.decode(src) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(
                        limit = MAX_LINE_BYTES,
                        "frame line too long, dropping frame"
                    );
                    self.pending_event = None;
                    continue;
                }
                // LinesCodec has already consumed the offending line.
                Err(LinesCodecError::Io(err)) if err.kind() == io::ErrorKind::InvalidData => {
                    warn!(error = %err, "frame line is not valid UTF-8, dropping frame");
                    self.pending_event = None;
                    continue;
                }
                Err(LinesCodecError::Io(err)) => return Err(err.into()),
            };

            if let Some(event) = self.accept_line(&line) {
                return Ok(Some(event));
            }
        }
    }

    /// Drain complete frames at end of stream and discard any partial line.
    ///
    /// No event is synthesised for an event line whose data never arrived.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<StreamEvent>, AppError> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if !src.is_empty() {
            debug!(bytes = src.len(), "discarding partial line at end of stream");
            src.clear();
        }
        if let Some(name) = self.pending_event.take() {
            debug!(event = name, "stream ended before data line");
        }
        Ok(None)
    }
}

/// Strip a `<field>:` prefix and at most one following space.
fn strip_field<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest).trim())
}

/// Map an event name and JSON payload onto a [`StreamEvent`].
fn parse_payload(name: &str, data: &str) -> Option<StreamEvent> {
    let parsed = match name {
        "start" => serde_json::from_str::<StartPayload>(data)
            .map(|p| StreamEvent::Start { task_id: p.chat_id }),
        "word" => serde_json::from_str::<WordPayload>(data).map(|p| StreamEvent::Word {
            word: p.word,
            index: p.index,
        }),
        "complete" => serde_json::from_str::<CompletePayload>(data).map(|p| {
            StreamEvent::Complete {
                total_words: p.total_words,
            }
        }),
        other => {
            debug!(event = other, "skipping unknown stream event");
            return None;
        }
    };

    match parsed {
        Ok(StreamEvent::Word { ref word, index }) if word.is_empty() => {
            warn!(index, "dropping word frame with empty word");
            None
        }
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event = name, error = %err, raw = data, "dropping malformed frame");
            None
        }
    }
}
