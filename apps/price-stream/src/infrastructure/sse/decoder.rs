//! Event-stream decoding.
//!
//! Incremental `text/event-stream` decoder. Bytes are buffered until a full
//! line is available, so chunk boundaries may fall anywhere, including inside
//! a multi-byte UTF-8 sequence or between the two bytes of a CRLF.
//!
//! Neither a single line nor the accumulated `data` of one event may exceed
//! the decoder's limit. A peer that never sends a line terminator fails the
//! stream instead of growing the buffer.

use bytes::BytesMut;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Default limit for one line and for the `data` of one event (64 KiB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Event-stream decoding errors. The decoder must be discarded after one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A line grew past the limit without a terminator.
    #[error("event-stream line exceeds {limit} bytes")]
    LineTooLong {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The `data` lines of one event add up to more than the limit.
    #[error("event-stream event data exceeds {limit} bytes")]
    EventTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },
}

/// Incremental decoder yielding the `data` payload of each dispatched event.
///
/// Only unnamed events and events named `message` are dispatched. `id` and
/// `retry` fields are ignored; reconnection is handled by the caller.
#[derive(Debug)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
    /// Prefix of `buffer` already known to hold no line terminator.
    scanned: usize,
    max_line: usize,
    data: String,
    has_data: bool,
    event: Option<String>,
}

impl Default for EventStreamDecoder {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }
}

impl EventStreamDecoder {
    /// Create an empty decoder with [`DEFAULT_MAX_LINE_BYTES`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty decoder with a custom line and event limit.
    #[must_use]
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_line: max_line.max(1),
            data: String::new(),
            has_data: false,
            event: None,
        }
    }

    /// Consume `chunk` and return the payloads of every event it completes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] once a line or an event outgrows the limit.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, DecodeError> {
        self.buffer.extend_from_slice(chunk);

        let mut dispatched = Vec::new();
        while let Some((line_end, next_start)) = find_eol(&self.buffer, self.scanned) {
            if line_end > self.max_line {
                return Err(self.line_too_long());
            }
            let line = self.buffer.split_to(next_start);
            self.scanned = 0;
            if let Some(data) = self.process_line(&line[..line_end])? {
                dispatched.push(data);
            }
        }

        // Rescan a trailing CR next time; it may be half of a CRLF.
        self.scanned = self.buffer.len().saturating_sub(1);
        if self.buffer.len() > self.max_line {
            return Err(self.line_too_long());
        }
        Ok(dispatched)
    }

    const fn line_too_long(&self) -> DecodeError {
        DecodeError::LineTooLong {
            limit: self.max_line,
        }
    }

    fn process_line(&mut self, line: &[u8]) -> Result<Option<String>, DecodeError> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }
        if line[0] == b':' {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(line);
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };

        match field {
            "data" => {
                let separator = usize::from(self.has_data);
                if self.data.len() + separator + value.len() > self.max_line {
                    return Err(DecodeError::EventTooLarge {
                        limit: self.max_line,
                    });
                }
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        Ok(None)
    }

    fn dispatch(&mut self) -> Option<String> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if !std::mem::take(&mut self.has_data) {
            return None;
        }

        match event.as_deref() {
            None | Some("" | "message") => Some(data),
            Some(_) => None,
        }
    }
}

/// `(line_end, next_line_start)` of the first complete line, or `None` when
/// more bytes are needed. The search starts at `from`. A trailing lone CR
/// waits for a possible LF.
fn find_eol(bytes: &[u8], from: usize) -> Option<(usize, usize)> {
    let position = from
        + bytes
            .get(from..)?
            .iter()
            .position(|b| *b == CR || *b == LF)?;
    if bytes[position] == LF {
        return Some((position, position + 1));
    }

    match bytes.get(position + 1) {
        None => None,
        Some(&LF) => Some((position, position + 2)),
        Some(_) => Some((position, position + 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut EventStreamDecoder, chunk: &[u8]) -> Vec<String> {
        decoder.feed(chunk).unwrap()
    }

    #[test]
    fn single_event() {
        let mut decoder = EventStreamDecoder::new();
        assert_eq!(
            feed(&mut decoder, b"data: {\"price\":1}\n\n"),
            vec![r#"{"price":1}"#]
        );
    }

    #[test]
    fn crlf_line_endings() {
        let mut decoder = EventStreamDecoder::new();
        assert_eq!(feed(&mut decoder, b"data: a\r\n\r\ndata: b\r\n\r\n"), vec!["a", "b"]);
    }

    #[test]
    fn crlf_split_across_chunks() {
        let mut decoder = EventStreamDecoder::new();
        assert!(feed(&mut decoder, b"data: a\r").is_empty());
        assert!(feed(&mut decoder, b"\n\r").is_empty());
        assert_eq!(feed(&mut decoder, b"\n"), vec!["a"]);
    }

    #[test]
    fn event_split_at_every_byte() {
        let raw = "data: {\"symbol\":\"€UR\"}\n\n".as_bytes();
        let mut decoder = EventStreamDecoder::new();
        let mut out = Vec::new();
        for byte in raw {
            out.extend(feed(&mut decoder, std::slice::from_ref(byte)));
        }
        assert_eq!(out, vec![r#"{"symbol":"€UR"}"#]);
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut decoder = EventStreamDecoder::new();
        assert_eq!(
            feed(&mut decoder, b"data: {\ndata: \"price\": 2}\n\n"),
            vec!["{\n\"price\": 2}"]
        );
    }

    #[test]
    fn comments_and_unknown_fields_are_ignored() {
        let mut decoder = EventStreamDecoder::new();
        let out = feed(&mut decoder, b": keep-alive\n\nid: 7\nretry: 1000\ndata:x\n\n");
        assert_eq!(out, vec!["x"]);
    }

    #[test]
    fn named_events_are_skipped() {
        let mut decoder = EventStreamDecoder::new();
        let out = feed(&mut decoder, b"event: ping\ndata: 1\n\nevent: message\ndata: 2\n\n");
        assert_eq!(out, vec!["2"]);
    }

    #[test]
    fn unterminated_event_is_held() {
        let mut decoder = EventStreamDecoder::new();
        assert!(feed(&mut decoder, b"data: partial\n").is_empty());
        assert_eq!(feed(&mut decoder, b"\n"), vec!["partial"]);
    }

    #[test]
    fn unterminated_line_past_limit_fails() {
        let mut decoder = EventStreamDecoder::with_max_line(16);
        assert!(feed(&mut decoder, b"data: 0123456789").is_empty());
        assert_eq!(
            decoder.feed(b"abcdef"),
            Err(DecodeError::LineTooLong { limit: 16 })
        );
    }

    #[test]
    fn endless_line_in_small_chunks_fails() {
        let mut decoder = EventStreamDecoder::with_max_line(1024);
        let chunk = [b'x'; 100];
        let mut result = Ok(Vec::new());
        for _ in 0..20 {
            result = decoder.feed(&chunk);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(DecodeError::LineTooLong { limit: 1024 }));
    }

    #[test]
    fn terminated_line_past_limit_fails() {
        let mut decoder = EventStreamDecoder::with_max_line(8);
        assert_eq!(
            decoder.feed(b"data: 123456789\n\n"),
            Err(DecodeError::LineTooLong { limit: 8 })
        );
    }

    #[test]
    fn line_at_limit_is_accepted() {
        let mut decoder = EventStreamDecoder::with_max_line(8);
        assert_eq!(feed(&mut decoder, b"data:abc\n\n"), vec!["abc"]);
    }

    #[test]
    fn event_data_past_limit_fails() {
        let mut decoder = EventStreamDecoder::with_max_line(10);
        assert!(feed(&mut decoder, b"data:12345\n").is_empty());
        assert_eq!(
            decoder.feed(b"data:12345\n"),
            Err(DecodeError::EventTooLarge { limit: 10 })
        );
    }

    #[test]
    fn buffer_is_released_after_each_line() {
        let mut decoder = EventStreamDecoder::with_max_line(32);
        for _ in 0..1000 {
            assert_eq!(feed(&mut decoder, b"data: {\"price\":1}\n\n").len(), 1);
        }
        assert!(decoder.buffer.is_empty());
    }

    #[test]
    fn default_limit() {
        let decoder = EventStreamDecoder::new();
        assert_eq!(decoder.max_line, DEFAULT_MAX_LINE_BYTES);
    }
}
