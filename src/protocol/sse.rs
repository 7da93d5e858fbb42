//! Incremental decoder for `text/event-stream` bodies.
//!
//! Only the `data` field matters to the progress endpoint: each dispatched
//! event yields its `data` lines joined with `\n`. `event`, `id` and `retry`
//! fields and `:` comment lines are ignored.

use std::collections::VecDeque;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tracing::warn;

/// Longest line kept before the rest of it is dropped.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Accumulates raw body chunks and yields complete event payloads.
#[derive(Debug)]
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line.
    pending: Vec<u8>,
    /// `data` lines of the event being assembled.
    data: Vec<String>,
    /// A byte order mark may only precede the first line.
    first_line: bool,
    /// Skipping to the end of a line that outgrew `max_line`.
    discarding: bool,
    max_line: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            data: Vec::new(),
            first_line: true,
            discarding: false,
            max_line,
        }
    }

    /// Feed a chunk of the body. Returns payloads completed by this chunk,
    /// in order.
    ///
    /// Chunks may split lines (and multi-byte characters) anywhere. A line
    /// longer than the limit is dropped whole.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                if std::mem::take(&mut self.discarding) {
                    self.first_line = false;
                    continue;
                }
                let line = std::mem::take(&mut self.pending);
                if let Some(payload) = self.process_line(&line) {
                    out.push(payload);
                }
            } else if !self.discarding {
                if self.pending.len() >= self.max_line {
                    warn!(limit = self.max_line, "event-stream line too long, dropping it");
                    self.pending = Vec::new();
                    self.discarding = true;
                } else {
                    self.pending.push(byte);
                }
            }
        }
        out
    }

    /// Flush at end of body. A trailing event without its blank line is
    /// still dispatched.
    pub fn finish(&mut self) -> Option<String> {
        self.discarding = false;
        let line = std::mem::take(&mut self.pending);
        if !line.is_empty()
            && let Some(payload) = self.process_line(&line)
        {
            return Some(payload);
        }
        self.dispatch()
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<String> {
        let mut raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if std::mem::take(&mut self.first_line) {
            raw = raw.strip_prefix(BOM).unwrap_or(raw);
        }
        if raw.is_empty() {
            return self.dispatch();
        }
        let line = String::from_utf8_lossy(raw);
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        Some(payload)
    }
}

/// Turn a stream of body chunks into a stream of event payloads.
///
/// A chunk error is yielded in place and ends the stream; payloads decoded
/// before it are delivered first.
pub fn decode_stream<S, B, E>(body: S) -> BoxStream<'static, Result<String, E>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Send + 'static,
{
    let state = (Box::pin(body), SseDecoder::new(), VecDeque::new(), false);
    stream::unfold(
        state,
        |(mut body, mut decoder, mut queue, mut done)| async move {
            loop {
                if let Some(payload) = queue.pop_front() {
                    return Some((Ok(payload), (body, decoder, queue, done)));
                }
                if done {
                    return None;
                }
                match body.next().await {
                    Some(Ok(chunk)) => queue.extend(decoder.feed(chunk.as_ref())),
                    Some(Err(e)) => {
                        done = true;
                        return Some((Err(e), (body, decoder, queue, done)));
                    }
                    None => {
                        done = true;
                        queue.extend(decoder.finish());
                    }
                }
            }
        },
    )
    .boxed()
}
