//! SSE decoding for streamed responses.
//!
//! [`EventStream`] pulls byte chunks from the network, splits them into
//! lines and runs each line through [`decode_line`]. Nothing is buffered past
//! the current partial line, and dropping the stream closes the connection.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use serde::de::IgnoredAny;
use serde_json::Value;

use crate::{Error, Result};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Result of decoding one line of a streamed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Event(String),
    Done,
    Skip,
}

/// Decode a single line (without its trailing newline).
///
/// `data:` lines carrying valid JSON are returned unchanged, envelope
/// included. The space after the colon is optional, as in the SSE format.
/// `data: [DONE]` ends the stream. Lines without the prefix are read as
/// legacy JSON objects whose `chunk` field is the event. Anything else is
/// skipped.
pub fn decode_line(line: &str) -> LineOutcome {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return LineOutcome::Skip;
    }

    if let Some(data) = line.strip_prefix(DATA_PREFIX) {
        let data = data.trim();
        if data == DONE_SENTINEL {
            return LineOutcome::Done;
        }
        return match serde_json::from_str::<IgnoredAny>(data) {
            Ok(_) => LineOutcome::Event(line.to_string()),
            Err(e) => {
                tracing::debug!(error = %e, data, "Skipping malformed SSE data line");
                LineOutcome::Skip
            }
        };
    }

    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(mut object)) => match object.remove("chunk") {
            Some(Value::String(chunk)) => LineOutcome::Event(chunk),
            Some(Value::Null) | None => LineOutcome::Skip,
            Some(other) => LineOutcome::Event(other.to_string()),
        },
        _ => LineOutcome::Skip,
    }
}

/// Strip the `data:` envelope from an event yielded by [`EventStream`].
pub fn data_payload(event: &str) -> &str {
    event
        .strip_prefix(DATA_PREFIX)
        .map(str::trim)
        .unwrap_or(event)
}

pin_project! {
    /// Lazy, forward-only sequence of decoded stream events.
    pub struct EventStream<S> {
        #[pin]
        inner: S,
        buffer: Vec<u8>,
        pos: usize,
        finished: bool,
    }
}

impl<S, E> EventStream<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(4096),
            pos: 0,
            finished: false,
        }
    }
}

impl<S> EventStream<S> {
    /// Whether the terminator, end of body, or a transport failure was reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

fn decode_bytes(line: &[u8]) -> LineOutcome {
    match std::str::from_utf8(line) {
        Ok(text) => decode_line(text),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping non UTF-8 stream line");
            LineOutcome::Skip
        }
    }
}

impl<S, E> Stream for EventStream<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.finished {
                return Poll::Ready(None);
            }

            while let Some(rel) = this.buffer[*this.pos..].iter().position(|b| *b == b'\n') {
                let start = *this.pos;
                let end = start + rel;
                *this.pos = end + 1;

                match decode_bytes(&this.buffer[start..end]) {
                    LineOutcome::Event(event) => return Poll::Ready(Some(Ok(event))),
                    LineOutcome::Done => {
                        *this.finished = true;
                        this.buffer.clear();
                        *this.pos = 0;
                        return Poll::Ready(None);
                    }
                    LineOutcome::Skip => {}
                }
            }

            if *this.pos > 0 {
                this.buffer.drain(..*this.pos);
                *this.pos = 0;
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => this.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(Error::connection(
                        "stream interrupted while reading response body",
                        e,
                    ))));
                }
                None => {
                    *this.finished = true;
                    let rest = std::mem::take(this.buffer);
                    return match decode_bytes(&rest) {
                        LineOutcome::Event(event) => Poll::Ready(Some(Ok(event))),
                        LineOutcome::Done | LineOutcome::Skip => Poll::Ready(None),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, stream};

    fn chunks(parts: &[&'static str]) -> EventStream<impl Stream<Item = std::io::Result<Bytes>>> {
        let items: Vec<std::io::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        EventStream::new(stream::iter(items))
    }

    #[test]
    fn test_decode_data_line_keeps_envelope() {
        assert_eq!(
            decode_line(r#"data: {"x":1}"#),
            LineOutcome::Event(r#"data: {"x":1}"#.to_string())
        );
    }

    #[test]
    fn test_decode_data_without_space() {
        assert_eq!(
            decode_line(r#"data:{"x":1}"#),
            LineOutcome::Event(r#"data:{"x":1}"#.to_string())
        );
        assert_eq!(decode_line("data:[DONE]"), LineOutcome::Done);
        assert_eq!(data_payload(r#"data:{"x":1}"#), r#"{"x":1}"#);
    }

    #[test]
    fn test_decode_done() {
        assert_eq!(decode_line("data: [DONE]"), LineOutcome::Done);
        assert_eq!(decode_line("data: [DONE]  \r"), LineOutcome::Done);
    }

    #[test]
    fn test_decode_skips_malformed_and_noise() {
        assert_eq!(decode_line("data: {not json"), LineOutcome::Skip);
        assert_eq!(decode_line(""), LineOutcome::Skip);
        assert_eq!(decode_line("   "), LineOutcome::Skip);
        assert_eq!(decode_line(": keep-alive"), LineOutcome::Skip);
        assert_eq!(decode_line("event: message"), LineOutcome::Skip);
    }

    #[test]
    fn test_decode_legacy_chunk() {
        assert_eq!(
            decode_line(r#"{"chunk": "Hello"}"#),
            LineOutcome::Event("Hello".to_string())
        );
        assert_eq!(decode_line(r#"{"other": "x"}"#), LineOutcome::Skip);
        assert_eq!(decode_line(r#"["chunk"]"#), LineOutcome::Skip);
    }

    #[test]
    fn test_data_payload() {
        assert_eq!(data_payload(r#"data: {"x":1}"#), r#"{"x":1}"#);
        assert_eq!(data_payload("plain"), "plain");
    }

    #[tokio::test]
    async fn test_stream_stops_at_done() {
        let events: Vec<_> = chunks(&["data: {\"x\":1}\n\n", "data: [DONE]\n\n"])
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap(), "data: {\"x\":1}");
    }

    #[tokio::test]
    async fn test_stream_ignores_data_after_done() {
        let events: Vec<_> = chunks(&["data: [DONE]\n\ndata: {\"late\":true}\n\n"])
            .collect()
            .await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_stream_reassembles_split_lines() {
        let mut stream = chunks(&["data: {\"te", "xt\":\"hi\"}\r", "\n\ndata: {\"n\":2}\n"]);
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            "data: {\"text\":\"hi\"}"
        );
        assert_eq!(stream.next().await.unwrap().unwrap(), "data: {\"n\":2}");
        assert!(stream.next().await.is_none());
        assert!(stream.is_finished());
    }

    #[tokio::test]
    async fn test_stream_skips_malformed_lines() {
        let events: Vec<String> = chunks(&[
            "data: {broken\n",
            "data: {\"ok\":true}\n",
            "data: [DONE]\n",
        ])
        .map(|r| r.unwrap())
        .collect()
        .await;
        assert_eq!(events, vec!["data: {\"ok\":true}".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_legacy_format() {
        let events: Vec<String> = chunks(&["{\"chunk\":\"Hel\"}\n{\"chunk\":\"lo\"}\n"])
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(events, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_decodes_unterminated_last_line() {
        let events: Vec<String> = chunks(&["data: {\"a\":1}\ndata: {\"b\":2}"])
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], "data: {\"b\":2}");
    }

    #[tokio::test]
    async fn test_stream_transport_error_ends_stream() {
        let items: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\n")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            )),
            Ok(Bytes::from_static(b"data: {\"b\":2}\n")),
        ];
        let mut stream = EventStream::new(stream::iter(items));

        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Connection);
        assert!(stream.next().await.is_none());
    }
}
