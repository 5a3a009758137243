use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::Stream;

use crewscout_core::error::{CrewError, Result};

/// Parse a raw SSE byte stream into individual events.
/// SSE format: `event: <type>\ndata: <json>\n\n`
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

/// A parsed SSE event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed text into the parser and extract complete events.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        // Some providers terminate lines with CRLF.
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();

            let mut event_type = None;
            let mut data_lines = Vec::new();

            for line in block.lines() {
                if let Some(val) = line.strip_prefix("event:") {
                    event_type = Some(val.trim_start().to_string());
                } else if let Some(val) = line.strip_prefix("data:") {
                    data_lines.push(val.strip_prefix(' ').unwrap_or(val).to_string());
                }
            }

            if !data_lines.is_empty() {
                events.push(SseEvent {
                    event_type,
                    data: data_lines.join("\n"),
                });
            }
        }

        events
    }
}

/// A stream of SSE events from raw bytes.
pub struct SseStream<S> {
    inner: S,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    // Bytes of a UTF-8 sequence split across chunks.
    partial: Vec<u8>,
    failed: bool,
}

impl<S> SseStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            parser: SseParser::new(),
            pending: VecDeque::new(),
            partial: Vec::new(),
            failed: false,
        }
    }
}

/// Transport errors end the stream after one `CrewError::LlmStream` item.
impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<SseEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.failed {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.partial.extend_from_slice(&bytes);
                    let take = match std::str::from_utf8(&this.partial) {
                        Ok(_) => this.partial.len(),
                        // Incomplete trailing sequence: keep it for the next chunk
                        Err(e) if e.error_len().is_none() => e.valid_up_to(),
                        Err(_) => this.partial.len(),
                    };
                    let text: Vec<u8> = this.partial.drain(..take).collect();
                    let text = String::from_utf8_lossy(&text);
                    this.pending.extend(this.parser.feed(&text));
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::warn!(error = %e, "SSE byte stream failed");
                    this.failed = true;
                    this.pending.clear();
                    return Poll::Ready(Some(Err(CrewError::LlmStream(e.to_string()))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_parser_basic() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: {\"id\":\"chatcmpl-1\"}\n\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].event_type.is_none());
        assert_eq!(events[0].data, "{\"id\":\"chatcmpl-1\"}");
    }

    #[test]
    fn test_sse_parser_multiple_events() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: {\"x\":1}\n\ndata: {\"x\":2}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].data, "[DONE]");
    }

    #[test]
    fn test_sse_parser_chunked() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: {\"x\":").is_empty());
        let events = parser.feed("1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"x\":1}");
    }

    #[test]
    fn test_sse_parser_crlf_and_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keep-alive\r\n\r\nevent: message\r\ndata:{\"x\":3}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type.as_deref(), Some("message"));
        assert_eq!(events[0].data, "{\"x\":3}");
    }

    #[tokio::test]
    async fn test_sse_stream_reassembles_split_utf8() {
        use futures::StreamExt;

        let text = "data: {\"c\":\"é\"}\n\n".as_bytes().to_vec();
        // Split inside the two-byte 'é'.
        let split = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let chunks: Vec<std::result::Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from(text[..split].to_vec())),
            Ok(bytes::Bytes::from(text[split..].to_vec())),
        ];
        let events: Vec<SseEvent> = SseStream::new(futures::stream::iter(chunks))
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"c\":\"é\"}");
    }

    #[tokio::test]
    async fn test_sse_stream_surfaces_transport_error() {
        use futures::StreamExt;

        let chunks: Vec<std::result::Result<bytes::Bytes, std::io::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"data: {\"x\":1}\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset")),
            Ok(bytes::Bytes::from_static(b"data: {\"x\":2}\n\n")),
        ];
        let items: Vec<Result<SseEvent>> = SseStream::new(futures::stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().data, "{\"x\":1}");
        assert!(matches!(&items[1], Err(CrewError::LlmStream(msg)) if msg.contains("connection reset")));
    }
}
