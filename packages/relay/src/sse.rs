// ABOUTME: Pull-stream transport reading `text/event-stream` responses
// ABOUTME: Byte-level line decoding and a cancellable, restartable subscription stream

use crate::error::{RelayError, Result};
use crate::relay::{EventRelay, RelayEvent};
use futures::Stream;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One dispatched event-stream message
#[derive(Debug, Clone, PartialEq)]
pub struct SseMessage {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental event-stream decoder
///
/// Works on bytes so multi-byte UTF-8 sequences split across chunks survive;
/// an incomplete trailing line stays buffered until its newline arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(message) = self.process_line(&line) {
                messages.push(message);
            }
        }
        messages
    }

    /// Dispatch whatever is pending when the stream ends without a blank line
    pub fn finish(&mut self) -> Option<SseMessage> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(message) = self.process_line(line.trim_end_matches('\r')) {
                return Some(message);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseMessage { event, data })
    }
}

/// Restartable subscription to an event-stream endpoint
#[derive(Clone)]
pub struct PullStream {
    client: Client,
    url: String,
}

impl PullStream {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open a fresh stream; each call gets its own request and text assembly
    ///
    /// The stream ends when the server closes the response or `cancel` fires.
    pub fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<RelayEvent>> + Send + 'static {
        let client = self.client.clone();
        let url = self.url.clone();

        async_stream::stream! {
            use futures::StreamExt;

            let request = client
                .get(&url)
                .header("accept", "text/event-stream")
                .send();

            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(url = %url, "Pull stream cancelled before connect");
                    return;
                }
                response = request => response,
            };

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    error!(url = %url, "Pull stream request failed: {}", e);
                    yield Err(RelayError::Http(e));
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                error!(url = %url, "Pull stream endpoint error: {} - {}", status, body);
                yield Err(RelayError::Status { status: status.as_u16(), body });
                return;
            }

            if response.content_length() == Some(0) {
                yield Err(RelayError::MissingBody);
                return;
            }

            info!(url = %url, "Pull stream connected");

            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            let mut relay = EventRelay::new();

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(url = %url, "Pull stream cancelled");
                        break;
                    }
                    chunk = byte_stream.next() => chunk,
                };

                match chunk {
                    Some(Ok(bytes)) => {
                        for message in decoder.push(&bytes) {
                            if let Some(event) = decode_message(&mut relay, &message) {
                                yield Ok(event);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(url = %url, "Pull stream read failed: {}", e);
                        yield Err(RelayError::Http(e));
                        break;
                    }
                    None => {
                        if let Some(message) = decoder.finish() {
                            if let Some(event) = decode_message(&mut relay, &message) {
                                yield Ok(event);
                            }
                        }
                        debug!(url = %url, "Pull stream ended");
                        break;
                    }
                }
            }
        }
    }
}

fn decode_message(relay: &mut EventRelay, message: &SseMessage) -> Option<RelayEvent> {
    let data = message.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(frame) => relay.ingest_with_hint(&frame, message.event.as_deref()),
        Err(e) => {
            debug!("Skipping non-JSON event data: {}", RelayError::Parse(e));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"type\":").is_empty());
        assert!(decoder.push(b"\"heartbeat\"}\n").is_empty());
        let messages = decoder.push(b"\n");
        assert_eq!(
            messages,
            vec![SseMessage {
                event: None,
                data: "{\"type\":\"heartbeat\"}".to_string()
            }]
        );
    }

    #[test]
    fn test_decoder_keeps_utf8_across_chunks() {
        let bytes = "data: héllo ✓\n\n".as_bytes();
        // Split inside the multi-byte check mark
        let split = bytes.len() - 4;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        let messages = decoder.push(&bytes[split..]);
        assert_eq!(messages[0].data, "héllo ✓");
    }

    #[test]
    fn test_decoder_event_names_and_crlf() {
        let mut decoder = SseDecoder::new();
        let messages =
            decoder.push(b": keepalive\r\nevent: status\r\ndata: {\"status\":\"ok\"}\r\n\r\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event.as_deref(), Some("status"));
    }

    #[test]
    fn test_decoder_joins_multiline_data_and_finishes() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: a\ndata: b\n").is_empty());
        let message = decoder.finish().unwrap();
        assert_eq!(message.data, "a\nb");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_event_name_supplies_missing_type() {
        let mut relay = EventRelay::new();
        let message = SseMessage {
            event: Some("status".to_string()),
            data: "{\"status\":\"running\"}".to_string(),
        };
        let event = decode_message(&mut relay, &message).unwrap();
        assert_eq!(event.event.kind(), "status");

        let done = SseMessage {
            event: None,
            data: "[DONE]".to_string(),
        };
        assert!(decode_message(&mut relay, &done).is_none());
    }
}
