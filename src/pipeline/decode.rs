//! Streaming decoders (Bytes -> JSON Value)

use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::Value;
use tracing::warn;

use crate::error::ErrorContext;
use crate::{BoxStream, Error};

/// SSE frame decoder:
/// - splits by blank line (`\n\n`, with `\r\n` normalized)
/// - joins the frame's `data:` lines; `event:`, `id:`, `retry:` and `:` comment lines are ignored
/// - stops on the done signal (default "[DONE]")
/// - logs and skips frames whose payload is not JSON
#[derive(Debug, Clone)]
pub struct SseDecoder {
    done_signal: String,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Outcome of parsing one SSE frame.
#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    Json(Value),
    Done,
    Skip,
}

impl SseDecoder {
    pub fn new(done_signal: Option<String>) -> Self {
        Self {
            done_signal: done_signal.unwrap_or_else(|| "[DONE]".to_string()),
        }
    }

    pub(crate) fn parse_frame(&self, raw: &str) -> Frame {
        let mut data_lines: Vec<&str> = Vec::new();
        for line in raw.lines() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
            } else if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
                continue;
            } else {
                // bare payload without a field name
                data_lines.push(line);
            }
        }
        if data_lines.is_empty() {
            return Frame::Skip;
        }
        let payload = data_lines.join("\n");
        let payload = payload.trim();
        if payload == self.done_signal {
            return Frame::Done;
        }
        match serde_json::from_str(payload) {
            Ok(v) => Frame::Json(v),
            Err(e) => {
                let err = Error::stream_parse(
                    e.to_string(),
                    ErrorContext::new()
                        .with_details(truncate(payload, 200))
                        .with_source("sse_decoder"),
                );
                warn!(error = %err, "skipping malformed SSE frame");
                Frame::Skip
            }
        }
    }

    /// Decode a byte stream into JSON frames. Transport errors are forwarded as-is.
    pub fn decode_stream(&self, input: BoxStream<'static, Bytes>) -> BoxStream<'static, Value> {
        let decoder = self.clone();

        // Incrementally buffer bytes and emit full frames split by blank lines.
        let stream = stream::unfold(
            (input, String::new(), false),
            move |(mut input, mut buf, finished)| {
                let decoder = decoder.clone();
                async move {
                    loop {
                        if finished {
                            return None;
                        }

                        if let Some(idx) = buf.find("\n\n") {
                            let frame = buf[..idx].to_string();
                            buf.drain(..idx + 2);
                            match decoder.parse_frame(&frame) {
                                Frame::Json(v) => return Some((Ok(v), (input, buf, false))),
                                Frame::Done => return None,
                                Frame::Skip => continue,
                            }
                        }

                        match input.next().await {
                            Some(Ok(bytes)) => {
                                buf.push_str(&String::from_utf8_lossy(&bytes));
                                // \r\n may straddle two chunks
                                if buf.contains('\r') {
                                    buf = buf.replace("\r\n", "\n");
                                }
                            }
                            Some(Err(e)) => {
                                return Some((Err(e), (input, buf, true)));
                            }
                            None => {
                                // EOF: try the trailing partial frame once
                                let rest = std::mem::take(&mut buf);
                                if let Frame::Json(v) = decoder.parse_frame(&rest) {
                                    return Some((Ok(v), (input, buf, true)));
                                }
                                return None;
                            }
                        }
                    }
                }
            },
        );

        Box::pin(stream)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn byte_stream(chunks: Vec<&'static str>) -> BoxStream<'static, Bytes> {
        Box::pin(futures::stream::iter(chunks).map(|s| Ok::<Bytes, Error>(Bytes::from(s))))
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let input = byte_stream(vec![
            "data: {\"a\":",
            "1}\n\ndata: {\"b\":2}\n",
            "\n",
            "data: [DONE]\n\ndata: {\"after\":true}\n\n",
        ]);
        let frames: Vec<Value> = SseDecoder::default()
            .decode_stream(input)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(frames, vec![serde_json::json!({"a":1}), serde_json::json!({"b":2})]);
    }

    #[tokio::test]
    async fn test_event_lines_crlf_and_malformed_frames() {
        let input = byte_stream(vec![
            "event: content_block_delta\r\ndata: {\"type\":\"x\"}\r\n\r\n",
            ": keep-alive\n\n",
            "data: {not json}\n\n",
            "data: {\"type\":\"y\"}",
        ]);
        let frames: Vec<Value> = SseDecoder::default()
            .decode_stream(input)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["type"], "x");
        assert_eq!(frames[1]["type"], "y");
    }

    #[test]
    fn test_done_signal_variants() {
        let d = SseDecoder::default();
        assert_eq!(d.parse_frame("data: [DONE]"), Frame::Done);
        assert_eq!(d.parse_frame("data:[DONE]"), Frame::Done);
        assert_eq!(d.parse_frame(": comment"), Frame::Skip);
    }
}
