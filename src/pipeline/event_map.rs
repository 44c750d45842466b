//! Event mapping (JSON frames -> UnifiedStreamEvent)
//!
//! Each adapter supplies a [`FrameMapper`] holding its per-call decode state. The shared
//! driver here owns the terminal-event guarantee: the first `finish` or `error` ends the
//! stream and everything after it is dropped.

use futures::future::BoxFuture;
use futures::{stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

use super::decode::SseDecoder;
use crate::types::events::UnifiedStreamEvent;
use crate::{BoxStream, EventStream, Result};

/// Per-call translation of vendor frames into unified events.
pub trait FrameMapper: Send + 'static {
    /// Map one decoded frame, appending zero or more events.
    fn on_frame(&mut self, frame: &Value, out: &mut Vec<UnifiedStreamEvent>);

    /// The vendor stream ended (EOF or done sentinel) before any terminal event.
    fn on_end(&mut self, out: &mut Vec<UnifiedStreamEvent>);
}

/// Future that performs the HTTP exchange and yields the response body.
pub type OpenFuture = BoxFuture<'static, Result<BoxStream<'static, bytes::Bytes>>>;

enum Phase {
    Opening(OpenFuture),
    Streaming(BoxStream<'static, Value>),
    Closed,
}

struct DriveState<M> {
    phase: Phase,
    mapper: M,
    decoder: SseDecoder,
    queue: VecDeque<UnifiedStreamEvent>,
    terminated: bool,
}

impl<M: FrameMapper> DriveState<M> {
    fn enqueue(&mut self, events: Vec<UnifiedStreamEvent>) {
        for ev in events {
            if self.terminated {
                debug!(event = ?ev, "dropping event after terminal event");
                continue;
            }
            if ev.is_terminal() {
                self.terminated = true;
            }
            self.queue.push_back(ev);
        }
    }

    fn fail(&mut self, err: &crate::Error) {
        self.enqueue(vec![UnifiedStreamEvent::from(err)]);
        self.phase = Phase::Closed;
    }
}

/// Drive `open` lazily and map its SSE frames through `mapper`.
///
/// Nothing is sent until the returned stream is first polled.
pub fn drive_sse<M: FrameMapper>(open: OpenFuture, mapper: M) -> EventStream {
    let state = DriveState {
        phase: Phase::Opening(open),
        mapper,
        decoder: SseDecoder::default(),
        queue: VecDeque::new(),
        terminated: false,
    };

    let stream = stream::unfold(state, |mut st| async move {
        loop {
            if let Some(ev) = st.queue.pop_front() {
                return Some((ev, st));
            }
            if st.terminated {
                return None;
            }

            match std::mem::replace(&mut st.phase, Phase::Closed) {
                Phase::Opening(open) => match open.await {
                    Ok(body) => {
                        st.phase = Phase::Streaming(st.decoder.decode_stream(body));
                    }
                    Err(e) => st.fail(&e),
                },
                Phase::Streaming(mut frames) => match frames.next().await {
                    Some(Ok(frame)) => {
                        let mut out = Vec::new();
                        st.mapper.on_frame(&frame, &mut out);
                        st.enqueue(out);
                        st.phase = Phase::Streaming(frames);
                    }
                    Some(Err(e)) => st.fail(&e),
                    None => {
                        let mut out = Vec::new();
                        st.mapper.on_end(&mut out);
                        st.enqueue(out);
                        st.terminated = true;
                    }
                },
                Phase::Closed => return None,
            }
        }
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Echo;

    impl FrameMapper for Echo {
        fn on_frame(&mut self, frame: &Value, out: &mut Vec<UnifiedStreamEvent>) {
            if let Some(t) = frame["text"].as_str() {
                out.push(UnifiedStreamEvent::content(t));
            }
            if frame["stop"].as_bool() == Some(true) {
                out.push(UnifiedStreamEvent::finish("stop", None));
                out.push(UnifiedStreamEvent::finish("again", None));
            }
        }

        fn on_end(&mut self, out: &mut Vec<UnifiedStreamEvent>) {
            out.push(UnifiedStreamEvent::finish("eof", None));
        }
    }

    fn open_with(chunks: Vec<&'static str>) -> OpenFuture {
        Box::pin(async move {
            let s: BoxStream<'static, Bytes> = Box::pin(
                futures::stream::iter(chunks).map(|c| Ok::<Bytes, crate::Error>(Bytes::from(c))),
            );
            Ok(s)
        })
    }

    #[tokio::test]
    async fn test_single_terminal_event() {
        let events: Vec<_> = drive_sse(
            open_with(vec![
                "data: {\"text\":\"a\"}\n\n",
                "data: {\"stop\":true}\n\n",
                "data: {\"text\":\"late\"}\n\n",
            ]),
            Echo,
        )
        .collect()
        .await;
        assert_eq!(
            events,
            vec![
                UnifiedStreamEvent::content("a"),
                UnifiedStreamEvent::finish("stop", None)
            ]
        );
    }

    #[tokio::test]
    async fn test_eof_calls_on_end() {
        let events: Vec<_> = drive_sse(open_with(vec!["data: {\"text\":\"a\"}\n\n"]), Echo)
            .collect()
            .await;
        assert_eq!(events.last(), Some(&UnifiedStreamEvent::finish("eof", None)));
    }

    #[tokio::test]
    async fn test_open_failure_becomes_error_event() {
        let open: OpenFuture = Box::pin(async { Err(crate::Error::vendor(500, "boom")) });
        let events: Vec<_> = drive_sse(open, Echo).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], UnifiedStreamEvent::Error { message, .. } if message == "boom"));
    }
}
