//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Once;

use ai_lib_adapters::transport::HttpTransport;
use ai_lib_adapters::{EventStream, ProviderConfig, UnifiedStreamEvent};
use futures::StreamExt;
use mockito::{Matcher, Mock, Server, ServerGuard};

static TRACING: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Test fixture that manages a mock vendor server
pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        init_tracing();
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    pub fn transport(&self) -> HttpTransport {
        HttpTransport::with_client(reqwest::Client::new())
    }

    /// Provider config pointing at the mock server.
    pub fn config(&self) -> ProviderConfig {
        ProviderConfig::new("test-key").with_base_url(&self.base_url)
    }

    /// Streaming SSE response built from `data:` payloads.
    pub async fn mock_sse_stream(&mut self, path: &str, chunks: &[&str]) -> Mock {
        self.server
            .mock("POST", path)
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse_body(chunks))
            .create_async()
            .await
    }

    /// SSE response served only to requests whose body matches `matcher`.
    pub async fn mock_sse_matching(&mut self, path: &str, matcher: Matcher, chunks: &[&str]) -> Mock {
        self.server
            .mock("POST", path)
            .match_body(matcher)
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse_body(chunks))
            .create_async()
            .await
    }

    pub async fn mock_json_response(&mut self, method: &str, path: &str, status: usize, body: &str) -> Mock {
        self.server
            .mock(method, path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }
}

fn sse_body(chunks: &[&str]) -> String {
    chunks
        .iter()
        .map(|chunk| {
            if chunk.starts_with("data: ") || chunk.starts_with("event: ") {
                format!("{}\n\n", chunk)
            } else {
                format!("data: {}\n\n", chunk)
            }
        })
        .collect()
}

/// Drain an event stream.
pub async fn collect(mut stream: EventStream) -> Vec<UnifiedStreamEvent> {
    let mut events = Vec::new();
    while let Some(ev) = stream.next().await {
        events.push(ev);
    }
    events
}

/// Exactly one terminal event, and it is last.
pub fn assert_single_terminal(events: &[UnifiedStreamEvent]) {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "events: {:?}", events);
    assert!(events.last().is_some_and(UnifiedStreamEvent::is_terminal));
}
