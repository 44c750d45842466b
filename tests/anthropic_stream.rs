//! Anthropic Messages adapter (and MiniMax over the same dialect) against a mock vendor

mod common;

use ai_lib_adapters::drivers::AnthropicAdapter;
use ai_lib_adapters::sanitize::VendorQuirks;
use ai_lib_adapters::types::{
    ModelConfig, StreamUsage, ToolDefinition, UnifiedMessage, UnifiedRequest, UnifiedStreamEvent,
};
use ai_lib_adapters::ProtocolAdapter;
use common::{assert_single_terminal, collect, MockServerFixture};
use mockito::Matcher;
use serde_json::json;

const BLOCK_STREAM: &[&str] = &[
    "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":10,\"output_tokens\":1}}}",
    "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}",
    "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"Let me check.\"}}",
    "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}",
    "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}",
    "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"Sunny.\"}}",
    "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":1}",
    "event: ping\ndata: {\"type\":\"ping\"}",
    "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":15}}",
    "event: message_stop\ndata: {\"type\":\"message_stop\"}",
];

fn weather_request(model: &str) -> UnifiedRequest {
    UnifiedRequest::new(
        ModelConfig::new(model),
        vec![
            UnifiedMessage::system("Be brief."),
            UnifiedMessage::user("Weather in Paris?"),
        ],
    )
}

#[tokio::test]
async fn test_block_stream_to_unified_events() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "test-key")
        .match_header("anthropic-version", "2023-06-01")
        .match_body(Matcher::PartialJson(json!({"system": "Be brief.", "max_tokens": 4096})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(BLOCK_STREAM.iter().map(|c| format!("{}\n\n", c)).collect::<String>())
        .create_async()
        .await;

    let adapter = AnthropicAdapter::new("anthropic", VendorQuirks::None, fixture.transport());
    let events = collect(
        adapter
            .call(weather_request("claude-sonnet-4-20250514"), &fixture.config())
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(
        events,
        vec![
            UnifiedStreamEvent::thinking("Let me check."),
            UnifiedStreamEvent::content("Sunny."),
            UnifiedStreamEvent::finish("end_turn", Some(StreamUsage::new(10, 15))),
        ]
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_minimax_retries_without_tools_on_invalid_params() {
    let mut fixture = MockServerFixture::new().await;
    let rejected = fixture
        .server
        .mock("POST", "/v1/messages")
        .match_body(Matcher::Regex(r#""tools""#.into()))
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"type":"error","error":{"type":"invalid_request_error","message":"invalid params, tool schema rejected (2013)"}}"#)
        .expect(1)
        .create_async()
        .await;
    let retried = fixture
        .mock_sse_matching(
            "/v1/messages",
            Matcher::Any,
            &[
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"ok"}}"#,
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"input_tokens":4,"output_tokens":1}}"#,
                r#"{"type":"message_stop"}"#,
            ],
        )
        .await;

    let request = weather_request("MiniMax-M2.1").with_tools(vec![ToolDefinition::function(
        "weather",
        "Weather lookup",
        json!({"type": "object", "properties": {"city": {"type": "string"}}}),
    )]);
    let adapter = AnthropicAdapter::new("minimax", VendorQuirks::MiniMax, fixture.transport());
    let events = collect(adapter.call(request, &fixture.config()).await.unwrap()).await;

    assert_eq!(
        events,
        vec![
            UnifiedStreamEvent::content("ok"),
            UnifiedStreamEvent::finish("end_turn", Some(StreamUsage::new(4, 1))),
        ]
    );
    rejected.assert_async().await;
    retried.assert_async().await;
}

#[tokio::test]
async fn test_overloaded_error_frame_ends_stream() {
    let mut fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_sse_stream(
            "/v1/messages",
            &[
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"par"}}"#,
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
                r#"{"type":"message_stop"}"#,
            ],
        )
        .await;

    let adapter = AnthropicAdapter::new("anthropic", VendorQuirks::None, fixture.transport());
    let events = collect(
        adapter
            .call(weather_request("claude-3-5-haiku-latest"), &fixture.config())
            .await
            .unwrap(),
    )
    .await;

    assert_single_terminal(&events);
    assert_eq!(events.last(), Some(&UnifiedStreamEvent::error("Overloaded")));
}

#[tokio::test]
async fn test_check_reports_vendor_message() {
    let mut fixture = MockServerFixture::new().await;
    let _ok = fixture
        .server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "good-key")
        .with_status(200)
        .with_body(r#"{"id":"msg_1","content":[{"type":"text","text":"hi"}]}"#)
        .create_async()
        .await;
    let _denied = fixture
        .server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "test-key")
        .with_status(401)
        .with_body(r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#)
        .create_async()
        .await;

    let adapter = AnthropicAdapter::new("anthropic", VendorQuirks::None, fixture.transport());
    let denied = adapter.check(&fixture.config()).await;
    assert!(!denied.success);
    assert_eq!(denied.error.as_deref(), Some("invalid x-api-key"));

    let mut good = fixture.config();
    good.api_key = "good-key".into();
    assert!(adapter.check(&good).await.success);
}
