//! Chat Completions and Responses adapters against a mock vendor

mod common;

use ai_lib_adapters::drivers::{BuiltinDialect, ChatAdapter, ResponsesAdapter};
use ai_lib_adapters::sanitize::VendorQuirks;
use ai_lib_adapters::types::{
    ApiType, BuiltinTool, ErrorCause, ModelConfig, StreamUsage, ToolDefinition, UnifiedMessage,
    UnifiedRequest, UnifiedStreamEvent,
};
use ai_lib_adapters::{AdapterRegistry, ProtocolAdapter};
use common::{assert_single_terminal, collect, MockServerFixture};
use mockito::Matcher;
use serde_json::json;

fn hello(model: ModelConfig) -> UnifiedRequest {
    UnifiedRequest::new(model, vec![UnifiedMessage::user("hello")])
}

#[tokio::test]
async fn test_chat_three_chunk_stream() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_sse_stream(
            "/chat/completions",
            &[
                r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
                r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
                r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":2}}"#,
                "[DONE]",
            ],
        )
        .await;

    let adapter = ChatAdapter::new("openai", "https://unused.invalid/v1", VendorQuirks::None, fixture.transport());
    let stream = adapter
        .call(hello(ModelConfig::new("gpt-4o")), &fixture.config())
        .await
        .unwrap();
    let events = collect(stream).await;

    assert_eq!(
        events,
        vec![
            UnifiedStreamEvent::content("Hel"),
            UnifiedStreamEvent::content("lo"),
            UnifiedStreamEvent::finish("stop", Some(StreamUsage::new(5, 2))),
        ]
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_chat_request_is_lazy_until_polled() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body("data: [DONE]\n\n")
        .expect(0)
        .create_async()
        .await;

    let adapter = ChatAdapter::new("openai", "https://unused.invalid/v1", VendorQuirks::None, fixture.transport());
    let stream = adapter
        .call(hello(ModelConfig::new("gpt-4o")), &fixture.config())
        .await
        .unwrap();
    drop(stream);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_chat_tool_call_fragments() {
    let mut fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_sse_stream(
            "/chat/completions",
            &[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"get_weather","arguments":""}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\":"}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Paris\"}"}}]}}]}"#,
                r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
                "[DONE]",
            ],
        )
        .await;

    let request = hello(ModelConfig::new("gpt-4o")).with_tools(vec![ToolDefinition::function(
        "get_weather",
        "Weather lookup",
        json!({"type": "object", "properties": {"city": {"type": "string"}}}),
    )]);
    let adapter = ChatAdapter::new("deepseek", "https://unused.invalid/v1", VendorQuirks::None, fixture.transport());
    let events = collect(adapter.call(request, &fixture.config()).await.unwrap()).await;

    assert_single_terminal(&events);
    let args: String = events
        .iter()
        .filter_map(|e| match e {
            UnifiedStreamEvent::ToolCall { args_delta: Some(a), .. } => Some(a.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(args, r#"{"city":"Paris"}"#);
    assert!(matches!(
        &events[0],
        UnifiedStreamEvent::ToolCall { id, name_delta: Some(n), .. } if id == "call_a" && n == "get_weather"
    ));
    assert_eq!(events.last(), Some(&UnifiedStreamEvent::finish("tool_calls", None)));
}

#[tokio::test]
async fn test_responses_tool_call_scenario() {
    let mut fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_sse_stream(
            "/responses",
            &[
                r#"{"type":"response.created","response":{"id":"resp_1"}}"#,
                r#"{"type":"response.function_call_arguments.delta","call_id":"call_0","name":"lookup","delta":""}"#,
                r#"{"type":"response.function_call_arguments.delta","call_id":"call_0","delta":"{\"q\":1}"}"#,
                r#"{"type":"response.function_call_arguments.done","call_id":"call_0"}"#,
                r#"{"type":"response.completed","response":{"status":"completed","usage":{"input_tokens":3,"output_tokens":4}}}"#,
            ],
        )
        .await;

    let adapter = ResponsesAdapter::new("openai", "https://unused.invalid/v1", fixture.transport());
    let model = ModelConfig::new("gpt-5").with_api_type(ApiType::Responses);
    let events = collect(adapter.call(hello(model), &fixture.config()).await.unwrap()).await;

    let tool_events: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, UnifiedStreamEvent::ToolCall { .. }))
        .collect();
    assert_eq!(
        tool_events,
        vec![
            &UnifiedStreamEvent::ToolCall {
                id: "call_0".into(),
                index: 0,
                name_delta: Some("lookup".into()),
                args_delta: None,
            },
            &UnifiedStreamEvent::ToolCall {
                id: "call_0".into(),
                index: 0,
                name_delta: None,
                args_delta: Some(r#"{"q":1}"#.into()),
            },
        ]
    );
    assert_eq!(
        events.last(),
        Some(&UnifiedStreamEvent::finish("completed", Some(StreamUsage::new(3, 4))))
    );
    assert_single_terminal(&events);
}

#[tokio::test]
async fn test_vendor_error_becomes_single_error_event() {
    let mut fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_json_response(
            "POST",
            "/chat/completions",
            401,
            r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#,
        )
        .await;

    let adapter = ChatAdapter::new("openai", "https://unused.invalid/v1", VendorQuirks::None, fixture.transport());
    let events = collect(
        adapter
            .call(hello(ModelConfig::new("gpt-4o")), &fixture.config())
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(
        events,
        vec![UnifiedStreamEvent::Error {
            message: "Incorrect API key provided".into(),
            cause: Some(ErrorCause {
                kind: "authentication".into(),
                status: Some(401),
            }),
        }]
    );
}

#[tokio::test]
async fn test_mistral_retries_once_without_tools() {
    let mut fixture = MockServerFixture::new().await;
    let rejected = fixture
        .server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex(r#""tools""#.into()))
        .with_status(400)
        .with_body(r#"{"message":"Function calling is not enabled for this model"}"#)
        .expect(1)
        .create_async()
        .await;
    let retried = fixture
        .mock_sse_matching(
            "/chat/completions",
            Matcher::Any,
            &[r#"{"choices":[{"delta":{"content":"ok"},"finish_reason":"stop"}]}"#],
        )
        .await;

    let request = hello(ModelConfig::new("mistral-large-latest")).with_tools(vec![
        ToolDefinition::function("noop", "does nothing", json!({"type": "object", "properties": {}})),
    ]);
    let registry = AdapterRegistry::new(fixture.transport());
    let events = collect(
        registry
            .call("mistral", request, &fixture.config())
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(
        events,
        vec![
            UnifiedStreamEvent::content("ok"),
            UnifiedStreamEvent::finish("stop", None),
        ]
    );
    rejected.assert_async().await;
    retried.assert_async().await;
}

#[tokio::test]
async fn test_check_and_list_models() {
    let mut fixture = MockServerFixture::new().await;
    let _models = fixture
        .mock_json_response(
            "GET",
            "/models",
            200,
            r#"{"object":"list","data":[{"id":"gpt-4o","created":1715367049},{"id":"gpt-4o-mini"}]}"#,
        )
        .await;

    let adapter = ChatAdapter::new("openai", "https://unused.invalid/v1", VendorQuirks::None, fixture.transport());
    assert!(adapter.check(&fixture.config()).await.success);
    let models = adapter.list_models(&fixture.config()).await;
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].id, "gpt-4o");
    assert_eq!(models[0].created, Some(1715367049));
}

#[tokio::test]
async fn test_check_falls_back_to_minimal_request() {
    let mut fixture = MockServerFixture::new().await;
    let _models = fixture
        .mock_json_response("GET", "/models", 404, r#"{"error":{"message":"not found"}}"#)
        .await;
    let _ping = fixture
        .mock_json_response("POST", "/chat/completions", 400, r#"{"error":{"message":"max_tokens too small"}}"#)
        .await;

    let adapter = ChatAdapter::new("volcengine", "https://unused.invalid/v1", VendorQuirks::None, fixture.transport());
    let without_model = adapter.check(&fixture.config()).await;
    assert!(!without_model.success);
    assert_eq!(without_model.error.as_deref(), Some("not found"));

    let with_model = adapter
        .check(&fixture.config().with_check_model("doubao-seed-1-6"))
        .await;
    assert!(with_model.success);
    assert!(adapter.list_models(&fixture.config()).await.is_empty());
}

#[tokio::test]
async fn test_chat_usage_reports_keep_latest() {
    let mut fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_sse_stream(
            "/chat/completions",
            &[
                r#"{"choices":[{"delta":{"content":"a"}}],"usage":{"prompt_tokens":5,"completion_tokens":1}}"#,
                r#"{"choices":[{"delta":{"content":"b"},"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":2}}"#,
                "[DONE]",
            ],
        )
        .await;

    let adapter = ChatAdapter::new("qwen", "https://unused.invalid/v1", VendorQuirks::None, fixture.transport());
    let events = collect(
        adapter
            .call(hello(ModelConfig::new("qwen-plus")), &fixture.config())
            .await
            .unwrap(),
    )
    .await;

    assert_single_terminal(&events);
    assert_eq!(
        events.last(),
        Some(&UnifiedStreamEvent::finish("stop", Some(StreamUsage::new(5, 2))))
    );
}

#[tokio::test]
async fn test_declared_web_search_reaches_chat_vendors() {
    let mut fixture = MockServerFixture::new().await;
    let openai = fixture
        .mock_sse_matching(
            "/chat/completions",
            Matcher::PartialJson(json!({"web_search_options": {}})),
            &[r#"{"choices":[{"delta":{"content":"ok"},"finish_reason":"stop"}]}"#],
        )
        .await;

    let request = hello(ModelConfig::new("gpt-4o-search-preview").with_builtin_tools(["web_search"]))
        .with_builtin_tools(vec![BuiltinTool::web_search()]);
    let adapter = ChatAdapter::new("openai", "https://unused.invalid/v1", VendorQuirks::None, fixture.transport());
    let events = collect(adapter.call(request.clone(), &fixture.config()).await.unwrap()).await;
    assert_eq!(events.last(), Some(&UnifiedStreamEvent::finish("stop", None)));
    openai.assert_async().await;

    let bailian = fixture
        .mock_sse_matching(
            "/chat/completions",
            Matcher::PartialJson(json!({"enable_search": true})),
            &[r#"{"choices":[{"delta":{"content":"ok"},"finish_reason":"stop"}]}"#],
        )
        .await;
    let adapter = ChatAdapter::new("bailian", "https://unused.invalid/v1", VendorQuirks::None, fixture.transport())
        .with_builtins(BuiltinDialect::Bailian);
    let events = collect(adapter.call(request, &fixture.config()).await.unwrap()).await;
    assert!(!events.iter().any(|e| matches!(e, UnifiedStreamEvent::Error { .. })));
    bailian.assert_async().await;
}

#[tokio::test]
async fn test_chat_tool_arguments_without_name_are_dropped() {
    let mut fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_sse_stream(
            "/chat/completions",
            &[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"arguments":"{\"q\":"}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"1}"}}]}}]}"#,
                r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
                "[DONE]",
            ],
        )
        .await;

    let adapter = ChatAdapter::new("deepseek", "https://unused.invalid/v1", VendorQuirks::None, fixture.transport());
    let events = collect(
        adapter
            .call(hello(ModelConfig::new("deepseek-chat")), &fixture.config())
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(events, vec![UnifiedStreamEvent::finish("tool_calls", None)]);
}

#[tokio::test]
async fn test_check_without_check_model_reports_listing_error() {
    let mut fixture = MockServerFixture::new().await;
    let _models = fixture
        .mock_json_response("GET", "/models", 401, r#"{"error":{"message":"Invalid API key"}}"#)
        .await;
    let chat = fixture
        .server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let adapter = ChatAdapter::new("deepseek", "https://unused.invalid/v1", VendorQuirks::None, fixture.transport());
    let result = adapter.check(&fixture.config()).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Invalid API key"));
    chat.assert_async().await;
}
