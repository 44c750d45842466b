//! OpenAI Responses API 驱动 — 类型化事件流式协议
//!
//! Responses API driver (also spoken by Volcengine):
//! - System messages and `instructions` fold into the top-level `instructions` field.
//! - Events are discriminated by `type`; usage arrives once on `response.completed`.
//! - Function-call argument deltas may omit their index; a running index advances on
//!   `response.function_call_arguments.done`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{
    apply_sampling, builtin_tools, ensure_extensions, fetch_openai_models, open_with_retry,
    CheckResult, ParameterTranslator, ProtocolAdapter, SamplingKeys,
};
use crate::config::ProviderConfig;
use crate::pipeline::{drive_sse, FrameMapper};
use crate::reasoning::{self, deep_merge};
use crate::sanitize::VendorQuirks;
use crate::transport::{bearer, HttpTransport};
use crate::types::{
    ContentPart, MessageContent, MessageRole, ModelInfo, StreamUsage, StructuredOutput,
    ToolChoice, UnifiedRequest, UnifiedStreamEvent, UsageMode, VendorExtensions,
};
use crate::utils::{ToolCallAssembler, ToolCallFragment};
use crate::{EventStream, Result};

const RESPONSES_SAMPLING: SamplingKeys = SamplingKeys {
    top_k: false,
    penalties: false,
    seed: false,
    stop: None,
};

/// Responses API request translator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponsesTranslator;

impl ParameterTranslator for ResponsesTranslator {
    fn translate(&self, request: &UnifiedRequest) -> Result<Value> {
        ensure_extensions(request, "responses", Some("responses"))?;
        request.validate_messages()?;

        let mut instructions: Vec<String> = request
            .instructions
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect();
        let mut input = Vec::new();

        for m in &request.messages {
            match m.role {
                MessageRole::System => instructions.push(m.content.joined_text()),
                MessageRole::User => input.push(json!({
                    "role": "user",
                    "content": input_content(&m.content),
                })),
                MessageRole::Assistant => {
                    if !m.content.is_empty() {
                        input.push(json!({
                            "role": "assistant",
                            "content": m.content.joined_text(),
                        }));
                    }
                    for call in m.tool_calls.iter().flatten() {
                        input.push(json!({
                            "type": "function_call",
                            "call_id": call.id,
                            "name": call.function.name,
                            "arguments": call.function.arguments,
                        }));
                    }
                }
                MessageRole::Tool => input.push(json!({
                    "type": "function_call_output",
                    "call_id": m.tool_call_id,
                    "output": m.content.joined_text(),
                })),
            }
        }

        let mut body = Map::new();
        body.insert("model".into(), json!(request.model.id));
        body.insert("input".into(), Value::Array(input));
        body.insert("stream".into(), json!(true));
        if !instructions.is_empty() {
            body.insert("instructions".into(), json!(instructions.join("\n\n")));
        }

        let resolved = reasoning::resolve(request.reasoning.as_ref(), &request.model)?;
        // sampling is fixed while the model reasons
        let reasoning_on = resolved
            .as_ref()
            .is_some_and(|r| r.effort_level() != Some("none"));
        if reasoning_on {
            debug!(model = %request.model.id, "reasoning active; omitting temperature and top_p");
        }
        apply_sampling(&request.settings, &request.model, RESPONSES_SAMPLING, reasoning_on, &mut body);
        if let Some(n) = request.settings.max_tokens {
            body.insert("max_output_tokens".into(), json!(n));
        }

        if let Some(resolved) = &resolved {
            resolved.apply_to(&mut body)?;
            if let Some(summary) = request.reasoning.as_ref().and_then(|r| r.summary.as_ref()) {
                let mut patch = Map::new();
                patch.insert("reasoning".into(), json!({"summary": summary}));
                deep_merge(&mut body, &patch)?;
            }
        }

        let mut tools = builtin_tools(request)?;
        tools.extend(request.tools.iter().map(|t| t.to_flat()));
        let has_tools = !tools.is_empty();
        if has_tools {
            body.insert("tools".into(), Value::Array(tools));
            let choice = match request.tool_choice.clone().unwrap_or_else(ToolChoice::auto) {
                ToolChoice::Mode(mode) => json!(mode),
                ToolChoice::Function { name } => json!({"type": "function", "name": name}),
            };
            body.insert("tool_choice".into(), choice);
        }

        match &request.structured_output {
            Some(StructuredOutput::JsonObject) => {
                body.insert("text".into(), json!({"format": {"type": "json_object"}}));
            }
            Some(StructuredOutput::JsonSchema { name, schema, strict }) => {
                let mut format = json!({"type": "json_schema", "name": name, "schema": schema});
                if let Some(s) = strict {
                    format["strict"] = json!(s);
                }
                body.insert("text".into(), json!({"format": format}));
            }
            None => {}
        }

        if let VendorExtensions::Responses(opts) = &request.extensions {
            if let Some(id) = &opts.previous_response_id {
                body.insert("previous_response_id".into(), json!(id));
            }
            if let Some(c) = &opts.conversation {
                body.insert("conversation".into(), json!(c));
            }
            if !opts.include.is_empty() {
                body.insert("include".into(), json!(opts.include));
            }
            if let Some(store) = opts.store {
                body.insert("store".into(), json!(store));
            }
            if has_tools {
                if let Some(p) = opts.parallel_tool_calls {
                    body.insert("parallel_tool_calls".into(), json!(p));
                }
                if let Some(n) = opts.max_tool_calls {
                    body.insert("max_tool_calls".into(), json!(n));
                }
            }
        }

        Ok(Value::Object(body))
    }
}

fn input_content(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(s) => json!(s),
        MessageContent::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => json!({"type": "input_text", "text": text}),
                    ContentPart::ImageUrl { image_url } => {
                        let mut img = json!({"type": "input_image", "image_url": image_url.url});
                        if let Some(d) = &image_url.detail {
                            img["detail"] = json!(d);
                        }
                        img
                    }
                })
                .collect(),
        ),
    }
}

/// Typed-event decode state for one call.
#[derive(Debug, Default)]
pub(crate) struct ResponsesMapper {
    tools: ToolCallAssembler,
    current_index: u32,
    usage: Option<StreamUsage>,
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl ResponsesMapper {
    fn finish(&mut self, reason: String, out: &mut Vec<UnifiedStreamEvent>) {
        self.tools.finish_all(out);
        out.push(UnifiedStreamEvent::finish(reason, self.usage.take()));
    }
}

impl FrameMapper for ResponsesMapper {
    fn on_frame(&mut self, frame: &Value, out: &mut Vec<UnifiedStreamEvent>) {
        let kind = frame.get("type").and_then(Value::as_str).unwrap_or("");
        match kind {
            "response.created" => out.push(UnifiedStreamEvent::System {
                payload: frame.clone(),
            }),
            "response.output_item.added" => {
                let item = &frame["item"];
                if item.get("type").and_then(Value::as_str) == Some("function_call") {
                    let mut frag = ToolCallFragment::new(self.current_index);
                    frag.id = str_field(item, "call_id").or_else(|| str_field(item, "id"));
                    frag.name = str_field(item, "name");
                    self.tools.push(frag, out);
                }
            }
            "response.output_item.done" => {
                if let Some(u) = frame.pointer("/item/usage").filter(|u| u.is_object()) {
                    self.usage = Some(StreamUsage::from_responses(u));
                }
            }
            "response.output_text.delta" | "response.text.delta" => {
                if let Some(d) = str_field(frame, "delta") {
                    out.push(UnifiedStreamEvent::content(d));
                }
            }
            "response.reasoning.delta"
            | "response.reasoning_text.delta"
            | "response.reasoning_summary_text.delta" => {
                if let Some(d) = str_field(frame, "delta") {
                    out.push(UnifiedStreamEvent::thinking(d));
                }
            }
            "response.function_call_arguments.delta" => {
                let index = frame
                    .get("call_index")
                    .and_then(Value::as_u64)
                    .map(|i| i as u32)
                    .unwrap_or(self.current_index);
                let mut frag = ToolCallFragment::new(index);
                frag.id = str_field(frame, "call_id").or_else(|| str_field(frame, "id"));
                frag.name = str_field(frame, "name");
                frag.args = str_field(frame, "delta");
                self.tools.push(frag, out);
            }
            "response.function_call_arguments.done" => {
                self.tools.finish_index(self.current_index, out);
                self.current_index += 1;
            }
            "response.completed" | "response.done" => {
                let response = &frame["response"];
                if let Some(u) = response.get("usage").filter(|u| u.is_object()) {
                    self.usage = Some(StreamUsage::from_responses(u));
                }
                let reason = str_field(response, "status").unwrap_or_else(|| "stop".to_string());
                self.finish(reason, out);
            }
            "response.incomplete" => {
                let response = &frame["response"];
                if let Some(u) = response.get("usage").filter(|u| u.is_object()) {
                    self.usage = Some(StreamUsage::from_responses(u));
                }
                let reason = response
                    .pointer("/incomplete_details/reason")
                    .and_then(Value::as_str)
                    .unwrap_or("incomplete")
                    .to_string();
                self.finish(reason, out);
            }
            "response.failed" => {
                let message = frame
                    .pointer("/response/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("Response failed");
                out.push(UnifiedStreamEvent::error(message));
            }
            "error" => {
                let message = frame
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .or_else(|| frame.get("message").and_then(Value::as_str))
                    .unwrap_or("Stream error");
                out.push(UnifiedStreamEvent::error(message));
            }
            other => debug!(event_type = other, "unhandled responses event"),
        }
    }

    fn on_end(&mut self, out: &mut Vec<UnifiedStreamEvent>) {
        self.finish("stop".to_string(), out);
    }
}

/// Responses API adapter.
#[derive(Debug, Clone)]
pub struct ResponsesAdapter {
    provider: String,
    default_base: String,
    transport: HttpTransport,
}

impl ResponsesAdapter {
    pub fn new(provider: impl Into<String>, default_base: impl Into<String>, transport: HttpTransport) -> Self {
        Self {
            provider: provider.into(),
            default_base: default_base.into(),
            transport,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for ResponsesAdapter {
    fn provider_id(&self) -> &str {
        &self.provider
    }

    fn usage_mode(&self) -> UsageMode {
        UsageMode::Terminal
    }

    async fn call(&self, request: UnifiedRequest, config: &ProviderConfig) -> Result<EventStream> {
        let body = ResponsesTranslator.translate(&request)?;
        let url = format!("{}/responses", config.base_or(&self.default_base));
        info!(
            provider = %self.provider,
            model = %request.model.id,
            tools = body.get("tools").and_then(serde_json::Value::as_array).map_or(0, Vec::len),
            reasoning = body.get("reasoning").is_some(),
            "responses api call"
        );
        debug!(body = %body, "responses request body");
        let open = open_with_retry(
            self.transport.clone(),
            url,
            bearer(&config.api_key),
            body,
            VendorQuirks::None,
            self.provider.clone(),
        );
        Ok(drive_sse(open, ResponsesMapper::default()))
    }

    async fn check(&self, config: &ProviderConfig) -> CheckResult {
        let base = config.base_or(&self.default_base);
        match fetch_openai_models(&self.transport, &base, &config.api_key).await {
            Ok(_) => CheckResult::ok(),
            Err(e) => CheckResult::failed(e.message()),
        }
    }

    async fn list_models(&self, config: &ProviderConfig) -> Vec<ModelInfo> {
        let base = config.base_or(&self.default_base);
        fetch_openai_models(&self.transport, &base, &config.api_key)
            .await
            .unwrap_or_else(|e| {
                warn!(provider = %self.provider, error = %e, "failed to list models");
                Vec::new()
            })
    }
}
