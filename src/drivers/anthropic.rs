//! Anthropic Messages API 驱动 — 实现 Anthropic 特有的请求/流式事件格式转换（MiniMax 共用）
//!
//! Anthropic Messages API driver. Handles the key differences from OpenAI:
//! - System messages are a top-level `system` parameter, not part of `messages`.
//! - Content uses typed blocks; tool calls are `tool_use` blocks, results are `tool_result`.
//! - Streaming is block oriented: `content_block_start` / `content_block_delta` /
//!   `message_delta` (stop reason and usage) / `message_stop`.
//! - `max_tokens` is required, not optional.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{
    apply_sampling, ensure_extensions, open_with_retry, BuiltinDialect, CheckResult,
    ParameterTranslator, ProtocolAdapter, SamplingKeys,
};
use crate::config::ProviderConfig;
use crate::error::ErrorContext;
use crate::pipeline::{drive_sse, FrameMapper};
use crate::reasoning;
use crate::sanitize::VendorQuirks;
use crate::transport::{extract_error_message, Headers, HttpTransport};
use crate::types::{
    ContentPart, MessageContent, MessageRole, ModelInfo, StreamUsage, ToolChoice, ToolDefinition,
    UnifiedMessage, UnifiedRequest, UnifiedStreamEvent, UsageMode, VendorExtensions,
};
use crate::utils::{ToolCallAssembler, ToolCallFragment};
use crate::{Error, EventStream, Result};

const DEFAULT_MAX_TOKENS: u32 = 4096;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_BASE: &str = "https://api.anthropic.com";
const MINIMAX_BASE: &str = "https://api.minimaxi.com/anthropic";
const DEFAULT_STOP_REASON: &str = "end_turn";

const ANTHROPIC_SAMPLING: SamplingKeys = SamplingKeys {
    top_k: true,
    penalties: false,
    seed: false,
    stop: Some("stop_sequences"),
};

/// Anthropic Messages request translator.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicTranslator;

impl AnthropicTranslator {
    /// Extract system text and convert the remaining messages to Messages API form.
    /// Anthropic requires system as a top-level param, not in messages array.
    fn split_system_messages(
        messages: &[UnifiedMessage],
        instructions: Option<&str>,
    ) -> (Option<String>, Vec<Value>) {
        let mut system_parts: Vec<String> = instructions
            .filter(|s| !s.is_empty())
            .map(|s| vec![s.to_string()])
            .unwrap_or_default();
        let mut converted: Vec<Value> = Vec::new();

        for m in messages {
            match m.role {
                MessageRole::System => system_parts.push(m.content.joined_text()),
                MessageRole::User => converted.push(json!({
                    "role": "user",
                    "content": user_content(&m.content),
                })),
                MessageRole::Assistant => converted.push(assistant_message(m)),
                MessageRole::Tool => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id,
                        "content": m.content.joined_text(),
                    });
                    // consecutive results share one user turn
                    match converted.last_mut() {
                        Some(last) if is_tool_result_turn(last) => {
                            if let Some(blocks) = last["content"].as_array_mut() {
                                blocks.push(block);
                            }
                        }
                        _ => converted.push(json!({"role": "user", "content": [block]})),
                    }
                }
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, converted)
    }
}

fn is_tool_result_turn(msg: &Value) -> bool {
    msg["role"] == "user"
        && msg["content"].as_array().is_some_and(|blocks| {
            blocks
                .iter()
                .all(|b| b.get("type").and_then(Value::as_str) == Some("tool_result"))
        })
}

fn user_content(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(s) => json!(s),
        MessageContent::Parts(parts) => Value::Array(
            parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } if !text.is_empty() => {
                        Some(json!({"type": "text", "text": text}))
                    }
                    ContentPart::Text { .. } => None,
                    ContentPart::ImageUrl { image_url } => Some(json!({
                        "type": "image",
                        "source": {"type": "url", "url": image_url.url},
                    })),
                })
                .collect(),
        ),
    }
}

fn assistant_message(m: &UnifiedMessage) -> Value {
    let text = m.content.joined_text();
    let calls = match m.tool_calls.as_ref().filter(|c| !c.is_empty()) {
        Some(calls) => calls,
        None => return json!({"role": "assistant", "content": text}),
    };
    let mut blocks = Vec::with_capacity(calls.len() + 1);
    if !text.is_empty() {
        blocks.push(json!({"type": "text", "text": text}));
    }
    for call in calls {
        let input = serde_json::from_str::<Value>(&call.function.arguments)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| {
                warn!(id = %call.id, "tool call arguments are not a JSON object; sending {{}}");
                json!({})
            });
        blocks.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.function.name,
            "input": input,
        }));
    }
    json!({"role": "assistant", "content": blocks})
}

/// Flat `{name, description, input_schema}`; every property gets a description.
fn anthropic_tool(tool: &ToolDefinition) -> Value {
    let mut schema = match &tool.parameters {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    schema.entry("type").or_insert_with(|| json!("object"));
    let mut properties = Map::new();
    if let Some(Value::Object(props)) = schema.get("properties") {
        for (key, value) in props {
            let prop = match value {
                Value::Object(p) => {
                    let mut p = p.clone();
                    let has_description = p
                        .get("description")
                        .and_then(Value::as_str)
                        .is_some_and(|d| !d.is_empty());
                    if !has_description {
                        p.insert("description".into(), json!(format!("{} parameter", key)));
                    }
                    Value::Object(p)
                }
                _ => json!({"type": "string", "description": format!("{} parameter", key)}),
            };
            properties.insert(key.clone(), prop);
        }
    }
    schema.insert("properties".into(), Value::Object(properties));
    json!({
        "name": tool.name,
        "description": tool.description.clone().unwrap_or_default(),
        "input_schema": schema,
    })
}

fn anthropic_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Mode(mode) if mode == "required" => json!({"type": "any"}),
        ToolChoice::Mode(mode) => json!({"type": mode}),
        ToolChoice::Function { name } => json!({"type": "tool", "name": name}),
    }
}

impl ParameterTranslator for AnthropicTranslator {
    fn translate(&self, request: &UnifiedRequest) -> Result<Value> {
        ensure_extensions(request, "anthropic messages", Some("anthropic"))?;
        request.validate_messages()?;
        if request.structured_output.is_some() {
            return Err(Error::policy_violation(
                "structured output is not available on the messages api",
                ErrorContext::new().with_field_path("structured_output"),
            ));
        }

        let (system, messages) =
            Self::split_system_messages(&request.messages, request.instructions.as_deref());

        let mut body = Map::new();
        body.insert("model".into(), json!(request.model.id));
        body.insert(
            "max_tokens".into(),
            json!(request.settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        body.insert("messages".into(), Value::Array(messages));
        body.insert("stream".into(), json!(true));
        if let Some(sys) = system {
            body.insert("system".into(), Value::String(sys));
        }

        apply_sampling(&request.settings, &request.model, ANTHROPIC_SAMPLING, false, &mut body);

        if let Some(resolved) = reasoning::resolve(request.reasoning.as_ref(), &request.model)? {
            resolved.apply_to(&mut body)?;
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(anthropic_tool).collect();
            body.insert("tools".into(), Value::Array(tools));
            let choice = request.tool_choice.clone().unwrap_or_else(ToolChoice::auto);
            body.insert("tool_choice".into(), anthropic_tool_choice(&choice));
        }
        BuiltinDialect::Anthropic.apply(request, &mut body);

        if let VendorExtensions::Anthropic(opts) = &request.extensions {
            if let Some(tier) = &opts.service_tier {
                body.insert("service_tier".into(), json!(tier));
            }
            if let Some(user) = &opts.user_id {
                body.insert("metadata".into(), json!({"user_id": user}));
            }
        }

        Ok(Value::Object(body))
    }
}

/// Block-oriented decode state for one call.
#[derive(Debug, Default)]
pub(crate) struct AnthropicMapper {
    tools: ToolCallAssembler,
    /// `message_start` usage overlaid with later `message_delta` usage
    raw_usage: Map<String, Value>,
    stop_reason: Option<String>,
}

impl AnthropicMapper {
    fn usage(&self) -> Option<StreamUsage> {
        if self.raw_usage.is_empty() {
            None
        } else {
            Some(StreamUsage::from_anthropic(&Value::Object(self.raw_usage.clone())))
        }
    }

    fn absorb_usage(&mut self, usage: Option<&Value>) {
        if let Some(Value::Object(u)) = usage {
            for (k, v) in u {
                if !v.is_null() {
                    self.raw_usage.insert(k.clone(), v.clone());
                }
            }
        }
    }

    fn finish(&mut self, out: &mut Vec<UnifiedStreamEvent>) {
        self.tools.finish_all(out);
        let reason = self
            .stop_reason
            .take()
            .unwrap_or_else(|| DEFAULT_STOP_REASON.to_string());
        out.push(UnifiedStreamEvent::finish(reason, self.usage()));
    }
}

fn block_index(frame: &Value) -> u32 {
    frame.get("index").and_then(Value::as_u64).unwrap_or(0) as u32
}

impl FrameMapper for AnthropicMapper {
    fn on_frame(&mut self, frame: &Value, out: &mut Vec<UnifiedStreamEvent>) {
        let event_type = frame.get("type").and_then(Value::as_str).unwrap_or("");
        match event_type {
            "message_start" => self.absorb_usage(frame.pointer("/message/usage")),
            "content_block_start" => {
                let block = &frame["content_block"];
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => {
                        let mut frag = ToolCallFragment::new(block_index(frame));
                        frag.id = block.get("id").and_then(Value::as_str).map(str::to_string);
                        frag.name = block.get("name").and_then(Value::as_str).map(str::to_string);
                        self.tools.push(frag, out);
                    }
                    Some("text") => {
                        if let Some(t) = block.get("text").and_then(Value::as_str).filter(|t| !t.is_empty()) {
                            out.push(UnifiedStreamEvent::content(t));
                        }
                    }
                    Some("thinking") => {
                        if let Some(t) = block.get("thinking").and_then(Value::as_str).filter(|t| !t.is_empty()) {
                            out.push(UnifiedStreamEvent::thinking(t));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let delta = &frame["delta"];
                if let Some(text) = delta.get("text").and_then(Value::as_str).filter(|t| !t.is_empty()) {
                    out.push(UnifiedStreamEvent::content(text));
                }
                if let Some(thinking) = delta.get("thinking").and_then(Value::as_str).filter(|t| !t.is_empty()) {
                    out.push(UnifiedStreamEvent::thinking(thinking));
                }
                if let Some(partial) = delta.get("partial_json").and_then(Value::as_str) {
                    let mut frag = ToolCallFragment::new(block_index(frame));
                    frag.args = Some(partial.to_string());
                    self.tools.push(frag, out);
                }
            }
            "content_block_stop" => self.tools.finish_index(block_index(frame), out),
            "message_delta" => {
                if let Some(r) = frame.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.stop_reason = Some(r.to_string());
                }
                self.absorb_usage(frame.get("usage"));
            }
            "message_stop" => self.finish(out),
            "error" => {
                let message = frame
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("Anthropic API error");
                out.push(UnifiedStreamEvent::error(message));
            }
            "ping" => {}
            other => debug!(event_type = other, "unhandled anthropic event"),
        }
    }

    fn on_end(&mut self, out: &mut Vec<UnifiedStreamEvent>) {
        self.finish(out);
    }
}

/// Anthropic Messages adapter; MiniMax speaks the same dialect with quirks.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    provider: String,
    quirks: VendorQuirks,
    transport: HttpTransport,
}

impl AnthropicAdapter {
    pub fn new(provider: impl Into<String>, quirks: VendorQuirks, transport: HttpTransport) -> Self {
        Self {
            provider: provider.into(),
            quirks,
            transport,
        }
    }

    fn is_minimax(&self, config: &ProviderConfig) -> bool {
        self.quirks == VendorQuirks::MiniMax
            || config
                .base_url
                .as_deref()
                .is_some_and(|b| b.contains("minimax"))
    }

    /// Base URL; the legacy `minimax.chat` host only serves the OpenAI dialect.
    fn base_url(&self, config: &ProviderConfig) -> String {
        let minimax = self.is_minimax(config);
        let base = config.base_or(if minimax { MINIMAX_BASE } else { ANTHROPIC_BASE });
        if minimax && base.contains("minimax.chat") {
            return MINIMAX_BASE.to_string();
        }
        base
    }

    fn headers(api_key: &str) -> Headers {
        vec![
            ("x-api-key", api_key.to_string()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ]
    }
}

/// `{base}/v1/messages`, or `{base}/messages` when the base already ends in `/v1`.
pub(crate) fn messages_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{}/messages", base)
    } else {
        format!("{}/v1/messages", base)
    }
}

#[async_trait]
impl ProtocolAdapter for AnthropicAdapter {
    fn provider_id(&self) -> &str {
        &self.provider
    }

    fn usage_mode(&self) -> UsageMode {
        UsageMode::Terminal
    }

    async fn call(&self, request: UnifiedRequest, config: &ProviderConfig) -> Result<EventStream> {
        let quirks = if self.is_minimax(config) {
            VendorQuirks::MiniMax
        } else {
            self.quirks
        };
        let body = quirks.sanitize(AnthropicTranslator.translate(&request)?);
        let url = messages_url(&self.base_url(config));
        info!(
            provider = %self.provider,
            model = %request.model.id,
            tools = body.get("tools").and_then(serde_json::Value::as_array).map_or(0, Vec::len),
            "anthropic messages call"
        );
        debug!(body = %body, "anthropic request body");
        let open = open_with_retry(
            self.transport.clone(),
            url,
            Self::headers(&config.api_key),
            body,
            quirks,
            self.provider.clone(),
        );
        Ok(drive_sse(open, AnthropicMapper::default()))
    }

    async fn check(&self, config: &ProviderConfig) -> CheckResult {
        let minimax = self.is_minimax(config);
        let model = config.check_model.clone().unwrap_or_else(|| {
            if minimax {
                "MiniMax-M2.1".to_string()
            } else {
                "claude-3-5-sonnet-20241022".to_string()
            }
        });
        let content = if minimax {
            json!([{"type": "text", "text": "hi"}])
        } else {
            json!("hi")
        };
        let body = json!({
            "model": model,
            "max_tokens": 5,
            "messages": [{"role": "user", "content": content}],
        });
        let url = messages_url(&self.base_url(config));
        match self
            .transport
            .ping(&url, &Self::headers(&config.api_key), &body)
            .await
        {
            Ok((status, _)) if (200..300).contains(&status) => CheckResult::ok(),
            Ok((status, text)) => CheckResult::failed(extract_error_message(status, &text)),
            Err(e) => CheckResult::failed(e.message()),
        }
    }

    async fn list_models(&self, config: &ProviderConfig) -> Vec<ModelInfo> {
        let entries: &[(&str, &str, u64)] = if self.is_minimax(config) {
            &[
                ("MiniMax-M2.1", "MiniMax M2.1", 204_800),
                ("MiniMax-M2.1-lightning", "MiniMax M2.1 Lightning", 204_800),
                ("MiniMax-M2", "MiniMax M2", 204_800),
            ]
        } else {
            &[
                ("claude-3-5-sonnet-20241022", "Claude 3.5 Sonnet", 200_000),
                ("claude-3-opus-20240229", "Claude 3 Opus", 200_000),
                ("claude-3-sonnet-20240229", "Claude 3 Sonnet", 200_000),
                ("claude-3-haiku-20240307", "Claude 3 Haiku", 200_000),
            ]
        };
        entries
            .iter()
            .map(|(id, name, ctx)| {
                let mut info = ModelInfo::new(*id, *name);
                info.context_length = Some(*ctx);
                info
            })
            .collect()
    }
}
