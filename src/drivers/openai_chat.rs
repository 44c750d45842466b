//! OpenAI Chat Completions 驱动 — delta 数组流式协议（OpenAI 兼容厂商共用）
//!
//! Chat Completions driver, shared by every OpenAI-compatible vendor:
//! - `choices[0].delta.content` may be a string or (Magistral) an array of text/thinking parts.
//! - `delta.reasoning_content` carries reasoning text.
//! - `delta.tool_calls[]` fragments feed the tool-call assembler.
//! - Usage frames are folded per the adapter's [`UsageMode`]; `finish` is emitted when the
//!   stream ends.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{
    apply_sampling, ensure_extensions, fetch_openai_models, open_with_retry, BuiltinDialect,
    CheckResult, ParameterTranslator, ProtocolAdapter, SamplingKeys,
};
use crate::config::ProviderConfig;
use crate::pipeline::{drive_sse, FrameMapper};
use crate::reasoning;
use crate::sanitize::{scrub_chat_history, VendorQuirks};
use crate::transport::{bearer, extract_error_message, HttpTransport};
use crate::types::{
    MessageContent, MessageRole, ModelInfo, StreamUsage, StructuredOutput, ToolChoice,
    UnifiedMessage, UnifiedRequest, UnifiedStreamEvent, UsageMode,
};
use crate::utils::{ToolCallAssembler, ToolCallFragment};
use crate::{EventStream, Result};

const CHAT_SAMPLING: SamplingKeys = SamplingKeys {
    top_k: false,
    penalties: true,
    seed: true,
    stop: Some("stop"),
};

/// Chat Completions request translator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatTranslator {
    builtins: BuiltinDialect,
}

impl ChatTranslator {
    pub fn new(builtins: BuiltinDialect) -> Self {
        Self { builtins }
    }
}

impl ParameterTranslator for ChatTranslator {
    fn translate(&self, request: &UnifiedRequest) -> Result<Value> {
        ensure_extensions(request, "chat completions", None)?;
        request.validate_messages()?;

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(instructions) = request.instructions.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({"role": "system", "content": instructions}));
        }
        for m in &request.messages {
            messages.push(chat_message(m)?);
        }

        let mut body = Map::new();
        body.insert("model".into(), json!(request.model.id));
        body.insert("messages".into(), Value::Array(messages));
        body.insert("stream".into(), json!(true));
        body.insert("stream_options".into(), json!({"include_usage": true}));

        apply_sampling(&request.settings, &request.model, CHAT_SAMPLING, false, &mut body);
        if let Some(n) = request.settings.max_tokens {
            body.insert("max_tokens".into(), json!(n));
        }

        if let Some(resolved) = reasoning::resolve(request.reasoning.as_ref(), &request.model)? {
            resolved.apply_to(&mut body)?;
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(|t| t.to_nested()).collect();
            body.insert("tools".into(), Value::Array(tools));
            let choice = request.tool_choice.clone().unwrap_or_else(ToolChoice::auto);
            body.insert("tool_choice".into(), chat_tool_choice(&choice));
        }
        self.builtins.apply(request, &mut body);

        match &request.structured_output {
            Some(StructuredOutput::JsonObject) => {
                body.insert("response_format".into(), json!({"type": "json_object"}));
            }
            Some(StructuredOutput::JsonSchema { name, schema, strict }) => {
                let mut js = json!({"name": name, "schema": schema});
                if let Some(s) = strict {
                    js["strict"] = json!(s);
                }
                body.insert(
                    "response_format".into(),
                    json!({"type": "json_schema", "json_schema": js}),
                );
            }
            None => {}
        }

        Ok(Value::Object(body))
    }
}

fn chat_message(m: &UnifiedMessage) -> Result<Value> {
    let value = match m.role {
        MessageRole::System => json!({"role": "system", "content": m.content.joined_text()}),
        MessageRole::User => json!({"role": "user", "content": content_value(&m.content)?}),
        MessageRole::Assistant => {
            let content = if m.content.is_empty() && m.has_tool_calls() {
                Value::Null
            } else {
                json!(m.content.joined_text())
            };
            let mut msg = json!({"role": "assistant", "content": content});
            if let Some(calls) = m.tool_calls.as_ref().filter(|c| !c.is_empty()) {
                msg["tool_calls"] = serde_json::to_value(calls)?;
            }
            if let Some(r) = &m.reasoning_content {
                msg["reasoning_content"] = json!(r);
            }
            msg
        }
        MessageRole::Tool => {
            let mut msg = json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id,
                "content": m.content.joined_text(),
            });
            if let Some(name) = &m.name {
                msg["name"] = json!(name);
            }
            msg
        }
    };
    Ok(value)
}

fn content_value(content: &MessageContent) -> Result<Value> {
    Ok(match content {
        MessageContent::Text(s) => json!(s),
        MessageContent::Parts(parts) => serde_json::to_value(parts)?,
    })
}

fn chat_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Mode(mode) => json!(mode),
        ToolChoice::Function { name } => json!({"type": "function", "function": {"name": name}}),
    }
}

/// Delta-array decode state for one call.
#[derive(Debug)]
pub(crate) struct ChatMapper {
    tools: ToolCallAssembler,
    usage_mode: UsageMode,
    usage: Option<StreamUsage>,
    finish_reason: Option<String>,
}

impl ChatMapper {
    pub(crate) fn new(usage_mode: UsageMode) -> Self {
        Self {
            tools: ToolCallAssembler::new(),
            usage_mode,
            usage: None,
            finish_reason: None,
        }
    }

    fn on_content(&mut self, delta: &Value, out: &mut Vec<UnifiedStreamEvent>) {
        let role = delta.get("role").and_then(Value::as_str).map(str::to_string);
        match delta.get("content") {
            Some(Value::String(s)) if !s.is_empty() => out.push(UnifiedStreamEvent::Content {
                delta: s.clone(),
                role,
            }),
            Some(Value::Array(parts)) => {
                for part in parts {
                    match part.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            if let Some(t) = part.get("text").and_then(Value::as_str).filter(|t| !t.is_empty()) {
                                out.push(UnifiedStreamEvent::Content {
                                    delta: t.to_string(),
                                    role: role.clone(),
                                });
                            }
                        }
                        Some("thinking") => {
                            let text = thinking_text(part.get("thinking"));
                            if !text.is_empty() {
                                out.push(UnifiedStreamEvent::thinking(text));
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
}

/// `thinking` is either a string or a list of `{text}` parts.
fn thinking_text(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.get("text").and_then(Value::as_str).or_else(|| i.as_str()))
            .collect(),
        _ => String::new(),
    }
}

impl FrameMapper for ChatMapper {
    fn on_frame(&mut self, frame: &Value, out: &mut Vec<UnifiedStreamEvent>) {
        if let Some(err) = frame.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| err.as_str())
                .unwrap_or("stream error");
            out.push(UnifiedStreamEvent::error(message));
            return;
        }

        let choice = frame.pointer("/choices/0");
        // Moonshot reports usage inside the choice
        let usage = frame
            .get("usage")
            .filter(|u| u.is_object())
            .or_else(|| choice.and_then(|c| c.get("usage")).filter(|u| u.is_object()));
        if let Some(u) = usage {
            self.usage_mode
                .absorb(&mut self.usage, StreamUsage::from_openai_chat(u));
        }

        let Some(choice) = choice else {
            return;
        };

        if let Some(delta) = choice.get("delta") {
            for key in ["reasoning_content", "reasoning"] {
                if let Some(r) = delta.get(key).and_then(Value::as_str).filter(|r| !r.is_empty()) {
                    out.push(UnifiedStreamEvent::thinking(r));
                    break;
                }
            }

            self.on_content(delta, out);

            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for (pos, call) in calls.iter().enumerate() {
                    let index = call
                        .get("index")
                        .and_then(Value::as_u64)
                        .unwrap_or(pos as u64) as u32;
                    let mut frag = ToolCallFragment::new(index);
                    frag.id = call.get("id").and_then(Value::as_str).map(str::to_string);
                    frag.name = call
                        .pointer("/function/name")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    frag.args = call
                        .pointer("/function/arguments")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    self.tools.push(frag, out);
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
        }
    }

    fn on_end(&mut self, out: &mut Vec<UnifiedStreamEvent>) {
        self.tools.finish_all(out);
        let reason = self.finish_reason.take().unwrap_or_else(|| "stop".to_string());
        out.push(UnifiedStreamEvent::finish(reason, self.usage.take()));
    }
}

/// Chat Completions adapter for one OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct ChatAdapter {
    provider: String,
    default_base: String,
    quirks: VendorQuirks,
    translator: ChatTranslator,
    usage_mode: UsageMode,
    transport: HttpTransport,
}

impl ChatAdapter {
    pub fn new(
        provider: impl Into<String>,
        default_base: impl Into<String>,
        quirks: VendorQuirks,
        transport: HttpTransport,
    ) -> Self {
        Self {
            provider: provider.into(),
            default_base: default_base.into(),
            quirks,
            translator: ChatTranslator::default(),
            usage_mode: UsageMode::Cumulative,
            transport,
        }
    }

    /// How this vendor switches on hosted tools. Defaults to OpenAI's `web_search_options`.
    pub fn with_builtins(mut self, builtins: BuiltinDialect) -> Self {
        self.translator = ChatTranslator::new(builtins);
        self
    }

    /// Defaults to [`UsageMode::Cumulative`].
    pub fn with_usage_mode(mut self, usage_mode: UsageMode) -> Self {
        self.usage_mode = usage_mode;
        self
    }

    pub fn quirks(&self) -> VendorQuirks {
        self.quirks
    }

    pub fn translator(&self) -> ChatTranslator {
        self.translator
    }

    /// Translate and patch a request into the body actually sent.
    pub fn prepare(&self, request: &UnifiedRequest) -> Result<Value> {
        let mut body = self.translator.translate(request)?;
        scrub_chat_history(&mut body, self.quirks.keeps_reasoning_content());
        Ok(self.quirks.sanitize(body))
    }

    pub(crate) fn call_at(&self, request: &UnifiedRequest, base: &str, api_key: &str) -> Result<EventStream> {
        let body = self.prepare(request)?;
        let url = format!("{}/chat/completions", base);
        info!(
            provider = %self.provider,
            model = %request.model.id,
            tools = request.tools.len(),
            "chat completions call"
        );
        debug!(body = %body, "chat completions request body");
        let open = open_with_retry(
            self.transport.clone(),
            url,
            bearer(api_key),
            body,
            self.quirks,
            self.provider.clone(),
        );
        Ok(drive_sse(open, ChatMapper::new(self.usage_mode)))
    }

    /// Send a 1-token completion; 2xx or 400 proves the key was accepted.
    pub(crate) async fn ping_model_at(&self, base: &str, api_key: &str, model: &str) -> CheckResult {
        let url = format!("{}/chat/completions", base);
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });
        match self.transport.ping(&url, &bearer(api_key), &body).await {
            Ok((status, _)) if (200..300).contains(&status) || status == 400 => CheckResult::ok(),
            Ok((status, text)) => CheckResult::failed(extract_error_message(status, &text)),
            Err(e) => CheckResult::failed(e.message()),
        }
    }
}

#[async_trait]
impl ProtocolAdapter for ChatAdapter {
    fn provider_id(&self) -> &str {
        &self.provider
    }

    fn usage_mode(&self) -> UsageMode {
        self.usage_mode
    }

    async fn call(&self, request: UnifiedRequest, config: &ProviderConfig) -> Result<EventStream> {
        let base = config.base_or(&self.default_base);
        self.call_at(&request, &base, &config.api_key)
    }

    /// Lists models; if that fails, falls back to a 1-token request to `check_model`.
    /// Without `check_model` there is nothing to try and the listing error is reported.
    async fn check(&self, config: &ProviderConfig) -> CheckResult {
        let base = config.base_or(&self.default_base);
        match fetch_openai_models(&self.transport, &base, &config.api_key).await {
            Ok(_) => CheckResult::ok(),
            Err(e) => match config.check_model.as_deref() {
                Some(model) => self.ping_model_at(&base, &config.api_key, model).await,
                None => CheckResult::failed(e.message()),
            },
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
