//! 厂商兼容性修补：在翻译结果上做最后一遍按厂商的字段修正。
//!
//! # Vendor Quirk Sanitizer
//!
//! A final patching pass over an already-translated request body. Keeps "vendor X rejects
//! field Y" rules out of the translators, and decides when a failed call is retried once
//! without tools.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::Error;

/// Vendors whose compatibility layers need patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VendorQuirks {
    #[default]
    None,
    /// MiniMax behind the Anthropic Messages dialect
    MiniMax,
    /// Moonshot / Kimi behind the Chat Completions dialect
    Moonshot,
    /// Mistral behind the Chat Completions dialect
    Mistral,
}

const MINIMAX_IGNORED_KEYS: &[&str] = &[
    "top_k",
    "stop_sequences",
    "service_tier",
    "mcp_servers",
    "context_management",
    "container",
];

const KIMI_K25_FIXED_PARAMS: &[&str] = &[
    "temperature",
    "top_p",
    "n",
    "presence_penalty",
    "frequency_penalty",
];

impl VendorQuirks {
    /// Patch a translated body for this vendor.
    pub fn sanitize(&self, body: Value) -> Value {
        let Value::Object(map) = body else {
            return body;
        };
        let out = match self {
            VendorQuirks::None => map,
            VendorQuirks::MiniMax => sanitize_minimax(map),
            VendorQuirks::Moonshot => sanitize_moonshot(map),
            VendorQuirks::Mistral => sanitize_mistral(map),
        };
        Value::Object(out)
    }

    /// Whether assistant history keeps `reasoning_content` for this vendor.
    pub fn keeps_reasoning_content(&self) -> bool {
        matches!(self, VendorQuirks::Moonshot)
    }

    /// Whether a failed call should be retried once with tools stripped.
    pub fn should_retry_without_tools(&self, err: &Error, body: &Value) -> bool {
        if !has_tools(body) {
            return false;
        }
        match (self, err) {
            (VendorQuirks::MiniMax, Error::Vendor { message, .. }) => {
                message.to_ascii_lowercase().contains("invalid params")
            }
            (VendorQuirks::Mistral, Error::Vendor { status: 400, .. }) => true,
            _ => false,
        }
    }
}

fn has_tools(body: &Value) -> bool {
    body.get("tools")
        .and_then(Value::as_array)
        .is_some_and(|t| !t.is_empty())
}

/// Remove `tools` and `tool_choice` from a request body.
pub fn strip_tools(body: &Value) -> Value {
    let mut out = body.clone();
    if let Some(obj) = out.as_object_mut() {
        obj.remove("tools");
        obj.remove("tool_choice");
    }
    out
}

/// Chat history fixups: null content becomes "" and echoed `reasoning_content` is removed
/// unless the vendor needs it back.
pub fn scrub_chat_history(body: &mut Value, keep_reasoning: bool) {
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };
    for msg in messages.iter_mut().filter_map(Value::as_object_mut) {
        if msg.get("content").map_or(true, Value::is_null) {
            msg.insert("content".into(), json!(""));
        }
        if !keep_reasoning {
            msg.remove("reasoning_content");
        }
    }
}

fn sanitize_minimax(body: Map<String, Value>) -> Map<String, Value> {
    let mut out: Map<String, Value> = body
        .into_iter()
        .filter(|(k, v)| {
            let keep = !v.is_null() && !MINIMAX_IGNORED_KEYS.contains(&k.as_str());
            if !keep {
                debug!(field = %k, "minimax: dropping unsupported field");
            }
            keep
        })
        .collect();

    if let Some(t) = out.get("temperature").and_then(Value::as_f64) {
        if t <= 0.0 || t > 1.0 {
            out.insert("temperature".into(), json!(1));
        }
    }

    if let Some(Value::Array(tools)) = out.remove("tools") {
        let tools: Vec<Value> = tools.iter().filter_map(minimax_tool).collect();
        if tools.is_empty() {
            out.remove("tool_choice");
        } else {
            out.insert("tools".into(), Value::Array(tools));
        }
    }

    if out.get("system").and_then(Value::as_str) == Some("") {
        out.remove("system");
    }

    if let Some(Value::Array(messages)) = out.remove("messages") {
        let messages = messages.into_iter().map(minimax_message).collect();
        out.insert("messages".into(), Value::Array(messages));
    }

    out
}

/// Accepts nested, flat-function and Anthropic tool dialects; returns
/// `{name, description, input_schema}` or `None` when no name is present.
/// Server tools such as `web_search_20250305` are not supported and are dropped.
fn minimax_tool(t: &Value) -> Option<Value> {
    if let Some(ty) = t.get("type").and_then(Value::as_str).filter(|ty| *ty != "function") {
        debug!(tool_type = ty, "minimax: dropping server tool");
        return None;
    }
    let (name, description, schema) = match t.get("function") {
        Some(f) if t.get("type").and_then(Value::as_str) == Some("function") => {
            (f.get("name"), f.get("description"), f.get("parameters"))
        }
        _ => (
            t.get("name"),
            t.get("description"),
            t.get("input_schema").or_else(|| t.get("parameters")),
        ),
    };
    let name = name.and_then(Value::as_str).filter(|n| !n.is_empty())?;
    let input_schema = match schema {
        Some(s) if s.is_object() => sanitize_input_schema(s),
        _ => json!({"type": "object", "properties": {}}),
    };
    Some(json!({
        "name": name,
        "description": description.and_then(Value::as_str).unwrap_or(""),
        "input_schema": input_schema,
    }))
}

/// Reduce a JSON schema to the subset MiniMax accepts: string, number, boolean, array
/// and object property types with description, properties, required and items kept.
pub fn sanitize_input_schema(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return json!({"type": "object"});
    };
    let is_array = obj.get("type").and_then(Value::as_str) == Some("array");
    let mut result = Map::new();
    result.insert("type".into(), json!(if is_array { "array" } else { "object" }));

    if is_array {
        if let Some(items) = obj.get("items") {
            result.insert("items".into(), sanitize_input_schema(items));
        }
    }

    if let Some(Value::Object(props)) = obj.get("properties") {
        let mut cleaned = Map::new();
        for (key, value) in props {
            cleaned.insert(key.clone(), sanitize_property(value));
        }
        if !cleaned.is_empty() {
            result.insert("properties".into(), Value::Object(cleaned));
        }
    }

    if let Some(Value::Array(required)) = obj.get("required") {
        if !required.is_empty() {
            result.insert("required".into(), Value::Array(required.clone()));
        }
    }

    Value::Object(result)
}

fn sanitize_property(value: &Value) -> Value {
    let Some(prop) = value.as_object() else {
        return json!({"type": "string"});
    };
    let raw_type = prop.get("type").and_then(Value::as_str);
    let ty = match raw_type {
        Some(t @ ("string" | "boolean" | "array" | "object")) => t,
        Some("integer" | "number") => "number",
        _ => "string",
    };
    let mut cleaned = Map::new();
    cleaned.insert("type".into(), json!(ty));
    if let Some(d) = prop.get("description").and_then(Value::as_str) {
        if !d.is_empty() {
            cleaned.insert("description".into(), json!(d));
        }
    }
    match raw_type {
        Some("object") if prop.contains_key("properties") => {
            let nested = sanitize_input_schema(value);
            for key in ["properties", "required"] {
                if let Some(v) = nested.get(key) {
                    cleaned.insert(key.into(), v.clone());
                }
            }
        }
        Some("array") if prop.contains_key("items") => {
            let nested = sanitize_input_schema(value);
            if let Some(items) = nested.get("items") {
                cleaned.insert("items".into(), items.clone());
            }
        }
        _ => {}
    }
    Value::Object(cleaned)
}

/// Tool-role messages become user `tool_result` blocks; string content becomes a text block.
fn minimax_message(m: Value) -> Value {
    let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
    if role == "tool" {
        let tool_use_id = m.get("tool_call_id").cloned().unwrap_or(Value::Null);
        let content = match m.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        return json!({
            "role": "user",
            "content": [{"type": "tool_result", "tool_use_id": tool_use_id, "content": content}]
        });
    }
    match m.get("content") {
        Some(Value::String(s)) => {
            let text = if s.is_empty() { " " } else { s.as_str() };
            json!({"role": role, "content": [{"type": "text", "text": text}]})
        }
        Some(Value::Array(blocks)) => {
            let blocks: Vec<Value> = blocks
                .iter()
                .filter(|b| {
                    !matches!(
                        b.get("type").and_then(Value::as_str),
                        Some("image") | Some("document")
                    )
                })
                .cloned()
                .collect();
            let blocks = if blocks.is_empty() {
                vec![json!({"type": "text", "text": " "})]
            } else {
                blocks
            };
            json!({"role": role, "content": blocks})
        }
        _ => json!({"role": role, "content": [{"type": "text", "text": " "}]}),
    }
}

fn sanitize_moonshot(mut out: Map<String, Value>) -> Map<String, Value> {
    if out.get("model").and_then(Value::as_str) == Some("kimi-k2.5") {
        for key in KIMI_K25_FIXED_PARAMS {
            out.remove(*key);
        }
    } else if let Some(t) = out.get("temperature").and_then(Value::as_f64) {
        let t = t.clamp(0.0, 1.0);
        out.insert("temperature".into(), json!(t));
        if t <= 0.01 && out.get("n").and_then(Value::as_u64).is_some_and(|n| n > 1) {
            out.insert("n".into(), json!(1));
        }
    }
    if out.get("tool_choice").and_then(Value::as_str) == Some("required") {
        warn!("moonshot: tool_choice=required unsupported, using auto");
        out.insert("tool_choice".into(), json!("auto"));
    }
    out
}

fn sanitize_mistral(mut out: Map<String, Value>) -> Map<String, Value> {
    if let Some(seed) = out.remove("seed") {
        out.insert("random_seed".into(), seed);
    }
    // usage is always reported; the option itself is rejected
    out.remove("stream_options");
    if has_tools(&Value::Object(out.clone()))
        && out.get("prompt_mode").and_then(Value::as_str) == Some("reasoning")
    {
        out.remove("prompt_mode");
    }
    out
}
