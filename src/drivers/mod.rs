//! Provider 驱动抽象层 — 通过 trait 实现多厂商协议适配的动态分发
//!
//! Each vendor dialect is covered by two seams:
//!
//! - [`ParameterTranslator`]: a pure function from [`UnifiedRequest`] to the vendor body.
//! - [`ProtocolAdapter`]: drives the HTTP/SSE exchange and yields [`UnifiedStreamEvent`]s,
//!   plus the advisory `check` and `list_models` operations.
//!
//! Both are object safe and handed out as `Arc<dyn ...>` by the registry.
//!
//! [`UnifiedStreamEvent`]: crate::types::UnifiedStreamEvent

pub mod anthropic;
pub mod bailian;
pub mod openai_chat;
pub mod openai_responses;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::config::ProviderConfig;
use crate::error::ErrorContext;
use crate::pipeline::OpenFuture;
use crate::sanitize::{strip_tools, VendorQuirks};
use crate::transport::{Headers, HttpTransport};
use crate::types::{
    BuiltinTool, CommonSettings, ModelConfig, ModelInfo, ParameterId, UnifiedRequest, UsageMode,
    VendorExtensions,
};
use crate::{Error, EventStream, Result};

pub use anthropic::{AnthropicAdapter, AnthropicTranslator};
pub use bailian::{BailianAdapter, BailianMediaClient};
pub use openai_chat::{ChatAdapter, ChatTranslator};
pub use openai_responses::{ResponsesAdapter, ResponsesTranslator};

/// Outcome of a connectivity check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Unified request -> vendor request body. No I/O.
pub trait ParameterTranslator: Send + Sync + std::fmt::Debug {
    fn translate(&self, request: &UnifiedRequest) -> Result<Value>;
}

/// Vendor wire protocol driver.
///
/// `call` fails only for problems found before any I/O (translation, policy). Everything
/// after that, including the HTTP status, arrives as a terminal event on the stream. The
/// request is sent when the stream is first polled.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync + std::fmt::Debug {
    /// Provider id used in logs.
    fn provider_id(&self) -> &str;

    /// How this vendor reports token usage.
    fn usage_mode(&self) -> UsageMode;

    async fn call(&self, request: UnifiedRequest, config: &ProviderConfig) -> Result<EventStream>;

    async fn check(&self, config: &ProviderConfig) -> CheckResult;

    /// Best effort; failures yield an empty or fallback list.
    async fn list_models(&self, config: &ProviderConfig) -> Vec<ModelInfo>;
}

/// Reject extension variants the `translator` does not own.
pub(crate) fn ensure_extensions(
    request: &UnifiedRequest,
    translator: &'static str,
    owned: Option<&'static str>,
) -> Result<()> {
    match &request.extensions {
        VendorExtensions::None => Ok(()),
        ext if Some(ext.vendor_name()) == owned => Ok(()),
        ext => Err(Error::policy_violation(
            format!(
                "'{}' extensions cannot be sent through the {} translator",
                ext.vendor_name(),
                translator
            ),
            ErrorContext::new().with_field_path("extensions"),
        )),
    }
}

/// Requested builtin tools the model declares; the rest are dropped with a warning.
fn declared_builtins(request: &UnifiedRequest) -> impl Iterator<Item = &BuiltinTool> + '_ {
    request.builtin_tools.iter().filter(|tool| {
        let declared = request.model.supports_builtin(tool.name());
        if !declared {
            warn!(model = %request.model.id, tool = tool.name(), "model does not declare builtin tool; dropping");
        }
        declared
    })
}

/// Builtin tools in the Responses dialect.
pub(crate) fn builtin_tools(request: &UnifiedRequest) -> Result<Vec<Value>> {
    declared_builtins(request).map(builtin_tool_json).collect()
}

fn builtin_tool_json(tool: &BuiltinTool) -> Result<Value> {
    let value = match tool {
        BuiltinTool::WebSearch {
            user_location,
            allowed_domains,
            external_web_access,
            ..
        } => {
            let mut t = json!({"type": "web_search"});
            if let Some(loc) = user_location {
                t["user_location"] = loc.clone();
            }
            if let Some(domains) = allowed_domains {
                t["filters"] = json!({"allowed_domains": domains});
            }
            if let Some(access) = external_web_access {
                t["external_web_access"] = json!(access);
            }
            t
        }
        BuiltinTool::CodeInterpreter { container } => json!({
            "type": "code_interpreter",
            "container": container
                .clone()
                .unwrap_or_else(|| json!({"type": "auto", "memory_limit": "4g"})),
        }),
        BuiltinTool::FileSearch {
            vector_store_ids,
            max_num_results,
        } => {
            if vector_store_ids.is_empty() {
                return Err(Error::translation(
                    "file_search requires at least one vector store id",
                    ErrorContext::new()
                        .with_field_path("builtin_tools.file_search.vector_store_ids"),
                ));
            }
            let mut t = json!({"type": "file_search", "vector_store_ids": vector_store_ids});
            if let Some(n) = max_num_results {
                t["max_num_results"] = json!(n);
            }
            t
        }
        other => json!({"type": other.name()}),
    };
    Ok(value)
}

/// How a Chat Completions or Messages vendor switches on hosted web search.
///
/// Only `web_search` has a form outside the Responses API; other declared builtins are
/// dropped with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuiltinDialect {
    /// No hosted tools
    None,
    /// `web_search_options`
    #[default]
    OpenAi,
    /// DashScope `enable_search` and `search_options`
    Bailian,
    /// `$web_search` builtin function
    Moonshot,
    /// `plugins: [{id: "web"}]`
    OpenRouter,
    /// `web_search_20250305` server tool
    Anthropic,
}

impl BuiltinDialect {
    /// Attach the declared builtin tools of `request` to a translated body.
    pub(crate) fn apply(&self, request: &UnifiedRequest, body: &mut Map<String, Value>) {
        for tool in declared_builtins(request) {
            let BuiltinTool::WebSearch {
                user_location,
                allowed_domains,
                search_strategy,
                ..
            } = tool
            else {
                warn!(model = %request.model.id, tool = tool.name(), dialect = ?self, "builtin tool has no form in this dialect; dropping");
                continue;
            };
            match self {
                BuiltinDialect::None => {
                    warn!(model = %request.model.id, "vendor has no hosted web search; dropping");
                }
                BuiltinDialect::OpenAi => {
                    let mut options = json!({});
                    if let Some(loc) = user_location {
                        options["user_location"] = loc.clone();
                    }
                    body.insert("web_search_options".into(), options);
                }
                BuiltinDialect::Bailian => {
                    body.insert("enable_search".into(), json!(true));
                    if let Some(strategy) = search_strategy {
                        body.insert("search_options".into(), json!({"search_strategy": strategy}));
                    }
                }
                BuiltinDialect::Moonshot => push_array(
                    body,
                    "tools",
                    json!({"type": "builtin_function", "function": {"name": "$web_search"}}),
                ),
                BuiltinDialect::OpenRouter => push_array(body, "plugins", json!({"id": "web"})),
                BuiltinDialect::Anthropic => {
                    let mut t = json!({"type": "web_search_20250305", "name": "web_search"});
                    if let Some(domains) = allowed_domains {
                        t["allowed_domains"] = json!(domains);
                    }
                    if let Some(loc) = user_location {
                        t["user_location"] = loc.clone();
                    }
                    push_array(body, "tools", t);
                }
            }
        }
    }
}

fn push_array(body: &mut Map<String, Value>, key: &str, item: Value) {
    match body.get_mut(key) {
        Some(Value::Array(items)) => items.push(item),
        _ => {
            body.insert(key.to_string(), Value::Array(vec![item]));
        }
    }
}

/// Which sampling fields a dialect accepts and under what names.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SamplingKeys {
    pub top_k: bool,
    pub penalties: bool,
    pub seed: bool,
    pub stop: Option<&'static str>,
}

/// Copy sampling settings the model declares support for.
pub(crate) fn apply_sampling(
    settings: &CommonSettings,
    model: &ModelConfig,
    keys: SamplingKeys,
    skip_temperature: bool,
    body: &mut Map<String, Value>,
) {
    let mut put = |param: ParameterId, key: &str, value: Option<Value>| {
        if let Some(v) = value {
            if model.supports(param) {
                body.insert(key.to_string(), v);
            }
        }
    };

    if !skip_temperature {
        put(ParameterId::Temperature, "temperature", settings.temperature.map(Value::from));
        put(ParameterId::TopP, "top_p", settings.top_p.map(Value::from));
    }
    if keys.top_k {
        put(ParameterId::TopK, "top_k", settings.top_k.map(Value::from));
    }
    if keys.penalties {
        put(
            ParameterId::PresencePenalty,
            "presence_penalty",
            settings.presence_penalty.map(Value::from),
        );
        put(
            ParameterId::FrequencyPenalty,
            "frequency_penalty",
            settings.frequency_penalty.map(Value::from),
        );
    }
    if keys.seed {
        put(ParameterId::Seed, "seed", settings.seed.map(Value::from));
    }
    if let Some(stop_key) = keys.stop {
        if !settings.stop.is_empty() {
            put(ParameterId::Stop, stop_key, Some(json!(settings.stop)));
        }
    }
}

/// Open a vendor stream, retrying once without tools when the vendor quirk calls for it.
pub(crate) fn open_with_retry(
    transport: HttpTransport,
    url: String,
    headers: Headers,
    body: Value,
    quirks: VendorQuirks,
    provider: String,
) -> OpenFuture {
    Box::pin(async move {
        match transport.post_stream(&url, &headers, &body).await {
            Err(e) if quirks.should_retry_without_tools(&e, &body) => {
                warn!(provider = %provider, error = %e, "vendor rejected tools; retrying once without them");
                transport.post_stream(&url, &headers, &strip_tools(&body)).await
            }
            other => other,
        }
    })
}

/// `GET {base}/models` in the OpenAI list shape.
pub(crate) async fn fetch_openai_models(
    transport: &HttpTransport,
    base: &str,
    api_key: &str,
) -> Result<Vec<ModelInfo>> {
    let url = format!("{}/models", base);
    let body = transport
        .get_json(&url, &crate::transport::bearer(api_key))
        .await?;
    let models = body
        .get("data")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|m| {
                    let id = m.get("id").and_then(Value::as_str)?;
                    let mut info = ModelInfo::new(id, id);
                    info.created = m.get("created").and_then(Value::as_i64);
                    info.description = Some(id.to_string());
                    Some(info)
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(models)
}
