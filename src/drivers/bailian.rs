//! 阿里云百炼（DashScope）驱动：对话走 OpenAI 兼容模式，媒体生成走提交后轮询。
//!
//! Bailian (DashScope) driver.
//!
//! Chat goes through the OpenAI-compatible endpoint and reuses [`ChatAdapter`].
//! Media generation is submit-then-poll: the first POST returns either inline
//! content or a `task_id` that is handed to the [`JobPoller`].

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use super::{BuiltinDialect, ChatAdapter, CheckResult, ProtocolAdapter};
use crate::config::ProviderConfig;
use crate::error::ErrorContext;
use crate::poller::{extract_parts, HttpTaskQuery, JobPoller, MediaPart, PollProgress, PollerConfig};
use crate::sanitize::VendorQuirks;
use crate::transport::{bearer, HttpTransport};
use crate::types::{ModelInfo, UnifiedRequest, UsageMode};
use crate::{Error, EventStream, Result};

pub const BAILIAN_COMPATIBLE_BASE: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const BAILIAN_API_BASE: &str = "https://dashscope.aliyuncs.com/api/v1";
const DEFAULT_CHECK_MODEL: &str = "qwen-plus";
const ALLOWED_DOMAINS: [&str; 3] = ["dashscope.aliyuncs.com", "aliyun.com", "aliyuncs.com"];

/// Compatible-mode base URL for a user-supplied value.
///
/// Only https URLs on Alibaba Cloud hosts are honored; anything else falls back
/// to the public endpoint.
pub fn safe_base_url(user_base: Option<&str>) -> String {
    let Some(raw) = user_base.map(str::trim).filter(|s| !s.is_empty()) else {
        return BAILIAN_COMPATIBLE_BASE.to_string();
    };
    let parsed = match Url::parse(raw) {
        Ok(u) => u,
        Err(e) => {
            warn!(error = %e, "invalid bailian base url, using default");
            return BAILIAN_COMPATIBLE_BASE.to_string();
        }
    };
    if parsed.scheme() != "https" {
        warn!(scheme = parsed.scheme(), "bailian base url must be https, using default");
        return BAILIAN_COMPATIBLE_BASE.to_string();
    }
    let host = parsed.host_str().unwrap_or("");
    let allowed = ALLOWED_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)));
    if !allowed {
        warn!(host, "bailian host not in allowlist, using default");
        return BAILIAN_COMPATIBLE_BASE.to_string();
    }
    raw.replacen("/api/v1", "/compatible-mode/v1", 1)
        .trim_end_matches('/')
        .to_string()
}

/// Bailian chat adapter.
#[derive(Debug, Clone)]
pub struct BailianAdapter {
    chat: ChatAdapter,
}

impl BailianAdapter {
    pub fn new(transport: HttpTransport) -> Self {
        Self {
            chat: ChatAdapter::new("bailian", BAILIAN_COMPATIBLE_BASE, VendorQuirks::None, transport)
                .with_builtins(BuiltinDialect::Bailian),
        }
    }
}

#[async_trait]
impl ProtocolAdapter for BailianAdapter {
    fn provider_id(&self) -> &str {
        "bailian"
    }

    fn usage_mode(&self) -> UsageMode {
        self.chat.usage_mode()
    }

    async fn call(&self, request: UnifiedRequest, config: &ProviderConfig) -> Result<EventStream> {
        let base = safe_base_url(config.base_url.as_deref());
        self.chat.call_at(&request, &base, &config.api_key)
    }

    async fn check(&self, config: &ProviderConfig) -> CheckResult {
        let base = safe_base_url(config.base_url.as_deref());
        let model = config.check_model.as_deref().unwrap_or(DEFAULT_CHECK_MODEL);
        self.chat.ping_model_at(&base, &config.api_key, model).await
    }

    async fn list_models(&self, _config: &ProviderConfig) -> Vec<ModelInfo> {
        Vec::new()
    }
}

/// Submit-then-poll client for DashScope generation endpoints.
#[derive(Debug, Clone)]
pub struct BailianMediaClient {
    transport: HttpTransport,
    api_base: String,
    poller: PollerConfig,
}

impl BailianMediaClient {
    pub fn new(transport: HttpTransport) -> Self {
        Self {
            transport,
            api_base: BAILIAN_API_BASE.to_string(),
            poller: PollerConfig::default(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poller_config(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    /// POST `body` to `{api_base}/{endpoint}` in async mode and wait for the result.
    ///
    /// Inline content in the submit response is returned as-is; otherwise the
    /// returned task is polled at `{api_base}/tasks/{task_id}`.
    pub async fn submit_then_poll<P, U>(
        &self,
        api_key: &str,
        endpoint: &str,
        body: &Value,
        on_progress: P,
        on_update: U,
    ) -> Result<Vec<MediaPart>>
    where
        P: FnMut(&PollProgress) + Send,
        U: FnMut(&[MediaPart]) + Send,
    {
        let url = format!("{}/{}", self.api_base, endpoint.trim_start_matches('/'));
        let mut headers = bearer(api_key);
        headers.push(("X-DashScope-Async", "enable".to_string()));
        info!(url = %url, model = body.get("model").and_then(serde_json::Value::as_str).unwrap_or(""), "bailian async submit");

        let submitted = self.transport.post_json(&url, &headers, body).await?;
        let inline = extract_parts(&submitted);
        if !inline.is_empty() {
            return Ok(inline);
        }

        let task_id = submitted
            .pointer("/output/task_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::task(
                    "No task_id returned from async call",
                    ErrorContext::new().with_source("bailian_media"),
                )
            })?;
        let query = HttpTaskQuery::new(self.transport.clone(), self.api_base.clone(), api_key);
        JobPoller::with_config(query, self.poller)
            .poll(task_id, on_progress, on_update)
            .await
    }
}
