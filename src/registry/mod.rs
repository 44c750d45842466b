//! 适配器注册表 — 根据提供商标识与模型描述选择翻译器与协议适配器
//!
//! Adapter registry. Maps a provider id plus a model descriptor to the
//! `(ParameterTranslator, ProtocolAdapter)` pair that serves it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::drivers::{
    AnthropicAdapter, AnthropicTranslator, BailianAdapter, BuiltinDialect, ChatAdapter,
    ChatTranslator, ParameterTranslator, ProtocolAdapter, ResponsesAdapter, ResponsesTranslator,
};
use crate::sanitize::VendorQuirks;
use crate::transport::HttpTransport;
use crate::types::{ApiType, ModelConfig, UnifiedRequest};
use crate::{EventStream, Result};

/// Known provider families; anything else is `Custom` and speaks Chat Completions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    DeepSeek,
    Mistral,
    Moonshot,
    Volcengine,
    SiliconFlow,
    Xai,
    OpenRouter,
    Anthropic,
    MiniMax,
    Bailian,
    Custom(String),
}

impl ProviderKind {
    pub fn id(&self) -> &str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Moonshot => "moonshot",
            ProviderKind::Volcengine => "volcengine",
            ProviderKind::SiliconFlow => "siliconflow",
            ProviderKind::Xai => "xai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::MiniMax => "minimax",
            ProviderKind::Bailian => "bailian",
            ProviderKind::Custom(id) => id,
        }
    }

    /// Base URL used when the provider config carries none.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi | ProviderKind::Custom(_) => "https://api.openai.com/v1",
            ProviderKind::DeepSeek => "https://api.deepseek.com/v1",
            ProviderKind::Mistral => "https://api.mistral.ai/v1",
            ProviderKind::Moonshot => "https://api.moonshot.cn/v1",
            ProviderKind::Volcengine => "https://ark.cn-beijing.volces.com/api/v3",
            ProviderKind::SiliconFlow => "https://api.siliconflow.cn/v1",
            ProviderKind::Xai => "https://api.x.ai/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::MiniMax => "https://api.minimaxi.com/anthropic",
            ProviderKind::Bailian => crate::drivers::bailian::BAILIAN_COMPATIBLE_BASE,
        }
    }

    pub fn quirks(&self) -> VendorQuirks {
        match self {
            ProviderKind::MiniMax => VendorQuirks::MiniMax,
            ProviderKind::Moonshot => VendorQuirks::Moonshot,
            ProviderKind::Mistral => VendorQuirks::Mistral,
            _ => VendorQuirks::None,
        }
    }

    /// How hosted web search is expressed outside the Responses API.
    pub fn builtin_dialect(&self) -> BuiltinDialect {
        match self {
            ProviderKind::OpenAi | ProviderKind::Custom(_) => BuiltinDialect::OpenAi,
            ProviderKind::Bailian => BuiltinDialect::Bailian,
            ProviderKind::Moonshot => BuiltinDialect::Moonshot,
            ProviderKind::OpenRouter => BuiltinDialect::OpenRouter,
            ProviderKind::Anthropic | ProviderKind::MiniMax => BuiltinDialect::Anthropic,
            _ => BuiltinDialect::None,
        }
    }

    fn is_openai_family(&self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAi
                | ProviderKind::DeepSeek
                | ProviderKind::Mistral
                | ProviderKind::Moonshot
                | ProviderKind::Volcengine
                | ProviderKind::SiliconFlow
                | ProviderKind::Xai
                | ProviderKind::OpenRouter
        )
    }
}

impl FromStr for ProviderKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "openai" => ProviderKind::OpenAi,
            "deepseek" => ProviderKind::DeepSeek,
            "mistral" => ProviderKind::Mistral,
            "moonshot" => ProviderKind::Moonshot,
            "volcengine" => ProviderKind::Volcengine,
            "siliconflow" => ProviderKind::SiliconFlow,
            "xai" => ProviderKind::Xai,
            "openrouter" => ProviderKind::OpenRouter,
            "anthropic" => ProviderKind::Anthropic,
            "minimax" => ProviderKind::MiniMax,
            "bailian" => ProviderKind::Bailian,
            _ => ProviderKind::Custom(s.to_string()),
        };
        Ok(kind)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Translator and adapter selected for one provider/model pair.
#[derive(Debug, Clone)]
pub struct ResolvedAdapter {
    pub translator: Arc<dyn ParameterTranslator>,
    pub adapter: Arc<dyn ProtocolAdapter>,
}

/// Routes provider ids to adapters over one shared transport.
#[derive(Debug, Clone)]
pub struct AdapterRegistry {
    transport: HttpTransport,
}

impl AdapterRegistry {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    pub fn resolve(&self, provider_id: &str, model: &ModelConfig) -> ResolvedAdapter {
        let kind: ProviderKind = match provider_id.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        };
        let transport = self.transport.clone();
        let resolved = match &kind {
            ProviderKind::Anthropic | ProviderKind::MiniMax => ResolvedAdapter {
                translator: Arc::new(AnthropicTranslator),
                adapter: Arc::new(AnthropicAdapter::new(kind.id(), kind.quirks(), transport)),
            },
            ProviderKind::Bailian => ResolvedAdapter {
                translator: Arc::new(ChatTranslator::new(BuiltinDialect::Bailian)),
                adapter: Arc::new(BailianAdapter::new(transport)),
            },
            k if k.is_openai_family() && model.api_type == ApiType::Responses => ResolvedAdapter {
                translator: Arc::new(ResponsesTranslator),
                adapter: Arc::new(ResponsesAdapter::new(k.id(), k.default_base_url(), transport)),
            },
            k => {
                if let ProviderKind::Custom(id) = k {
                    warn!(provider = %id, "unknown provider; using OpenAI chat completions");
                }
                let adapter = ChatAdapter::new(k.id(), k.default_base_url(), k.quirks(), transport)
                    .with_builtins(k.builtin_dialect());
                ResolvedAdapter {
                    translator: Arc::new(adapter.translator()),
                    adapter: Arc::new(adapter),
                }
            }
        };
        debug!(provider = %kind, model = %model.id, "resolved adapter");
        resolved
    }

    /// Resolve by the request's model and start the call.
    pub async fn call(
        &self,
        provider_id: &str,
        request: UnifiedRequest,
        config: &ProviderConfig,
    ) -> Result<EventStream> {
        let resolved = self.resolve(provider_id, &request.model);
        resolved.adapter.call(request, config).await
    }
}

static DEFAULT_REGISTRY: Lazy<AdapterRegistry> = Lazy::new(|| {
    let transport = HttpTransport::from_env().unwrap_or_else(|e| {
        warn!(error = %e, "failed to build http transport from environment; using defaults");
        HttpTransport::with_client(reqwest::Client::new())
    });
    AdapterRegistry::new(transport)
});

/// Process-wide registry built from environment transport settings.
pub fn default_registry() -> &'static AdapterRegistry {
    &DEFAULT_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UsageMode;

    fn registry() -> AdapterRegistry {
        AdapterRegistry::new(HttpTransport::with_client(reqwest::Client::new()))
    }

    #[test]
    fn test_provider_kind_round_trip() {
        assert_eq!("DeepSeek".parse::<ProviderKind>().unwrap(), ProviderKind::DeepSeek);
        assert_eq!(ProviderKind::Moonshot.quirks(), VendorQuirks::Moonshot);
        let custom: ProviderKind = "my-gateway".parse().unwrap();
        assert_eq!(custom.id(), "my-gateway");
        assert_eq!(custom.default_base_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_openai_family_routes_by_api_type() {
        let reg = registry();
        let chat = reg.resolve("openai", &ModelConfig::new("gpt-4o"));
        assert_eq!(chat.adapter.usage_mode(), UsageMode::Cumulative);

        let responses = reg.resolve(
            "xai",
            &ModelConfig::new("grok-4").with_api_type(ApiType::Responses),
        );
        assert_eq!(responses.adapter.usage_mode(), UsageMode::Terminal);
        assert_eq!(responses.adapter.provider_id(), "xai");
    }

    #[test]
    fn test_anthropic_family_and_fallback() {
        let reg = registry();
        let minimax = reg.resolve("minimax", &ModelConfig::new("MiniMax-M2.1"));
        assert_eq!(minimax.adapter.provider_id(), "minimax");
        assert_eq!(minimax.adapter.usage_mode(), UsageMode::Terminal);

        let bailian = reg.resolve("bailian", &ModelConfig::new("qwen-plus"));
        assert_eq!(bailian.adapter.provider_id(), "bailian");

        let custom = reg.resolve("local-llm", &ModelConfig::new("llama"));
        assert_eq!(custom.adapter.provider_id(), "local-llm");
        assert_eq!(custom.adapter.usage_mode(), UsageMode::Cumulative);
    }

    #[test]
    fn test_resolved_translator_carries_vendor_search_fields() {
        use crate::types::{BuiltinTool, UnifiedMessage};

        let reg = registry();
        let model = ModelConfig::new("m").with_builtin_tools(["web_search"]);
        let req = UnifiedRequest::new(model.clone(), vec![UnifiedMessage::user("q")])
            .with_builtin_tools(vec![BuiltinTool::web_search()]);

        let body = reg.resolve("openrouter", &model).translator.translate(&req).unwrap();
        assert_eq!(body["plugins"][0]["id"], "web");

        let body = reg.resolve("moonshot", &model).translator.translate(&req).unwrap();
        assert_eq!(body["tools"][0]["function"]["name"], "$web_search");

        let body = reg.resolve("deepseek", &model).translator.translate(&req).unwrap();
        assert!(body.get("web_search_options").is_none());
        assert!(body.get("tools").is_none());
    }
}
