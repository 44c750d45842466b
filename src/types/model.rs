//! Per-model capability descriptors and model listings

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorContext};
use crate::reasoning::ReasoningCapability;

/// Which OpenAI-family wire API a model is served through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    #[default]
    Chat,
    Responses,
}

/// Sampling parameters a model may declare support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterId {
    Temperature,
    TopP,
    TopK,
    PresencePenalty,
    FrequencyPenalty,
    Seed,
    Stop,
}

/// Capability descriptor for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    #[serde(default, alias = "apiType")]
    pub api_type: ApiType,
    /// Sampling parameters the model accepts
    #[serde(default)]
    pub parameters: Vec<ParameterId>,
    /// Names of vendor-hosted tools the model accepts (e.g. "web_search")
    #[serde(default, alias = "builtinTools")]
    pub builtin_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningCapability>,
    #[serde(default, alias = "contextLength", skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u64>,
}

impl ModelConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            api_type: ApiType::Chat,
            parameters: Vec::new(),
            builtin_tools: Vec::new(),
            reasoning: None,
            context_length: None,
        }
    }

    pub fn with_api_type(mut self, api_type: ApiType) -> Self {
        self.api_type = api_type;
        self
    }

    pub fn with_parameters(mut self, params: impl IntoIterator<Item = ParameterId>) -> Self {
        self.parameters.extend(params);
        self
    }

    pub fn with_builtin_tools<S: Into<String>>(mut self, tools: impl IntoIterator<Item = S>) -> Self {
        self.builtin_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn with_reasoning(mut self, reasoning: ReasoningCapability) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    pub fn supports(&self, param: ParameterId) -> bool {
        self.parameters.contains(&param)
    }

    pub fn supports_builtin(&self, name: &str) -> bool {
        self.builtin_tools.iter().any(|t| t == name)
    }
}

/// A set of model descriptors kept as configuration (YAML or JSON).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl ModelCatalog {
    pub fn from_yaml_str(s: &str) -> crate::Result<Self> {
        serde_yaml::from_str(s).map_err(|e| {
            Error::configuration(
                format!("invalid model catalog: {}", e),
                ErrorContext::new().with_source("model_catalog"),
            )
        })
    }

    pub fn from_json_str(s: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn get(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }
}

/// Entry returned by `list_models`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u64>,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created: None,
            description: None,
            context_length: None,
        }
    }
}
