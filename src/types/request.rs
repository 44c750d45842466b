//! Vendor-agnostic chat request handed to translators

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::UnifiedMessage;
use super::model::ModelConfig;
use super::tool::{BuiltinTool, ToolChoice, ToolDefinition};
use crate::reasoning::ReasoningMode;

/// Unified chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedRequest {
    pub model: ModelConfig,
    pub messages: Vec<UnifiedMessage>,
    #[serde(default)]
    pub settings: CommonSettings,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub builtin_tools: Vec<BuiltinTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningIntent>,
    /// Extra system-level instructions, merged with system messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<StructuredOutput>,
    #[serde(default)]
    pub extensions: VendorExtensions,
}

impl UnifiedRequest {
    pub fn new(model: ModelConfig, messages: Vec<UnifiedMessage>) -> Self {
        Self {
            model,
            messages,
            settings: CommonSettings::default(),
            tools: Vec::new(),
            tool_choice: None,
            builtin_tools: Vec::new(),
            reasoning: None,
            instructions: None,
            structured_output: None,
            extensions: VendorExtensions::None,
        }
    }

    pub fn with_settings(mut self, settings: CommonSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_builtin_tools(mut self, tools: Vec<BuiltinTool>) -> Self {
        self.builtin_tools = tools;
        self
    }

    pub fn with_reasoning(mut self, intent: ReasoningIntent) -> Self {
        self.reasoning = Some(intent);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_structured_output(mut self, output: StructuredOutput) -> Self {
        self.structured_output = Some(output);
        self
    }

    pub fn with_extensions(mut self, extensions: VendorExtensions) -> Self {
        self.extensions = extensions;
        self
    }

    /// Validate every message's structural invariants.
    pub fn validate_messages(&self) -> crate::Result<()> {
        for (i, m) in self.messages.iter().enumerate() {
            m.validate(i)?;
        }
        Ok(())
    }
}

/// Sampling settings chosen by the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// Vendor-agnostic reasoning request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningIntent {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<Effort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort_mode: Option<ReasoningMode>,
    /// Reasoning summary verbosity ("auto", "concise", "detailed")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ReasoningIntent {
    pub fn effort(level: impl Into<String>) -> Self {
        Self {
            enabled: true,
            effort: Some(Effort::Level(level.into())),
            effort_mode: Some(ReasoningMode::Effort),
            summary: None,
        }
    }

    pub fn budget(tokens: u64) -> Self {
        Self {
            enabled: true,
            effort: Some(Effort::Budget(tokens)),
            effort_mode: Some(ReasoningMode::Budget),
            summary: None,
        }
    }

    /// True when reasoning is on and the effort is not the literal "none".
    pub fn is_active(&self) -> bool {
        self.enabled && !matches!(&self.effort, Some(Effort::Level(l)) if l == "none")
    }
}

/// Qualitative level or token budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Effort {
    Budget(u64),
    Level(String),
}

/// Structured output request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuredOutput {
    JsonObject,
    JsonSchema {
        name: String,
        schema: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strict: Option<bool>,
    },
}

/// Vendor-scoped extension fields; a translator rejects variants it does not own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "vendor", rename_all = "snake_case")]
pub enum VendorExtensions {
    #[default]
    None,
    Responses(ResponsesOptions),
    Anthropic(AnthropicOptions),
}

impl VendorExtensions {
    pub fn vendor_name(&self) -> &'static str {
        match self {
            VendorExtensions::None => "none",
            VendorExtensions::Responses(_) => "responses",
            VendorExtensions::Anthropic(_) => "anthropic",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsesOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnthropicOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effort_deserializes_level_or_budget() {
        let e: Effort = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(e, Effort::Level("high".into()));
        let e: Effort = serde_json::from_str("2048").unwrap();
        assert_eq!(e, Effort::Budget(2048));
    }

    #[test]
    fn test_effort_none_is_inactive() {
        assert!(!ReasoningIntent::effort("none").is_active());
        assert!(ReasoningIntent::effort("low").is_active());
        assert!(!ReasoningIntent::default().is_active());
    }
}
