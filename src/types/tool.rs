//! Tool declarations: caller-defined functions and vendor builtin tools

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Function tool declaration.
///
/// Deserializes from both the nested dialect
/// (`{"type":"function","function":{"name":..,"parameters":..}}`) and the flat dialect
/// (`{"type":"function","name":..,"parameters"|"input_schema":..}`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the arguments object
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

#[derive(Deserialize)]
struct RawFunction {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<Value>,
    #[serde(default)]
    input_schema: Option<Value>,
    #[serde(default)]
    strict: Option<bool>,
}

#[derive(Deserialize)]
struct RawTool {
    #[serde(default)]
    function: Option<RawFunction>,
    #[serde(flatten)]
    flat: Map<String, Value>,
}

impl<'de> Deserialize<'de> for ToolDefinition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawTool::deserialize(deserializer)?;
        let f = match raw.function {
            Some(f) => f,
            None => {
                let mut flat = raw.flat;
                flat.remove("type");
                RawFunction::deserialize(Value::Object(flat)).map_err(serde::de::Error::custom)?
            }
        };
        Ok(ToolDefinition {
            name: f.name,
            description: f.description,
            parameters: f
                .parameters
                .or(f.input_schema)
                .unwrap_or_else(empty_object_schema),
            strict: f.strict,
        })
    }
}

pub(crate) fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ToolDefinition {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            parameters,
            strict: None,
        }
    }

    /// `{"type":"function","function":{...}}`
    pub fn to_nested(&self) -> Value {
        let mut function = json!({
            "name": self.name,
            "parameters": self.parameters,
        });
        if let Some(d) = &self.description {
            function["description"] = json!(d);
        }
        if let Some(s) = self.strict {
            function["strict"] = json!(s);
        }
        json!({"type": "function", "function": function})
    }

    /// `{"type":"function","name":..,"parameters":..}`
    pub fn to_flat(&self) -> Value {
        let mut tool = json!({
            "type": "function",
            "name": self.name,
            "parameters": self.parameters,
        });
        if let Some(d) = &self.description {
            tool["description"] = json!(d);
        }
        if let Some(s) = self.strict {
            tool["strict"] = json!(s);
        }
        tool
    }
}

/// Tool choice (OpenAI-style)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// "auto" | "none" | "required" | "any"
    Mode(String),
    /// Force a specific function
    Function { name: String },
}

impl ToolChoice {
    pub fn auto() -> Self {
        ToolChoice::Mode("auto".into())
    }
}

/// Vendor-hosted tool requested by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuiltinTool {
    WebSearch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_location: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        allowed_domains: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        external_web_access: Option<bool>,
        /// DashScope `search_options.search_strategy`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_strategy: Option<String>,
    },
    CodeInterpreter {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container: Option<Value>,
    },
    FileSearch {
        #[serde(default)]
        vector_store_ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_num_results: Option<u32>,
    },
    ImageGeneration,
    Computer,
    ApplyPatch,
    Shell,
}

impl BuiltinTool {
    /// Web search with no options.
    pub fn web_search() -> Self {
        BuiltinTool::WebSearch {
            user_location: None,
            allowed_domains: None,
            external_web_access: None,
            search_strategy: None,
        }
    }

    /// Name used in a model's declared builtin-tool set.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinTool::WebSearch { .. } => "web_search",
            BuiltinTool::CodeInterpreter { .. } => "code_interpreter",
            BuiltinTool::FileSearch { .. } => "file_search",
            BuiltinTool::ImageGeneration => "image_generation",
            BuiltinTool::Computer => "computer",
            BuiltinTool::ApplyPatch => "apply_patch",
            BuiltinTool::Shell => "shell",
        }
    }
}
