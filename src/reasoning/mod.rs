//! 推理参数解析：把与厂商无关的推理意图映射为具体请求字段。
//!
//! # Reasoning Resolver
//!
//! Maps a [`ReasoningIntent`] onto the concrete request fields a specific model accepts,
//! driven by that model's [`ReasoningCapability`] descriptor.
//!
//! Field placement goes through the closed [`ReasoningField`] table instead of free-form
//! dotted paths, and descriptor paths containing reserved keys are rejected at parse time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{Error, ErrorContext};
use crate::types::model::ModelConfig;
use crate::types::request::{Effort, ReasoningIntent};

/// Keys never accepted as a path segment or merged object key.
pub const RESERVED_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Reasoning control style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    /// Qualitative level ("low", "high", ...)
    Effort,
    /// Token budget
    Budget,
    /// Vendor decides; the field carries an on/off style value
    Adaptive,
}

/// Per-model reasoning capability descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningCapability {
    #[serde(default, alias = "defaultEnabled")]
    pub default_enabled: bool,
    #[serde(alias = "supportedModes")]
    pub supported_modes: Vec<ReasoningMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<LevelSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive: Option<LevelSpec>,
}

/// Option-list controlled mode (effort or adaptive).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Option value -> vendor wire value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mapping: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<ReasoningField>,
    #[serde(default, alias = "baseParams", skip_serializing_if = "Option::is_none")]
    pub base_params: Option<Value>,
}

/// Numeric budget range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSpec {
    pub min: u64,
    pub max: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<ReasoningField>,
    #[serde(default, alias = "baseParams", skip_serializing_if = "Option::is_none")]
    pub base_params: Option<Value>,
}

impl BudgetSpec {
    /// Clamp into `[min, max]` and snap to the nearest `step` above `min`.
    pub fn normalize(&self, requested: u64) -> u64 {
        let ceiling = self.max.max(self.min);
        let clamped = requested.clamp(self.min, ceiling);
        match self.step {
            Some(step) if step > 0 => {
                // u128 keeps the rounding exact near u64::MAX
                let offset = u128::from(clamped - self.min);
                let step = u128::from(step);
                let snapped = u128::from(self.min) + (offset + step / 2) / step * step;
                u64::try_from(snapped).unwrap_or(u64::MAX).min(ceiling)
            }
            _ => clamped,
        }
    }
}

/// Known placements for reasoning values in vendor request bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReasoningField {
    /// `reasoning.effort`
    ReasoningEffort,
    /// `reasoning_effort`
    ReasoningEffortFlat,
    /// `reasoning.max_tokens`
    ReasoningMaxTokens,
    /// `thinking.type`
    ThinkingType,
    /// `thinking.budget_tokens`
    ThinkingBudgetTokens,
    /// `thinking_budget`
    ThinkingBudget,
    /// `enable_thinking`
    EnableThinking,
    /// `max_completion_tokens`
    MaxCompletionTokens,
    /// `output_config.effort`
    OutputConfigEffort,
}

impl ReasoningField {
    pub fn path(&self) -> &'static [&'static str] {
        match self {
            ReasoningField::ReasoningEffort => &["reasoning", "effort"],
            ReasoningField::ReasoningEffortFlat => &["reasoning_effort"],
            ReasoningField::ReasoningMaxTokens => &["reasoning", "max_tokens"],
            ReasoningField::ThinkingType => &["thinking", "type"],
            ReasoningField::ThinkingBudgetTokens => &["thinking", "budget_tokens"],
            ReasoningField::ThinkingBudget => &["thinking_budget"],
            ReasoningField::EnableThinking => &["enable_thinking"],
            ReasoningField::MaxCompletionTokens => &["max_completion_tokens"],
            ReasoningField::OutputConfigEffort => &["output_config", "effort"],
        }
    }

    /// Default placement per mode when a descriptor names none.
    pub fn default_for(mode: ReasoningMode) -> Self {
        match mode {
            ReasoningMode::Effort => ReasoningField::ReasoningEffort,
            ReasoningMode::Budget => ReasoningField::ThinkingBudgetTokens,
            ReasoningMode::Adaptive => ReasoningField::ThinkingType,
        }
    }

    /// Write `value` at this field's path, creating intermediate objects.
    pub fn set(&self, target: &mut Map<String, Value>, value: Value) {
        let path = self.path();
        let (last, parents) = match path.split_last() {
            Some(split) => split,
            None => return,
        };
        let mut cursor = target;
        for key in parents {
            let slot = cursor
                .entry((*key).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            cursor = match slot.as_object_mut() {
                Some(obj) => obj,
                None => return,
            };
        }
        cursor.insert((*last).to_string(), value);
    }
}

impl TryFrom<String> for ReasoningField {
    type Error = String;

    fn try_from(path: String) -> Result<Self, Self::Error> {
        if let Some(seg) = path.split('.').find(|seg| RESERVED_KEYS.contains(seg)) {
            return Err(format!("reserved key '{}' in reasoning field path", seg));
        }
        match path.as_str() {
            "reasoning.effort" => Ok(ReasoningField::ReasoningEffort),
            "reasoning_effort" => Ok(ReasoningField::ReasoningEffortFlat),
            "reasoning.max_tokens" => Ok(ReasoningField::ReasoningMaxTokens),
            "thinking.type" => Ok(ReasoningField::ThinkingType),
            "thinking.budget_tokens" => Ok(ReasoningField::ThinkingBudgetTokens),
            "thinking_budget" => Ok(ReasoningField::ThinkingBudget),
            "enable_thinking" => Ok(ReasoningField::EnableThinking),
            "max_completion_tokens" => Ok(ReasoningField::MaxCompletionTokens),
            "output_config.effort" => Ok(ReasoningField::OutputConfigEffort),
            other => Err(format!("unknown reasoning field path '{}'", other)),
        }
    }
}

impl From<ReasoningField> for String {
    fn from(f: ReasoningField) -> Self {
        f.path().join(".")
    }
}

/// Deep-merge `src` into `target`; nested objects merge, everything else overwrites.
pub fn deep_merge(target: &mut Map<String, Value>, src: &Map<String, Value>) -> crate::Result<()> {
    for (key, value) in src {
        if RESERVED_KEYS.contains(&key.as_str()) {
            return Err(Error::translation(
                format!("reserved key '{}' in reasoning parameters", key),
                ErrorContext::new()
                    .with_field_path(key.clone())
                    .with_source("reasoning_resolver"),
            ));
        }
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming)?;
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(())
}

/// Concrete reasoning fields for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedReasoning {
    pub mode: ReasoningMode,
    pub field: ReasoningField,
    /// Value written at `field`
    pub value: Value,
    /// Body fragment to deep-merge into the vendor request
    pub patch: Map<String, Value>,
}

impl ResolvedReasoning {
    pub fn apply_to(&self, body: &mut Map<String, Value>) -> crate::Result<()> {
        deep_merge(body, &self.patch)
    }

    /// The effort level written, when resolved in effort mode.
    pub fn effort_level(&self) -> Option<&str> {
        match self.mode {
            ReasoningMode::Effort => self.value.as_str(),
            _ => None,
        }
    }
}

/// Resolve `intent` against `model`'s capability descriptor.
///
/// Returns `Ok(None)` when reasoning is off or the model declares no usable capability;
/// the intent is dropped rather than guessed.
pub fn resolve(
    intent: Option<&ReasoningIntent>,
    model: &ModelConfig,
) -> crate::Result<Option<ResolvedReasoning>> {
    let intent = match intent {
        Some(i) if i.enabled => i,
        _ => return Ok(None),
    };
    let cap = match &model.reasoning {
        Some(cap) if !cap.supported_modes.is_empty() => cap,
        _ => {
            debug!(model = %model.id, "model declares no reasoning capability; dropping intent");
            return Ok(None);
        }
    };

    let mode = match intent.effort_mode {
        Some(m) if cap.supported_modes.contains(&m) => m,
        _ => cap.supported_modes[0],
    };

    let (field, value, base_params) = match mode {
        ReasoningMode::Effort | ReasoningMode::Adaptive => {
            let spec = match mode {
                ReasoningMode::Effort => cap.effort.as_ref(),
                _ => cap.adaptive.as_ref(),
            };
            let Some(spec) = spec else {
                debug!(model = %model.id, ?mode, "reasoning mode declared without a spec");
                return Ok(None);
            };
            let requested = match &intent.effort {
                Some(Effort::Level(l)) if spec.options.is_empty() || spec.options.contains(l) => {
                    Some(l.clone())
                }
                _ => None,
            };
            let level = requested
                .or_else(|| spec.default.clone())
                .or_else(|| spec.options.first().cloned())
                .unwrap_or_else(|| match mode {
                    ReasoningMode::Adaptive => "adaptive".to_string(),
                    _ => "medium".to_string(),
                });
            let value = spec
                .mapping
                .get(&level)
                .cloned()
                .unwrap_or(Value::String(level));
            (
                spec.field.unwrap_or_else(|| ReasoningField::default_for(mode)),
                value,
                spec.base_params.as_ref(),
            )
        }
        ReasoningMode::Budget => {
            let Some(spec) = cap.budget.as_ref() else {
                debug!(model = %model.id, "budget mode declared without a spec");
                return Ok(None);
            };
            let requested = match &intent.effort {
                Some(Effort::Budget(n)) => *n,
                _ => spec.default.unwrap_or(spec.min),
            };
            (
                spec.field.unwrap_or_else(|| ReasoningField::default_for(mode)),
                Value::from(spec.normalize(requested)),
                spec.base_params.as_ref(),
            )
        }
    };

    let mut patch = Map::new();
    if let Some(Value::Object(base)) = base_params {
        deep_merge(&mut patch, base)?;
    }
    field.set(&mut patch, value.clone());

    Ok(Some(ResolvedReasoning {
        mode,
        field,
        value,
        patch,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn effort_model() -> ModelConfig {
        ModelConfig::new("o4-mini").with_reasoning(ReasoningCapability {
            default_enabled: false,
            supported_modes: vec![ReasoningMode::Effort],
            effort: Some(LevelSpec {
                options: vec!["low".into(), "medium".into(), "high".into()],
                default: Some("medium".into()),
                mapping: BTreeMap::new(),
                field: None,
                base_params: None,
            }),
            budget: None,
            adaptive: None,
        })
    }

    fn budget_model() -> ModelConfig {
        ModelConfig::new("claude-sonnet-4").with_reasoning(ReasoningCapability {
            default_enabled: false,
            supported_modes: vec![ReasoningMode::Budget],
            effort: None,
            budget: Some(BudgetSpec {
                min: 1024,
                max: 32000,
                step: Some(1024),
                default: Some(4096),
                field: Some(ReasoningField::ThinkingBudgetTokens),
                base_params: Some(json!({"thinking": {"type": "enabled"}})),
            }),
            adaptive: None,
        })
    }

    #[test]
    fn test_effort_mode_sets_nested_field() {
        let r = resolve(Some(&ReasoningIntent::effort("high")), &effort_model())
            .unwrap()
            .unwrap();
        assert_eq!(Value::Object(r.patch), json!({"reasoning": {"effort": "high"}}));
    }

    #[test]
    fn test_unknown_effort_falls_back_to_default() {
        let r = resolve(Some(&ReasoningIntent::effort("extreme")), &effort_model())
            .unwrap()
            .unwrap();
        assert_eq!(r.effort_level(), Some("medium"));
    }

    #[test]
    fn test_budget_clamped_snapped_and_merged_with_base() {
        let r = resolve(Some(&ReasoningIntent::budget(5000)), &budget_model())
            .unwrap()
            .unwrap();
        assert_eq!(
            Value::Object(r.patch),
            json!({"thinking": {"type": "enabled", "budget_tokens": 5120}})
        );

        let r = resolve(Some(&ReasoningIntent::budget(999_999)), &budget_model())
            .unwrap()
            .unwrap();
        assert_eq!(r.value, json!(32000));
    }

    #[test]
    fn test_budget_snap_near_u64_max() {
        let spec = BudgetSpec {
            min: 0,
            max: u64::MAX,
            step: Some(u64::MAX - 1),
            default: None,
            field: None,
            base_params: None,
        };
        assert_eq!(spec.normalize(u64::MAX), u64::MAX - 1);
        assert_eq!(spec.normalize(10), 0);
        let spec = BudgetSpec { min: u64::MAX - 3, step: Some(2), ..spec };
        assert_eq!(spec.normalize(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_unsupported_mode_uses_first_supported() {
        // effort intent on a budget-only model uses the budget default
        let r = resolve(Some(&ReasoningIntent::effort("high")), &budget_model())
            .unwrap()
            .unwrap();
        assert_eq!(r.mode, ReasoningMode::Budget);
        assert_eq!(r.value, json!(4096));
    }

    #[test]
    fn test_missing_capability_drops_intent() {
        let model = ModelConfig::new("plain");
        assert!(resolve(Some(&ReasoningIntent::effort("high")), &model)
            .unwrap()
            .is_none());
        let off = ReasoningIntent::default();
        assert!(resolve(Some(&off), &effort_model()).unwrap().is_none());
    }

    #[test]
    fn test_reserved_keys_rejected() {
        assert!(ReasoningField::try_from("__proto__.x".to_string()).is_err());
        assert!(ReasoningField::try_from("thinking.constructor".to_string()).is_err());
        assert!(ReasoningField::try_from("some.random.path".to_string()).is_err());

        let mut target = Map::new();
        let src = json!({"thinking": {"__proto__": {"polluted": true}}});
        let err = deep_merge(&mut target, src.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, Error::Translation { .. }));
    }

    #[test]
    fn test_mapping_translates_level() {
        let mut model = effort_model();
        if let Some(cap) = model.reasoning.as_mut() {
            if let Some(spec) = cap.effort.as_mut() {
                spec.mapping.insert("high".into(), json!(16000));
                spec.field = Some(ReasoningField::ThinkingBudget);
            }
        }
        let r = resolve(Some(&ReasoningIntent::effort("high")), &model)
            .unwrap()
            .unwrap();
        assert_eq!(Value::Object(r.patch), json!({"thinking_budget": 16000}));
    }
}
