//! Token usage accounting

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token usage attached to a `finish` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTokensDetails {
    pub cached_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionTokensDetails {
    pub reasoning_tokens: u64,
}

/// How a vendor reports usage over a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageMode {
    /// Each usage frame covers only its own tokens; frames are summed.
    Incremental,
    /// Each usage frame repeats the running total; the latest one wins.
    Cumulative,
    /// Usage arrives once, on the terminal frame.
    Terminal,
}

impl UsageMode {
    /// Fold one usage report into the value attached to `finish`.
    pub fn absorb(self, current: &mut Option<StreamUsage>, report: StreamUsage) {
        match self {
            UsageMode::Incremental => current.get_or_insert_with(StreamUsage::default).merge(&report),
            UsageMode::Cumulative | UsageMode::Terminal => *current = Some(report),
        }
    }
}

fn count(v: &Value, key: &str) -> u64 {
    v.get(key).and_then(Value::as_u64).unwrap_or(0)
}

impl StreamUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            ..Default::default()
        }
    }

    fn with_details(mut self, cached: u64, reasoning: u64) -> Self {
        if cached > 0 {
            self.prompt_tokens_details = Some(PromptTokensDetails {
                cached_tokens: cached,
            });
        }
        if reasoning > 0 {
            self.completion_tokens_details = Some(CompletionTokensDetails {
                reasoning_tokens: reasoning,
            });
        }
        self
    }

    /// Chat Completions usage object (`prompt_tokens` / `completion_tokens`).
    pub fn from_openai_chat(v: &Value) -> Self {
        let prompt = count(v, "prompt_tokens");
        let completion = count(v, "completion_tokens");
        let total = v
            .get("total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(prompt.saturating_add(completion));
        let cached = v
            .pointer("/prompt_tokens_details/cached_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let reasoning = v
            .pointer("/completion_tokens_details/reasoning_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
            ..Default::default()
        }
        .with_details(cached, reasoning)
    }

    /// Responses API usage object (`input_tokens` / `output_tokens`).
    pub fn from_responses(v: &Value) -> Self {
        let prompt = count(v, "input_tokens");
        let completion = count(v, "output_tokens");
        let total = v
            .get("total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(prompt.saturating_add(completion));
        let cached = v
            .pointer("/input_tokens_details/cached_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let reasoning = v
            .pointer("/output_tokens_details/reasoning_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
            ..Default::default()
        }
        .with_details(cached, reasoning)
    }

    /// Anthropic `usage` object; total is always derived.
    pub fn from_anthropic(v: &Value) -> Self {
        let cached = count(v, "cache_read_input_tokens");
        Self::new(count(v, "input_tokens"), count(v, "output_tokens")).with_details(cached, 0)
    }

    /// Additive accumulation for vendors that report usage incrementally.
    pub fn merge(&mut self, other: &StreamUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);

        if let Some(d) = &other.prompt_tokens_details {
            let cached = &mut self.prompt_tokens_details.get_or_insert_with(Default::default).cached_tokens;
            *cached = cached.saturating_add(d.cached_tokens);
        }
        if let Some(d) = &other.completion_tokens_details {
            let reasoning = &mut self
                .completion_tokens_details
                .get_or_insert_with(Default::default)
                .reasoning_tokens;
            *reasoning = reasoning.saturating_add(d.reasoning_tokens);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }
}
