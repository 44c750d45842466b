//! Provider connection settings supplied by the caller.

use serde::{Deserialize, Serialize};

/// Credentials and endpoint for one provider. Read-only to adapters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(alias = "apiKey")]
    pub api_key: String,
    #[serde(default, alias = "baseURL", alias = "baseUrl", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model used by connectivity checks instead of the vendor default
    #[serde(default, alias = "checkModel", skip_serializing_if = "Option::is_none")]
    pub check_model: Option<String>,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_check_model(mut self, model: impl Into<String>) -> Self {
        self.check_model = Some(model.into());
        self
    }

    /// Configured base URL without trailing slashes, or `default`.
    pub fn base_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }
}
