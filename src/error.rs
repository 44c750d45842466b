use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path that caused the error (e.g., "tools[0].vector_store_ids", "messages[2].tool_call_id")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "responses_translator", "reasoning_resolver")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the adapter layer.
///
/// `Translation` and `PolicyViolation` are raised before any request is sent.
/// `Transport` and `Vendor` surface to stream consumers as a terminal error event.
/// `StreamParse` is recovered inside the decode loop and only reaches callers of the
/// low-level decoders.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Translation error: {message}{}", format_context(.context))]
    Translation {
        message: String,
        context: ErrorContext,
    },

    #[error("Policy violation: {message}{}", format_context(.context))]
    PolicyViolation {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Vendor error: HTTP {status} ({class}): {message}")]
    Vendor {
        status: u16,
        class: String,
        message: String,
        retryable: bool,
    },

    #[error("Stream parse error: {message}{}", format_context(.context))]
    StreamParse {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    /// Submit-then-poll task that failed, was canceled or ran out of attempts
    #[error("Task error: {message}{}", format_context(.context))]
    Task {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

/// Classify an HTTP status into a stable error class.
pub(crate) fn classify_status(status: u16) -> &'static str {
    match status {
        400 | 422 => "invalid_request",
        401 => "authentication",
        403 => "permission_denied",
        404 => "not_found",
        408 => "timeout",
        413 => "request_too_large",
        429 => "rate_limited",
        529 => "overloaded",
        500..=599 => "server_error",
        _ => "unknown",
    }
}

fn is_retryable_class(class: &str) -> bool {
    matches!(
        class,
        "rate_limited" | "overloaded" | "server_error" | "timeout"
    )
}

impl Error {
    pub fn translation(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Translation {
            message: msg.into(),
            context,
        }
    }

    pub fn policy_violation(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::PolicyViolation {
            message: msg.into(),
            context,
        }
    }

    pub fn stream_parse(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::StreamParse {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn task(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Task {
            message: msg.into(),
            context,
        }
    }

    /// Build a vendor error from a non-success HTTP status and the extracted envelope message.
    pub fn vendor(status: u16, message: impl Into<String>) -> Self {
        let class = classify_status(status);
        Error::Vendor {
            status,
            class: class.to_string(),
            message: message.into(),
            retryable: is_retryable_class(class),
        }
    }

    /// Error class used in terminal error events.
    pub fn class(&self) -> &str {
        match self {
            Error::Translation { .. } => "translation",
            Error::PolicyViolation { .. } => "policy_violation",
            Error::Transport(_) => "transport",
            Error::Vendor { class, .. } => class,
            Error::StreamParse { .. } => "stream_parse",
            Error::Configuration { .. } => "configuration",
            Error::Task { .. } => "task",
            Error::Serialization(_) => "serialization",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Vendor { retryable, .. } => *retryable,
            Error::Transport(_) => true,
            _ => false,
        }
    }

    /// HTTP status for vendor errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Vendor { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message without the category prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Translation { message, .. }
            | Error::PolicyViolation { message, .. }
            | Error::StreamParse { message, .. }
            | Error::Configuration { message, .. }
            | Error::Task { message, .. }
            | Error::Vendor { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Translation { context, .. }
            | Error::PolicyViolation { context, .. }
            | Error::StreamParse { context, .. }
            | Error::Configuration { context, .. }
            | Error::Task { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_rendered_in_display() {
        let err = Error::translation(
            "file_search requires vector_store_ids",
            ErrorContext::new()
                .with_field_path("builtin_tools[0]")
                .with_source("responses_translator"),
        );
        let s = err.to_string();
        assert!(s.starts_with("Translation error: file_search requires vector_store_ids"));
        assert!(s.contains("field: builtin_tools[0]"));
        assert!(s.contains("source: responses_translator"));
    }

    #[test]
    fn test_vendor_error_classification() {
        let err = Error::vendor(429, "slow down");
        assert_eq!(err.class(), "rate_limited");
        assert!(err.is_retryable());
        assert_eq!(err.status(), Some(429));

        let err = Error::vendor(400, "bad");
        assert_eq!(err.class(), "invalid_request");
        assert!(!err.is_retryable());
        assert_eq!(err.message(), "bad");
    }
}
