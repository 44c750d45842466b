//! Unified streaming events emitted by every adapter

use serde::{Deserialize, Serialize};

use super::usage::StreamUsage;

/// Unified streaming event enum.
///
/// A stream ends after exactly one `Finish` or one `Error`, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedStreamEvent {
    /// Answer text delta
    Content {
        delta: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },

    /// Reasoning text delta
    Thinking { delta: String },

    /// Tool call fragment; `name_delta` appears at most once per index
    ToolCall {
        id: String,
        index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name_delta: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args_delta: Option<String>,
    },

    /// Normal end of stream
    Finish {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<StreamUsage>,
    },

    /// Terminal failure
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<ErrorCause>,
    },

    /// Vendor lifecycle payload (e.g. response created)
    System { payload: serde_json::Value },
}

/// Structured cause attached to a terminal error event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCause {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl UnifiedStreamEvent {
    pub fn content(delta: impl Into<String>) -> Self {
        UnifiedStreamEvent::Content {
            delta: delta.into(),
            role: None,
        }
    }

    pub fn thinking(delta: impl Into<String>) -> Self {
        UnifiedStreamEvent::Thinking {
            delta: delta.into(),
        }
    }

    pub fn finish(reason: impl Into<String>, usage: Option<StreamUsage>) -> Self {
        UnifiedStreamEvent::Finish {
            reason: reason.into(),
            usage,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        UnifiedStreamEvent::Error {
            message: message.into(),
            cause: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnifiedStreamEvent::Finish { .. } | UnifiedStreamEvent::Error { .. }
        )
    }
}

impl From<&crate::Error> for UnifiedStreamEvent {
    fn from(err: &crate::Error) -> Self {
        UnifiedStreamEvent::Error {
            message: err.message(),
            cause: Some(ErrorCause {
                kind: err.class().to_string(),
                status: err.status(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let ev = UnifiedStreamEvent::ToolCall {
            id: "call_0".into(),
            index: 0,
            name_delta: Some("lookup".into()),
            args_delta: None,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "tool_call");
        assert_eq!(v["name_delta"], "lookup");
        assert!(v.get("args_delta").is_none());
    }

    #[test]
    fn test_error_event_from_vendor_error() {
        let err = crate::Error::vendor(401, "invalid key");
        let ev = UnifiedStreamEvent::from(&err);
        assert!(ev.is_terminal());
        match ev {
            UnifiedStreamEvent::Error { message, cause } => {
                assert_eq!(message, "invalid key");
                let cause = cause.unwrap();
                assert_eq!(cause.kind, "authentication");
                assert_eq!(cause.status, Some(401));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
