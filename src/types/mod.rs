//! 类型系统模块：统一的消息、事件、工具与用量数据契约。
//!
//! # Types Module
//!
//! Shared data contracts every translator and adapter reads or writes.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`UnifiedMessage`] | Chat message with role, content and tool-call history |
//! | [`UnifiedStreamEvent`] | The single event vocabulary emitted by all adapters |
//! | [`StreamUsage`] | Token accounting attached to `finish` |
//! | [`UnifiedRequest`] | Vendor-agnostic request handed to translators |
//! | [`ModelConfig`] | Per-model capability descriptor |
//! | [`ToolDefinition`] / [`BuiltinTool`] | Caller functions and vendor-hosted tools |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_adapters::types::{ModelConfig, ParameterId, UnifiedMessage, UnifiedRequest};
//!
//! let model = ModelConfig::new("gpt-4o").with_parameters([ParameterId::Temperature]);
//! let request = UnifiedRequest::new(
//!     model,
//!     vec![
//!         UnifiedMessage::system("You are a helpful assistant"),
//!         UnifiedMessage::user("What's the weather?"),
//!     ],
//! );
//! assert!(request.validate_messages().is_ok());
//! ```

pub mod events;
pub mod message;
pub mod model;
pub mod request;
pub mod tool;
pub mod usage;

pub use events::{ErrorCause, UnifiedStreamEvent};
pub use message::{
    ContentPart, FunctionCall, ImageUrl, MessageContent, MessageRole, ToolCallRef, UnifiedMessage,
};
pub use model::{ApiType, ModelCatalog, ModelConfig, ModelInfo, ParameterId};
pub use request::{
    AnthropicOptions, CommonSettings, Effort, ReasoningIntent, ResponsesOptions,
    StructuredOutput, UnifiedRequest, VendorExtensions,
};
pub use tool::{BuiltinTool, ToolChoice, ToolDefinition};
pub use usage::{StreamUsage, UsageMode};
