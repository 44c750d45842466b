//! # ai-lib-adapters
//!
//! 多厂商对话流式协议归一化层：把各家厂商的请求参数与流式响应统一为同一套事件序列。
//!
//! Provider adapter layer that normalizes heterogeneous vendor chat-completion
//! streaming protocols into one unified event sequence.
//!
//! ## Overview
//!
//! A caller builds one [`UnifiedRequest`], resolves an adapter for a provider id and
//! consumes an [`EventStream`] of [`UnifiedStreamEvent`]s. Every stream ends with
//! exactly one `finish` or one `error` event, no matter how the vendor frames its
//! output (delta arrays, typed events, content blocks or submit-then-poll tasks).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use ai_lib_adapters::{default_registry, ModelConfig, ProviderConfig, UnifiedMessage, UnifiedRequest};
//!
//! #[tokio::main]
//! async fn main() -> ai_lib_adapters::Result<()> {
//!     let config = ProviderConfig::new("sk-...");
//!     let request = UnifiedRequest::new(
//!         ModelConfig::new("deepseek-chat"),
//!         vec![UnifiedMessage::user("Hello, how are you?")],
//!     );
//!
//!     let mut events = default_registry().call("deepseek", request, &config).await?;
//!     while let Some(event) = events.next().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Unified messages, requests, events, tools and usage |
//! | [`reasoning`] | Maps a reasoning intent onto a model's vendor fields |
//! | [`utils`] | Tool-call fragment assembly |
//! | [`sanitize`] | Per-vendor body patching and retry-without-tools policy |
//! | [`drivers`] | Parameter translators and protocol adapters per wire dialect |
//! | [`pipeline`] | SSE decoding, frame mapping and cancellation |
//! | [`registry`] | Provider id to adapter routing |
//! | [`poller`] | Submit-then-poll task state machine |
//! | [`transport`] | Shared HTTP client |

pub mod config;
pub mod drivers;
pub mod pipeline;
pub mod poller;
pub mod reasoning;
pub mod registry;
pub mod sanitize;
pub mod transport;
pub mod types;
pub mod utils;

pub use config::ProviderConfig;
pub use drivers::{CheckResult, ParameterTranslator, ProtocolAdapter};
pub use pipeline::{with_cancel, CancelHandle};
pub use registry::{default_registry, AdapterRegistry, ProviderKind, ResolvedAdapter};
pub use types::{
    ModelConfig, StreamUsage, UnifiedMessage, UnifiedRequest, UnifiedStreamEvent, UsageMode,
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Unified event stream returned by every adapter `call`.
pub type EventStream = Pin<Box<dyn Stream<Item = UnifiedStreamEvent> + Send + 'static>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
