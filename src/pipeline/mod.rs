//! 流水线处理模块：把厂商的字节流解码为统一事件序列。
//!
//! # Streaming Pipeline
//!
//! ```text
//! Raw Bytes → SseDecoder → FrameMapper (per adapter) → Unified Events
//!     │            │               │
//!   HTTP       JSON frames   content / thinking / tool_call / finish / error
//! ```
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`decode::SseDecoder`] | Splits SSE frames, strips field prefixes, skips malformed frames |
//! | [`event_map::FrameMapper`] | Vendor-specific per-call frame translation |
//! | [`event_map::drive_sse`] | Lazy driver enforcing the single-terminal-event rule |
//! | [`cancel`] | External cancellation of a running stream |

pub mod cancel;
pub mod decode;
pub mod event_map;

pub use cancel::{with_cancel, CancelHandle};
pub use decode::SseDecoder;
pub use event_map::{drive_sse, FrameMapper, OpenFuture};
