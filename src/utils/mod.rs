//! Shared helpers used by several adapters.

pub mod tool_call_assembler;

pub use tool_call_assembler::{ToolCallAssembler, ToolCallBuffer, ToolCallFragment};
