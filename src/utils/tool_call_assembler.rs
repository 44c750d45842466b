use tracing::{debug, warn};

use crate::types::events::UnifiedStreamEvent;
use crate::types::message::ToolCallRef;

/// One streamed piece of a tool call, keyed by its positional index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub args: Option<String>,
}

impl ToolCallFragment {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn args(mut self, args: impl Into<String>) -> Self {
        self.args = Some(args.into());
        self
    }
}

/// Per-index assembly state.
#[derive(Debug, Clone, Default)]
pub struct ToolCallBuffer {
    pub id: Option<String>,
    pub name: Option<String>,
    pub name_sent: bool,
    /// Concatenation of every forwarded argument fragment
    pub args: String,
    /// Argument fragments received before the name was known
    held_args: String,
}

impl ToolCallBuffer {
    fn resolve_id(&mut self, index: u32) -> String {
        self.id
            .get_or_insert_with(|| format!("call_{}", index))
            .clone()
    }
}

/// Reassembles streamed tool calls, one buffer per stream index.
///
/// Forwards fragments as `tool_call` events while guaranteeing the name of an index is
/// emitted exactly once and never after that index's first argument fragment.
/// One assembler lives for exactly one `call()`.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    slots: Vec<Option<ToolCallBuffer>>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, index: u32) -> &mut ToolCallBuffer {
        let i = index as usize;
        if self.slots.len() <= i {
            self.slots.resize_with(i + 1, || None);
        }
        self.slots[i].get_or_insert_with(ToolCallBuffer::default)
    }

    pub fn get(&self, index: u32) -> Option<&ToolCallBuffer> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Absorb a fragment and append any events it releases to `out`.
    pub fn push(&mut self, fragment: ToolCallFragment, out: &mut Vec<UnifiedStreamEvent>) {
        let index = fragment.index;
        let buf = self.slot(index);

        if let Some(id) = fragment.id.filter(|s| !s.is_empty()) {
            if buf.id.is_none() {
                buf.id = Some(id);
            }
        }

        if let Some(name) = fragment.name.filter(|s| !s.is_empty()) {
            if buf.name_sent {
                if buf.name.as_deref() != Some(name.as_str()) {
                    debug!(index, "ignoring late tool name fragment");
                }
            } else {
                buf.name.get_or_insert_with(String::new).push_str(&name);
            }
        }

        if let Some(args) = fragment.args.filter(|s| !s.is_empty()) {
            buf.held_args.push_str(&args);
        }

        if buf.name.is_none() {
            // args wait for a name
            return;
        }

        if !buf.name_sent {
            buf.name_sent = true;
            let name = buf.name.clone();
            out.push(UnifiedStreamEvent::ToolCall {
                id: buf.resolve_id(index),
                index,
                name_delta: name,
                args_delta: None,
            });
        }

        if !buf.held_args.is_empty() {
            let args = std::mem::take(&mut buf.held_args);
            buf.args.push_str(&args);
            out.push(UnifiedStreamEvent::ToolCall {
                id: buf.resolve_id(index),
                index,
                name_delta: None,
                args_delta: Some(args),
            });
        }
    }

    /// Close an index; called when the vendor ends that call.
    ///
    /// Arguments still held at this point never received a name. They cannot be announced
    /// without one, so they are discarded.
    pub fn finish_index(&mut self, index: u32, _out: &mut Vec<UnifiedStreamEvent>) {
        let Some(buf) = self.slots.get_mut(index as usize).and_then(Option::as_mut) else {
            return;
        };
        buf.resolve_id(index);
        if !buf.held_args.is_empty() {
            warn!(index, dropped = buf.held_args.len(), "tool call closed without a name; dropping arguments");
            buf.held_args.clear();
        }
    }

    /// Flush every open index.
    pub fn finish_all(&mut self, out: &mut Vec<UnifiedStreamEvent>) {
        for i in 0..self.slots.len() {
            self.finish_index(i as u32, out);
        }
    }

    /// Completed tool calls in index order. Calls that never got a name are left out.
    pub fn finalize(self) -> Vec<ToolCallRef> {
        self.slots
            .into_iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let mut buf = slot?;
                let name = buf.name.take()?;
                let id = buf.resolve_id(i as u32);
                let args = if buf.args.trim().is_empty() {
                    "{}".to_string()
                } else {
                    buf.args
                };
                Some(ToolCallRef::new(id, name, args))
            })
            .collect()
    }
}
