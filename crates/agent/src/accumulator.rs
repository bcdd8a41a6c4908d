//! Reassembles complete tool calls from streamed fragments.
//!
//! Providers deliver tool invocations in pieces: the first fragment for an
//! index usually carries the call id and tool name, later ones append slices
//! of the JSON arguments string. The accumulator keys partial calls by index,
//! concatenates argument slices in arrival order, and defers all validation
//! to round termination — a half-streamed `{"medication_id": ` is not an
//! error until the round ends and it still doesn't parse.

use std::collections::BTreeMap;

use uuid::Uuid;

use apotheca_core::stream::ToolCallFragment;

/// Per-index partial call state.
#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// A call reassembled at round termination.
#[derive(Debug, Clone)]
pub struct AccumulatedCall {
    pub index: u32,
    pub id: String,
    pub name: String,

    /// The concatenated arguments string exactly as streamed.
    pub raw_arguments: String,

    /// Parsed arguments, or `None` when the string never became a valid
    /// JSON object — the dispatcher substitutes `invalid_arguments` then.
    pub arguments: Option<serde_json::Value>,
}

/// Accumulates [`ToolCallFragment`]s for one round.
#[derive(Debug, Default)]
pub struct FragmentAccumulator {
    entries: BTreeMap<u32, PartialCall>,
}

impl FragmentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one fragment. Fragments must arrive in stream order; the name
    /// is taken from the first fragment that carries one and later names for
    /// the same index are ignored.
    pub fn absorb(&mut self, fragment: &ToolCallFragment) {
        let entry = self.entries.entry(fragment.index).or_default();
        if entry.id.is_none() {
            entry.id = fragment.id.clone();
        }
        if entry.name.is_none() {
            entry.name = fragment.name.clone();
        }
        if let Some(args) = &fragment.arguments {
            entry.arguments.push_str(args);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Indexes whose argument strings currently parse as a complete JSON
    /// object. Useful for observing progress mid-stream; membership can only
    /// grow as more fragments arrive for other indexes.
    pub fn complete_indexes(&self) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|(_, partial)| parse_arguments(&partial.arguments).is_some())
            .map(|(index, _)| *index)
            .collect()
    }

    /// Consume the accumulator, producing calls in index order.
    ///
    /// Calls the provider never gave an id are assigned a generated
    /// `call_<uuid>` so results can always back-reference them.
    pub fn finish(self) -> Vec<AccumulatedCall> {
        self.entries
            .into_iter()
            .map(|(index, partial)| {
                let arguments = parse_arguments(&partial.arguments);
                AccumulatedCall {
                    index,
                    id: partial
                        .id
                        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple())),
                    name: partial.name.unwrap_or_default(),
                    raw_arguments: partial.arguments,
                    arguments,
                }
            })
            .collect()
    }
}

/// Parse an accumulated arguments string into a JSON object.
///
/// An empty string means the tool takes no arguments — `{}` per the chat
/// tool-calling convention. Valid JSON that is not an object is rejected.
fn parse_arguments(raw: &str) -> Option<serde_json::Value> {
    if raw.trim().is_empty() {
        return Some(serde_json::json!({}));
    }
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .filter(|v| v.is_object())
}
