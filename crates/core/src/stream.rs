//! Provider trait — the seam to the completion backend.
//!
//! A `Provider` opens one upstream streaming completion call per round and
//! yields a lazy, finite, non-restartable sequence of [`StreamEvent`]s. All
//! upstream failures — connect errors, non-200 responses, auth failures,
//! malformed payloads, mid-stream disconnects — surface as a terminal
//! [`StreamEvent::UpstreamError`] rather than an `Err` return, so the round
//! controller can always turn them into a client-visible `error` event
//! without special-casing where the failure happened.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Why the provider considers the current round finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model produced a final text answer; no further tool use.
    TextComplete,
    /// The model requested tool calls; the loop should dispatch and re-enter.
    ToolCallsRequested,
}

/// A partial piece of a tool invocation, delivered incrementally.
///
/// Fragments for the same `index` arrive in order; `name` is carried by at
/// most one fragment per index while `arguments` accumulate by string
/// concatenation until the full JSON object has been streamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    /// Position of the call within the current round.
    pub index: u32,

    /// Provider-assigned call id, typically only on the first fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Tool name, set at most once per index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Next slice of the JSON arguments string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// One event in a provider's completion stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextFragment { text: String },

    /// A partial tool invocation.
    ToolCallFragment(ToolCallFragment),

    /// The round is over; nothing follows except possibly nothing.
    RoundTerminated { reason: Termination },

    /// Terminal upstream failure. Always the last event when present.
    UpstreamError { detail: String },
}

/// A tool declaration sent to the model so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,

    /// JSON Schema describing the tool's parameters.
    pub parameters: serde_json::Value,
}

/// One streaming completion request — the current transcript plus the
/// declared tool schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.2
}

/// The stream side of one completion call.
pub type EventStream = tokio::sync::mpsc::Receiver<StreamEvent>;

/// The completion backend seam.
///
/// `open` never fails synchronously — a provider that cannot even connect
/// sends a single `UpstreamError` event and closes the channel.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Open one streaming completion call for the given request.
    async fn open(&self, request: CompletionRequest) -> EventStream;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Termination::ToolCallsRequested).unwrap(),
            r#""tool_calls_requested""#
        );
    }

    #[test]
    fn stream_event_tagged_serialization() {
        let ev = StreamEvent::TextFragment { text: "hi".into() };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""kind":"text_fragment""#));

        let ev = StreamEvent::UpstreamError {
            detail: "connection reset".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("connection reset"));
    }

    #[test]
    fn fragment_defaults_on_deserialize() {
        let frag: ToolCallFragment = serde_json::from_str(r#"{"index":2}"#).unwrap();
        assert_eq!(frag.index, 2);
        assert!(frag.id.is_none());
        assert!(frag.name.is_none());
        assert!(frag.arguments.is_none());
    }

    #[test]
    fn completion_request_default_temperature() {
        let req: CompletionRequest =
            serde_json::from_str(r#"{"model":"gpt-4o","messages":[]}"#).unwrap();
        assert!((req.temperature - 0.2).abs() < f32::EPSILON);
        assert!(req.tools.is_empty());
    }
}
