//! The client-facing event protocol.
//!
//! Four event kinds leave the loop: `delta`, `tool_status`, `error`, `done`.
//! The controlling invariant is that `done` is sent exactly once and is the
//! last event on every code path. `EventEmitter` enforces it structurally:
//! `done()` is idempotent, and the `Drop` impl emits `done` for any path
//! that abandoned the emitter — an early return, a panic unwinding through
//! the loop, anything. A client can therefore never be left hanging.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Tool execution phase reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Done,
}

/// Events streamed to the client, one SSE frame each.
///
/// The serialized payload carries a redundant `type` field so clients can
/// dispatch on the data alone, independent of the SSE event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Incremental assistant text.
    Delta { text: String },

    /// A tool started or finished executing.
    ToolStatus { tool: String, status: ToolStatus },

    /// A request-terminal failure, always followed by `done`.
    Error { message: String },

    /// Stream end. Exactly once, always last.
    Done,
}

impl ClientEvent {
    /// SSE event name for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::ToolStatus { .. } => "tool_status",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

/// Sends [`ClientEvent`]s to one client with the terminal-event guarantee.
pub struct EventEmitter {
    tx: mpsc::Sender<ClientEvent>,
    done_sent: bool,
    closed: bool,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<ClientEvent>) -> Self {
        Self {
            tx,
            done_sent: false,
            closed: false,
        }
    }

    /// Whether the client has gone away (a previous send failed).
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn send(&mut self, event: ClientEvent) -> bool {
        if self.closed || self.done_sent {
            return false;
        }
        if self.tx.send(event).await.is_err() {
            debug!("Client disconnected; dropping remaining events");
            self.closed = true;
            return false;
        }
        true
    }

    /// Forward incremental assistant text. Returns `false` once the client
    /// has disconnected so the caller can stop producing.
    pub async fn delta(&mut self, text: impl Into<String>) -> bool {
        self.send(ClientEvent::Delta { text: text.into() }).await
    }

    pub async fn tool_status(&mut self, tool: &str, status: ToolStatus) -> bool {
        self.send(ClientEvent::ToolStatus {
            tool: tool.into(),
            status,
        })
        .await
    }

    pub async fn error(&mut self, message: impl Into<String>) -> bool {
        self.send(ClientEvent::Error {
            message: message.into(),
        })
        .await
    }

    /// Send the terminal event. Idempotent; later events are swallowed.
    pub async fn done(&mut self) {
        if self.done_sent {
            return;
        }
        self.done_sent = true;
        if !self.closed {
            let _ = self.tx.send(ClientEvent::Done).await;
        }
    }
}

impl Drop for EventEmitter {
    fn drop(&mut self) {
        // Backstop for abandoned paths (early return, panic unwind): the
        // client still gets its terminal event.
        if !self.done_sent && !self.closed {
            let _ = self.tx.try_send(ClientEvent::Done);
        }
    }
}
