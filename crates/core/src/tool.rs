//! Tool trait, registry, and dispatch.
//!
//! Tools are deterministic, schema-declared functions the model may invoke.
//! Each declares its side-effect class: most are read-only catalog/identity
//! lookups, a few mutate the durable store (reservations, tickets).
//!
//! Dispatch never fails the round: unknown tools and infrastructure failures
//! come back as structured error results the model can react to on its next
//! turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::ToolError;
use crate::stream::ToolDefinition;

/// Whether a tool only reads the store or mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    ReadOnly,
    Mutating,
}

/// A fully resolved request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the provider's tool_call id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments, already validated to be a well-formed JSON value
    pub arguments: serde_json::Value,
}

/// The result of dispatching a tool call.
///
/// `is_error` marks dispatch-level failures (unknown tool, unparsable
/// arguments, executor infrastructure failure). Recoverable domain
/// conditions — `not_found`, `insufficient_stock`, ... — live inside the
/// payload as machine-readable `error` codes and are NOT dispatch errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub payload: serde_json::Value,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            payload,
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            payload,
            is_error: true,
        }
    }

    /// The payload serialized for embedding in a tool-role message.
    pub fn payload_string(&self) -> String {
        self.payload.to_string()
    }
}

/// Request-scoped context passed to every executor.
///
/// The user id is injected out-of-band by the authenticating gateway — it is
/// never supplied by the client or the model. Identity-sensitive tools return
/// `authentication_required` when it is absent.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub user_id: Option<String>,
}

impl ToolContext {
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { user_id: None }
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "check_inventory").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Side-effect class; defaults to read-only.
    fn side_effect(&self) -> SideEffect {
        SideEffect::ReadOnly
    }

    /// Execute the tool with validated-JSON arguments.
    ///
    /// `Ok` payloads may still carry a domain `error` code for the model to
    /// branch on; `Err` is reserved for infrastructure failures (store
    /// unavailable, ...).
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, built once at process start.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the model
/// 2. Dispatch calls when the model requests them
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Dispatch one resolved call. Never fails the round.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "Model requested unknown tool");
            return ToolResult::error(
                &call.id,
                serde_json::json!({ "error": "unknown_tool", "tool": call.name }),
            );
        };

        match tool.execute(call.arguments.clone(), ctx).await {
            Ok(payload) => ToolResult::ok(&call.id, payload),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                ToolResult::error(
                    &call.id,
                    serde_json::json!({ "error": "tool_unavailable", "detail": e.to_string() }),
                )
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
