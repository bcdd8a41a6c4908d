//! # Apotheca Core
//!
//! Domain types, traits, and error definitions for the apotheca pharmacy
//! agent service. This crate has **zero framework dependencies** — it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The two seams of the system are defined as traits here: the completion
//! provider (`Provider`) and the tools (`Tool`). Implementations live in
//! their respective crates. This enables:
//! - Testing the agent loop with scripted fake providers and stub tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod stream;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use message::{Conversation, Message, MessageToolCall, Role};
pub use stream::{
    CompletionRequest, EventStream, Provider, StreamEvent, Termination, ToolCallFragment,
    ToolDefinition,
};
pub use tool::{SideEffect, Tool, ToolCall, ToolContext, ToolRegistry, ToolResult};
