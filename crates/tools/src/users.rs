//! Identity tools: phone lookup and the authenticated current user.

use async_trait::async_trait;

use apotheca_core::error::ToolError;
use apotheca_core::tool::{Tool, ToolContext};
use apotheca_store::Store;

/// Keep `+` and digits only — the canonical stored phone format.
fn normalize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}

/// Look up a user by phone number to continue prescription workflows.
pub struct UserByPhoneTool {
    store: Store,
}

impl UserByPhoneTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UserByPhoneTool {
    fn name(&self) -> &str {
        "get_user_by_phone"
    }

    fn description(&self) -> &str {
        "Look up a user by phone number to continue prescription workflows."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "phone": { "type": "string" }
            },
            "required": ["phone"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let phone = arguments["phone"].as_str().unwrap_or("").trim();
        if phone.len() < 7 {
            return Ok(serde_json::json!({
                "found": false, "user": null, "error": "invalid_phone"
            }));
        }

        let user = self
            .store
            .user_by_phone(&normalize_phone(phone))
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        Ok(match user {
            Some(user) => serde_json::json!({
                "found": true,
                "user": {
                    "id": user.id,
                    "full_name": user.full_name,
                    "preferred_language": user.preferred_language,
                }
            }),
            None => serde_json::json!({ "found": false, "user": null }),
        })
    }
}

/// Resolve the currently authenticated user.
///
/// Identity comes from the request context, never from model-supplied
/// arguments — the model uses this instead of asking for a phone number.
pub struct CurrentUserTool {
    store: Store,
}

impl CurrentUserTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CurrentUserTool {
    fn name(&self) -> &str {
        "get_current_user"
    }

    fn description(&self) -> &str {
        "Get information about the currently authenticated user. Use this for prescription requests instead of asking for phone number."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let Some(user_id) = ctx.user_id.as_deref() else {
            return Ok(serde_json::json!({
                "found": false, "user": null, "error": "authentication_required"
            }));
        };

        let user = self
            .store
            .user_by_id(user_id)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        Ok(match user {
            Some(user) => serde_json::json!({
                "found": true,
                "user": {
                    "id": user.id,
                    "full_name": user.full_name,
                    "phone": user.phone,
                    "preferred_language": user.preferred_language,
                }
            }),
            None => serde_json::json!({ "found": false, "user": null, "error": "unknown_user" }),
        })
    }
}
