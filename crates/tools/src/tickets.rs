//! Prescription request tickets.

use async_trait::async_trait;
use tracing::info;

use apotheca_core::error::ToolError;
use apotheca_core::tool::{SideEffect, Tool, ToolContext};
use apotheca_store::{NewTicket, Store, TicketType};

/// Create a prescription fulfillment/request ticket for a user and
/// medication. No medical advice — this only records the workflow.
pub struct PrescriptionRequestTool {
    store: Store,
}

impl PrescriptionRequestTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for PrescriptionRequestTool {
    fn name(&self) -> &str {
        "create_prescription_request"
    }

    fn description(&self) -> &str {
        "Create a prescription fulfillment/request ticket for a user and medication (no medical advice)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "medication_id": { "type": "string" },
                "pickup_store": { "type": "string" }
            },
            "required": ["user_id", "medication_id"],
            "additionalProperties": false
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::Mutating
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let user_id = arguments["user_id"].as_str().unwrap_or("").trim();
        let medication_id = arguments["medication_id"].as_str().unwrap_or("").trim();
        let pickup_store = arguments["pickup_store"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if user_id.is_empty() || medication_id.is_empty() {
            return Ok(serde_json::json!({
                "success": false, "request_id": null, "error": "missing_required_fields"
            }));
        }

        let user = self
            .store
            .user_by_id(user_id)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;
        if user.is_none() {
            return Ok(serde_json::json!({
                "success": false, "request_id": null, "error": "unknown_user"
            }));
        }

        let med = self
            .store
            .medication_by_id(medication_id)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;
        if med.is_none() {
            return Ok(serde_json::json!({
                "success": false, "request_id": null, "error": "unknown_medication"
            }));
        }

        let request_id = self
            .store
            .insert_ticket(NewTicket {
                ticket_type: TicketType::PrescriptionRequest,
                user_id: Some(user_id.into()),
                medication_id: Some(medication_id.into()),
                store_name: pickup_store.map(String::from),
                payload: serde_json::json!({ "pickup_store": pickup_store }),
            })
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        info!(user_id, medication_id, request_id = %request_id, "Prescription request created");
        Ok(serde_json::json!({ "success": true, "request_id": request_id }))
    }
}
