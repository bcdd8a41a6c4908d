//! Inventory tools: stock checks and the atomic reservation.

use async_trait::async_trait;
use tracing::info;

use apotheca_core::error::ToolError;
use apotheca_core::tool::{SideEffect, Tool, ToolContext};
use apotheca_store::{ReserveOutcome, Store};

/// Classify a raw quantity for customer-facing availability.
fn inventory_status(quantity: i64) -> &'static str {
    if quantity <= 0 {
        "out"
    } else if quantity < 5 {
        "low"
    } else {
        "in_stock"
    }
}

/// Check stock availability for a medication, optionally at one store.
pub struct CheckInventoryTool {
    store: Store,
}

impl CheckInventoryTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CheckInventoryTool {
    fn name(&self) -> &str {
        "check_inventory"
    }

    fn description(&self) -> &str {
        "Check stock availability for a medication, optionally for a specific store."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "medication_id": { "type": "string" },
                "store_name": { "type": "string", "description": "Optional store name." }
            },
            "required": ["medication_id"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let medication_id = arguments["medication_id"].as_str().unwrap_or("").trim();
        if medication_id.is_empty() {
            return Ok(serde_json::json!({ "results": [], "error": "missing_medication_id" }));
        }

        let store_name = arguments["store_name"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let levels = self
            .store
            .inventory_for(medication_id, store_name)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        if levels.is_empty() && store_name.is_some() {
            return Ok(serde_json::json!({ "results": [], "error": "unknown_store_or_no_record" }));
        }

        let results: Vec<serde_json::Value> = levels
            .iter()
            .map(|level| {
                serde_json::json!({
                    "store_name": level.store_name,
                    "quantity": level.quantity,
                    "status": inventory_status(level.quantity),
                })
            })
            .collect();
        Ok(serde_json::json!({ "results": results }))
    }
}

/// Reserve inventory for pickup — the one tool that mutates stock.
///
/// Requires an authenticated user; the decrement and the reservation ticket
/// are a single store transaction, so a partial reservation cannot exist.
pub struct ReserveInventoryTool {
    store: Store,
}

impl ReserveInventoryTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReserveInventoryTool {
    fn name(&self) -> &str {
        "reserve_inventory"
    }

    fn description(&self) -> &str {
        "Reserve inventory for pickup at a specific store. Decrements stock if successful."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "medication_id": { "type": "string" },
                "store_name": { "type": "string" },
                "quantity": { "type": "integer", "minimum": 1 }
            },
            "required": ["medication_id", "store_name", "quantity"],
            "additionalProperties": false
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::Mutating
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let medication_id = arguments["medication_id"].as_str().unwrap_or("").trim();
        let store_name = arguments["store_name"].as_str().unwrap_or("").trim();
        let quantity = arguments["quantity"].as_i64().unwrap_or(0);

        if medication_id.is_empty() || store_name.is_empty() || quantity <= 0 {
            return Ok(serde_json::json!({
                "success": false, "reservation_id": null, "error": "missing_required_fields"
            }));
        }

        let Some(user_id) = ctx.user_id.as_deref() else {
            return Ok(serde_json::json!({
                "success": false, "reservation_id": null, "error": "authentication_required"
            }));
        };

        let outcome = self
            .store
            .reserve_inventory(medication_id, store_name, quantity, user_id)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        Ok(match outcome {
            ReserveOutcome::Reserved { reservation_id } => {
                info!(medication_id, store_name, quantity, "Reservation created");
                serde_json::json!({ "success": true, "reservation_id": reservation_id })
            }
            ReserveOutcome::InsufficientStock => serde_json::json!({
                "success": false, "reservation_id": null, "error": "insufficient_stock"
            }),
            ReserveOutcome::NotFound => serde_json::json!({
                "success": false, "reservation_id": null, "error": "store_or_item_not_found"
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apotheca_store::{NewMedication, NewUser, RxClass};

    async fn store_with_stock(quantity: i64) -> (Store, String, String) {
        let store = Store::open_in_memory().await.unwrap();
        let med_id = store
            .insert_medication(NewMedication {
                name: "Omeprazole".into(),
                name_he: "אומפרזול".into(),
                active_ingredients: vec!["omeprazole".into()],
                form: "capsule".into(),
                strength: "20 mg".into(),
                manufacturer: "Synthetic Pharma".into(),
                otc_or_rx: RxClass::Otc,
                label_instructions: "Swallow whole.".into(),
                warnings: "Keep out of reach of children.".into(),
            })
            .await
            .unwrap();
        store
            .insert_inventory(&med_id, "S-TA", "Tel Aviv - Dizengoff", quantity)
            .await
            .unwrap();
        let user_id = store
            .insert_user(NewUser {
                full_name: "Lior Bar".into(),
                phone: "+972501000009".into(),
                preferred_language: "en".into(),
                loyalty_id: None,
            })
            .await
            .unwrap();
        (store, med_id, user_id)
    }

    #[test]
    fn status_thresholds() {
        assert_eq!(inventory_status(0), "out");
        assert_eq!(inventory_status(4), "low");
        assert_eq!(inventory_status(5), "in_stock");
        assert_eq!(inventory_status(30), "in_stock");
    }

    #[tokio::test]
    async fn check_inventory_reports_levels() {
        let (store, med_id, _) = store_with_stock(2).await;
        let tool = CheckInventoryTool::new(store);
        let result = tool
            .execute(
                serde_json::json!({"medication_id": med_id}),
                &ToolContext::anonymous(),
            )
            .await
            .unwrap();
        let results = result["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["quantity"], 2);
        assert_eq!(results[0]["status"], "low");
    }

    #[tokio::test]
    async fn check_inventory_unknown_store_errors() {
        let (store, med_id, _) = store_with_stock(2).await;
        let tool = CheckInventoryTool::new(store);
        let result = tool
            .execute(
                serde_json::json!({"medication_id": med_id, "store_name": "Eilat - Marina"}),
                &ToolContext::anonymous(),
            )
            .await
            .unwrap();
        assert_eq!(result["error"], "unknown_store_or_no_record");
    }

    #[tokio::test]
    async fn check_inventory_missing_id() {
        let (store, _, _) = store_with_stock(2).await;
        let tool = CheckInventoryTool::new(store);
        let result = tool
            .execute(serde_json::json!({}), &ToolContext::anonymous())
            .await
            .unwrap();
        assert_eq!(result["error"], "missing_medication_id");
    }

    #[tokio::test]
    async fn reserve_success_then_exhaustion() {
        let (store, med_id, user_id) = store_with_stock(1).await;
        let tool = ReserveInventoryTool::new(store);
        let ctx = ToolContext::authenticated(user_id);
        let args = serde_json::json!({
            "medication_id": med_id,
            "store_name": "Tel Aviv - Dizengoff",
            "quantity": 1
        });

        let first = tool.execute(args.clone(), &ctx).await.unwrap();
        assert_eq!(first["success"], true);
        assert!(first["reservation_id"].is_string());

        let second = tool.execute(args, &ctx).await.unwrap();
        assert_eq!(second["success"], false);
        assert_eq!(second["error"], "insufficient_stock");
    }

    #[tokio::test]
    async fn reserve_requires_authentication() {
        let (store, med_id, _) = store_with_stock(1).await;
        let tool = ReserveInventoryTool::new(store);
        let result = tool
            .execute(
                serde_json::json!({
                    "medication_id": med_id,
                    "store_name": "Tel Aviv - Dizengoff",
                    "quantity": 1
                }),
                &ToolContext::anonymous(),
            )
            .await
            .unwrap();
        assert_eq!(result["error"], "authentication_required");
    }

    #[tokio::test]
    async fn reserve_rejects_non_positive_quantity() {
        let (store, med_id, user_id) = store_with_stock(3).await;
        let tool = ReserveInventoryTool::new(store);
        let result = tool
            .execute(
                serde_json::json!({
                    "medication_id": med_id,
                    "store_name": "Tel Aviv - Dizengoff",
                    "quantity": 0
                }),
                &ToolContext::authenticated(user_id),
            )
            .await
            .unwrap();
        assert_eq!(result["error"], "missing_required_fields");
    }

    #[tokio::test]
    async fn reserve_is_mutating() {
        let (store, _, _) = store_with_stock(1).await;
        assert_eq!(ReserveInventoryTool::new(store).side_effect(), SideEffect::Mutating);
    }
}
