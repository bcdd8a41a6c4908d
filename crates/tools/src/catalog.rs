//! Catalog tools: medication name resolution and prescription requirement.

use async_trait::async_trait;
use tracing::debug;

use apotheca_core::error::ToolError;
use apotheca_core::tool::{Tool, ToolContext};
use apotheca_store::{normalize, Medication, Store};

/// Resolve a user-provided medication name to a catalog record.
///
/// Matching order mirrors how customers actually type names: a handful of
/// local brand aliases first, then exact case-insensitive match on the
/// English or Hebrew name, then substring search. Anything that resolves to
/// more than one record is reported as `ambiguous` with "Name Strength"
/// alternatives so the model can ask the user to narrow down.
pub struct MedicationLookupTool {
    store: Store,
}

impl MedicationLookupTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

/// Common local brand names mapped onto catalog names.
fn apply_alias(normalized: &str) -> &str {
    match normalized {
        "dexamol" => "paracetamol",
        "דקסמול" => "פרצטמול",
        other => other,
    }
}

fn medication_payload(m: &Medication) -> serde_json::Value {
    serde_json::json!({
        "id": m.id,
        "name": m.name,
        "name_he": m.name_he,
        "active_ingredients": m.active_ingredients,
        "form": m.form,
        "strength": m.strength,
        "manufacturer": m.manufacturer,
        "otc_or_rx": m.otc_or_rx.as_str(),
        "label_instructions": m.label_instructions,
        "warnings": m.warnings,
    })
}

#[async_trait]
impl Tool for MedicationLookupTool {
    fn name(&self) -> &str {
        "get_medication_by_name"
    }

    fn description(&self) -> &str {
        "Resolve a user-provided medication name (English/Hebrew) to a medication record in the catalog."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Medication name query (EN/HE)." }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let query = arguments["query"].as_str().unwrap_or("").trim();
        if query.is_empty() {
            return Ok(serde_json::json!({
                "found": false, "medication": null, "alternatives": [], "error": "empty_query"
            }));
        }

        let qn = normalize(query);
        let qn = apply_alias(&qn);

        let exact = self
            .store
            .medications_by_exact_name(qn)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;
        if exact.len() == 1 {
            return Ok(serde_json::json!({
                "found": true,
                "medication": medication_payload(&exact[0]),
                "alternatives": [],
            }));
        }

        // Zero or several exact hits: fall back to substring search.
        let matches = self
            .store
            .medications_by_name_like(qn)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        debug!(query = %qn, matches = matches.len(), "Medication lookup");

        if matches.is_empty() {
            return Ok(serde_json::json!({
                "found": false, "medication": null, "alternatives": [], "error": "not_found"
            }));
        }
        if matches.len() > 1 {
            let alternatives: Vec<String> = matches
                .iter()
                .map(|m| format!("{} {}", m.name, m.strength))
                .collect();
            return Ok(serde_json::json!({
                "found": false,
                "medication": null,
                "alternatives": alternatives,
                "error": "ambiguous",
            }));
        }

        Ok(serde_json::json!({
            "found": true,
            "medication": medication_payload(&matches[0]),
            "alternatives": [],
        }))
    }
}

/// Return whether a medication requires a prescription (Rx) or is OTC.
pub struct PrescriptionRequirementTool {
    store: Store,
}

impl PrescriptionRequirementTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for PrescriptionRequirementTool {
    fn name(&self) -> &str {
        "check_prescription_requirement"
    }

    fn description(&self) -> &str {
        "Return whether a medication requires a prescription (Rx) or is OTC."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "medication_id": { "type": "string" }
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
            return Ok(serde_json::json!({
                "requires_prescription": null, "notes": "", "error": "missing_medication_id"
            }));
        }

        let med = self
            .store
            .medication_by_id(medication_id)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        let Some(med) = med else {
            return Ok(serde_json::json!({
                "requires_prescription": null, "notes": "", "error": "not_found"
            }));
        };

        let requires = med.otc_or_rx == apotheca_store::RxClass::Rx;
        let notes = if requires {
            "Prescription required (Rx)."
        } else {
            "Over-the-counter (OTC)."
        };
        Ok(serde_json::json!({
            "requires_prescription": requires,
            "notes": notes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apotheca_store::seed::seed_if_empty;

    async fn seeded_store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        seed_if_empty(&store).await.unwrap();
        store
    }

    #[tokio::test]
    async fn lookup_unique_name_finds_record() {
        let tool = MedicationLookupTool::new(seeded_store().await);
        let result = tool
            .execute(serde_json::json!({"query": "Paracetamol"}), &ToolContext::anonymous())
            .await
            .unwrap();
        assert_eq!(result["found"], true);
        assert_eq!(result["medication"]["name"], "Paracetamol");
        assert_eq!(result["medication"]["otc_or_rx"], "otc");
    }

    #[tokio::test]
    async fn lookup_two_strengths_is_ambiguous() {
        let tool = MedicationLookupTool::new(seeded_store().await);
        let result = tool
            .execute(serde_json::json!({"query": "ibuprofen"}), &ToolContext::anonymous())
            .await
            .unwrap();
        assert_eq!(result["found"], false);
        assert_eq!(result["error"], "ambiguous");
        let alternatives: Vec<String> =
            serde_json::from_value(result["alternatives"].clone()).unwrap();
        assert_eq!(alternatives, vec!["Ibuprofen 200mg", "Ibuprofen 400mg"]);
    }

    #[tokio::test]
    async fn lookup_brand_alias_resolves() {
        let tool = MedicationLookupTool::new(seeded_store().await);
        let result = tool
            .execute(serde_json::json!({"query": "Dexamol"}), &ToolContext::anonymous())
            .await
            .unwrap();
        assert_eq!(result["found"], true);
        assert_eq!(result["medication"]["name"], "Paracetamol");
    }

    #[tokio::test]
    async fn lookup_hebrew_name() {
        let tool = MedicationLookupTool::new(seeded_store().await);
        let result = tool
            .execute(serde_json::json!({"query": "אמוקסיצילין"}), &ToolContext::anonymous())
            .await
            .unwrap();
        assert_eq!(result["found"], true);
        assert_eq!(result["medication"]["name"], "Amoxicillin");
    }

    #[tokio::test]
    async fn lookup_unknown_name_not_found() {
        let tool = MedicationLookupTool::new(seeded_store().await);
        let result = tool
            .execute(serde_json::json!({"query": "unobtainium"}), &ToolContext::anonymous())
            .await
            .unwrap();
        assert_eq!(result["found"], false);
        assert_eq!(result["error"], "not_found");
    }

    #[tokio::test]
    async fn lookup_empty_query() {
        let tool = MedicationLookupTool::new(seeded_store().await);
        let result = tool
            .execute(serde_json::json!({"query": "  "}), &ToolContext::anonymous())
            .await
            .unwrap();
        assert_eq!(result["error"], "empty_query");
    }

    #[tokio::test]
    async fn rx_requirement_for_antibiotic() {
        let store = seeded_store().await;
        let med = &store.medications_by_exact_name("Amoxicillin").await.unwrap()[0];

        let tool = PrescriptionRequirementTool::new(store.clone());
        let result = tool
            .execute(
                serde_json::json!({"medication_id": med.id}),
                &ToolContext::anonymous(),
            )
            .await
            .unwrap();
        assert_eq!(result["requires_prescription"], true);
        assert!(result["notes"].as_str().unwrap().contains("Rx"));
    }

    #[tokio::test]
    async fn rx_requirement_unknown_medication() {
        let tool = PrescriptionRequirementTool::new(seeded_store().await);
        let result = tool
            .execute(
                serde_json::json!({"medication_id": "no-such-id"}),
                &ToolContext::anonymous(),
            )
            .await
            .unwrap();
        assert_eq!(result["requires_prescription"], serde_json::Value::Null);
        assert_eq!(result["error"], "not_found");
    }
}
