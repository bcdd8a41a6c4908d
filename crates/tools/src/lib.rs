//! Pharmacy tool implementations for apotheca.
//!
//! The seven tools the model can call: catalog lookups, inventory checks,
//! customer identity, and the two ticket-creating workflows (prescription
//! requests and inventory reservations). All of them are deterministic
//! functions over the store; `reserve_inventory` is the one that mutates
//! stock and it does so through the store's atomic reservation.
//!
//! Output conventions (what the model branches on):
//! - lookups:  `{found, <record>|null, alternatives[], error|null}`
//! - statuses: `{<result fields>, error|null}`
//! - mutators: `{success, <id>|null, error|null}`
//!
//! `error` values are short machine-readable codes (`not_found`,
//! `ambiguous`, `insufficient_stock`, `authentication_required`, ...) —
//! never free text.

pub mod catalog;
pub mod inventory;
pub mod tickets;
pub mod users;

use apotheca_core::tool::ToolRegistry;
use apotheca_store::Store;

/// Create the registry of all pharmacy tools, built once at process start.
pub fn pharmacy_registry(store: &Store) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(catalog::MedicationLookupTool::new(store.clone())));
    registry.register(Box::new(catalog::PrescriptionRequirementTool::new(store.clone())));
    registry.register(Box::new(inventory::CheckInventoryTool::new(store.clone())));
    registry.register(Box::new(inventory::ReserveInventoryTool::new(store.clone())));
    registry.register(Box::new(users::UserByPhoneTool::new(store.clone())));
    registry.register(Box::new(users::CurrentUserTool::new(store.clone())));
    registry.register(Box::new(tickets::PrescriptionRequestTool::new(store.clone())));
    registry
}
