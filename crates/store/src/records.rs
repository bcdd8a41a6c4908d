//! Row types for the durable store.
//!
//! These mirror the SQLite schema one-to-one. Tools shape them into their
//! JSON output payloads; the store itself never speaks JSON to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prescription classification of a medication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RxClass {
    /// Over-the-counter
    Otc,
    /// Prescription required
    Rx,
}

impl RxClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Otc => "otc",
            Self::Rx => "rx",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "rx" => Self::Rx,
            _ => Self::Otc,
        }
    }
}

/// A catalog medication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: String,
    pub name: String,
    pub name_he: String,
    pub active_ingredients: Vec<String>,
    pub form: String,
    pub strength: String,
    pub manufacturer: String,
    pub otc_or_rx: RxClass,
    pub label_instructions: String,
    pub warnings: String,
}

/// Input for inserting a catalog medication.
#[derive(Debug, Clone)]
pub struct NewMedication {
    pub name: String,
    pub name_he: String,
    pub active_ingredients: Vec<String>,
    pub form: String,
    pub strength: String,
    pub manufacturer: String,
    pub otc_or_rx: RxClass,
    pub label_instructions: String,
    pub warnings: String,
}

/// A registered customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub phone: String,
    pub preferred_language: String,
    pub loyalty_id: Option<String>,
}

/// Input for inserting a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub full_name: String,
    pub phone: String,
    pub preferred_language: String,
    pub loyalty_id: Option<String>,
}

/// Stock level of one medication at one store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub store_id: String,
    pub store_name: String,
    pub quantity: i64,
}

/// Ticket classification — a durable record of a completed workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    PrescriptionRequest,
    InventoryReservation,
    CustomerService,
}

impl TicketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrescriptionRequest => "prescription_request",
            Self::InventoryReservation => "inventory_reservation",
            Self::CustomerService => "customer_service",
        }
    }
}

/// A fulfillment ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub ticket_type: String,
    pub user_id: Option<String>,
    pub medication_id: Option<String>,
    pub store_name: Option<String>,
    pub payload_json: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Input for inserting a ticket.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub ticket_type: TicketType,
    pub user_id: Option<String>,
    pub medication_id: Option<String>,
    pub store_name: Option<String>,
    pub payload: serde_json::Value,
}
