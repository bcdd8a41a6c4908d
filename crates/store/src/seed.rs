//! Development seed data.
//!
//! Mirrors the demo dataset the service ships with: a small bilingual
//! medication catalog, three stores, ten registered customers, a couple of
//! prescriptions, and one example customer-service ticket. Idempotent —
//! seeding an already-populated store is a no-op.
//!
//! The catalog deliberately carries Ibuprofen in two strengths so that a
//! bare "ibuprofen" lookup is ambiguous.

use chrono::{Duration, Utc};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use apotheca_core::error::StoreError;

use crate::records::{NewMedication, NewTicket, NewUser, RxClass, TicketType};
use crate::Store;

/// Seed the store with demo data if it holds no users yet.
pub async fn seed_if_empty(store: &Store) -> Result<(), StoreError> {
    if !store.is_empty().await? {
        return Ok(());
    }

    let users = [
        ("Rotem Cohen", "+972501000001", "he", "L-1001"),
        ("Noam Levi", "+972501000002", "he", "L-1002"),
        ("Yael Mizrahi", "+972501000003", "he", "L-1003"),
        ("Daniel Katz", "+972501000004", "en", "L-1004"),
        ("Maya Rosen", "+972501000005", "en", "L-1005"),
        ("Amit Shani", "+972501000006", "he", "L-1006"),
        ("Tamar Azulay", "+972501000007", "he", "L-1007"),
        ("Eitan Peretz", "+972501000008", "en", "L-1008"),
        ("Lior Bar", "+972501000009", "en", "L-1009"),
        ("Shira Gold", "+972501000010", "he", "L-1010"),
    ];

    let mut user_ids = Vec::new();
    for (full_name, phone, lang, loyalty) in users {
        let id = store
            .insert_user(NewUser {
                full_name: full_name.into(),
                phone: phone.into(),
                preferred_language: lang.into(),
                loyalty_id: Some(loyalty.into()),
            })
            .await?;
        user_ids.push(id);
    }

    let meds = [
        NewMedication {
            name: "Paracetamol".into(),
            name_he: "פרצטמול".into(),
            active_ingredients: vec!["acetaminophen".into()],
            form: "tablet".into(),
            strength: "500 mg".into(),
            manufacturer: "Synthetic Pharma".into(),
            otc_or_rx: RxClass::Otc,
            label_instructions: "Label instructions: Take as directed on the package label. \
                Do not exceed the maximum daily dose stated on the label."
                .into(),
            warnings: "Warnings: Contains acetaminophen. Overdose may cause severe liver \
                damage. Keep out of reach of children."
                .into(),
        },
        NewMedication {
            name: "Ibuprofen".into(),
            name_he: "איבופרופן".into(),
            active_ingredients: vec!["ibuprofen".into()],
            form: "tablet".into(),
            strength: "200mg".into(),
            manufacturer: "Synthetic Pharma".into(),
            otc_or_rx: RxClass::Otc,
            label_instructions: "Label instructions: Take with food or milk if stomach upset \
                occurs. Use the lowest effective dose per label."
                .into(),
            warnings: "Warnings: NSAID. May increase risk of stomach bleeding. Do not use if \
                allergic to NSAIDs."
                .into(),
        },
        NewMedication {
            name: "Ibuprofen".into(),
            name_he: "איבופרופן".into(),
            active_ingredients: vec!["ibuprofen".into()],
            form: "tablet".into(),
            strength: "400mg".into(),
            manufacturer: "Synthetic Pharma".into(),
            otc_or_rx: RxClass::Otc,
            label_instructions: "Label instructions: Take with food or milk if stomach upset \
                occurs. Use the lowest effective dose per label."
                .into(),
            warnings: "Warnings: NSAID. May increase risk of stomach bleeding. Do not use if \
                allergic to NSAIDs."
                .into(),
        },
        NewMedication {
            name: "Amoxicillin".into(),
            name_he: "אמוקסיצילין".into(),
            active_ingredients: vec!["amoxicillin".into()],
            form: "capsule".into(),
            strength: "500 mg".into(),
            manufacturer: "Synthetic Pharma".into(),
            otc_or_rx: RxClass::Rx,
            label_instructions: "Label instructions: Use only as prescribed. Complete the full \
                course as prescribed."
                .into(),
            warnings: "Warnings: Antibiotic. Allergic reactions may occur. Seek urgent care \
                for signs of a severe allergy."
                .into(),
        },
        NewMedication {
            name: "Metformin".into(),
            name_he: "מטפורמין".into(),
            active_ingredients: vec!["metformin".into()],
            form: "tablet".into(),
            strength: "500 mg".into(),
            manufacturer: "Synthetic Pharma".into(),
            otc_or_rx: RxClass::Rx,
            label_instructions: "Label instructions: Take only as prescribed. Follow the dosing \
                schedule provided by the prescriber/pharmacist."
                .into(),
            warnings: "Warnings: Prescription medication. Follow professional instructions. \
                Contact a healthcare professional with questions."
                .into(),
        },
        NewMedication {
            name: "Omeprazole".into(),
            name_he: "אומפרזול".into(),
            active_ingredients: vec!["omeprazole".into()],
            form: "capsule".into(),
            strength: "20 mg".into(),
            manufacturer: "Synthetic Pharma".into(),
            otc_or_rx: RxClass::Otc,
            label_instructions: "Label instructions: Take as directed on the package label. \
                Swallow whole; do not crush or chew."
                .into(),
            warnings: "Warnings: If symptoms persist, consult a healthcare professional. Keep \
                out of reach of children."
                .into(),
        },
    ];

    let mut med_entries = Vec::new();
    for med in meds {
        let rx = med.otc_or_rx;
        let id = store.insert_medication(med).await?;
        med_entries.push((id, rx));
    }

    let stores = [
        ("S-TA", "Tel Aviv - Dizengoff"),
        ("S-JLM", "Jerusalem - King George"),
        ("S-HFA", "Haifa - Carmel"),
    ];

    // Fixed quantity cycle instead of randomness — tests and demos can rely
    // on the exact numbers.
    let quantities = [12, 0, 5, 30, 2];
    let mut qi = 0;
    for (med_id, _) in &med_entries {
        for (store_id, store_name) in stores {
            store
                .insert_inventory(med_id, store_id, store_name, quantities[qi % quantities.len()])
                .await?;
            qi += 1;
        }
    }

    // A few example prescriptions for Rx medications
    let rx_meds: Vec<&String> = med_entries
        .iter()
        .filter(|(_, rx)| *rx == RxClass::Rx)
        .map(|(id, _)| id)
        .collect();
    if rx_meds.len() >= 2 {
        insert_prescription(store, &user_ids[0], rx_meds[0], 1, 60).await?;
        insert_prescription(store, &user_ids[3], rx_meds[1], 2, 90).await?;
    }

    // Example ticket to show the concept
    store
        .insert_ticket(NewTicket {
            ticket_type: TicketType::CustomerService,
            user_id: Some(user_ids[1].clone()),
            medication_id: None,
            store_name: None,
            payload: serde_json::json!({ "topic": "hours", "note": "Store hours question" }),
        })
        .await?;

    info!(
        users = user_ids.len(),
        medications = med_entries.len(),
        "Seeded demo data"
    );
    Ok(())
}

async fn insert_prescription(
    store: &Store,
    user_id: &str,
    medication_id: &str,
    refills_left: i64,
    valid_days: i64,
) -> Result<(), StoreError> {
    let expires_at = (Utc::now() + Duration::days(valid_days)).to_rfc3339();
    sqlx::query(
        "INSERT INTO prescriptions (id, user_id, medication_id, status, refills_left, expires_at) \
         VALUES (?1, ?2, ?3, 'active', ?4, ?5)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(medication_id)
    .bind(refills_left)
    .bind(expires_at)
    .execute(store.pool())
    .await
    .map_err(|e| StoreError::Seed(format!("insert prescription: {e}")))?;
    Ok(())
}

/// Count rows in a table (seed verification helper).
pub async fn count_rows(store: &Store, table: &str) -> Result<i64, StoreError> {
    // Table names are internal constants, never user input.
    let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
        .fetch_one(store.pool())
        .await
        .map_err(|e| StoreError::Query(format!("count {table}: {e}")))?;
    row.try_get("n")
        .map_err(|e| StoreError::Query(format!("count column: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeds_once_and_only_once() {
        let store = Store::open_in_memory().await.unwrap();
        seed_if_empty(&store).await.unwrap();
        let users_after_first = count_rows(&store, "users").await.unwrap();
        assert_eq!(users_after_first, 10);

        // Second run is a no-op
        seed_if_empty(&store).await.unwrap();
        assert_eq!(count_rows(&store, "users").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn catalog_contains_two_ibuprofen_strengths() {
        let store = Store::open_in_memory().await.unwrap();
        seed_if_empty(&store).await.unwrap();

        let matches = store.medications_by_exact_name("ibuprofen").await.unwrap();
        assert_eq!(matches.len(), 2);
        let mut strengths: Vec<&str> = matches.iter().map(|m| m.strength.as_str()).collect();
        strengths.sort();
        assert_eq!(strengths, vec!["200mg", "400mg"]);
    }

    #[tokio::test]
    async fn every_medication_is_stocked_at_every_store() {
        let store = Store::open_in_memory().await.unwrap();
        seed_if_empty(&store).await.unwrap();

        assert_eq!(count_rows(&store, "medications").await.unwrap(), 6);
        assert_eq!(count_rows(&store, "inventory").await.unwrap(), 18);
        assert_eq!(count_rows(&store, "prescriptions").await.unwrap(), 2);
    }
}
