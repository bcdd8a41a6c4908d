//! SQLite-backed persistent store for apotheca.
//!
//! One database file, five tables: `users`, `medications`, `inventory`,
//! `prescriptions`, `tickets`. Schema is created by inline migrations at
//! open time; WAL journaling and a busy timeout let concurrent requests
//! serialize on the write lock instead of failing.
//!
//! The store is the only shared mutable resource in the system. All
//! mutation goes through explicit transactions here — in particular
//! [`Store::reserve_inventory`], whose conditional compare-and-decrement
//! guarantees stock never oversells under concurrent reservations.

pub mod records;
pub mod seed;

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use apotheca_core::error::StoreError;
pub use records::{
    InventoryLevel, Medication, NewMedication, NewTicket, NewUser, RxClass, Ticket, TicketType,
    User,
};

/// Collapse whitespace and lowercase — the canonical form for name matching.
pub fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Outcome of an inventory reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Stock was decremented and a ticket created, atomically.
    Reserved { reservation_id: String },
    /// The (medication, store) row exists but holds too little stock.
    InsufficientStock,
    /// No inventory row for that (medication, store) pair.
    NotFound,
}

/// Handle to the SQLite store. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the store at the given SQLite URL or path.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Open(format!("invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Open(format!("failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {url}");
        Ok(store)
    }

    /// Open an ephemeral in-process store (for tests).
    ///
    /// Capped at one connection: each in-memory SQLite connection is its own
    /// database, so a larger pool would split the data.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Open(e.to_string()))?
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Open(format!("failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// The underlying connection pool, for sibling modules (seeding).
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run schema migrations — creates all tables and indexes.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id                 TEXT PRIMARY KEY,
                full_name          TEXT NOT NULL,
                phone              TEXT UNIQUE NOT NULL,
                preferred_language TEXT NOT NULL DEFAULT 'en',
                loyalty_id         TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(format!("users table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS medications (
                id                      TEXT PRIMARY KEY,
                name                    TEXT NOT NULL,
                name_he                 TEXT NOT NULL,
                active_ingredients_json TEXT NOT NULL DEFAULT '[]',
                form                    TEXT NOT NULL,
                strength                TEXT NOT NULL,
                manufacturer            TEXT NOT NULL,
                otc_or_rx               TEXT NOT NULL,
                label_instructions      TEXT NOT NULL,
                warnings                TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(format!("medications table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_medications_name ON medications(name)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(format!("medications index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS inventory (
                id            TEXT PRIMARY KEY,
                medication_id TEXT NOT NULL REFERENCES medications(id),
                store_id      TEXT NOT NULL,
                store_name    TEXT NOT NULL,
                quantity      INTEGER NOT NULL DEFAULT 0 CHECK (quantity >= 0),
                last_updated  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(format!("inventory table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_inventory_medication ON inventory(medication_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(format!("inventory index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prescriptions (
                id            TEXT PRIMARY KEY,
                user_id       TEXT NOT NULL REFERENCES users(id),
                medication_id TEXT NOT NULL REFERENCES medications(id),
                status        TEXT NOT NULL DEFAULT 'active',
                refills_left  INTEGER NOT NULL DEFAULT 0,
                expires_at    TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(format!("prescriptions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id            TEXT PRIMARY KEY,
                type          TEXT NOT NULL,
                user_id       TEXT REFERENCES users(id),
                medication_id TEXT REFERENCES medications(id),
                store_name    TEXT,
                payload_json  TEXT NOT NULL DEFAULT '{}',
                status        TEXT NOT NULL DEFAULT 'created',
                created_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(format!("tickets table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    // ── Catalog ───────────────────────────────────────────────────────────

    /// Exact case-insensitive match on English or Hebrew name.
    pub async fn medications_by_exact_name(
        &self,
        query: &str,
    ) -> Result<Vec<Medication>, StoreError> {
        let qn = normalize(query);
        let rows = sqlx::query(
            "SELECT * FROM medications WHERE lower(name) = ?1 OR lower(name_he) = ?1",
        )
        .bind(&qn)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("exact medication lookup: {e}")))?;

        rows.iter().map(row_to_medication).collect()
    }

    /// Substring match on English or Hebrew name, capped at 10 rows.
    pub async fn medications_by_name_like(
        &self,
        query: &str,
    ) -> Result<Vec<Medication>, StoreError> {
        let like = format!("%{}%", normalize(query));
        let rows = sqlx::query(
            "SELECT * FROM medications \
             WHERE lower(name) LIKE ?1 OR lower(name_he) LIKE ?1 \
             ORDER BY name, strength LIMIT 10",
        )
        .bind(&like)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("medication search: {e}")))?;

        rows.iter().map(row_to_medication).collect()
    }

    pub async fn medication_by_id(&self, id: &str) -> Result<Option<Medication>, StoreError> {
        let row = sqlx::query("SELECT * FROM medications WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("medication by id: {e}")))?;

        row.as_ref().map(row_to_medication).transpose()
    }

    pub async fn insert_medication(&self, med: NewMedication) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let ingredients = serde_json::to_string(&med.active_ingredients)
            .map_err(|e| StoreError::Query(format!("ingredients encoding: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO medications
                (id, name, name_he, active_ingredients_json, form, strength,
                 manufacturer, otc_or_rx, label_instructions, warnings)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&id)
        .bind(&med.name)
        .bind(&med.name_he)
        .bind(&ingredients)
        .bind(&med.form)
        .bind(&med.strength)
        .bind(&med.manufacturer)
        .bind(med.otc_or_rx.as_str())
        .bind(&med.label_instructions)
        .bind(&med.warnings)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("insert medication: {e}")))?;

        Ok(id)
    }

    // ── Users ─────────────────────────────────────────────────────────────

    pub async fn user_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE phone = ?1")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("user by phone: {e}")))?;

        Ok(row.as_ref().map(row_to_user).transpose()?)
    }

    pub async fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("user by id: {e}")))?;

        Ok(row.as_ref().map(row_to_user).transpose()?)
    }

    pub async fn insert_user(&self, user: NewUser) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO users (id, full_name, phone, preferred_language, loyalty_id) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&id)
        .bind(&user.full_name)
        .bind(&user.phone)
        .bind(&user.preferred_language)
        .bind(&user.loyalty_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("insert user: {e}")))?;

        Ok(id)
    }

    // ── Inventory ─────────────────────────────────────────────────────────

    /// Stock levels for a medication, optionally filtered to one store
    /// (matched case-insensitively on the normalized store name).
    pub async fn inventory_for(
        &self,
        medication_id: &str,
        store_name: Option<&str>,
    ) -> Result<Vec<InventoryLevel>, StoreError> {
        let rows = match store_name {
            Some(store) => {
                sqlx::query(
                    "SELECT store_id, store_name, quantity FROM inventory \
                     WHERE medication_id = ?1 AND lower(store_name) = ?2",
                )
                .bind(medication_id)
                .bind(normalize(store))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT store_id, store_name, quantity FROM inventory \
                     WHERE medication_id = ?1 ORDER BY store_name",
                )
                .bind(medication_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::Query(format!("inventory lookup: {e}")))?;

        rows.iter().map(row_to_inventory_level).collect()
    }

    pub async fn insert_inventory(
        &self,
        medication_id: &str,
        store_id: &str,
        store_name: &str,
        quantity: i64,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO inventory (id, medication_id, store_id, store_name, quantity, last_updated) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&id)
        .bind(medication_id)
        .bind(store_id)
        .bind(store_name)
        .bind(quantity)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("insert inventory: {e}")))?;

        Ok(id)
    }

    /// Atomically reserve stock: decrement the inventory row and create the
    /// reservation ticket in one transaction.
    ///
    /// The decrement is conditional (`quantity >= requested`), so two
    /// concurrent reservations for the last unit serialize at the database —
    /// exactly one sees `rows_affected == 1`. A ticket exists if and only if
    /// the decrement committed.
    pub async fn reserve_inventory(
        &self,
        medication_id: &str,
        store_name: &str,
        quantity: i64,
        user_id: &str,
    ) -> Result<ReserveOutcome, StoreError> {
        let store_norm = normalize(store_name);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Query(format!("begin reservation: {e}")))?;

        let updated = sqlx::query(
            "UPDATE inventory \
             SET quantity = quantity - ?1, last_updated = ?2 \
             WHERE medication_id = ?3 AND lower(store_name) = ?4 AND quantity >= ?1",
        )
        .bind(quantity)
        .bind(Utc::now().to_rfc3339())
        .bind(medication_id)
        .bind(&store_norm)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(format!("decrement stock: {e}")))?;

        if updated.rows_affected() == 0 {
            // Nothing changed — figure out which refusal this is.
            let existing = sqlx::query(
                "SELECT quantity FROM inventory \
                 WHERE medication_id = ?1 AND lower(store_name) = ?2",
            )
            .bind(medication_id)
            .bind(&store_norm)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(format!("inspect stock: {e}")))?;

            let _ = tx.rollback().await;
            return Ok(match existing {
                None => ReserveOutcome::NotFound,
                Some(_) => ReserveOutcome::InsufficientStock,
            });
        }

        // Canonical store name for the ticket, not the caller's spelling.
        let row = sqlx::query(
            "SELECT store_name FROM inventory \
             WHERE medication_id = ?1 AND lower(store_name) = ?2",
        )
        .bind(medication_id)
        .bind(&store_norm)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(format!("resolve store name: {e}")))?;
        let canonical_store: String = row
            .try_get("store_name")
            .map_err(|e| StoreError::Query(format!("store_name column: {e}")))?;

        let reservation_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO tickets \
                (id, type, user_id, medication_id, store_name, payload_json, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'created', ?7)",
        )
        .bind(&reservation_id)
        .bind(TicketType::InventoryReservation.as_str())
        .bind(user_id)
        .bind(medication_id)
        .bind(&canonical_store)
        .bind(serde_json::json!({ "quantity": quantity }).to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(format!("insert reservation ticket: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Query(format!("commit reservation: {e}")))?;

        debug!(
            medication_id,
            store = %canonical_store,
            quantity,
            reservation_id = %reservation_id,
            "Inventory reserved"
        );
        Ok(ReserveOutcome::Reserved { reservation_id })
    }

    // ── Tickets ───────────────────────────────────────────────────────────

    pub async fn insert_ticket(&self, ticket: NewTicket) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO tickets \
                (id, type, user_id, medication_id, store_name, payload_json, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'created', ?7)",
        )
        .bind(&id)
        .bind(ticket.ticket_type.as_str())
        .bind(&ticket.user_id)
        .bind(&ticket.medication_id)
        .bind(&ticket.store_name)
        .bind(ticket.payload.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("insert ticket: {e}")))?;

        Ok(id)
    }

    /// All tickets of one type, oldest first (used by tests and seeding).
    pub async fn tickets_of_type(&self, ticket_type: TicketType) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query("SELECT * FROM tickets WHERE type = ?1 ORDER BY created_at")
            .bind(ticket_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("tickets by type: {e}")))?;

        rows.iter().map(row_to_ticket).collect()
    }

    /// Whether any user exists — the seed-if-empty check.
    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT id FROM users LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("emptiness check: {e}")))?;
        Ok(row.is_none())
    }
}

// ── Row mapping ───────────────────────────────────────────────────────────

fn row_to_medication(row: &SqliteRow) -> Result<Medication, StoreError> {
    let ingredients_json: String = row
        .try_get("active_ingredients_json")
        .map_err(|e| StoreError::Query(format!("active_ingredients_json column: {e}")))?;
    let active_ingredients: Vec<String> =
        serde_json::from_str(&ingredients_json).unwrap_or_default();
    let otc_or_rx: String = row
        .try_get("otc_or_rx")
        .map_err(|e| StoreError::Query(format!("otc_or_rx column: {e}")))?;

    Ok(Medication {
        id: get_text(row, "id")?,
        name: get_text(row, "name")?,
        name_he: get_text(row, "name_he")?,
        active_ingredients,
        form: get_text(row, "form")?,
        strength: get_text(row, "strength")?,
        manufacturer: get_text(row, "manufacturer")?,
        otc_or_rx: RxClass::from_str(&otc_or_rx),
        label_instructions: get_text(row, "label_instructions")?,
        warnings: get_text(row, "warnings")?,
    })
}

fn row_to_user(row: &SqliteRow) -> Result<User, StoreError> {
    Ok(User {
        id: get_text(row, "id")?,
        full_name: get_text(row, "full_name")?,
        phone: get_text(row, "phone")?,
        preferred_language: get_text(row, "preferred_language")?,
        loyalty_id: row
            .try_get("loyalty_id")
            .map_err(|e| StoreError::Query(format!("loyalty_id column: {e}")))?,
    })
}

fn row_to_inventory_level(row: &SqliteRow) -> Result<InventoryLevel, StoreError> {
    Ok(InventoryLevel {
        store_id: get_text(row, "store_id")?,
        store_name: get_text(row, "store_name")?,
        quantity: row
            .try_get("quantity")
            .map_err(|e| StoreError::Query(format!("quantity column: {e}")))?,
    })
}

fn row_to_ticket(row: &SqliteRow) -> Result<Ticket, StoreError> {
    let created_at_str = get_text(row, "created_at")?;
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(Ticket {
        id: get_text(row, "id")?,
        ticket_type: get_text(row, "type")?,
        user_id: row
            .try_get("user_id")
            .map_err(|e| StoreError::Query(format!("user_id column: {e}")))?,
        medication_id: row
            .try_get("medication_id")
            .map_err(|e| StoreError::Query(format!("medication_id column: {e}")))?,
        store_name: row
            .try_get("store_name")
            .map_err(|e| StoreError::Query(format!("store_name column: {e}")))?,
        payload_json: get_text(row, "payload_json")?,
        status: get_text(row, "status")?,
        created_at,
    })
}

fn get_text(row: &SqliteRow, column: &str) -> Result<String, StoreError> {
    row.try_get(column)
        .map_err(|e| StoreError::Query(format!("{column} column: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_med(quantity: i64) -> (Store, String, String) {
        let store = Store::open_in_memory().await.unwrap();
        let med_id = store
            .insert_medication(NewMedication {
                name: "Paracetamol".into(),
                name_he: "פרצטמול".into(),
                active_ingredients: vec!["acetaminophen".into()],
                form: "tablet".into(),
                strength: "500 mg".into(),
                manufacturer: "Synthetic Pharma".into(),
                otc_or_rx: RxClass::Otc,
                label_instructions: "Take as directed on the package label.".into(),
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
                full_name: "Daniel Katz".into(),
                phone: "+972501000004".into(),
                preferred_language: "en".into(),
                loyalty_id: None,
            })
            .await
            .unwrap();
        (store, med_id, user_id)
    }

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize("  Tel  Aviv -  Dizengoff "), "tel aviv - dizengoff");
        assert_eq!(normalize("IBUPROFEN"), "ibuprofen");
    }

    #[tokio::test]
    async fn exact_lookup_is_case_insensitive() {
        let (store, _, _) = store_with_med(5).await;
        let found = store.medications_by_exact_name("PARACETAMOL").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Paracetamol");
        assert_eq!(found[0].active_ingredients, vec!["acetaminophen"]);
    }

    #[tokio::test]
    async fn hebrew_name_lookup() {
        let (store, _, _) = store_with_med(5).await;
        let found = store.medications_by_exact_name("פרצטמול").await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn inventory_filter_by_store_is_case_insensitive() {
        let (store, med_id, _) = store_with_med(7).await;
        let levels = store
            .inventory_for(&med_id, Some("tel aviv - dizengoff"))
            .await
            .unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].quantity, 7);

        let none = store.inventory_for(&med_id, Some("Nowhere")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn reserve_success_decrements_and_creates_ticket() {
        let (store, med_id, user_id) = store_with_med(1).await;

        let outcome = store
            .reserve_inventory(&med_id, "Tel Aviv - Dizengoff", 1, &user_id)
            .await
            .unwrap();
        let ReserveOutcome::Reserved { reservation_id } = outcome else {
            panic!("expected reservation, got {outcome:?}");
        };
        assert!(!reservation_id.is_empty());

        let levels = store.inventory_for(&med_id, None).await.unwrap();
        assert_eq!(levels[0].quantity, 0);

        let tickets = store
            .tickets_of_type(TicketType::InventoryReservation)
            .await
            .unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].id, reservation_id);
        assert_eq!(tickets[0].store_name.as_deref(), Some("Tel Aviv - Dizengoff"));
    }

    #[tokio::test]
    async fn reserve_exhausted_stock_refuses_without_ticket() {
        let (store, med_id, user_id) = store_with_med(1).await;

        let first = store
            .reserve_inventory(&med_id, "Tel Aviv - Dizengoff", 1, &user_id)
            .await
            .unwrap();
        assert!(matches!(first, ReserveOutcome::Reserved { .. }));

        let second = store
            .reserve_inventory(&med_id, "Tel Aviv - Dizengoff", 1, &user_id)
            .await
            .unwrap();
        assert_eq!(second, ReserveOutcome::InsufficientStock);

        // No ticket was created for the refused attempt
        let tickets = store
            .tickets_of_type(TicketType::InventoryReservation)
            .await
            .unwrap();
        assert_eq!(tickets.len(), 1);
    }

    #[tokio::test]
    async fn reserve_unknown_store_is_not_found() {
        let (store, med_id, user_id) = store_with_med(5).await;
        let outcome = store
            .reserve_inventory(&med_id, "Eilat - Marina", 1, &user_id)
            .await
            .unwrap();
        assert_eq!(outcome, ReserveOutcome::NotFound);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_oversell() {
        // File-backed store: a shared ":memory:" pool would cap at one
        // connection and serialize trivially, proving nothing.
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("stock.db").display());
        let store = Store::open(&url).await.unwrap();

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
                warnings: "Consult a professional if symptoms persist.".into(),
            })
            .await
            .unwrap();
        store
            .insert_inventory(&med_id, "S-HFA", "Haifa - Carmel", 5)
            .await
            .unwrap();
        let user_id = store
            .insert_user(NewUser {
                full_name: "Maya Rosen".into(),
                phone: "+972501000005".into(),
                preferred_language: "en".into(),
                loyalty_id: None,
            })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            let med_id = med_id.clone();
            let user_id = user_id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .reserve_inventory(&med_id, "Haifa - Carmel", 1, &user_id)
                    .await
            }));
        }

        let mut granted = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                ReserveOutcome::Reserved { .. } => granted += 1,
                ReserveOutcome::InsufficientStock => refused += 1,
                ReserveOutcome::NotFound => panic!("row must exist"),
            }
        }

        assert_eq!(granted, 5, "exactly the available stock is granted");
        assert_eq!(refused, 5);

        let levels = store.inventory_for(&med_id, None).await.unwrap();
        assert_eq!(levels[0].quantity, 0);

        // Sum of reserved ticket quantities equals the pre-reservation stock
        let tickets = store
            .tickets_of_type(TicketType::InventoryReservation)
            .await
            .unwrap();
        let total: i64 = tickets
            .iter()
            .map(|t| {
                serde_json::from_str::<serde_json::Value>(&t.payload_json)
                    .ok()
                    .and_then(|v| v["quantity"].as_i64())
                    .unwrap_or(0)
            })
            .sum();
        assert_eq!(total, 5);
    }
}
