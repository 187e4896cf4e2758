use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::error::LedgerError;

// ============================================================================
// OPERATION ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Expense,
    Income,
    Refund,
    Transfer,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Expense => "EXPENSE",
            OperationType::Income => "INCOME",
            OperationType::Refund => "REFUND",
            OperationType::Transfer => "TRANSFER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "EXPENSE" => Some(OperationType::Expense),
            "INCOME" => Some(OperationType::Income),
            "REFUND" => Some(OperationType::Refund),
            "TRANSFER" => Some(OperationType::Transfer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationStatus {
    #[default]
    Pending,
    Reconciled,
    /// Ignored by every budget calculation
    Excluded,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Pending => "PENDING",
            ReconciliationStatus::Reconciled => "RECONCILED",
            ReconciliationStatus::Excluded => "EXCLUDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "PENDING" => Some(ReconciliationStatus::Pending),
            "RECONCILED" => Some(ReconciliationStatus::Reconciled),
            "EXCLUDED" => Some(ReconciliationStatus::Excluded),
            _ => None,
        }
    }
}

/// Where an operation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationSource {
    #[default]
    Manual,
    Import,
    Recurring,
}

impl OperationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationSource::Manual => "MANUAL",
            OperationSource::Import => "IMPORT",
            OperationSource::Recurring => "RECURRING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "MANUAL" => Some(OperationSource::Manual),
            "IMPORT" => Some(OperationSource::Import),
            "RECURRING" => Some(OperationSource::Recurring),
            _ => None,
        }
    }
}

// ============================================================================
// OPERATION
// ============================================================================

/// A single budget transaction.
///
/// `amount` is always a positive magnitude; the direction comes from `op_type`
/// (and from `account_id` / `to_account_id` for transfers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default = "default_uuid")]
    pub id: String,

    pub date: NaiveDate,

    pub label: String,

    pub amount: f64,

    #[serde(rename = "type")]
    pub op_type: OperationType,

    #[serde(default)]
    pub category_id: Option<String>,

    #[serde(default)]
    pub subcategory_id: Option<String>,

    pub account_id: String,

    /// Destination account, transfers only
    #[serde(default)]
    pub to_account_id: Option<String>,

    #[serde(default)]
    pub horse_id: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub payee: Option<String>,

    #[serde(default)]
    pub source: OperationSource,

    #[serde(default)]
    pub reconciliation: ReconciliationStatus,

    /// Planned but not yet real
    #[serde(default)]
    pub forecast: bool,

    #[serde(default)]
    pub notes: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Operation {
    pub fn new(
        date: NaiveDate,
        label: impl Into<String>,
        amount: f64,
        op_type: OperationType,
        account_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Operation {
            id: default_uuid(),
            date,
            label: label.into(),
            amount: amount.abs(),
            op_type,
            category_id: None,
            subcategory_id: None,
            account_id: account_id.into(),
            to_account_id: None,
            horse_id: None,
            tags: Vec::new(),
            payee: None,
            source: OperationSource::Manual,
            reconciliation: ReconciliationStatus::Pending,
            forecast: false,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_horse(mut self, horse_id: impl Into<String>) -> Self {
        self.horse_id = Some(horse_id.into());
        self
    }

    pub fn with_payee(mut self, payee: impl Into<String>) -> Self {
        self.payee = Some(payee.into());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_source(mut self, source: OperationSource) -> Self {
        self.source = source;
        self
    }

    pub fn is_expense(&self) -> bool {
        self.op_type == OperationType::Expense
    }

    /// Counts toward balances and envelopes
    pub fn is_effective(&self) -> bool {
        !self.forecast && self.reconciliation != ReconciliationStatus::Excluded
    }

    /// Hash used to skip duplicates on re-import. Not the identity.
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{:.2}|{}|{}|{}",
            self.date,
            self.amount,
            self.label.trim().to_lowercase(),
            self.account_id,
            self.op_type.as_str()
        ));
        format!("{:x}", hasher.finalize())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Entry in the audit trail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS operations (
            id TEXT PRIMARY KEY,
            idempotency_hash TEXT UNIQUE NOT NULL,
            date TEXT NOT NULL,
            label TEXT NOT NULL,
            amount REAL NOT NULL,
            op_type TEXT NOT NULL,
            category_id TEXT,
            subcategory_id TEXT,
            account_id TEXT NOT NULL,
            to_account_id TEXT,
            horse_id TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            payee TEXT,
            source TEXT NOT NULL,
            reconciliation TEXT NOT NULL,
            forecast INTEGER NOT NULL DEFAULT 0,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_operations_date ON operations(date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_operations_account ON operations(account_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {:?}", path))?;
    setup_database(&conn)?;
    Ok(conn)
}

// ============================================================================
// WRITES
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct InsertSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Insert operations, skipping the ones already present (same idempotency hash).
pub fn insert_operations(conn: &Connection, operations: &[Operation]) -> Result<InsertSummary> {
    let mut summary = InsertSummary::default();

    for op in operations {
        let hash = op.compute_idempotency_hash();
        let tags_json = serde_json::to_string(&op.tags)?;

        let result = conn.execute(
            "INSERT INTO operations (
                id, idempotency_hash, date, label, amount, op_type,
                category_id, subcategory_id, account_id, to_account_id, horse_id,
                tags, payee, source, reconciliation, forecast, notes,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                op.id,
                hash,
                op.date.to_string(),
                op.label,
                op.amount,
                op.op_type.as_str(),
                op.category_id,
                op.subcategory_id,
                op.account_id,
                op.to_account_id,
                op.horse_id,
                tags_json,
                op.payee,
                op.source.as_str(),
                op.reconciliation.as_str(),
                op.forecast,
                op.notes,
                op.created_at.to_rfc3339(),
                op.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => {
                summary.inserted += 1;
                let event = Event::new(
                    "operation_added",
                    "operation",
                    &op.id,
                    serde_json::json!({
                        "amount": op.amount,
                        "type": op.op_type.as_str(),
                        "source": op.source.as_str(),
                    }),
                    "ledger",
                );
                insert_event(conn, &event)?;
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                debug!(label = %op.label, date = %op.date, "skipping duplicate operation");
                summary.duplicates += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        "operations stored"
    );

    Ok(summary)
}

/// Overwrite an existing operation. Returns false when the id is unknown.
pub fn update_operation(conn: &Connection, op: &Operation) -> Result<bool> {
    let tags_json = serde_json::to_string(&op.tags)?;

    let changed = conn.execute(
        "UPDATE operations SET
            idempotency_hash = ?2, date = ?3, label = ?4, amount = ?5, op_type = ?6,
            category_id = ?7, subcategory_id = ?8, account_id = ?9, to_account_id = ?10,
            horse_id = ?11, tags = ?12, payee = ?13, source = ?14, reconciliation = ?15,
            forecast = ?16, notes = ?17, updated_at = ?18
         WHERE id = ?1",
        params![
            op.id,
            op.compute_idempotency_hash(),
            op.date.to_string(),
            op.label,
            op.amount,
            op.op_type.as_str(),
            op.category_id,
            op.subcategory_id,
            op.account_id,
            op.to_account_id,
            op.horse_id,
            tags_json,
            op.payee,
            op.source.as_str(),
            op.reconciliation.as_str(),
            op.forecast,
            op.notes,
            op.updated_at.to_rfc3339(),
        ],
    )?;

    if changed > 0 {
        insert_event(
            conn,
            &Event::new(
                "operation_updated",
                "operation",
                &op.id,
                serde_json::to_value(op)?,
                "ledger",
            ),
        )?;
    }

    Ok(changed > 0)
}

pub fn delete_operation(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM operations WHERE id = ?1", params![id])?;

    if changed > 0 {
        insert_event(
            conn,
            &Event::new(
                "operation_deleted",
                "operation",
                id,
                serde_json::json!({}),
                "ledger",
            ),
        )?;
    }

    Ok(changed > 0)
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

// ============================================================================
// READS
// ============================================================================

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(LedgerError::InvalidValue(message)),
    )
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const OPERATION_COLUMNS: &str = "id, date, label, amount, op_type, category_id, subcategory_id,
    account_id, to_account_id, horse_id, tags, payee, source, reconciliation, forecast,
    notes, created_at, updated_at";

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<Operation> {
    let date_str: String = row.get(1)?;
    let type_str: String = row.get(4)?;
    let tags_json: String = row.get(10)?;
    let source_str: String = row.get(12)?;
    let reconciliation_str: String = row.get(13)?;
    let created_str: String = row.get(16)?;
    let updated_str: String = row.get(17)?;

    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

    Ok(Operation {
        id: row.get(0)?,
        date,
        label: row.get(2)?,
        amount: row.get(3)?,
        op_type: OperationType::parse(&type_str)
            .ok_or_else(|| conversion_error(4, format!("unknown operation type {}", type_str)))?,
        category_id: row.get(5)?,
        subcategory_id: row.get(6)?,
        account_id: row.get(7)?,
        to_account_id: row.get(8)?,
        horse_id: row.get(9)?,
        tags,
        payee: row.get(11)?,
        source: OperationSource::parse(&source_str)
            .ok_or_else(|| conversion_error(12, format!("unknown source {}", source_str)))?,
        reconciliation: ReconciliationStatus::parse(&reconciliation_str).ok_or_else(|| {
            conversion_error(13, format!("unknown reconciliation {}", reconciliation_str))
        })?,
        forecast: row.get(14)?,
        notes: row.get(15)?,
        created_at: parse_timestamp(16, &created_str)?,
        updated_at: parse_timestamp(17, &updated_str)?,
    })
}

pub fn get_all_operations(conn: &Connection) -> Result<Vec<Operation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM operations ORDER BY date DESC, created_at DESC",
        OPERATION_COLUMNS
    ))?;

    let operations = stmt
        .query_map([], operation_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(operations)
}

pub fn get_operation(conn: &Connection, id: &str) -> Result<Option<Operation>> {
    let op = conn
        .query_row(
            &format!("SELECT {} FROM operations WHERE id = ?1", OPERATION_COLUMNS),
            params![id],
            operation_from_row,
        )
        .optional()?;

    Ok(op)
}

pub fn count_operations(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM operations", [], |row| row.get(0))?;
    Ok(count)
}

pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// One line of a bank export
#[derive(Debug, Deserialize)]
struct CsvOperationRow {
    date: String,
    label: String,
    amount: String,
    #[serde(default, rename = "type")]
    op_type: String,
    #[serde(default)]
    account: String,
    #[serde(default)]
    payee: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    horse: String,
    #[serde(default)]
    tags: String,
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Accepts `1234.50`, `-1 234,50`, `45,00 €`
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '€' && *c != '$')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    cleaned.parse::<f64>().ok()
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
}

pub fn load_csv(csv_path: &Path, default_account: &str) -> Result<Vec<Operation>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file: {:?}", csv_path))?;
    load_csv_reader(file, default_account)
}

/// Parse operations from any CSV source.
///
/// A row without an explicit type is an expense when its amount is negative
/// and an income otherwise.
pub fn load_csv_reader<R: Read>(reader: R, default_account: &str) -> Result<Vec<Operation>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut operations = Vec::new();

    for (line, result) in rdr.deserialize::<CsvOperationRow>().enumerate() {
        let row = result.with_context(|| format!("Failed to deserialize CSV line {}", line + 2))?;

        let date = parse_date(&row.date)
            .with_context(|| format!("Invalid date on line {}: {}", line + 2, row.date))?;
        let signed = parse_amount(&row.amount)
            .with_context(|| format!("Invalid amount on line {}: {}", line + 2, row.amount))?;

        let op_type = match OperationType::parse(&row.op_type) {
            Some(t) => t,
            None if signed < 0.0 => OperationType::Expense,
            None => OperationType::Income,
        };

        let account = non_empty(row.account).unwrap_or_else(|| default_account.to_string());

        let mut op = Operation::new(date, row.label.trim(), signed, op_type, account)
            .with_source(OperationSource::Import);
        op.payee = non_empty(row.payee);
        op.category_id = non_empty(row.category);
        op.horse_id = non_empty(row.horse);
        op.tags = row
            .tags
            .split(|c| c == ';' || c == '|')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        operations.push(op);
    }

    Ok(operations)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_operations() -> Vec<Operation> {
        vec![
            Operation::new(date(2025, 6, 1), "Pension juin", 450.0, OperationType::Expense, "acc1")
                .with_category("pension")
                .with_horse("h1"),
            Operation::new(date(2025, 6, 3), "Maréchal", 90.0, OperationType::Expense, "acc1")
                .with_tags(&["ferrure"]),
            Operation::new(date(2025, 6, 5), "Demi-pension", 200.0, OperationType::Income, "acc1"),
        ]
    }

    #[test]
    fn test_import_twice_skips_duplicates() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let first = insert_operations(&conn, &sample_operations()).unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(first.duplicates, 0);

        // Fresh ids, same content
        let second = insert_operations(&conn, &sample_operations()).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 3);

        assert_eq!(count_operations(&conn).unwrap(), 3);
    }

    #[test]
    fn test_operations_survive_storage() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let ops = sample_operations();
        insert_operations(&conn, &ops).unwrap();

        let loaded = get_operation(&conn, &ops[0].id).unwrap().unwrap();
        assert_eq!(loaded.label, "Pension juin");
        assert_eq!(loaded.category_id.as_deref(), Some("pension"));
        assert_eq!(loaded.horse_id.as_deref(), Some("h1"));
        assert_eq!(loaded.op_type, OperationType::Expense);

        let all = get_all_operations(&conn).unwrap();
        assert_eq!(all.len(), 3);
        // Newest first
        assert_eq!(all[0].label, "Demi-pension");
        assert_eq!(all[1].tags, vec!["ferrure".to_string()]);
    }

    #[test]
    fn test_update_and_delete_operation() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut ops = sample_operations();
        insert_operations(&conn, &ops).unwrap();

        ops[1].reconciliation = ReconciliationStatus::Excluded;
        ops[1].touch();
        assert!(update_operation(&conn, &ops[1]).unwrap());

        let loaded = get_operation(&conn, &ops[1].id).unwrap().unwrap();
        assert_eq!(loaded.reconciliation, ReconciliationStatus::Excluded);

        assert!(delete_operation(&conn, &ops[1].id).unwrap());
        assert!(!delete_operation(&conn, &ops[1].id).unwrap());
        assert!(get_operation(&conn, &ops[1].id).unwrap().is_none());

        let events = get_events_for_entity(&conn, "operation", &ops[1].id).unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(kinds, vec!["operation_deleted", "operation_updated", "operation_added"]);
    }

    #[test]
    fn test_update_unknown_operation() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let op = Operation::new(date(2025, 1, 1), "Foin", 300.0, OperationType::Expense, "acc1");
        assert!(!update_operation(&conn, &op).unwrap());
    }

    #[test]
    fn test_idempotency_hash_ignores_identity() {
        let a = Operation::new(date(2025, 2, 1), "Foin", 300.0, OperationType::Expense, "acc1");
        let b = Operation::new(date(2025, 2, 1), " FOIN ", 300.0, OperationType::Expense, "acc1");
        let c = Operation::new(date(2025, 2, 2), "Foin", 300.0, OperationType::Expense, "acc1");

        assert_ne!(a.id, b.id);
        assert_eq!(a.compute_idempotency_hash(), b.compute_idempotency_hash());
        assert_ne!(a.compute_idempotency_hash(), c.compute_idempotency_hash());
        assert_eq!(a.compute_idempotency_hash().len(), 64);
    }

    #[test]
    fn test_load_csv_reader() {
        let data = "\
date,label,amount,type,account,payee,category,horse,tags
2025-06-01,Pension juin,-450.00,,,Écurie du Lac,pension,h1,mensuel
05/06/2025,Vente selle,\"1 200,50\",,,,,,
2025-06-07,Remboursement véto,80,REFUND,acc2,,veterinaire,h1,assurance;véto
";
        let ops = load_csv_reader(data.as_bytes(), "acc1").unwrap();
        assert_eq!(ops.len(), 3);

        assert_eq!(ops[0].op_type, OperationType::Expense);
        assert_eq!(ops[0].amount, 450.0);
        assert_eq!(ops[0].account_id, "acc1");
        assert_eq!(ops[0].payee.as_deref(), Some("Écurie du Lac"));
        assert_eq!(ops[0].source, OperationSource::Import);
        assert_eq!(ops[0].tags, vec!["mensuel".to_string()]);

        assert_eq!(ops[1].op_type, OperationType::Income);
        assert_eq!(ops[1].date, date(2025, 6, 5));
        assert!((ops[1].amount - 1200.5).abs() < 1e-9);
        assert!(ops[1].category_id.is_none());

        assert_eq!(ops[2].op_type, OperationType::Refund);
        assert_eq!(ops[2].account_id, "acc2");
        assert_eq!(ops[2].tags.len(), 2);
    }

    #[test]
    fn test_load_csv_rejects_bad_date() {
        let data = "date,label,amount\nyesterday,Foin,-10\n";
        let err = load_csv_reader(data.as_bytes(), "acc1").unwrap_err();
        assert!(err.to_string().contains("Invalid date"));
    }

    #[test]
    fn test_operation_json_uses_camel_case() {
        let op = Operation::new(date(2025, 6, 1), "Pension", 450.0, OperationType::Expense, "acc1")
            .with_category("pension");
        let json = serde_json::to_value(&op).unwrap();

        assert_eq!(json["categoryId"], "pension");
        assert_eq!(json["type"], "EXPENSE");
        assert_eq!(json["reconciliation"], "PENDING");
        assert_eq!(json["accountId"], "acc1");
    }
}
