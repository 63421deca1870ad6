//! Customer application persistence
//!
//! The `customer_applications` table carries one column per schema field
//! (lower-cased name), generated from `FIELD_SCHEMA`, so adding a field to
//! the schema adds a column to new databases. Each creation writes an
//! `audit_log` row in the same transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use onboard_common::record::RecordMeta;
use onboard_common::schema::{FieldKind, FIELD_SCHEMA};
use onboard_common::{CanonicalRecord, FieldValue, ProcessingMethod};
use serde::Serialize;
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};
use crate::pagination::PageRequest;

pub const STATUS_PENDING: &str = "pending";
const AUDIT_ACTION_CREATE: &str = "CREATE";

/// Persistence gateway errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A unique field (CIF) already exists
    #[error("An application with {field} '{value}' already exists")]
    DuplicateKey { field: String, value: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database locked after {attempts} attempts ({elapsed_ms} ms)")]
    Locked { attempts: u32, elapsed_ms: u64 },

    #[error("Stored application is unreadable: {0}")]
    Corrupt(String),
}

impl PersistenceError {
    /// Transient SQLite lock contention
    pub fn is_lock(&self) -> bool {
        match self {
            PersistenceError::Locked { .. } => true,
            PersistenceError::Database(err) => err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

/// Request details recorded with each audit entry
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Row of the application listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSummary {
    pub id: String,
    pub created_at: String,
    pub nombre: Option<String>,
    pub cif: Option<String>,
    pub status: String,
    pub credito_solicitado_euros: Option<String>,
    pub pais: Option<String>,
}

/// A stored application with its record
#[derive(Debug, Clone, PartialEq)]
pub struct StoredApplication {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub status: String,
    pub record: CanonicalRecord,
}

impl StoredApplication {
    /// Flat JSON: storage keys first, then the record's meta and fields
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert("createdAt".into(), Value::String(self.created_at.clone()));
        map.insert("updatedAt".into(), Value::String(self.updated_at.clone()));
        map.insert("status".into(), Value::String(self.status.clone()));
        if let Value::Object(fields) = self.record.to_json() {
            map.extend(fields);
        }
        Value::Object(map)
    }
}

fn column_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Flag => "INTEGER",
        _ => "TEXT",
    }
}

/// `CREATE TABLE` statement for `customer_applications`
pub fn create_table_sql() -> String {
    let mut columns = vec![
        "id TEXT PRIMARY KEY".to_string(),
        "created_at TEXT NOT NULL".to_string(),
        "updated_at TEXT NOT NULL".to_string(),
        format!("status TEXT NOT NULL DEFAULT '{}'", STATUS_PENDING),
        "ocr_success INTEGER".to_string(),
        "ocr_timestamp TEXT".to_string(),
        "ocr_error TEXT".to_string(),
        "processing_method TEXT".to_string(),
        "files_processed INTEGER".to_string(),
        "total_files INTEGER".to_string(),
    ];
    for spec in FIELD_SCHEMA {
        let unique = if spec.unique { " UNIQUE" } else { "" };
        columns.push(format!("{} {}{}", spec.column(), column_type(spec.kind), unique));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS customer_applications (\n    {}\n)",
        columns.join(",\n    ")
    )
}

static INSERT_SQL: Lazy<String> = Lazy::new(|| {
    let mut columns = vec![
        "id",
        "created_at",
        "updated_at",
        "status",
        "ocr_success",
        "ocr_timestamp",
        "ocr_error",
        "processing_method",
        "files_processed",
        "total_files",
    ]
    .into_iter()
    .map(str::to_string)
    .collect::<Vec<_>>();
    columns.extend(FIELD_SCHEMA.iter().map(|spec| spec.column()));
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO customer_applications ({}) VALUES ({})",
        columns.join(", "),
        placeholders
    )
});

fn timestamp(dt: DateTime<Utc>) -> String {
    // Fixed width so text ordering matches time ordering
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Map a unique-constraint failure to the field it concerns
fn classify(err: sqlx::Error, record: &CanonicalRecord) -> PersistenceError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let message = db_err.message().to_string();
            let spec = FIELD_SCHEMA
                .iter()
                .filter(|spec| spec.unique)
                .find(|spec| message.contains(&format!(".{}", spec.column())))
                .or_else(|| FIELD_SCHEMA.iter().find(|spec| spec.unique));
            if let Some(spec) = spec {
                return PersistenceError::DuplicateKey {
                    field: spec.name.to_string(),
                    value: record.text_or_empty(spec.name).to_string(),
                };
            }
        }
    }
    PersistenceError::Database(err)
}

/// Store a validated record and its audit entry; returns the new id
pub async fn create_application(
    pool: &SqlitePool,
    record: &CanonicalRecord,
    audit: &AuditContext,
) -> Result<Uuid, PersistenceError> {
    let id = Uuid::new_v4();
    let id_text = id.to_string();
    let now = timestamp(Utc::now());
    let meta = &record.meta;
    let changes = json!({ "status": "Application created" }).to_string();

    let id_text = &id_text;
    let now = &now;
    let changes = &changes;

    retry_on_lock("create_application", DEFAULT_MAX_LOCK_WAIT, || async move {
        let mut tx = pool.begin().await?;

        let mut query = sqlx::query(INSERT_SQL.as_str())
            .bind(id_text)
            .bind(now)
            .bind(now)
            .bind(STATUS_PENDING)
            .bind(meta.success)
            .bind(meta.timestamp.map(timestamp))
            .bind(meta.error.as_deref())
            .bind(meta.processing_method.map(ProcessingMethod::as_str))
            .bind(meta.files_processed.map(|n| n as i64))
            .bind(meta.total_files.map(|n| n as i64));
        for spec in FIELD_SCHEMA {
            query = match spec.kind {
                FieldKind::Flag => query.bind(record.flag(spec.name)),
                _ => query.bind(record.text(spec.name).map(str::to_string)),
            };
        }
        query
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(e, record))?;

        sqlx::query(
            r#"
            INSERT INTO audit_log (application_id, action, changes, ip_address, user_agent, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id_text)
        .bind(AUDIT_ACTION_CREATE)
        .bind(changes)
        .bind(&audit.ip_address)
        .bind(&audit.user_agent)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok::<(), PersistenceError>(())
    })
    .await?;

    info!(
        application_id = %id,
        cif = record.text_or_empty("CIF"),
        "Application created"
    );
    Ok(id)
}

/// Newest-first page of applications, optionally filtered by status
pub async fn list_applications(
    pool: &SqlitePool,
    status: Option<&str>,
    page: PageRequest,
) -> Result<(Vec<ApplicationSummary>, i64), PersistenceError> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM customer_applications WHERE (? IS NULL OR status = ?)",
    )
    .bind(status)
    .bind(status)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(
        r#"
        SELECT id, created_at, nombre, cif, status, credito_solicitado_euros, pais
        FROM customer_applications
        WHERE (? IS NULL OR status = ?)
        ORDER BY created_at DESC, rowid DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(status)
    .bind(status)
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(pool)
    .await?;

    let applications = rows
        .iter()
        .map(|row| -> Result<ApplicationSummary, sqlx::Error> {
            Ok(ApplicationSummary {
                id: row.try_get("id")?,
                created_at: row.try_get("created_at")?,
                nombre: row.try_get("nombre")?,
                cif: row.try_get("cif")?,
                status: row.try_get("status")?,
                credito_solicitado_euros: row.try_get("credito_solicitado_euros")?,
                pais: row.try_get("pais")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

    debug!(total, returned = applications.len(), "Listed applications");
    Ok((applications, total))
}

/// One application by id
pub async fn get_application(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<StoredApplication>, PersistenceError> {
    let row = sqlx::query("SELECT * FROM customer_applications WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(|row| stored_from_row(&row)).transpose()
}

fn stored_from_row(row: &SqliteRow) -> Result<StoredApplication, PersistenceError> {
    let mut record = CanonicalRecord::new();
    for spec in FIELD_SCHEMA {
        let column = spec.column();
        let value = match spec.kind {
            FieldKind::Flag => row
                .try_get::<Option<bool>, _>(column.as_str())?
                .map(FieldValue::Flag),
            _ => row
                .try_get::<Option<String>, _>(column.as_str())?
                .map(FieldValue::Text),
        };
        if let Some(value) = value {
            record.set(spec.name, value);
        }
    }

    let processing_method = row
        .try_get::<Option<String>, _>("processing_method")?
        .map(|method| {
            serde_json::from_value::<ProcessingMethod>(Value::String(method.clone()))
                .map_err(|_| PersistenceError::Corrupt(format!("processing_method '{}'", method)))
        })
        .transpose()?;
    record.meta = RecordMeta {
        success: row.try_get("ocr_success")?,
        timestamp: row
            .try_get::<Option<String>, _>("ocr_timestamp")?
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        error: row.try_get("ocr_error")?,
        processing_method,
        files_processed: row
            .try_get::<Option<i64>, _>("files_processed")?
            .map(|n| n as usize),
        total_files: row
            .try_get::<Option<i64>, _>("total_files")?
            .map(|n| n as usize),
        ..Default::default()
    };

    Ok(StoredApplication {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        status: row.try_get("status")?,
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_one_column_per_field() {
        let sql = create_table_sql();
        assert!(sql.contains("cif TEXT UNIQUE"));
        assert!(sql.contains("abierto_como_cliente INTEGER"));
        assert!(sql.contains("ocr_error TEXT"));
        assert!(sql.contains("status TEXT NOT NULL DEFAULT 'pending'"));
        assert_eq!(INSERT_SQL.matches('?').count(), FIELD_SCHEMA.len() + 10);
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let a = timestamp(DateTime::parse_from_rfc3339("2025-01-01T10:00:00Z").unwrap().with_timezone(&Utc));
        let b = timestamp(
            DateTime::parse_from_rfc3339("2025-01-01T10:00:00.5Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[tokio::test]
    async fn test_ocr_meta_round_trip() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let mut record = CanonicalRecord::new();
        record.set_text("NOMBRE", "Acme GmbH");
        record.set_text("CIF", "DE811234567");
        record.meta.success = Some(false);
        record.meta.error = Some("OCR processing failed".to_string());

        let id = create_application(&pool, &record, &AuditContext::default())
            .await
            .unwrap();
        let stored = get_application(&pool, &id.to_string()).await.unwrap().unwrap();

        assert_eq!(stored.record.meta.error.as_deref(), Some("OCR processing failed"));
        assert_eq!(stored.record.meta.success, Some(false));
        assert_eq!(stored.to_json()["_ocrError"], "OCR processing failed");
    }
}
