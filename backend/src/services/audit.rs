//! Audit trail: one row per mutating operation, written on the caller's
//! executor so it commits or rolls back together with the change.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::csv_io::export_to_csv;
use shared::{PaginatedResponse, Pagination};

/// Audit event under construction
#[derive(Debug, Clone)]
pub struct AuditEvent {
    lab_id: Uuid,
    user_id: Option<Uuid>,
    action: String,
    entity_type: &'static str,
    entity_id: Option<Uuid>,
    details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(lab_id: Uuid, user_id: Option<Uuid>, action: &str, entity_type: &'static str) -> Self {
        Self {
            lab_id,
            user_id,
            action: action.to_string(),
            entity_type,
            entity_id: None,
            details: serde_json::json!({}),
        }
    }

    pub fn entity(mut self, entity_id: Uuid) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub async fn record<'e, E>(self, executor: E) -> AppResult<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (lab_id, user_id, action, entity_type, entity_id, details)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(self.lab_id)
        .bind(self.user_id)
        .bind(&self.action)
        .bind(self.entity_type)
        .bind(self.entity_id)
        .bind(&self.details)
        .execute(executor)
        .await?;

        Ok(())
    }
}

/// Stored audit log row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub user_name: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Flattened row for CSV export
#[derive(Debug, Serialize)]
struct AuditCsvRow {
    timestamp: String,
    user: String,
    action: String,
    entity_type: String,
    entity_id: String,
    details: String,
}

impl From<&AuditLogEntry> for AuditCsvRow {
    fn from(entry: &AuditLogEntry) -> Self {
        Self {
            timestamp: entry.created_at.to_rfc3339(),
            user: entry.user_name.clone().unwrap_or_default(),
            action: entry.action.clone(),
            entity_type: entry.entity_type.clone(),
            entity_id: entry.entity_id.map(|id| id.to_string()).unwrap_or_default(),
            details: entry.details.to_string(),
        }
    }
}

/// Filters for listing the audit trail
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLogFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// Largest number of rows a single CSV export returns
const EXPORT_LIMIT: i64 = 50_000;

/// Audit log query service
#[derive(Clone)]
pub struct AuditService {
    db: PgPool,
}

impl AuditService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list(
        &self,
        lab_id: Uuid,
        filter: &AuditLogFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<AuditLogEntry>> {
        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM audit_logs a
            WHERE a.lab_id = $1
              AND ($2::text IS NULL OR a.entity_type = $2)
              AND ($3::uuid IS NULL OR a.entity_id = $3)
              AND ($4::uuid IS NULL OR a.user_id = $4)
              AND ($5::date IS NULL OR a.created_at >= $5::date)
              AND ($6::date IS NULL OR a.created_at < $6::date + 1)
            "#,
        )
        .bind(lab_id)
        .bind(&filter.entity_type)
        .bind(filter.entity_id)
        .bind(filter.user_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&self.db)
        .await?;

        let entries = self
            .fetch(lab_id, filter, pagination.limit(), pagination.offset())
            .await?;

        Ok(PaginatedResponse::new(entries, pagination, total as u64))
    }

    pub async fn export_csv(&self, lab_id: Uuid, filter: &AuditLogFilter) -> AppResult<String> {
        let entries = self.fetch(lab_id, filter, EXPORT_LIMIT, 0).await?;
        let rows: Vec<AuditCsvRow> = entries.iter().map(AuditCsvRow::from).collect();
        export_to_csv(&rows)
    }

    async fn fetch(
        &self,
        lab_id: Uuid,
        filter: &AuditLogFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<AuditLogEntry>> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT a.id, a.user_id, u.name AS user_name, a.action, a.entity_type,
                   a.entity_id, a.details, a.created_at
            FROM audit_logs a
            LEFT JOIN users u ON u.id = a.user_id
            WHERE a.lab_id = $1
              AND ($2::text IS NULL OR a.entity_type = $2)
              AND ($3::uuid IS NULL OR a.entity_id = $3)
              AND ($4::uuid IS NULL OR a.user_id = $4)
              AND ($5::date IS NULL OR a.created_at >= $5::date)
              AND ($6::date IS NULL OR a.created_at < $6::date + 1)
            ORDER BY a.created_at DESC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(lab_id)
        .bind(&filter.entity_type)
        .bind(filter.entity_id)
        .bind(filter.user_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }
}
