//! Document numbering
//!
//! Each (lab, module) pair owns one counter row in `format_ids`. Allocation
//! is a single upsert that increments and returns the counter, so concurrent
//! registrations never receive the same sequence. Numbers are formatted as
//! `{prefix}-{YYMMDD}-{seq:03}` using the current UTC date.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use shared::{format_document_number, format_linked_number, validate_prefix, DocumentModule, DocumentNumber};

/// Allocated document number
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatedNumber {
    pub number: String,
    pub sequence: i64,
}

/// Counter configuration of one module
#[derive(Debug, Clone, Serialize)]
pub struct NumberingSetting {
    pub module: String,
    pub prefix: String,
    pub last_sequence: i64,
    pub next_number: String,
}

#[derive(Debug, sqlx::FromRow)]
struct FormatIdRow {
    module: String,
    prefix: String,
    last_sequence: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePrefixInput {
    pub prefix: String,
}

/// Atomically allocate the next number of `module` for `lab_id`.
///
/// Pass the surrounding transaction when the number belongs to a larger
/// write so that a rollback also discards the allocation.
pub async fn generate_next_number<'e, E>(
    executor: E,
    lab_id: Uuid,
    module: DocumentModule,
) -> AppResult<AllocatedNumber>
where
    E: PgExecutor<'e>,
{
    let (prefix, sequence) = sqlx::query_as::<_, (String, i64)>(
        r#"
        INSERT INTO format_ids (lab_id, module, prefix, last_sequence)
        VALUES ($1, $2, $3, 1)
        ON CONFLICT (lab_id, module)
        DO UPDATE SET last_sequence = format_ids.last_sequence + 1, updated_at = NOW()
        RETURNING prefix, last_sequence
        "#,
    )
    .bind(lab_id)
    .bind(module.as_str())
    .bind(module.default_prefix())
    .fetch_one(executor)
    .await?;

    let number = format_document_number(&prefix, today(), sequence);
    tracing::info!(%lab_id, module = %module, %number, "allocated document number");

    Ok(AllocatedNumber { number, sequence })
}

/// Report number derived from its sample's number.
///
/// The first report of a sample mirrors the sample's date and sequence under
/// the report prefix; later reports of the same sample append `-R{n}`.
pub async fn generate_linked_number(
    conn: &mut PgConnection,
    lab_id: Uuid,
    sample_id: Uuid,
) -> AppResult<String> {
    let sample_number = sqlx::query_scalar::<_, String>(
        "SELECT sample_number FROM samples WHERE id = $1 AND lab_id = $2",
    )
    .bind(sample_id)
    .bind(lab_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Sample".to_string()))?;

    let parsed = DocumentNumber::parse(&sample_number).map_err(|e| {
        AppError::Internal(format!("Stored sample number {} is invalid: {}", sample_number, e))
    })?;

    let report_prefix = current_prefix(&mut *conn, lab_id, DocumentModule::Report).await?;

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM reports WHERE sample_id = $1 AND lab_id = $2",
    )
    .bind(sample_id)
    .bind(lab_id)
    .fetch_one(&mut *conn)
    .await?;

    let number = format_linked_number(&report_prefix, parsed.date, parsed.sequence, existing);
    tracing::info!(%lab_id, %sample_number, report_number = %number, "linked report number");

    Ok(number)
}

async fn current_prefix<'e, E>(executor: E, lab_id: Uuid, module: DocumentModule) -> AppResult<String>
where
    E: PgExecutor<'e>,
{
    let prefix = sqlx::query_scalar::<_, String>(
        "SELECT prefix FROM format_ids WHERE lab_id = $1 AND module = $2",
    )
    .bind(lab_id)
    .bind(module.as_str())
    .fetch_optional(executor)
    .await?;

    Ok(prefix.unwrap_or_else(|| module.default_prefix().to_string()))
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Numbering settings service
#[derive(Clone)]
pub struct NumberingService {
    db: PgPool,
}

impl NumberingService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Counter state of every module, including modules never used yet
    pub async fn list_settings(&self, lab_id: Uuid) -> AppResult<Vec<NumberingSetting>> {
        let rows = sqlx::query_as::<_, FormatIdRow>(
            "SELECT module, prefix, last_sequence FROM format_ids WHERE lab_id = $1",
        )
        .bind(lab_id)
        .fetch_all(&self.db)
        .await?;

        let date = today();
        let settings = DocumentModule::ALL
            .iter()
            .map(|module| {
                let row = rows.iter().find(|r| r.module == module.as_str());
                let prefix = row
                    .map(|r| r.prefix.clone())
                    .unwrap_or_else(|| module.default_prefix().to_string());
                let last_sequence = row.map(|r| r.last_sequence).unwrap_or(0);
                NumberingSetting {
                    module: module.as_str().to_string(),
                    next_number: format_document_number(&prefix, date, last_sequence + 1),
                    prefix,
                    last_sequence,
                }
            })
            .collect();

        Ok(settings)
    }

    /// Change the prefix of a module; the sequence continues unchanged
    pub async fn update_prefix(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        module: &str,
        input: UpdatePrefixInput,
    ) -> AppResult<NumberingSetting> {
        let module = parse_module(module)?;
        let prefix = input.prefix.trim().to_string();
        validate_prefix(&prefix).map_err(|e| AppError::validation("prefix", e.to_string()))?;

        let mut tx = self.db.begin().await?;

        let last_sequence = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO format_ids (lab_id, module, prefix, last_sequence)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (lab_id, module)
            DO UPDATE SET prefix = EXCLUDED.prefix, updated_at = NOW()
            RETURNING last_sequence
            "#,
        )
        .bind(lab_id)
        .bind(module.as_str())
        .bind(&prefix)
        .fetch_one(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "update_prefix", "numbering")
            .details(serde_json::json!({ "module": module.as_str(), "prefix": prefix }))
            .record(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(%lab_id, module = %module, %prefix, "numbering prefix changed");

        Ok(NumberingSetting {
            module: module.as_str().to_string(),
            next_number: format_document_number(&prefix, today(), last_sequence + 1),
            prefix,
            last_sequence,
        })
    }

    /// Next number of a module without consuming it
    pub async fn preview(&self, lab_id: Uuid, module: &str) -> AppResult<String> {
        let module = parse_module(module)?;
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT prefix, last_sequence FROM format_ids WHERE lab_id = $1 AND module = $2",
        )
        .bind(lab_id)
        .bind(module.as_str())
        .fetch_optional(&self.db)
        .await?;

        let (prefix, last) =
            row.unwrap_or_else(|| (module.default_prefix().to_string(), 0));
        Ok(format_document_number(&prefix, today(), last + 1))
    }
}

fn parse_module(module: &str) -> AppResult<DocumentModule> {
    DocumentModule::from_str(module)
        .ok_or_else(|| AppError::validation("module", format!("Unknown numbering module: {}", module)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_module() {
        assert_eq!(parse_module("tax_invoice").unwrap(), DocumentModule::TaxInvoice);
        assert!(matches!(
            parse_module("lot"),
            Err(AppError::Validation { ref field, .. }) if field == "module"
        ));
    }
}
