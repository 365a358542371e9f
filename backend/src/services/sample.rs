//! Sample registration and lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use crate::services::customer::find_customer;
use crate::services::numbering::generate_next_number;
use crate::services::sample_type::{find_sample_type, load_parameters};
use crate::services::test_result::{load_results, TestResult};
use shared::{DocumentModule, PaginatedResponse, Pagination, SampleStatus, TestResultStatus};

#[derive(Clone)]
pub struct SampleService {
    db: PgPool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Sample {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub sample_number: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub sample_type_id: Uuid,
    pub sample_type_name: String,
    pub status: String,
    pub description: Option<String>,
    pub batch_number: Option<String>,
    pub quantity: Option<String>,
    pub source: Option<String>,
    pub collected_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub remarks: Option<String>,
    pub registered_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sample {
    pub fn status(&self) -> AppResult<SampleStatus> {
        SampleStatus::from_str(&self.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown sample status {}", self.status)))
    }
}

#[derive(Debug, Serialize)]
pub struct SampleWithResults {
    #[serde(flatten)]
    pub sample: Sample,
    pub results: Vec<TestResult>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterSampleInput {
    pub customer_id: Uuid,
    pub sample_type_id: Uuid,
    pub description: Option<String>,
    pub batch_number: Option<String>,
    pub quantity: Option<String>,
    pub source: Option<String>,
    pub collected_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
    #[serde(default)]
    pub save_as_draft: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSampleInput {
    pub customer_id: Option<Uuid>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub batch_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub quantity: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub source: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub collected_at: Option<Option<DateTime<Utc>>>,
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub remarks: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionInput {
    pub status: SampleStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct SampleFilter {
    pub status: Option<String>,
    pub customer_id: Option<Uuid>,
    pub sample_type_id: Option<Uuid>,
    pub search: Option<String>,
}

pub(crate) const SAMPLE_SELECT: &str = r#"
    SELECT s.id, s.lab_id, s.sample_number, s.customer_id, c.name AS customer_name,
           s.sample_type_id, st.name AS sample_type_name, s.status, s.description,
           s.batch_number, s.quantity, s.source, s.collected_at, s.received_at, s.remarks,
           s.registered_by, s.created_at, s.updated_at
    FROM samples s
    JOIN customers c ON c.id = s.customer_id
    JOIN sample_types st ON st.id = s.sample_type_id
"#;

pub async fn find_sample(conn: &mut PgConnection, lab_id: Uuid, sample_id: Uuid) -> AppResult<Sample> {
    sqlx::query_as::<_, Sample>(&format!("{} WHERE s.id = $1 AND s.lab_id = $2", SAMPLE_SELECT))
        .bind(sample_id)
        .bind(lab_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Sample".to_string()))
}

/// Move a sample to `next`, rejecting transitions the workflow forbids
pub async fn set_sample_status(
    conn: &mut PgConnection,
    lab_id: Uuid,
    sample: &Sample,
    next: SampleStatus,
) -> AppResult<()> {
    let current = sample.status()?;
    current.transition(next)?;

    sqlx::query("UPDATE samples SET status = $1, updated_at = NOW() WHERE id = $2 AND lab_id = $3")
        .bind(next.as_str())
        .bind(sample.id)
        .bind(lab_id)
        .execute(&mut *conn)
        .await?;

    tracing::debug!(sample = %sample.sample_number, from = %current, to = %next, "sample status changed");
    Ok(())
}

/// Status a manual transition request may target. Reporting happens only
/// through report publication, and a reported sample reopens only when its
/// report is reissued.
pub fn check_manual_transition(current: SampleStatus, next: SampleStatus) -> AppResult<()> {
    if next == SampleStatus::Reported {
        return Err(AppError::InvalidStateTransition(
            "Samples become reported when their report is published".to_string(),
        ));
    }
    if current == SampleStatus::Reported {
        return Err(AppError::InvalidStateTransition(
            "Reported samples reopen by reissuing their report".to_string(),
        ));
    }
    current.transition(next)?;
    Ok(())
}

impl SampleService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_samples(
        &self,
        lab_id: Uuid,
        filter: &SampleFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<Sample>> {
        if let Some(ref status) = filter.status {
            if SampleStatus::from_str(status).is_none() {
                return Err(AppError::validation("status", "Unknown sample status"));
            }
        }
        let search = filter.search.as_ref().map(|s| format!("%{}%", s.trim()));

        let conditions = r#"
            WHERE s.lab_id = $1
              AND ($2::text IS NULL OR s.status = $2)
              AND ($3::uuid IS NULL OR s.customer_id = $3)
              AND ($4::uuid IS NULL OR s.sample_type_id = $4)
              AND ($5::text IS NULL OR s.sample_number ILIKE $5 OR s.batch_number ILIKE $5
                   OR c.name ILIKE $5)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            r#"
            SELECT COUNT(*) FROM samples s
            JOIN customers c ON c.id = s.customer_id
            {}
            "#,
            conditions
        ))
        .bind(lab_id)
        .bind(&filter.status)
        .bind(filter.customer_id)
        .bind(filter.sample_type_id)
        .bind(&search)
        .fetch_one(&self.db)
        .await?;

        let samples = sqlx::query_as::<_, Sample>(&format!(
            "{} {} ORDER BY s.received_at DESC, s.sample_number DESC LIMIT $6 OFFSET $7",
            SAMPLE_SELECT, conditions
        ))
        .bind(lab_id)
        .bind(&filter.status)
        .bind(filter.customer_id)
        .bind(filter.sample_type_id)
        .bind(&search)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(samples, pagination, total as u64))
    }

    pub async fn get_sample(&self, lab_id: Uuid, sample_id: Uuid) -> AppResult<SampleWithResults> {
        let mut conn = self.db.acquire().await?;
        let sample = find_sample(&mut conn, lab_id, sample_id).await?;
        let results = load_results(&mut conn, sample_id).await?;
        Ok(SampleWithResults { sample, results })
    }

    /// Register a sample and create one pending result per parameter of its
    /// sample type. Parameter specs are copied so later edits to the sample
    /// type do not alter registered samples.
    pub async fn register_sample(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        input: RegisterSampleInput,
    ) -> AppResult<SampleWithResults> {
        let mut tx = self.db.begin().await?;

        let customer = find_customer(&mut tx, lab_id, input.customer_id)
            .await
            .map_err(|e| e.not_found_as("customer_id", "Customer does not exist"))?;
        if !customer.is_active {
            return Err(AppError::validation("customer_id", "Customer is inactive"));
        }
        let sample_type = find_sample_type(&mut tx, lab_id, input.sample_type_id)
            .await
            .map_err(|e| e.not_found_as("sample_type_id", "Sample type does not exist"))?;
        if !sample_type.is_active {
            return Err(AppError::validation("sample_type_id", "Sample type is inactive"));
        }
        let parameters = load_parameters(&mut tx, sample_type.id).await?;

        let status = if input.save_as_draft {
            SampleStatus::Draft
        } else {
            SampleStatus::Registered
        };

        let allocated = generate_next_number(&mut *tx, lab_id, DocumentModule::Sample).await?;

        let sample_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO samples (lab_id, sample_number, customer_id, sample_type_id, status,
                                 description, batch_number, quantity, source, collected_at,
                                 received_at, remarks, registered_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, COALESCE($11, NOW()), $12, $13)
            RETURNING id
            "#,
        )
        .bind(lab_id)
        .bind(&allocated.number)
        .bind(customer.id)
        .bind(sample_type.id)
        .bind(status.as_str())
        .bind(&input.description)
        .bind(&input.batch_number)
        .bind(&input.quantity)
        .bind(&input.source)
        .bind(input.collected_at)
        .bind(input.received_at)
        .bind(&input.remarks)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        for parameter in &parameters {
            sqlx::query(
                r#"
                INSERT INTO test_results (lab_id, sample_id, parameter_id, parameter_name, method,
                                          unit, spec_min, spec_max, status, sort_order)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(lab_id)
            .bind(sample_id)
            .bind(parameter.id)
            .bind(&parameter.name)
            .bind(&parameter.method)
            .bind(&parameter.unit)
            .bind(parameter.spec_min)
            .bind(parameter.spec_max)
            .bind(TestResultStatus::Pending.as_str())
            .bind(parameter.sort_order)
            .execute(&mut *tx)
            .await?;
        }

        AuditEvent::new(lab_id, Some(user_id), "register", "sample")
            .entity(sample_id)
            .details(serde_json::json!({
                "sample_number": allocated.number,
                "customer_id": customer.id,
                "sample_type_id": sample_type.id,
                "status": status.as_str(),
                "parameters": parameters.len(),
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(%lab_id, sample_number = %allocated.number, "sample registered");
        self.get_sample(lab_id, sample_id).await
    }

    pub async fn update_sample(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        sample_id: Uuid,
        input: UpdateSampleInput,
    ) -> AppResult<SampleWithResults> {
        let mut tx = self.db.begin().await?;
        let existing = find_sample(&mut tx, lab_id, sample_id).await?;

        if !existing.status()?.is_editable() {
            return Err(AppError::InvalidStateTransition(format!(
                "Sample {} can no longer be edited ({})",
                existing.sample_number, existing.status
            )));
        }
        if let Some(customer_id) = input.customer_id {
            find_customer(&mut tx, lab_id, customer_id)
                .await
                .map_err(|e| e.not_found_as("customer_id", "Customer does not exist"))?;
        }

        sqlx::query(
            r#"
            UPDATE samples
            SET customer_id = $1, description = $2, batch_number = $3, quantity = $4, source = $5,
                collected_at = $6, received_at = $7, remarks = $8, updated_at = NOW()
            WHERE id = $9 AND lab_id = $10
            "#,
        )
        .bind(input.customer_id.unwrap_or(existing.customer_id))
        .bind(shared::patch(input.description.clone(), existing.description.clone()))
        .bind(shared::patch(input.batch_number.clone(), existing.batch_number.clone()))
        .bind(shared::patch(input.quantity.clone(), existing.quantity.clone()))
        .bind(shared::patch(input.source.clone(), existing.source.clone()))
        .bind(shared::patch(input.collected_at, existing.collected_at))
        .bind(input.received_at.unwrap_or(existing.received_at))
        .bind(shared::patch(input.remarks.clone(), existing.remarks.clone()))
        .bind(sample_id)
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "update", "sample")
            .entity(sample_id)
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_sample(lab_id, sample_id).await
    }

    pub async fn transition(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        sample_id: Uuid,
        next: SampleStatus,
    ) -> AppResult<SampleWithResults> {
        let mut tx = self.db.begin().await?;
        let sample = find_sample(&mut tx, lab_id, sample_id).await?;
        let current = sample.status()?;
        check_manual_transition(current, next)?;

        if next == SampleStatus::Completed {
            let unfinished = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM test_results WHERE sample_id = $1 AND status <> $2",
            )
            .bind(sample_id)
            .bind(TestResultStatus::Completed.as_str())
            .fetch_one(&mut *tx)
            .await?;
            if unfinished > 0 {
                return Err(AppError::InvalidStateTransition(format!(
                    "{} test result(s) are not completed",
                    unfinished
                )));
            }
        }

        set_sample_status(&mut tx, lab_id, &sample, next).await?;

        AuditEvent::new(lab_id, Some(user_id), "transition", "sample")
            .entity(sample_id)
            .details(serde_json::json!({ "from": current.as_str(), "to": next.as_str() }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_sample(lab_id, sample_id).await
    }

    /// Delete a sample that has not started testing and has no completed
    /// results; its pending result rows go with it.
    pub async fn delete_sample(&self, lab_id: Uuid, user_id: Uuid, sample_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let sample = find_sample(&mut tx, lab_id, sample_id).await?;

        if !sample.status()?.is_deletable() {
            return Err(AppError::DeleteBlocked(format!(
                "Cannot delete sample in status {}",
                sample.status
            )));
        }

        let (completed, reports) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM test_results WHERE sample_id = $1 AND status = $2),
                (SELECT COUNT(*) FROM reports WHERE sample_id = $1)
            "#,
        )
        .bind(sample_id)
        .bind(TestResultStatus::Completed.as_str())
        .fetch_one(&mut *tx)
        .await?;
        if completed > 0 || reports > 0 {
            return Err(AppError::DeleteBlocked(format!(
                "Cannot delete sample. It has {} completed result(s) and {} report(s).",
                completed, reports
            )));
        }

        sqlx::query("DELETE FROM samples WHERE id = $1 AND lab_id = $2")
            .bind(sample_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "delete", "sample")
            .entity(sample_id)
            .details(serde_json::json!({ "sample_number": sample.sample_number }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_transition_rules() {
        assert!(check_manual_transition(SampleStatus::Draft, SampleStatus::Registered).is_ok());
        assert!(check_manual_transition(SampleStatus::Completed, SampleStatus::Testing).is_ok());
        assert!(matches!(
            check_manual_transition(SampleStatus::Completed, SampleStatus::Reported),
            Err(AppError::InvalidStateTransition(_))
        ));
        assert!(matches!(
            check_manual_transition(SampleStatus::Registered, SampleStatus::Completed),
            Err(AppError::InvalidStateTransition(_))
        ));
        assert!(matches!(
            check_manual_transition(SampleStatus::Reported, SampleStatus::Completed),
            Err(AppError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn test_transition_input_parses_snake_case() {
        let input: TransitionInput = serde_json::from_str(r#"{"status":"testing"}"#).unwrap();
        assert_eq!(input.status, SampleStatus::Testing);
    }

    #[test]
    fn test_update_can_clear_optional_fields() {
        let input: UpdateSampleInput = serde_json::from_value(serde_json::json!({
            "batch_number": "B-7",
            "remarks": null,
            "collected_at": null,
        }))
        .unwrap();

        assert_eq!(input.batch_number, Some(Some("B-7".to_string())));
        assert_eq!(input.remarks, Some(None));
        assert_eq!(input.collected_at, Some(None));
        // untouched fields keep their stored value
        assert_eq!(input.description, None);
        assert_eq!(
            shared::patch(input.remarks, Some("Sealed".to_string())),
            None
        );
    }
}
