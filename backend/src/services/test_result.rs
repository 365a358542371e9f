//! Test result entry, completion and reopening

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use crate::services::sample::{find_sample, set_sample_status};
use shared::{evaluate_result, SampleStatus, SpecLimits, TestResultStatus};

#[derive(Clone)]
pub struct TestResultService {
    db: PgPool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TestResult {
    pub id: Uuid,
    pub sample_id: Uuid,
    pub parameter_id: Option<Uuid>,
    pub parameter_name: String,
    pub method: Option<String>,
    pub unit: Option<String>,
    pub spec_min: Option<Decimal>,
    pub spec_max: Option<Decimal>,
    pub value: Option<Decimal>,
    pub evaluation: Option<String>,
    pub status: String,
    pub remarks: Option<String>,
    pub sort_order: i32,
    pub tested_by: Option<Uuid>,
    pub tested_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TestResult {
    pub fn status(&self) -> AppResult<TestResultStatus> {
        TestResultStatus::from_str(&self.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown result status {}", self.status)))
    }

    pub fn limits(&self) -> SpecLimits {
        SpecLimits::new(self.spec_min, self.spec_max)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultEntry {
    pub result_id: Uuid,
    pub value: Option<Decimal>,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordResultsInput {
    pub results: Vec<ResultEntry>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateResultInput {
    pub value: Option<Decimal>,
    pub remarks: Option<String>,
}

const RESULT_COLUMNS: &str = r#"
    id, sample_id, parameter_id, parameter_name, method, unit, spec_min, spec_max, value,
    evaluation, status, remarks, sort_order, tested_by, tested_at, completed_at
"#;

pub async fn load_results(conn: &mut PgConnection, sample_id: Uuid) -> AppResult<Vec<TestResult>> {
    let results = sqlx::query_as::<_, TestResult>(&format!(
        "SELECT {} FROM test_results WHERE sample_id = $1 ORDER BY sort_order, parameter_name",
        RESULT_COLUMNS
    ))
    .bind(sample_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(results)
}

async fn find_result(conn: &mut PgConnection, lab_id: Uuid, result_id: Uuid) -> AppResult<TestResult> {
    sqlx::query_as::<_, TestResult>(&format!(
        "SELECT {} FROM test_results WHERE id = $1 AND lab_id = $2",
        RESULT_COLUMNS
    ))
    .bind(result_id)
    .bind(lab_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Test result".to_string()))
}

/// Results can be entered while the sample is registered or under test
pub fn check_entry_allowed(sample_status: SampleStatus) -> AppResult<()> {
    match sample_status {
        SampleStatus::Registered | SampleStatus::Testing => Ok(()),
        SampleStatus::Draft => Err(AppError::InvalidStateTransition(
            "Register the sample before entering results".to_string(),
        )),
        other => Err(AppError::InvalidStateTransition(format!(
            "Results of a {} sample are locked",
            other
        ))),
    }
}

impl TestResultService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_results(&self, lab_id: Uuid, sample_id: Uuid) -> AppResult<Vec<TestResult>> {
        let mut conn = self.db.acquire().await?;
        find_sample(&mut conn, lab_id, sample_id).await?;
        load_results(&mut conn, sample_id).await
    }

    /// Enter or overwrite values for pending results of one sample. The first
    /// entry moves a registered sample into testing.
    pub async fn record_results(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        sample_id: Uuid,
        input: RecordResultsInput,
    ) -> AppResult<Vec<TestResult>> {
        if input.results.is_empty() {
            return Err(AppError::validation("results", "At least one result is required"));
        }

        let mut tx = self.db.begin().await?;
        let sample = find_sample(&mut tx, lab_id, sample_id).await?;
        let sample_status = sample.status()?;
        check_entry_allowed(sample_status)?;

        let mut evaluations = Vec::with_capacity(input.results.len());
        for entry in &input.results {
            let result = find_result(&mut tx, lab_id, entry.result_id).await?;
            if result.sample_id != sample_id {
                return Err(AppError::validation(
                    "result_id",
                    "Result does not belong to this sample",
                ));
            }
            if result.status()? == TestResultStatus::Completed {
                return Err(AppError::InvalidStateTransition(format!(
                    "{} is completed; reopen it before editing",
                    result.parameter_name
                )));
            }

            let evaluation = evaluate_result(entry.value, &result.limits());
            sqlx::query(
                r#"
                UPDATE test_results
                SET value = $1, evaluation = $2, remarks = COALESCE($3, remarks),
                    tested_by = $4, tested_at = NOW(), updated_at = NOW()
                WHERE id = $5
                "#,
            )
            .bind(entry.value)
            .bind(entry.value.map(|_| evaluation.as_str()))
            .bind(&entry.remarks)
            .bind(user_id)
            .bind(result.id)
            .execute(&mut *tx)
            .await?;

            evaluations.push(serde_json::json!({
                "parameter": result.parameter_name,
                "value": entry.value,
                "evaluation": evaluation.as_str(),
            }));
        }

        if sample_status == SampleStatus::Registered {
            set_sample_status(&mut tx, lab_id, &sample, SampleStatus::Testing).await?;
        }

        AuditEvent::new(lab_id, Some(user_id), "record_results", "sample")
            .entity(sample_id)
            .details(serde_json::json!({ "results": evaluations }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut conn = self.db.acquire().await?;
        load_results(&mut conn, sample_id).await
    }

    pub async fn update_result(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        result_id: Uuid,
        input: UpdateResultInput,
    ) -> AppResult<TestResult> {
        let mut conn = self.db.acquire().await?;
        let result = find_result(&mut conn, lab_id, result_id).await?;
        drop(conn);

        self.record_results(
            lab_id,
            user_id,
            result.sample_id,
            RecordResultsInput {
                results: vec![ResultEntry {
                    result_id,
                    value: input.value,
                    remarks: input.remarks,
                }],
            },
        )
        .await?
        .into_iter()
        .find(|r| r.id == result_id)
        .ok_or_else(|| AppError::NotFound("Test result".to_string()))
    }

    /// Lock every result of a testing sample and mark the sample completed
    pub async fn complete_results(&self, lab_id: Uuid, user_id: Uuid, sample_id: Uuid) -> AppResult<Vec<TestResult>> {
        let mut tx = self.db.begin().await?;
        let sample = find_sample(&mut tx, lab_id, sample_id).await?;
        let results = load_results(&mut tx, sample_id).await?;

        if results.is_empty() {
            return Err(AppError::InvalidStateTransition(
                "Sample has no test results".to_string(),
            ));
        }
        let missing: Vec<&str> = results
            .iter()
            .filter(|r| r.value.is_none())
            .map(|r| r.parameter_name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::InvalidStateTransition(format!(
                "Missing values for: {}",
                missing.join(", ")
            )));
        }

        sqlx::query(
            r#"
            UPDATE test_results
            SET status = $1, completed_at = NOW(), updated_at = NOW()
            WHERE sample_id = $2 AND status <> $1
            "#,
        )
        .bind(TestResultStatus::Completed.as_str())
        .bind(sample_id)
        .execute(&mut *tx)
        .await?;

        set_sample_status(&mut tx, lab_id, &sample, SampleStatus::Completed).await?;

        let failed = results
            .iter()
            .filter(|r| r.evaluation.as_deref() == Some("fail"))
            .count();
        AuditEvent::new(lab_id, Some(user_id), "complete_results", "sample")
            .entity(sample_id)
            .details(serde_json::json!({ "results": results.len(), "failed": failed }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut conn = self.db.acquire().await?;
        load_results(&mut conn, sample_id).await
    }

    /// Unlock a completed result for correction. A completed sample goes
    /// back to testing.
    pub async fn reopen_result(&self, lab_id: Uuid, user_id: Uuid, result_id: Uuid) -> AppResult<TestResult> {
        let mut tx = self.db.begin().await?;
        let result = find_result(&mut tx, lab_id, result_id).await?;
        let sample = find_sample(&mut tx, lab_id, result.sample_id).await?;
        let sample_status = sample.status()?;

        if sample_status == SampleStatus::Reported {
            return Err(AppError::InvalidStateTransition(
                "Results of a reported sample cannot be reopened".to_string(),
            ));
        }
        if result.status()? != TestResultStatus::Completed {
            return Err(AppError::InvalidStateTransition(
                "Only completed results can be reopened".to_string(),
            ));
        }

        sqlx::query(
            "UPDATE test_results SET status = $1, completed_at = NULL, updated_at = NOW() WHERE id = $2",
        )
        .bind(TestResultStatus::Pending.as_str())
        .bind(result_id)
        .execute(&mut *tx)
        .await?;

        if sample_status == SampleStatus::Completed {
            set_sample_status(&mut tx, lab_id, &sample, SampleStatus::Testing).await?;
        }

        AuditEvent::new(lab_id, Some(user_id), "reopen", "test_result")
            .entity(result_id)
            .details(serde_json::json!({
                "sample_id": sample.id,
                "parameter": result.parameter_name,
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut conn = self.db.acquire().await?;
        find_result(&mut conn, lab_id, result_id).await
    }

    pub async fn delete_result(&self, lab_id: Uuid, user_id: Uuid, result_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let result = find_result(&mut tx, lab_id, result_id).await?;

        if !result.status()?.is_deletable() {
            return Err(AppError::DeleteBlocked(
                "Completed test results cannot be deleted".to_string(),
            ));
        }
        let sample = find_sample(&mut tx, lab_id, result.sample_id).await?;
        if !matches!(
            sample.status()?,
            SampleStatus::Draft | SampleStatus::Registered | SampleStatus::Testing
        ) {
            return Err(AppError::DeleteBlocked(format!(
                "Cannot delete results of a {} sample",
                sample.status
            )));
        }

        sqlx::query("DELETE FROM test_results WHERE id = $1 AND lab_id = $2")
            .bind(result_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "delete", "test_result")
            .entity(result_id)
            .details(serde_json::json!({
                "sample_id": sample.id,
                "parameter": result.parameter_name,
            }))
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
    fn test_entry_allowed_only_while_open() {
        assert!(check_entry_allowed(SampleStatus::Registered).is_ok());
        assert!(check_entry_allowed(SampleStatus::Testing).is_ok());
        assert!(check_entry_allowed(SampleStatus::Draft).is_err());
        assert!(check_entry_allowed(SampleStatus::Completed).is_err());
        assert!(check_entry_allowed(SampleStatus::Reported).is_err());
    }
}
