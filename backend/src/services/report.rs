//! Test reports (certificates of analysis) and public verification

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use crate::services::customer::find_customer;
use crate::services::document::{format_timestamp, CoaDocument, CoaReport, DocumentRenderer, ResultLine, Signatory};
use crate::services::lab::load_lab;
use crate::services::numbering::generate_linked_number;
use crate::services::report_template::{default_template, find_template};
use crate::services::sample::{find_sample, set_sample_status};
use crate::services::test_result::{load_results, TestResult};
use shared::{PaginatedResponse, Pagination, ReportStatus, SampleStatus};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct ReportService {
    db: PgPool,
    secret: String,
    public_base_url: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Report {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub report_number: String,
    pub sample_id: Uuid,
    pub sample_number: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub template_id: Option<Uuid>,
    pub status: String,
    pub revision: i32,
    pub remarks: Option<String>,
    pub conclusion: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_by: Option<Uuid>,
    pub submitted_by: Option<Uuid>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub published_by: Option<Uuid>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    pub fn status(&self) -> AppResult<ReportStatus> {
        ReportStatus::from_str(&self.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown report status {}", self.status)))
    }
}

#[derive(Debug, Serialize)]
pub struct ReportDetail {
    #[serde(flatten)]
    pub report: Report,
    pub results: Vec<TestResult>,
    pub verification_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateReportInput {
    pub sample_id: Uuid,
    pub template_id: Option<Uuid>,
    pub remarks: Option<String>,
    pub conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateReportInput {
    #[serde(default, deserialize_with = "shared::nullable")]
    pub template_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub remarks: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub conclusion: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RejectReportInput {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportFilter {
    pub status: Option<String>,
    pub sample_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub search: Option<String>,
}

/// Public answer to a verification lookup
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct VerificationSummary {
    pub report_number: String,
    pub sample_number: String,
    pub sample_type: String,
    pub customer_name: String,
    pub lab_name: String,
    pub status: String,
    pub approved_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    #[sqlx(skip)]
    pub authentic: bool,
}

pub(crate) const REPORT_SELECT: &str = r#"
    SELECT r.id, r.lab_id, r.report_number, r.sample_id, s.sample_number, s.customer_id,
           c.name AS customer_name, r.template_id, r.status, r.revision, r.remarks, r.conclusion,
           r.rejection_reason, r.created_by, r.submitted_by, r.submitted_at, r.approved_by,
           r.approved_at, r.published_by, r.published_at, r.created_at, r.updated_at
    FROM reports r
    JOIN samples s ON s.id = r.sample_id
    JOIN customers c ON c.id = s.customer_id
"#;

pub async fn find_report(conn: &mut PgConnection, lab_id: Uuid, report_id: Uuid) -> AppResult<Report> {
    sqlx::query_as::<_, Report>(&format!("{} WHERE r.id = $1 AND r.lab_id = $2", REPORT_SELECT))
        .bind(report_id)
        .bind(lab_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Report".to_string()))
}

/// `hex(HMAC-SHA256(secret, token))`
pub fn sign_token(secret: &str, token: &str) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("HMAC key error: {}", e)))?;
    mac.update(token.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Split a `{token}.{signature}` code and check the signature. Returns the
/// token when the code is authentic.
pub fn check_verification_code<'a>(secret: &str, code: &'a str) -> Option<&'a str> {
    let (token, signature) = code.split_once('.')?;
    if token.is_empty() || token.len() > 64 {
        return None;
    }
    let expected = hex::decode(signature).ok()?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(token.as_bytes());
    mac.verify_slice(&expected).ok()?;
    Some(token)
}

/// Path of the public verification endpoint, relative to the server root
pub const VERIFY_PATH: &str = "/api/v1/verify";

/// Only the current certificate of a reported sample can be reissued
pub fn check_reissue(report: ReportStatus, sample: SampleStatus) -> AppResult<()> {
    if report != ReportStatus::Published {
        return Err(AppError::InvalidStateTransition(format!(
            "Only published reports can be reissued (currently {})",
            report
        )));
    }
    sample.transition(SampleStatus::Completed)?;
    Ok(())
}

pub fn verification_url(base_url: &str, code: &str) -> String {
    format!("{}{}/{}", base_url.trim_end_matches('/'), VERIFY_PATH, code)
}

async fn verification_code(conn: &mut PgConnection, report_id: Uuid) -> AppResult<Option<String>> {
    let row = sqlx::query_as::<_, (String, String)>(
        "SELECT token, signature FROM report_verifications WHERE report_id = $1",
    )
    .bind(report_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(token, signature)| format!("{}.{}", token, signature)))
}

impl ReportService {
    pub fn new(db: PgPool, secret: &str, public_base_url: &str) -> Self {
        Self {
            db,
            secret: secret.to_string(),
            public_base_url: public_base_url.to_string(),
        }
    }

    pub async fn list_reports(
        &self,
        lab_id: Uuid,
        filter: &ReportFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<Report>> {
        if let Some(ref status) = filter.status {
            if ReportStatus::from_str(status).is_none() {
                return Err(AppError::validation("status", "Unknown report status"));
            }
        }
        let search = filter.search.as_ref().map(|s| format!("%{}%", s.trim()));
        let conditions = r#"
            WHERE r.lab_id = $1
              AND ($2::text IS NULL OR r.status = $2)
              AND ($3::uuid IS NULL OR r.sample_id = $3)
              AND ($4::uuid IS NULL OR s.customer_id = $4)
              AND ($5::text IS NULL OR r.report_number ILIKE $5 OR s.sample_number ILIKE $5
                   OR c.name ILIKE $5)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            r#"
            SELECT COUNT(*) FROM reports r
            JOIN samples s ON s.id = r.sample_id
            JOIN customers c ON c.id = s.customer_id
            {}
            "#,
            conditions
        ))
        .bind(lab_id)
        .bind(&filter.status)
        .bind(filter.sample_id)
        .bind(filter.customer_id)
        .bind(&search)
        .fetch_one(&self.db)
        .await?;

        let reports = sqlx::query_as::<_, Report>(&format!(
            "{} {} ORDER BY r.created_at DESC LIMIT $6 OFFSET $7",
            REPORT_SELECT, conditions
        ))
        .bind(lab_id)
        .bind(&filter.status)
        .bind(filter.sample_id)
        .bind(filter.customer_id)
        .bind(&search)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(reports, pagination, total as u64))
    }

    pub async fn get_report(&self, lab_id: Uuid, report_id: Uuid) -> AppResult<ReportDetail> {
        let mut conn = self.db.acquire().await?;
        let report = find_report(&mut conn, lab_id, report_id).await?;
        let results = load_results(&mut conn, report.sample_id).await?;
        let verification_code = verification_code(&mut conn, report_id).await?;
        Ok(ReportDetail {
            report,
            results,
            verification_code,
        })
    }

    /// Draft a report for a completed sample. The number mirrors the
    /// sample's number; further reports of the same sample are revisions.
    pub async fn create_report(&self, lab_id: Uuid, user_id: Uuid, input: CreateReportInput) -> AppResult<ReportDetail> {
        let mut tx = self.db.begin().await?;
        let sample = find_sample(&mut tx, lab_id, input.sample_id)
            .await
            .map_err(|e| e.not_found_as("sample_id", "Sample does not exist"))?;
        if sample.status()? != SampleStatus::Completed {
            return Err(AppError::InvalidStateTransition(format!(
                "Sample {} must be completed before a report is created (currently {})",
                sample.sample_number, sample.status
            )));
        }

        let open = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM reports WHERE sample_id = $1 AND status NOT IN ($2, $3)",
        )
        .bind(sample.id)
        .bind(ReportStatus::Published.as_str())
        .bind(ReportStatus::Superseded.as_str())
        .fetch_one(&mut *tx)
        .await?;
        if open > 0 {
            return Err(AppError::Conflict(format!(
                "Sample {} already has a report in progress",
                sample.sample_number
            )));
        }

        let template_id = match input.template_id {
            Some(id) => Some(
                find_template(&mut tx, lab_id, id)
                    .await
                    .map_err(|e| e.not_found_as("template_id", "Template does not exist"))?
                    .id,
            ),
            None => default_template(&mut tx, lab_id).await?.map(|t| t.id),
        };

        let revision = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reports WHERE sample_id = $1")
            .bind(sample.id)
            .fetch_one(&mut *tx)
            .await?;
        let report_number = generate_linked_number(&mut tx, lab_id, sample.id).await?;

        let report_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO reports (lab_id, report_number, sample_id, template_id, status, revision,
                                 remarks, conclusion, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(lab_id)
        .bind(&report_number)
        .bind(sample.id)
        .bind(template_id)
        .bind(ReportStatus::Draft.as_str())
        .bind(revision as i32)
        .bind(&input.remarks)
        .bind(&input.conclusion)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::from(e).unique_as_conflict(format!(
                "Report number {} was taken by a concurrent request; try again",
                report_number
            ))
        })?;

        AuditEvent::new(lab_id, Some(user_id), "create", "report")
            .entity(report_id)
            .details(serde_json::json!({
                "report_number": report_number,
                "sample_number": sample.sample_number,
                "revision": revision,
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(%lab_id, %report_number, "report drafted");
        self.get_report(lab_id, report_id).await
    }

    pub async fn update_report(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        report_id: Uuid,
        input: UpdateReportInput,
    ) -> AppResult<ReportDetail> {
        let mut tx = self.db.begin().await?;
        let report = find_report(&mut tx, lab_id, report_id).await?;
        if !report.status()?.is_editable() {
            return Err(AppError::InvalidStateTransition(format!(
                "Report {} is {} and can no longer be edited",
                report.report_number, report.status
            )));
        }
        if let Some(Some(template_id)) = input.template_id {
            find_template(&mut tx, lab_id, template_id)
                .await
                .map_err(|e| e.not_found_as("template_id", "Template does not exist"))?;
        }

        sqlx::query(
            r#"
            UPDATE reports
            SET template_id = $1, remarks = $2, conclusion = $3, updated_at = NOW()
            WHERE id = $4 AND lab_id = $5
            "#,
        )
        .bind(shared::patch(input.template_id, report.template_id))
        .bind(shared::patch(input.remarks.clone(), report.remarks.clone()))
        .bind(shared::patch(input.conclusion.clone(), report.conclusion.clone()))
        .bind(report_id)
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "update", "report")
            .entity(report_id)
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_report(lab_id, report_id).await
    }

    /// draft → review
    pub async fn submit_report(&self, lab_id: Uuid, user_id: Uuid, report_id: Uuid) -> AppResult<ReportDetail> {
        let mut tx = self.db.begin().await?;
        let report = find_report(&mut tx, lab_id, report_id).await?;
        report.status()?.transition(ReportStatus::Review)?;

        sqlx::query(
            r#"
            UPDATE reports
            SET status = $1, submitted_by = $2, submitted_at = NOW(), rejection_reason = NULL,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(ReportStatus::Review.as_str())
        .bind(user_id)
        .bind(report_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "submit", "report")
            .entity(report_id)
            .details(serde_json::json!({ "report_number": report.report_number }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_report(lab_id, report_id).await
    }

    /// review → approved; issues the verification code
    pub async fn approve_report(&self, lab_id: Uuid, user_id: Uuid, report_id: Uuid) -> AppResult<ReportDetail> {
        let mut tx = self.db.begin().await?;
        let report = find_report(&mut tx, lab_id, report_id).await?;
        report.status()?.transition(ReportStatus::Approved)?;

        sqlx::query(
            r#"
            UPDATE reports
            SET status = $1, approved_by = $2, approved_at = NOW(), updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(ReportStatus::Approved.as_str())
        .bind(user_id)
        .bind(report_id)
        .execute(&mut *tx)
        .await?;

        let token = Uuid::new_v4().simple().to_string();
        let signature = sign_token(&self.secret, &token)?;
        sqlx::query(
            r#"
            INSERT INTO report_verifications (lab_id, report_id, token, signature)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (report_id) DO UPDATE SET token = EXCLUDED.token,
                signature = EXCLUDED.signature, created_at = NOW()
            "#,
        )
        .bind(lab_id)
        .bind(report_id)
        .bind(&token)
        .bind(&signature)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "approve", "report")
            .entity(report_id)
            .details(serde_json::json!({ "report_number": report.report_number }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(%lab_id, report_number = %report.report_number, "report approved");
        self.get_report(lab_id, report_id).await
    }

    /// review → draft with a reason for the author
    pub async fn reject_report(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        report_id: Uuid,
        input: RejectReportInput,
    ) -> AppResult<ReportDetail> {
        let reason = input.reason.trim();
        if reason.is_empty() {
            return Err(AppError::validation("reason", "A rejection reason is required"));
        }

        let mut tx = self.db.begin().await?;
        let report = find_report(&mut tx, lab_id, report_id).await?;
        let current = report.status()?;
        if current != ReportStatus::Review {
            return Err(AppError::InvalidStateTransition(format!(
                "Only reports under review can be rejected (currently {})",
                current
            )));
        }
        current.transition(ReportStatus::Draft)?;

        sqlx::query(
            r#"
            UPDATE reports
            SET status = $1, rejection_reason = $2, submitted_by = NULL, submitted_at = NULL,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(ReportStatus::Draft.as_str())
        .bind(reason)
        .bind(report_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "reject", "report")
            .entity(report_id)
            .details(serde_json::json!({ "reason": reason }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_report(lab_id, report_id).await
    }

    /// approved → published; the sample becomes reported
    pub async fn publish_report(&self, lab_id: Uuid, user_id: Uuid, report_id: Uuid) -> AppResult<ReportDetail> {
        let mut tx = self.db.begin().await?;
        let report = find_report(&mut tx, lab_id, report_id).await?;
        report.status()?.transition(ReportStatus::Published)?;

        sqlx::query(
            r#"
            UPDATE reports
            SET status = $1, published_by = $2, published_at = NOW(), updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(ReportStatus::Published.as_str())
        .bind(user_id)
        .bind(report_id)
        .execute(&mut *tx)
        .await?;

        let sample = find_sample(&mut tx, lab_id, report.sample_id).await?;
        if sample.status()? != SampleStatus::Reported {
            set_sample_status(&mut tx, lab_id, &sample, SampleStatus::Reported).await?;
        }

        // Earlier certificates of the sample stop verifying as current
        let superseded = sqlx::query(
            "UPDATE reports SET status = $1, updated_at = NOW() WHERE sample_id = $2 AND id <> $3 AND status = $4",
        )
        .bind(ReportStatus::Superseded.as_str())
        .bind(report.sample_id)
        .bind(report_id)
        .bind(ReportStatus::Published.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        AuditEvent::new(lab_id, Some(user_id), "publish", "report")
            .entity(report_id)
            .details(serde_json::json!({
                "report_number": report.report_number,
                "sample_number": sample.sample_number,
                "superseded": superseded,
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(%lab_id, report_number = %report.report_number, "report published");
        self.get_report(lab_id, report_id).await
    }

    /// Reopen the sample of a published report so a corrected revision can
    /// be drafted. The published certificate stays valid until the revision
    /// is published.
    pub async fn reissue_report(&self, lab_id: Uuid, user_id: Uuid, report_id: Uuid) -> AppResult<ReportDetail> {
        let mut tx = self.db.begin().await?;
        let report = find_report(&mut tx, lab_id, report_id).await?;
        let sample = find_sample(&mut tx, lab_id, report.sample_id).await?;
        check_reissue(report.status()?, sample.status()?)?;

        set_sample_status(&mut tx, lab_id, &sample, SampleStatus::Completed).await?;

        AuditEvent::new(lab_id, Some(user_id), "reissue", "report")
            .entity(report_id)
            .details(serde_json::json!({
                "report_number": report.report_number,
                "sample_number": sample.sample_number,
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(%lab_id, report_number = %report.report_number, "report reopened for reissue");
        self.get_report(lab_id, report_id).await
    }

    pub async fn delete_report(&self, lab_id: Uuid, user_id: Uuid, report_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let report = find_report(&mut tx, lab_id, report_id).await?;
        if !report.status()?.is_deletable() {
            return Err(AppError::DeleteBlocked(format!(
                "Only draft reports can be deleted (currently {})",
                report.status
            )));
        }

        sqlx::query("DELETE FROM reports WHERE id = $1 AND lab_id = $2")
            .bind(report_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "delete", "report")
            .entity(report_id)
            .details(serde_json::json!({ "report_number": report.report_number }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Render the certificate of analysis as printable HTML
    pub async fn render_coa(&self, renderer: &DocumentRenderer, lab_id: Uuid, report_id: Uuid) -> AppResult<String> {
        let mut conn = self.db.acquire().await?;
        let report = find_report(&mut conn, lab_id, report_id).await?;
        let lab = load_lab(&mut *conn, lab_id).await?;
        let sample = find_sample(&mut conn, lab_id, report.sample_id).await?;
        let customer = find_customer(&mut conn, lab_id, sample.customer_id).await?;
        let results = load_results(&mut conn, sample.id).await?;
        let template = match report.template_id {
            Some(id) => Some(find_template(&mut conn, lab_id, id).await?),
            None => None,
        };
        let code = verification_code(&mut conn, report_id).await?;
        let signatories = load_signatories(&mut conn, &report).await?;

        let status = report.status()?;
        let document = CoaDocument {
            lab: &lab,
            customer: &customer,
            sample: &sample,
            report: CoaReport {
                report_number: &report.report_number,
                status: status.as_str(),
                conclusion: report.conclusion.as_deref(),
                remarks: report.remarks.as_deref(),
            },
            results: results
                .iter()
                .enumerate()
                .map(|(i, r)| ResultLine::from_result(i + 1, r))
                .collect(),
            signatories,
            verification_url: code.map(|c| verification_url(&self.public_base_url, &c)),
            header_text: template.as_ref().and_then(|t| t.header_text.as_deref()),
            footer_text: template.as_ref().and_then(|t| t.footer_text.as_deref()),
            issued_on: report
                .published_at
                .or(report.approved_at)
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string()),
            received_on: format_timestamp(sample.received_at),
            is_final: status.is_public(),
        };

        renderer.render_coa(
            &document,
            template.as_ref().and_then(|t| t.body_template.as_deref()),
        )
    }

    /// Public authenticity check of a printed verification code
    pub async fn verify(&self, code: &str) -> AppResult<VerificationSummary> {
        let token = check_verification_code(&self.secret, code)
            .ok_or_else(|| AppError::NotFound("Verification code".to_string()))?;

        let mut summary = sqlx::query_as::<_, VerificationSummary>(
            r#"
            SELECT r.report_number, s.sample_number, st.name AS sample_type,
                   c.name AS customer_name, l.name AS lab_name, r.status, r.approved_at,
                   r.published_at
            FROM report_verifications v
            JOIN reports r ON r.id = v.report_id
            JOIN samples s ON s.id = r.sample_id
            JOIN sample_types st ON st.id = s.sample_type_id
            JOIN customers c ON c.id = s.customer_id
            JOIN labs l ON l.id = r.lab_id
            WHERE v.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Verification code".to_string()))?;

        summary.authentic = ReportStatus::from_str(&summary.status).is_some_and(|s| s.is_public());
        Ok(summary)
    }
}

async fn load_signatories(conn: &mut PgConnection, report: &Report) -> AppResult<Vec<Signatory>> {
    let mut signatories = Vec::new();
    for (user_id, role) in [
        (report.submitted_by, "Analysed by"),
        (report.approved_by, "Authorised signatory"),
    ] {
        let Some(user_id) = user_id else { continue };
        let signatory = sqlx::query_as::<_, Signatory>(
            "SELECT name, designation, signature_url FROM users WHERE id = $1 AND lab_id = $2",
        )
        .bind(user_id)
        .bind(report.lab_id)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(mut signatory) = signatory {
            signatory.role = role.to_string();
            signatories.push(signatory);
        }
    }
    Ok(signatories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{format_linked_number, DocumentNumber};

    const SECRET: &str = "test-secret";

    #[test]
    fn test_verification_code_roundtrip() {
        let token = "3f2a9c0e7b1d4e5f8a6b7c8d9e0f1a2b";
        let code = format!("{}.{}", token, sign_token(SECRET, token).unwrap());
        assert_eq!(check_verification_code(SECRET, &code), Some(token));
    }

    #[test]
    fn test_tampered_codes_rejected() {
        let token = "3f2a9c0e7b1d4e5f8a6b7c8d9e0f1a2b";
        let signature = sign_token(SECRET, token).unwrap();

        let other_token = format!("{}.{}", "0000000000000000000000000000000", signature);
        assert_eq!(check_verification_code(SECRET, &other_token), None);

        let wrong_secret = format!("{}.{}", token, sign_token("other", token).unwrap());
        assert_eq!(check_verification_code(SECRET, &wrong_secret), None);

        assert_eq!(check_verification_code(SECRET, token), None);
        assert_eq!(check_verification_code(SECRET, &format!("{}.zz", token)), None);
    }

    #[test]
    fn test_reissue_needs_published_report_and_reported_sample() {
        assert!(check_reissue(ReportStatus::Published, SampleStatus::Reported).is_ok());
        for status in [ReportStatus::Draft, ReportStatus::Approved, ReportStatus::Superseded] {
            assert!(matches!(
                check_reissue(status, SampleStatus::Reported),
                Err(AppError::InvalidStateTransition(_))
            ));
        }
        // Already reopened: the sample is back to completed
        assert!(check_reissue(ReportStatus::Published, SampleStatus::Completed).is_err());
    }

    #[test]
    fn test_reissued_sample_gets_revision_number() {
        // First report mirrors the sample; the one drafted after a reissue is R1
        let sample = DocumentNumber::parse("SMP-240305-007").unwrap();
        assert_eq!(
            format_linked_number("RPT", sample.date, sample.sequence, 0),
            "RPT-240305-007"
        );
        let status = SampleStatus::Reported.transition(SampleStatus::Completed).unwrap();
        assert_eq!(status, SampleStatus::Completed);
        assert_eq!(
            format_linked_number("RPT", sample.date, sample.sequence, 1),
            "RPT-240305-007-R1"
        );
    }

    #[test]
    fn test_verification_url() {
        assert_eq!(
            verification_url("https://lims.example.com/", "a.b"),
            "https://lims.example.com/api/v1/verify/a.b"
        );
    }
}
