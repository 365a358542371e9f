//! Lab dashboard counters

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use shared::{InvoiceStatus, QuotationStatus, ReportStatus, SampleStatus};

#[derive(Clone)]
pub struct DashboardService {
    db: PgPool,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// Dashboard metrics
#[derive(Debug, Serialize)]
pub struct DashboardMetrics {
    pub samples_by_status: Vec<StatusCount>,
    pub samples_received_last_7_days: i64,
    pub reports_awaiting_review: i64,
    pub reports_awaiting_publication: i64,
    pub open_quotations: i64,
    pub unpaid_invoice_count: i64,
    pub unpaid_invoice_total: Decimal,
    pub currency: String,
}

/// Every sample status with a count, zero-filled and in workflow order
pub fn fill_status_counts(rows: Vec<StatusCount>) -> Vec<StatusCount> {
    [
        SampleStatus::Draft,
        SampleStatus::Registered,
        SampleStatus::Testing,
        SampleStatus::Completed,
        SampleStatus::Reported,
    ]
    .iter()
    .map(|status| StatusCount {
        status: status.as_str().to_string(),
        count: rows
            .iter()
            .find(|r| r.status == status.as_str())
            .map(|r| r.count)
            .unwrap_or(0),
    })
    .collect()
}

impl DashboardService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn get_metrics(&self, lab_id: Uuid) -> AppResult<DashboardMetrics> {
        let by_status = sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) AS count FROM samples WHERE lab_id = $1 GROUP BY status",
        )
        .bind(lab_id)
        .fetch_all(&self.db)
        .await?;

        // Received in the last 7 days
        let recent: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM samples
            WHERE lab_id = $1 AND received_at >= NOW() - INTERVAL '7 days'
            "#,
        )
        .bind(lab_id)
        .fetch_one(&self.db)
        .await?;

        let report_counts: (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = $2) AS in_review,
                COUNT(*) FILTER (WHERE status = $3) AS approved
            FROM reports WHERE lab_id = $1
            "#,
        )
        .bind(lab_id)
        .bind(ReportStatus::Review.as_str())
        .bind(ReportStatus::Approved.as_str())
        .fetch_one(&self.db)
        .await?;

        let open_quotations: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM quotations WHERE lab_id = $1 AND status = ANY($2)",
        )
        .bind(lab_id)
        .bind(vec![
            QuotationStatus::Draft.as_str(),
            QuotationStatus::Sent.as_str(),
            QuotationStatus::Accepted.as_str(),
        ])
        .fetch_one(&self.db)
        .await?;

        // Outstanding balance of issued tax invoices; proformas are not receivables
        let unpaid: (i64, Decimal) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(total - amount_paid), 0)
            FROM invoices
            WHERE lab_id = $1 AND invoice_type = 'tax' AND status = ANY($2)
            "#,
        )
        .bind(lab_id)
        .bind(vec![
            InvoiceStatus::Issued.as_str(),
            InvoiceStatus::PartiallyPaid.as_str(),
        ])
        .fetch_one(&self.db)
        .await?;

        let currency: String = sqlx::query_scalar("SELECT currency FROM labs WHERE id = $1")
            .bind(lab_id)
            .fetch_one(&self.db)
            .await?;

        Ok(DashboardMetrics {
            samples_by_status: fill_status_counts(by_status),
            samples_received_last_7_days: recent,
            reports_awaiting_review: report_counts.0,
            reports_awaiting_publication: report_counts.1,
            open_quotations,
            unpaid_invoice_count: unpaid.0,
            unpaid_invoice_total: unpaid.1,
            currency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_counts_zero_filled() {
        let counts = fill_status_counts(vec![
            StatusCount { status: "testing".into(), count: 4 },
            StatusCount { status: "registered".into(), count: 2 },
        ]);
        let pairs: Vec<(&str, i64)> = counts.iter().map(|c| (c.status.as_str(), c.count)).collect();
        assert_eq!(
            pairs,
            vec![("draft", 0), ("registered", 2), ("testing", 4), ("completed", 0), ("reported", 0)]
        );
    }
}
