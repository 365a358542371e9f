//! Quotations and their conversion into contracts

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use crate::services::contract::{check_period, insert_contract, lab_currency, resolve_currency, ContractDetail, ContractService, NewContract};
use crate::services::customer::find_customer;
use crate::services::document::{format_date, BillingDocument, DocumentRenderer, TotalsView};
use crate::services::lab::load_lab;
use crate::services::line_items::{insert_items, load_items, price_items, replace_items, ItemTable, LineItem};
use crate::services::numbering::generate_next_number;
use shared::{DocumentModule, DocumentTotals, LineItemInput, PaginatedResponse, Pagination, QuotationStatus};

#[derive(Clone)]
pub struct QuotationService {
    db: PgPool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Quotation {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub quotation_number: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub status: String,
    pub issue_date: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    pub currency: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub contract_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quotation {
    pub fn status(&self) -> AppResult<QuotationStatus> {
        QuotationStatus::from_str(&self.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown quotation status {}", self.status)))
    }

    pub fn totals(&self) -> DocumentTotals {
        DocumentTotals {
            subtotal: self.subtotal,
            discount_total: self.discount_total,
            tax_total: self.tax_total,
            total: self.total,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QuotationDetail {
    #[serde(flatten)]
    pub quotation: Quotation,
    pub items: Vec<LineItem>,
}

#[derive(Debug, Deserialize)]
pub struct CreateQuotationInput {
    pub customer_id: Uuid,
    pub issue_date: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub currency: Option<String>,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub items: Vec<LineItemInput>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuotationInput {
    pub issue_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub valid_until: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub terms: Option<Option<String>>,
    pub items: Option<Vec<LineItemInput>>,
}

#[derive(Debug, Deserialize)]
pub struct QuotationTransitionInput {
    pub status: QuotationStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConvertQuotationInput {
    pub title: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuotationFilter {
    pub status: Option<String>,
    pub customer_id: Option<Uuid>,
    pub search: Option<String>,
}

const QUOTATION_SELECT: &str = r#"
    SELECT q.id, q.lab_id, q.quotation_number, q.customer_id, c.name AS customer_name, q.status,
           q.issue_date, q.valid_until, q.currency, q.subtotal, q.discount_total, q.tax_total,
           q.total, q.notes, q.terms, q.contract_id, q.created_by, q.created_at, q.updated_at
    FROM quotations q
    JOIN customers c ON c.id = q.customer_id
"#;

async fn find_quotation(conn: &mut PgConnection, lab_id: Uuid, quotation_id: Uuid) -> AppResult<Quotation> {
    sqlx::query_as::<_, Quotation>(&format!("{} WHERE q.id = $1 AND q.lab_id = $2", QUOTATION_SELECT))
        .bind(quotation_id)
        .bind(lab_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Quotation".to_string()))
}

/// Manual status changes; conversion has its own operation
pub fn check_quotation_transition(current: QuotationStatus, next: QuotationStatus) -> AppResult<()> {
    if next == QuotationStatus::Converted {
        return Err(AppError::InvalidStateTransition(
            "Quotations are converted through the convert operation".to_string(),
        ));
    }
    current.transition(next)?;
    Ok(())
}

fn check_validity(issue_date: NaiveDate, valid_until: Option<NaiveDate>) -> AppResult<()> {
    if valid_until.is_some_and(|v| v < issue_date) {
        return Err(AppError::validation("valid_until", "Validity ends before the issue date"));
    }
    Ok(())
}

impl QuotationService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_quotations(
        &self,
        lab_id: Uuid,
        filter: &QuotationFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<Quotation>> {
        let search = filter.search.as_ref().map(|s| format!("%{}%", s.trim()));
        let conditions = r#"
            WHERE q.lab_id = $1
              AND ($2::text IS NULL OR q.status = $2)
              AND ($3::uuid IS NULL OR q.customer_id = $3)
              AND ($4::text IS NULL OR q.quotation_number ILIKE $4 OR c.name ILIKE $4)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM quotations q JOIN customers c ON c.id = q.customer_id {}",
            conditions
        ))
        .bind(lab_id)
        .bind(&filter.status)
        .bind(filter.customer_id)
        .bind(&search)
        .fetch_one(&self.db)
        .await?;

        let quotations = sqlx::query_as::<_, Quotation>(&format!(
            "{} {} ORDER BY q.issue_date DESC, q.quotation_number DESC LIMIT $5 OFFSET $6",
            QUOTATION_SELECT, conditions
        ))
        .bind(lab_id)
        .bind(&filter.status)
        .bind(filter.customer_id)
        .bind(&search)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(quotations, pagination, total as u64))
    }

    pub async fn get_quotation(&self, lab_id: Uuid, quotation_id: Uuid) -> AppResult<QuotationDetail> {
        let mut conn = self.db.acquire().await?;
        let quotation = find_quotation(&mut conn, lab_id, quotation_id).await?;
        let items = load_items(&mut conn, ItemTable::Quotation, quotation_id).await?;
        Ok(QuotationDetail { quotation, items })
    }

    pub async fn create_quotation(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        input: CreateQuotationInput,
    ) -> AppResult<QuotationDetail> {
        let issue_date = input.issue_date.unwrap_or_else(|| Utc::now().date_naive());
        check_validity(issue_date, input.valid_until)?;
        let totals = price_items(&input.items)?;

        let mut tx = self.db.begin().await?;
        find_customer(&mut tx, lab_id, input.customer_id)
            .await
            .map_err(|e| e.not_found_as("customer_id", "Customer does not exist"))?;
        let currency = resolve_currency(input.currency.as_deref(), &lab_currency(&mut tx, lab_id).await?)?;
        let allocated = generate_next_number(&mut *tx, lab_id, DocumentModule::Quotation).await?;

        let quotation_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO quotations (lab_id, quotation_number, customer_id, status, issue_date,
                                    valid_until, currency, subtotal, discount_total, tax_total,
                                    total, notes, terms, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id
            "#,
        )
        .bind(lab_id)
        .bind(&allocated.number)
        .bind(input.customer_id)
        .bind(QuotationStatus::Draft.as_str())
        .bind(issue_date)
        .bind(input.valid_until)
        .bind(&currency)
        .bind(totals.subtotal)
        .bind(totals.discount_total)
        .bind(totals.tax_total)
        .bind(totals.total)
        .bind(&input.notes)
        .bind(&input.terms)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        insert_items(&mut tx, ItemTable::Quotation, quotation_id, &input.items).await?;

        AuditEvent::new(lab_id, Some(user_id), "create", "quotation")
            .entity(quotation_id)
            .details(serde_json::json!({
                "quotation_number": allocated.number,
                "total": totals.total,
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_quotation(lab_id, quotation_id).await
    }

    pub async fn update_quotation(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        quotation_id: Uuid,
        input: UpdateQuotationInput,
    ) -> AppResult<QuotationDetail> {
        let mut tx = self.db.begin().await?;
        let existing = find_quotation(&mut tx, lab_id, quotation_id).await?;
        if !existing.status()?.is_editable() {
            return Err(AppError::InvalidStateTransition(format!(
                "Quotation {} is {} and can no longer be edited",
                existing.quotation_number, existing.status
            )));
        }

        let issue_date = input.issue_date.unwrap_or(existing.issue_date);
        let valid_until = shared::patch(input.valid_until, existing.valid_until);
        check_validity(issue_date, valid_until)?;

        let totals = match input.items {
            Some(ref items) => {
                let totals = price_items(items)?;
                replace_items(&mut tx, ItemTable::Quotation, quotation_id, items).await?;
                totals
            }
            None => existing.totals(),
        };

        sqlx::query(
            r#"
            UPDATE quotations
            SET issue_date = $1, valid_until = $2, notes = $3, terms = $4, subtotal = $5,
                discount_total = $6, tax_total = $7, total = $8, updated_at = NOW()
            WHERE id = $9 AND lab_id = $10
            "#,
        )
        .bind(issue_date)
        .bind(valid_until)
        .bind(shared::patch(input.notes.clone(), existing.notes.clone()))
        .bind(shared::patch(input.terms.clone(), existing.terms.clone()))
        .bind(totals.subtotal)
        .bind(totals.discount_total)
        .bind(totals.tax_total)
        .bind(totals.total)
        .bind(quotation_id)
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "update", "quotation")
            .entity(quotation_id)
            .details(serde_json::json!({ "total": totals.total }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_quotation(lab_id, quotation_id).await
    }

    pub async fn transition(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        quotation_id: Uuid,
        next: QuotationStatus,
    ) -> AppResult<QuotationDetail> {
        let mut tx = self.db.begin().await?;
        let quotation = find_quotation(&mut tx, lab_id, quotation_id).await?;
        let current = quotation.status()?;
        check_quotation_transition(current, next)?;

        sqlx::query("UPDATE quotations SET status = $1, updated_at = NOW() WHERE id = $2 AND lab_id = $3")
            .bind(next.as_str())
            .bind(quotation_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "transition", "quotation")
            .entity(quotation_id)
            .details(serde_json::json!({ "from": current.as_str(), "to": next.as_str() }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_quotation(lab_id, quotation_id).await
    }

    pub async fn delete_quotation(&self, lab_id: Uuid, user_id: Uuid, quotation_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let quotation = find_quotation(&mut tx, lab_id, quotation_id).await?;
        if !quotation.status()?.is_deletable() {
            return Err(AppError::DeleteBlocked(format!(
                "Only draft quotations can be deleted (currently {})",
                quotation.status
            )));
        }

        sqlx::query("DELETE FROM quotations WHERE id = $1 AND lab_id = $2")
            .bind(quotation_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "delete", "quotation")
            .entity(quotation_id)
            .details(serde_json::json!({ "quotation_number": quotation.quotation_number }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Create a contract carrying the quotation's items and totals. Both
    /// writes share one transaction.
    pub async fn convert_to_contract(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        quotation_id: Uuid,
        input: ConvertQuotationInput,
    ) -> AppResult<ContractDetail> {
        check_period(input.start_date, input.end_date)?;

        let mut tx = self.db.begin().await?;
        let quotation = find_quotation(&mut tx, lab_id, quotation_id).await?;
        if !quotation.status()?.can_convert() {
            return Err(AppError::InvalidStateTransition(format!(
                "Quotation {} cannot be converted while {}",
                quotation.quotation_number, quotation.status
            )));
        }

        let items: Vec<LineItemInput> = load_items(&mut tx, ItemTable::Quotation, quotation_id)
            .await?
            .iter()
            .map(LineItemInput::from)
            .collect();
        let default_title = format!("Contract for {}", quotation.quotation_number);
        let title = input
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&default_title);

        let (contract_id, contract_number) = insert_contract(
            &mut tx,
            lab_id,
            user_id,
            &NewContract {
                customer_id: quotation.customer_id,
                quotation_id: Some(quotation_id),
                title,
                start_date: input.start_date,
                end_date: input.end_date,
                currency: &quotation.currency,
                terms: quotation.terms.as_deref(),
            },
            &items,
            &quotation.totals(),
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE quotations
            SET status = $1, contract_id = $2, updated_at = NOW()
            WHERE id = $3 AND lab_id = $4
            "#,
        )
        .bind(QuotationStatus::Converted.as_str())
        .bind(contract_id)
        .bind(quotation_id)
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "convert", "quotation")
            .entity(quotation_id)
            .details(serde_json::json!({
                "quotation_number": quotation.quotation_number,
                "contract_id": contract_id,
                "contract_number": contract_number,
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            %lab_id,
            quotation = %quotation.quotation_number,
            contract = %contract_number,
            "quotation converted to contract"
        );
        ContractService::new(self.db.clone())
            .get_contract(lab_id, contract_id)
            .await
    }

    pub async fn render_print(&self, renderer: &DocumentRenderer, lab_id: Uuid, quotation_id: Uuid) -> AppResult<String> {
        let mut conn = self.db.acquire().await?;
        let quotation = find_quotation(&mut conn, lab_id, quotation_id).await?;
        let items = load_items(&mut conn, ItemTable::Quotation, quotation_id).await?;
        let lab = load_lab(&mut *conn, lab_id).await?;
        let customer = find_customer(&mut conn, lab_id, quotation.customer_id).await?;

        let status = quotation.status()?;
        let document = BillingDocument {
            title: "Quotation",
            number: &quotation.quotation_number,
            status_note: match status {
                QuotationStatus::Draft => Some("DRAFT".to_string()),
                QuotationStatus::Rejected => Some("REJECTED".to_string()),
                _ => None,
            },
            lab: &lab,
            customer: &customer,
            issue_date: format_date(quotation.issue_date),
            secondary_date_label: "Valid Until",
            secondary_date: quotation.valid_until.map(format_date),
            reference: None,
            currency: &quotation.currency,
            items: BillingDocument::item_lines(&items),
            totals: TotalsView::from(&quotation.totals()),
            amount_paid: None,
            balance_due: None,
            notes: quotation.notes.as_deref(),
            terms: quotation.terms.as_deref(),
        };
        renderer.render_billing(&document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_is_not_a_manual_transition() {
        assert!(check_quotation_transition(QuotationStatus::Draft, QuotationStatus::Sent).is_ok());
        assert!(check_quotation_transition(QuotationStatus::Sent, QuotationStatus::Accepted).is_ok());
        assert!(matches!(
            check_quotation_transition(QuotationStatus::Accepted, QuotationStatus::Converted),
            Err(AppError::InvalidStateTransition(_))
        ));
        assert!(check_quotation_transition(QuotationStatus::Draft, QuotationStatus::Accepted).is_err());
    }

    #[test]
    fn test_validity_window() {
        let issue = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(check_validity(issue, NaiveDate::from_ymd_opt(2024, 3, 31)).is_ok());
        assert!(check_validity(issue, None).is_ok());
        assert!(check_validity(issue, NaiveDate::from_ymd_opt(2024, 2, 1)).is_err());
    }
}
