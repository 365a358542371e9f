//! Proforma and tax invoices, payments and proforma conversion

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use crate::services::contract::{find_contract, lab_currency, resolve_currency};
use crate::services::customer::find_customer;
use crate::services::document::{format_date, format_money, BillingDocument, DocumentRenderer, TotalsView};
use crate::services::lab::load_lab;
use crate::services::line_items::{copy_items, insert_items, load_items, price_items, replace_items, ItemTable, LineItem};
use crate::services::numbering::generate_next_number;
use shared::{
    can_convert_to_tax, round_money, status_after_payment, DocumentTotals, InvoiceStatus, InvoiceType,
    LineItemInput, PaginatedResponse, Pagination,
};

#[derive(Clone)]
pub struct InvoiceService {
    db: PgPool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub invoice_number: String,
    pub invoice_type: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub contract_id: Option<Uuid>,
    pub proforma_id: Option<Uuid>,
    pub converted_invoice_id: Option<Uuid>,
    pub status: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub currency: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> AppResult<InvoiceStatus> {
        InvoiceStatus::from_str(&self.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown invoice status {}", self.status)))
    }

    pub fn invoice_type(&self) -> AppResult<InvoiceType> {
        InvoiceType::from_str(&self.invoice_type)
            .ok_or_else(|| AppError::Internal(format!("Unknown invoice type {}", self.invoice_type)))
    }

    pub fn totals(&self) -> DocumentTotals {
        DocumentTotals {
            subtotal: self.subtotal,
            discount_total: self.discount_total,
            tax_total: self.tax_total,
            total: self.total,
        }
    }

    pub fn balance_due(&self) -> Decimal {
        (self.total - self.amount_paid).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub paid_on: NaiveDate,
    pub method: Option<String>,
    pub reference: Option<String>,
    pub recorded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<LineItem>,
    pub payments: Vec<Payment>,
    pub balance_due: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceInput {
    pub invoice_type: InvoiceType,
    pub customer_id: Uuid,
    pub contract_id: Option<Uuid>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<LineItemInput>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateInvoiceInput {
    pub issue_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub notes: Option<Option<String>>,
    pub items: Option<Vec<LineItemInput>>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceTransitionInput {
    pub status: InvoiceStatus,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentInput {
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub paid_on: Option<NaiveDate>,
    pub method: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceFilter {
    pub status: Option<String>,
    pub invoice_type: Option<String>,
    pub customer_id: Option<Uuid>,
    pub search: Option<String>,
}

pub(crate) const INVOICE_SELECT: &str = r#"
    SELECT i.id, i.lab_id, i.invoice_number, i.invoice_type, i.customer_id,
           c.name AS customer_name, i.contract_id, i.proforma_id, i.converted_invoice_id,
           i.status, i.issue_date, i.due_date, i.currency, i.subtotal, i.discount_total,
           i.tax_total, i.total, i.amount_paid, i.notes, i.created_by, i.created_at, i.updated_at
    FROM invoices i
    JOIN customers c ON c.id = i.customer_id
"#;

pub async fn find_invoice(conn: &mut PgConnection, lab_id: Uuid, invoice_id: Uuid) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>(&format!("{} WHERE i.id = $1 AND i.lab_id = $2", INVOICE_SELECT))
        .bind(invoice_id)
        .bind(lab_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Invoice".to_string()))
}

pub async fn load_payments(conn: &mut PgConnection, invoice_id: Uuid) -> AppResult<Vec<Payment>> {
    let payments = sqlx::query_as::<_, Payment>(
        r#"
        SELECT id, invoice_id, amount, paid_on, method, reference, recorded_by, created_at
        FROM invoice_payments
        WHERE invoice_id = $1
        ORDER BY paid_on, created_at
        "#,
    )
    .bind(invoice_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(payments)
}

/// Validate a payment against the invoice and return the new amount paid
pub fn apply_payment(status: InvoiceStatus, total: Decimal, amount_paid: Decimal, amount: Decimal) -> AppResult<Decimal> {
    if !status.accepts_payment() {
        return Err(AppError::InvalidStateTransition(format!(
            "Payments cannot be recorded on a {} invoice",
            status.as_str()
        )));
    }
    let amount = round_money(amount);
    if amount <= Decimal::ZERO {
        return Err(AppError::validation("amount", "Payment amount must be greater than zero"));
    }
    let balance = total - amount_paid;
    if amount > balance {
        return Err(AppError::validation(
            "amount",
            format!("Payment of {} exceeds the balance due of {}", format_money(amount), format_money(balance)),
        ));
    }
    Ok(amount_paid + amount)
}

/// A converted proforma is settled through its tax invoice and stays frozen
pub fn check_not_converted(invoice_number: &str, converted_invoice_id: Option<Uuid>) -> AppResult<()> {
    if converted_invoice_id.is_some() {
        return Err(AppError::InvalidStateTransition(format!(
            "Proforma {} has been converted to a tax invoice; record payments and status changes there",
            invoice_number
        )));
    }
    Ok(())
}

/// Manual status changes; payment states are reached by recording payments
pub fn check_invoice_transition(current: InvoiceStatus, next: InvoiceStatus) -> AppResult<()> {
    if matches!(next, InvoiceStatus::PartiallyPaid | InvoiceStatus::Paid) {
        return Err(AppError::InvalidStateTransition(
            "Payment states follow from recorded payments".to_string(),
        ));
    }
    current.transition(next)?;
    Ok(())
}

fn check_due_date(issue_date: NaiveDate, due_date: Option<NaiveDate>) -> AppResult<()> {
    if due_date.is_some_and(|d| d < issue_date) {
        return Err(AppError::validation("due_date", "Due date is before the issue date"));
    }
    Ok(())
}

impl InvoiceService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_invoices(
        &self,
        lab_id: Uuid,
        filter: &InvoiceFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<Invoice>> {
        let search = filter.search.as_ref().map(|s| format!("%{}%", s.trim()));
        let conditions = r#"
            WHERE i.lab_id = $1
              AND ($2::text IS NULL OR i.status = $2)
              AND ($3::text IS NULL OR i.invoice_type = $3)
              AND ($4::uuid IS NULL OR i.customer_id = $4)
              AND ($5::text IS NULL OR i.invoice_number ILIKE $5 OR c.name ILIKE $5)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM invoices i JOIN customers c ON c.id = i.customer_id {}",
            conditions
        ))
        .bind(lab_id)
        .bind(&filter.status)
        .bind(&filter.invoice_type)
        .bind(filter.customer_id)
        .bind(&search)
        .fetch_one(&self.db)
        .await?;

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "{} {} ORDER BY i.issue_date DESC, i.invoice_number DESC LIMIT $6 OFFSET $7",
            INVOICE_SELECT, conditions
        ))
        .bind(lab_id)
        .bind(&filter.status)
        .bind(&filter.invoice_type)
        .bind(filter.customer_id)
        .bind(&search)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(invoices, pagination, total as u64))
    }

    pub async fn get_invoice(&self, lab_id: Uuid, invoice_id: Uuid) -> AppResult<InvoiceDetail> {
        let mut conn = self.db.acquire().await?;
        let invoice = find_invoice(&mut conn, lab_id, invoice_id).await?;
        let items = load_items(&mut conn, ItemTable::Invoice, invoice_id).await?;
        let payments = load_payments(&mut conn, invoice_id).await?;
        Ok(InvoiceDetail {
            balance_due: invoice.balance_due(),
            invoice,
            items,
            payments,
        })
    }

    pub async fn create_invoice(&self, lab_id: Uuid, user_id: Uuid, input: CreateInvoiceInput) -> AppResult<InvoiceDetail> {
        let issue_date = input.issue_date.unwrap_or_else(|| Utc::now().date_naive());
        check_due_date(issue_date, input.due_date)?;
        let totals = price_items(&input.items)?;

        let mut tx = self.db.begin().await?;
        find_customer(&mut tx, lab_id, input.customer_id)
            .await
            .map_err(|e| e.not_found_as("customer_id", "Customer does not exist"))?;
        if let Some(contract_id) = input.contract_id {
            let contract = find_contract(&mut tx, lab_id, contract_id)
                .await
                .map_err(|e| e.not_found_as("contract_id", "Contract does not exist"))?;
            if contract.customer_id != input.customer_id {
                return Err(AppError::validation("contract_id", "Contract belongs to another customer"));
            }
        }
        let currency = resolve_currency(input.currency.as_deref(), &lab_currency(&mut tx, lab_id).await?)?;
        let allocated = generate_next_number(&mut *tx, lab_id, input.invoice_type.numbering_module()).await?;

        let invoice_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO invoices (lab_id, invoice_number, invoice_type, customer_id, contract_id,
                                  status, issue_date, due_date, currency, subtotal,
                                  discount_total, tax_total, total, notes, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING id
            "#,
        )
        .bind(lab_id)
        .bind(&allocated.number)
        .bind(input.invoice_type.as_str())
        .bind(input.customer_id)
        .bind(input.contract_id)
        .bind(InvoiceStatus::Draft.as_str())
        .bind(issue_date)
        .bind(input.due_date)
        .bind(&currency)
        .bind(totals.subtotal)
        .bind(totals.discount_total)
        .bind(totals.tax_total)
        .bind(totals.total)
        .bind(&input.notes)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        insert_items(&mut tx, ItemTable::Invoice, invoice_id, &input.items).await?;

        AuditEvent::new(lab_id, Some(user_id), "create", "invoice")
            .entity(invoice_id)
            .details(serde_json::json!({
                "invoice_number": allocated.number,
                "invoice_type": input.invoice_type.as_str(),
                "total": totals.total,
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_invoice(lab_id, invoice_id).await
    }

    pub async fn update_invoice(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        invoice_id: Uuid,
        input: UpdateInvoiceInput,
    ) -> AppResult<InvoiceDetail> {
        let mut tx = self.db.begin().await?;
        let existing = find_invoice(&mut tx, lab_id, invoice_id).await?;
        if !existing.status()?.is_editable() {
            return Err(AppError::InvalidStateTransition(format!(
                "Invoice {} is {} and can no longer be edited",
                existing.invoice_number, existing.status
            )));
        }

        let issue_date = input.issue_date.unwrap_or(existing.issue_date);
        let due_date = shared::patch(input.due_date, existing.due_date);
        check_due_date(issue_date, due_date)?;

        let totals = match input.items {
            Some(ref items) => {
                let totals = price_items(items)?;
                replace_items(&mut tx, ItemTable::Invoice, invoice_id, items).await?;
                totals
            }
            None => existing.totals(),
        };

        sqlx::query(
            r#"
            UPDATE invoices
            SET issue_date = $1, due_date = $2, notes = $3, subtotal = $4, discount_total = $5,
                tax_total = $6, total = $7, updated_at = NOW()
            WHERE id = $8 AND lab_id = $9
            "#,
        )
        .bind(issue_date)
        .bind(due_date)
        .bind(shared::patch(input.notes.clone(), existing.notes.clone()))
        .bind(totals.subtotal)
        .bind(totals.discount_total)
        .bind(totals.tax_total)
        .bind(totals.total)
        .bind(invoice_id)
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "update", "invoice")
            .entity(invoice_id)
            .details(serde_json::json!({ "total": totals.total }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_invoice(lab_id, invoice_id).await
    }

    pub async fn transition(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        invoice_id: Uuid,
        next: InvoiceStatus,
    ) -> AppResult<InvoiceDetail> {
        let mut tx = self.db.begin().await?;
        let invoice = find_invoice(&mut tx, lab_id, invoice_id).await?;
        let current = invoice.status()?;
        check_not_converted(&invoice.invoice_number, invoice.converted_invoice_id)?;
        check_invoice_transition(current, next)?;

        sqlx::query("UPDATE invoices SET status = $1, updated_at = NOW() WHERE id = $2 AND lab_id = $3")
            .bind(next.as_str())
            .bind(invoice_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "transition", "invoice")
            .entity(invoice_id)
            .details(serde_json::json!({ "from": current.as_str(), "to": next.as_str() }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_invoice(lab_id, invoice_id).await
    }

    pub async fn record_payment(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        invoice_id: Uuid,
        input: RecordPaymentInput,
    ) -> AppResult<InvoiceDetail> {
        let mut tx = self.db.begin().await?;
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "{} WHERE i.id = $1 AND i.lab_id = $2 FOR UPDATE OF i",
            INVOICE_SELECT
        ))
        .bind(invoice_id)
        .bind(lab_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Invoice".to_string()))?;

        check_not_converted(&invoice.invoice_number, invoice.converted_invoice_id)?;
        let amount_paid = apply_payment(invoice.status()?, invoice.total, invoice.amount_paid, input.amount)?;
        let status = status_after_payment(invoice.total, amount_paid);
        let paid_on = input.paid_on.unwrap_or_else(|| Utc::now().date_naive());

        sqlx::query(
            r#"
            INSERT INTO invoice_payments (invoice_id, amount, paid_on, method, reference, recorded_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(invoice_id)
        .bind(amount_paid - invoice.amount_paid)
        .bind(paid_on)
        .bind(&input.method)
        .bind(&input.reference)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE invoices SET amount_paid = $1, status = $2, updated_at = NOW() WHERE id = $3 AND lab_id = $4",
        )
        .bind(amount_paid)
        .bind(status.as_str())
        .bind(invoice_id)
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "record_payment", "invoice")
            .entity(invoice_id)
            .details(serde_json::json!({
                "amount": amount_paid - invoice.amount_paid,
                "amount_paid": amount_paid,
                "status": status.as_str(),
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(%lab_id, invoice = %invoice.invoice_number, status = status.as_str(), "payment recorded");
        self.get_invoice(lab_id, invoice_id).await
    }

    /// Issue a tax invoice for an issued proforma. Items, totals and payments
    /// received so far carry over; the proforma keeps a link to the result.
    pub async fn convert_proforma_to_tax(&self, lab_id: Uuid, user_id: Uuid, proforma_id: Uuid) -> AppResult<InvoiceDetail> {
        let mut tx = self.db.begin().await?;
        let proforma = sqlx::query_as::<_, Invoice>(&format!(
            "{} WHERE i.id = $1 AND i.lab_id = $2 FOR UPDATE OF i",
            INVOICE_SELECT
        ))
        .bind(proforma_id)
        .bind(lab_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Invoice".to_string()))?;

        let invoice_type = proforma.invoice_type()?;
        let status = proforma.status()?;
        if !can_convert_to_tax(invoice_type, status, proforma.converted_invoice_id.is_some()) {
            return Err(AppError::InvalidStateTransition(format!(
                "Invoice {} ({} {}) cannot be converted to a tax invoice",
                proforma.invoice_number,
                invoice_type.as_str(),
                proforma.status
            )));
        }

        let allocated = generate_next_number(&mut *tx, lab_id, InvoiceType::Tax.numbering_module()).await?;
        let tax_status = status_after_payment(proforma.total, proforma.amount_paid);

        let tax_invoice_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO invoices (lab_id, invoice_number, invoice_type, customer_id, contract_id,
                                  proforma_id, status, issue_date, due_date, currency, subtotal,
                                  discount_total, tax_total, total, amount_paid, notes, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING id
            "#,
        )
        .bind(lab_id)
        .bind(&allocated.number)
        .bind(InvoiceType::Tax.as_str())
        .bind(proforma.customer_id)
        .bind(proforma.contract_id)
        .bind(proforma_id)
        .bind(tax_status.as_str())
        .bind(Utc::now().date_naive())
        .bind(proforma.due_date)
        .bind(&proforma.currency)
        .bind(proforma.subtotal)
        .bind(proforma.discount_total)
        .bind(proforma.tax_total)
        .bind(proforma.total)
        .bind(proforma.amount_paid)
        .bind(&proforma.notes)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        copy_items(&mut tx, ItemTable::Invoice, proforma_id, ItemTable::Invoice, tax_invoice_id).await?;

        sqlx::query("UPDATE invoices SET converted_invoice_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(tax_invoice_id)
            .bind(proforma_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "convert", "invoice")
            .entity(proforma_id)
            .details(serde_json::json!({
                "proforma_number": proforma.invoice_number,
                "tax_invoice_id": tax_invoice_id,
                "tax_invoice_number": allocated.number,
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            %lab_id,
            proforma = %proforma.invoice_number,
            tax_invoice = %allocated.number,
            "proforma converted to tax invoice"
        );
        self.get_invoice(lab_id, tax_invoice_id).await
    }

    pub async fn delete_invoice(&self, lab_id: Uuid, user_id: Uuid, invoice_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let invoice = find_invoice(&mut tx, lab_id, invoice_id).await?;
        if !invoice.status()?.is_deletable() {
            return Err(AppError::DeleteBlocked(format!(
                "Only draft invoices can be deleted (currently {})",
                invoice.status
            )));
        }

        sqlx::query("DELETE FROM invoices WHERE id = $1 AND lab_id = $2")
            .bind(invoice_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "delete", "invoice")
            .entity(invoice_id)
            .details(serde_json::json!({ "invoice_number": invoice.invoice_number }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn render_print(&self, renderer: &DocumentRenderer, lab_id: Uuid, invoice_id: Uuid) -> AppResult<String> {
        let mut conn = self.db.acquire().await?;
        let invoice = find_invoice(&mut conn, lab_id, invoice_id).await?;
        render_invoice(&mut conn, renderer, &invoice).await
    }
}

/// Render an already-loaded invoice; shared with the customer portal
pub(crate) async fn render_invoice(
    conn: &mut PgConnection,
    renderer: &DocumentRenderer,
    invoice: &Invoice,
) -> AppResult<String> {
    let items = load_items(conn, ItemTable::Invoice, invoice.id).await?;
    let lab = load_lab(&mut *conn, invoice.lab_id).await?;
    let customer = find_customer(conn, invoice.lab_id, invoice.customer_id).await?;

    let reference = match invoice.proforma_id {
        Some(proforma_id) => sqlx::query_scalar::<_, String>("SELECT invoice_number FROM invoices WHERE id = $1")
            .bind(proforma_id)
            .fetch_optional(&mut *conn)
            .await?
            .map(|number| format!("Against proforma {}", number)),
        None => None,
    };

    let status = invoice.status()?;
    let document = BillingDocument {
        title: invoice.invoice_type()?.title(),
        number: &invoice.invoice_number,
        status_note: match status {
            InvoiceStatus::Draft => Some("DRAFT".to_string()),
            InvoiceStatus::Cancelled => Some("CANCELLED".to_string()),
            InvoiceStatus::Paid => Some("PAID".to_string()),
            _ => None,
        },
        lab: &lab,
        customer: &customer,
        issue_date: format_date(invoice.issue_date),
        secondary_date_label: "Due Date",
        secondary_date: invoice.due_date.map(format_date),
        reference,
        currency: &invoice.currency,
        items: BillingDocument::item_lines(&items),
        totals: TotalsView::from(&invoice.totals()),
        amount_paid: Some(format_money(invoice.amount_paid)),
        balance_due: Some(format_money(invoice.balance_due())),
        notes: invoice.notes.as_deref(),
        terms: None,
    };
    renderer.render_billing(&document)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    #[test]
    fn test_payment_requires_open_invoice() {
        for status in [InvoiceStatus::Draft, InvoiceStatus::Paid, InvoiceStatus::Cancelled] {
            assert!(matches!(
                apply_payment(status, dec("1180"), Decimal::ZERO, dec("100")),
                Err(AppError::InvalidStateTransition(_))
            ));
        }
    }

    #[test]
    fn test_payment_accumulates() {
        let paid = apply_payment(InvoiceStatus::Issued, dec("1180"), Decimal::ZERO, dec("500")).unwrap();
        assert_eq!(paid, dec("500"));
        assert_eq!(status_after_payment(dec("1180"), paid), InvoiceStatus::PartiallyPaid);

        let paid = apply_payment(InvoiceStatus::PartiallyPaid, dec("1180"), paid, dec("680")).unwrap();
        assert_eq!(paid, dec("1180"));
        assert_eq!(status_after_payment(dec("1180"), paid), InvoiceStatus::Paid);
    }

    #[test]
    fn test_payment_amount_bounds() {
        assert!(matches!(
            apply_payment(InvoiceStatus::Issued, dec("1180"), Decimal::ZERO, Decimal::ZERO),
            Err(AppError::Validation { ref field, .. }) if field == "amount"
        ));
        let err = apply_payment(InvoiceStatus::PartiallyPaid, dec("1180"), dec("1000"), dec("200")).unwrap_err();
        assert!(err.to_string().contains("180.00"));
    }

    #[test]
    fn test_payment_states_are_not_manual() {
        assert!(check_invoice_transition(InvoiceStatus::Draft, InvoiceStatus::Issued).is_ok());
        assert!(check_invoice_transition(InvoiceStatus::Issued, InvoiceStatus::Cancelled).is_ok());
        assert!(check_invoice_transition(InvoiceStatus::Issued, InvoiceStatus::Paid).is_err());
        assert!(check_invoice_transition(InvoiceStatus::Paid, InvoiceStatus::Cancelled).is_err());
    }

    #[test]
    fn test_converted_proforma_is_frozen() {
        assert!(check_not_converted("PI-240301-004", None).is_ok());
        let err = check_not_converted("PI-240301-004", Some(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition(_)));
        assert!(err.to_string().contains("PI-240301-004"));
    }

    #[test]
    fn test_due_date_after_issue() {
        let issue = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert!(check_due_date(issue, NaiveDate::from_ymd_opt(2024, 2, 14)).is_ok());
        assert!(check_due_date(issue, NaiveDate::from_ymd_opt(2024, 1, 1)).is_err());
    }

    #[test]
    fn test_update_clears_due_date_with_null() {
        let input: UpdateInvoiceInput =
            serde_json::from_str(r#"{"due_date": null, "notes": "Net 30"}"#).unwrap();
        let stored = NaiveDate::from_ymd_opt(2024, 4, 30);
        assert_eq!(shared::patch(input.due_date, stored), None);
        assert_eq!(input.notes, Some(Some("Net 30".to_string())));

        let untouched: UpdateInvoiceInput = serde_json::from_str("{}").unwrap();
        assert_eq!(shared::patch(untouched.due_date, stored), stored);
    }
}
