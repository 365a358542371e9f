//! Customer contracts

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use crate::services::customer::find_customer;
use crate::services::line_items::{insert_items, load_items, price_items, replace_items, ItemTable, LineItem};
use crate::services::numbering::generate_next_number;
use shared::{ContractStatus, DocumentModule, DocumentTotals, LineItemInput, PaginatedResponse, Pagination};

#[derive(Clone)]
pub struct ContractService {
    db: PgPool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Contract {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub contract_number: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub quotation_id: Option<Uuid>,
    pub title: String,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub currency: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
    pub terms: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn status(&self) -> AppResult<ContractStatus> {
        ContractStatus::from_str(&self.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown contract status {}", self.status)))
    }
}

#[derive(Debug, Serialize)]
pub struct ContractDetail {
    #[serde(flatten)]
    pub contract: Contract,
    pub items: Vec<LineItem>,
}

#[derive(Debug, Deserialize)]
pub struct CreateContractInput {
    pub customer_id: Uuid,
    pub title: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub terms: Option<String>,
    pub items: Vec<LineItemInput>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateContractInput {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub end_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub terms: Option<Option<String>>,
    pub items: Option<Vec<LineItemInput>>,
}

#[derive(Debug, Deserialize)]
pub struct ContractTransitionInput {
    pub status: ContractStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContractFilter {
    pub status: Option<String>,
    pub customer_id: Option<Uuid>,
    pub search: Option<String>,
}

/// Header fields of a contract about to be inserted
#[derive(Debug)]
pub struct NewContract<'a> {
    pub customer_id: Uuid,
    pub quotation_id: Option<Uuid>,
    pub title: &'a str,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub currency: &'a str,
    pub terms: Option<&'a str>,
}

pub fn check_period(start: Option<NaiveDate>, end: Option<NaiveDate>) -> AppResult<()> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(AppError::validation("end_date", "End date is before start date"));
        }
    }
    Ok(())
}

/// Three-letter currency code, falling back to the lab's currency
pub fn resolve_currency(requested: Option<&str>, lab_currency: &str) -> AppResult<String> {
    let currency = requested
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(lab_currency)
        .to_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::validation("currency", "must be a 3-letter ISO code"));
    }
    Ok(currency)
}

pub(crate) async fn lab_currency(conn: &mut PgConnection, lab_id: Uuid) -> AppResult<String> {
    let currency = sqlx::query_scalar::<_, String>("SELECT currency FROM labs WHERE id = $1")
        .bind(lab_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Lab".to_string()))?;
    Ok(currency)
}

const CONTRACT_SELECT: &str = r#"
    SELECT k.id, k.lab_id, k.contract_number, k.customer_id, c.name AS customer_name,
           k.quotation_id, k.title, k.status, k.start_date, k.end_date, k.currency, k.subtotal,
           k.discount_total, k.tax_total, k.total, k.terms, k.created_by, k.created_at,
           k.updated_at
    FROM contracts k
    JOIN customers c ON c.id = k.customer_id
"#;

pub async fn find_contract(conn: &mut PgConnection, lab_id: Uuid, contract_id: Uuid) -> AppResult<Contract> {
    sqlx::query_as::<_, Contract>(&format!("{} WHERE k.id = $1 AND k.lab_id = $2", CONTRACT_SELECT))
        .bind(contract_id)
        .bind(lab_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Contract".to_string()))
}

/// Insert a draft contract with its items on the caller's transaction
pub async fn insert_contract(
    conn: &mut PgConnection,
    lab_id: Uuid,
    user_id: Uuid,
    contract: &NewContract<'_>,
    items: &[LineItemInput],
    totals: &DocumentTotals,
) -> AppResult<(Uuid, String)> {
    let allocated = generate_next_number(&mut *conn, lab_id, DocumentModule::Contract).await?;

    let contract_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO contracts (lab_id, contract_number, customer_id, quotation_id, title, status,
                               start_date, end_date, currency, subtotal, discount_total,
                               tax_total, total, terms, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING id
        "#,
    )
    .bind(lab_id)
    .bind(&allocated.number)
    .bind(contract.customer_id)
    .bind(contract.quotation_id)
    .bind(contract.title)
    .bind(ContractStatus::Draft.as_str())
    .bind(contract.start_date)
    .bind(contract.end_date)
    .bind(contract.currency)
    .bind(totals.subtotal)
    .bind(totals.discount_total)
    .bind(totals.tax_total)
    .bind(totals.total)
    .bind(contract.terms)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    insert_items(conn, ItemTable::Contract, contract_id, items).await?;
    Ok((contract_id, allocated.number))
}

impl ContractService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_contracts(
        &self,
        lab_id: Uuid,
        filter: &ContractFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<Contract>> {
        let search = filter.search.as_ref().map(|s| format!("%{}%", s.trim()));
        let conditions = r#"
            WHERE k.lab_id = $1
              AND ($2::text IS NULL OR k.status = $2)
              AND ($3::uuid IS NULL OR k.customer_id = $3)
              AND ($4::text IS NULL OR k.contract_number ILIKE $4 OR k.title ILIKE $4
                   OR c.name ILIKE $4)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM contracts k JOIN customers c ON c.id = k.customer_id {}",
            conditions
        ))
        .bind(lab_id)
        .bind(&filter.status)
        .bind(filter.customer_id)
        .bind(&search)
        .fetch_one(&self.db)
        .await?;

        let contracts = sqlx::query_as::<_, Contract>(&format!(
            "{} {} ORDER BY k.created_at DESC LIMIT $5 OFFSET $6",
            CONTRACT_SELECT, conditions
        ))
        .bind(lab_id)
        .bind(&filter.status)
        .bind(filter.customer_id)
        .bind(&search)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(contracts, pagination, total as u64))
    }

    pub async fn get_contract(&self, lab_id: Uuid, contract_id: Uuid) -> AppResult<ContractDetail> {
        let mut conn = self.db.acquire().await?;
        let contract = find_contract(&mut conn, lab_id, contract_id).await?;
        let items = load_items(&mut conn, ItemTable::Contract, contract_id).await?;
        Ok(ContractDetail { contract, items })
    }

    pub async fn create_contract(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        input: CreateContractInput,
    ) -> AppResult<ContractDetail> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(AppError::validation("title", "is required"));
        }
        check_period(input.start_date, input.end_date)?;
        let totals = price_items(&input.items)?;

        let mut tx = self.db.begin().await?;
        find_customer(&mut tx, lab_id, input.customer_id)
            .await
            .map_err(|e| e.not_found_as("customer_id", "Customer does not exist"))?;
        let currency = resolve_currency(input.currency.as_deref(), &lab_currency(&mut tx, lab_id).await?)?;

        let (contract_id, number) = insert_contract(
            &mut tx,
            lab_id,
            user_id,
            &NewContract {
                customer_id: input.customer_id,
                quotation_id: None,
                title,
                start_date: input.start_date,
                end_date: input.end_date,
                currency: &currency,
                terms: input.terms.as_deref(),
            },
            &input.items,
            &totals,
        )
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "create", "contract")
            .entity(contract_id)
            .details(serde_json::json!({ "contract_number": number, "total": totals.total }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_contract(lab_id, contract_id).await
    }

    pub async fn update_contract(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        contract_id: Uuid,
        input: UpdateContractInput,
    ) -> AppResult<ContractDetail> {
        let mut tx = self.db.begin().await?;
        let existing = find_contract(&mut tx, lab_id, contract_id).await?;
        if existing.status()? != ContractStatus::Draft {
            return Err(AppError::InvalidStateTransition(format!(
                "Contract {} is {} and can no longer be edited",
                existing.contract_number, existing.status
            )));
        }

        let start_date = shared::patch(input.start_date, existing.start_date);
        let end_date = shared::patch(input.end_date, existing.end_date);
        check_period(start_date, end_date)?;
        let title = match input.title.as_deref().map(str::trim) {
            Some("") => return Err(AppError::validation("title", "is required")),
            Some(title) => title.to_string(),
            None => existing.title.clone(),
        };

        let totals = match input.items {
            Some(ref items) => {
                let totals = price_items(items)?;
                replace_items(&mut tx, ItemTable::Contract, contract_id, items).await?;
                totals
            }
            None => DocumentTotals {
                subtotal: existing.subtotal,
                discount_total: existing.discount_total,
                tax_total: existing.tax_total,
                total: existing.total,
            },
        };

        sqlx::query(
            r#"
            UPDATE contracts
            SET title = $1, start_date = $2, end_date = $3, terms = $4, subtotal = $5,
                discount_total = $6, tax_total = $7, total = $8, updated_at = NOW()
            WHERE id = $9 AND lab_id = $10
            "#,
        )
        .bind(&title)
        .bind(start_date)
        .bind(end_date)
        .bind(shared::patch(input.terms.clone(), existing.terms.clone()))
        .bind(totals.subtotal)
        .bind(totals.discount_total)
        .bind(totals.tax_total)
        .bind(totals.total)
        .bind(contract_id)
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "update", "contract")
            .entity(contract_id)
            .details(serde_json::json!({ "total": totals.total }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_contract(lab_id, contract_id).await
    }

    pub async fn transition(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        contract_id: Uuid,
        next: ContractStatus,
    ) -> AppResult<ContractDetail> {
        let mut tx = self.db.begin().await?;
        let contract = find_contract(&mut tx, lab_id, contract_id).await?;
        let current = contract.status()?;
        current.transition(next)?;

        sqlx::query("UPDATE contracts SET status = $1, updated_at = NOW() WHERE id = $2 AND lab_id = $3")
            .bind(next.as_str())
            .bind(contract_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "transition", "contract")
            .entity(contract_id)
            .details(serde_json::json!({ "from": current.as_str(), "to": next.as_str() }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_contract(lab_id, contract_id).await
    }

    pub async fn delete_contract(&self, lab_id: Uuid, user_id: Uuid, contract_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let contract = find_contract(&mut tx, lab_id, contract_id).await?;
        if !contract.status()?.is_deletable() {
            return Err(AppError::DeleteBlocked(format!(
                "Only draft contracts can be deleted (currently {})",
                contract.status
            )));
        }

        let invoices = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM invoices WHERE contract_id = $1")
            .bind(contract_id)
            .fetch_one(&mut *tx)
            .await?;
        if invoices > 0 {
            return Err(AppError::DeleteBlocked(format!(
                "Cannot delete contract. {} invoice(s) reference it.",
                invoices
            )));
        }

        // A quotation converted into this contract keeps its history
        sqlx::query("UPDATE quotations SET contract_id = NULL WHERE contract_id = $1")
            .bind(contract_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM contracts WHERE id = $1 AND lab_id = $2")
            .bind(contract_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "delete", "contract")
            .entity(contract_id)
            .details(serde_json::json!({ "contract_number": contract.contract_number }))
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
    fn test_period_check() {
        let jan = NaiveDate::from_ymd_opt(2024, 1, 1);
        let dec = NaiveDate::from_ymd_opt(2024, 12, 31);
        assert!(check_period(jan, dec).is_ok());
        assert!(check_period(jan, None).is_ok());
        assert!(check_period(dec, jan).is_err());
    }

    #[test]
    fn test_currency_resolution() {
        assert_eq!(resolve_currency(None, "INR").unwrap(), "INR");
        assert_eq!(resolve_currency(Some(" usd "), "INR").unwrap(), "USD");
        assert_eq!(resolve_currency(Some(""), "INR").unwrap(), "INR");
        assert!(resolve_currency(Some("US"), "INR").is_err());
    }
}
