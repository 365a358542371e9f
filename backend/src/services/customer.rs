//! Customer master data with contact persons and CSV exchange

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use crate::services::csv_io::{export_to_csv, non_empty, read_csv_rows, ImportSummary};
use shared::{validate_email, validate_gstin, validate_master_code, validate_phone, PaginatedResponse, Pagination};

#[derive(Clone)]
pub struct CustomerService {
    db: PgPool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub code: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gstin: Option<String>,
    pub billing_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub notes: Option<String>,
    pub zoho_contact_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ContactPerson {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub designation: Option<String>,
    pub is_primary: bool,
}

#[derive(Debug, Serialize)]
pub struct CustomerWithContacts {
    #[serde(flatten)]
    pub customer: Customer,
    pub contacts: Vec<ContactPerson>,
}

/// Customer fields accepted on create, update and import
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct CustomerInput {
    pub code: String,
    #[validate(length(min = 1, max = 200, message = "is required"))]
    pub name: String,
    #[validate(length(max = 255, message = "must be at most 255 characters"))]
    pub email: Option<String>,
    #[validate(length(max = 30, message = "must be at most 30 characters"))]
    pub phone: Option<String>,
    pub gstin: Option<String>,
    pub billing_address: Option<String>,
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub city: Option<String>,
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub state: Option<String>,
    #[validate(length(max = 20, message = "must be at most 20 characters"))]
    pub postal_code: Option<String>,
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub country: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub contacts: Vec<ContactPersonInput>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct ContactPersonInput {
    #[validate(length(min = 1, max = 200, message = "is required"))]
    pub name: String,
    #[validate(length(max = 255, message = "must be at most 255 characters"))]
    pub email: Option<String>,
    #[validate(length(max = 30, message = "must be at most 30 characters"))]
    pub phone: Option<String>,
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub designation: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCustomerInput {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub gstin: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub billing_address: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub city: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub state: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub postal_code: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub country: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub notes: Option<Option<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CustomerFilter {
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

/// One CSV row; the column set doubles as the export format
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomerCsvRow {
    pub code: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gstin: Option<String>,
    pub billing_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub notes: Option<String>,
}

impl From<CustomerCsvRow> for CustomerInput {
    fn from(row: CustomerCsvRow) -> Self {
        CustomerInput {
            code: row.code.trim().to_uppercase(),
            name: row.name.trim().to_string(),
            email: non_empty(row.email),
            phone: non_empty(row.phone),
            gstin: non_empty(row.gstin).map(|g| g.to_uppercase()),
            billing_address: non_empty(row.billing_address),
            city: non_empty(row.city),
            state: non_empty(row.state),
            postal_code: non_empty(row.postal_code),
            country: non_empty(row.country),
            notes: non_empty(row.notes),
            contacts: Vec::new(),
        }
    }
}

impl From<&Customer> for CustomerCsvRow {
    fn from(c: &Customer) -> Self {
        CustomerCsvRow {
            code: c.code.clone(),
            name: c.name.clone(),
            email: c.email.clone(),
            phone: c.phone.clone(),
            gstin: c.gstin.clone(),
            billing_address: c.billing_address.clone(),
            city: c.city.clone(),
            state: c.state.clone(),
            postal_code: c.postal_code.clone(),
            country: c.country.clone(),
            notes: c.notes.clone(),
        }
    }
}

/// Field-level checks shared by API input and CSV rows
pub fn validate_customer_fields(input: &CustomerInput) -> AppResult<()> {
    input.validate()?;
    validate_master_code(&input.code).map_err(|m| AppError::validation("code", m))?;
    if let Some(ref email) = input.email {
        validate_email(email).map_err(|m| AppError::validation("email", m))?;
    }
    if let Some(ref phone) = input.phone {
        validate_phone(phone).map_err(|m| AppError::validation("phone", m))?;
    }
    if let Some(ref gstin) = input.gstin {
        validate_gstin(gstin).map_err(|m| AppError::validation("gstin", m))?;
    }
    for contact in &input.contacts {
        if contact.name.trim().is_empty() {
            return Err(AppError::validation("contacts", "Contact name is required"));
        }
        contact.validate()?;
    }
    Ok(())
}

const CUSTOMER_COLUMNS: &str = r#"
    id, lab_id, code, name, email, phone, gstin, billing_address, city, state, postal_code,
    country, notes, zoho_contact_id, is_active, created_at, updated_at
"#;

/// Customer row by id within a lab
pub async fn find_customer(conn: &mut PgConnection, lab_id: Uuid, customer_id: Uuid) -> AppResult<Customer> {
    sqlx::query_as::<_, Customer>(&format!(
        "SELECT {} FROM customers WHERE id = $1 AND lab_id = $2",
        CUSTOMER_COLUMNS
    ))
    .bind(customer_id)
    .bind(lab_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Customer".to_string()))
}

async fn insert_contact(conn: &mut PgConnection, customer_id: Uuid, contact: &ContactPersonInput) -> AppResult<Uuid> {
    if contact.is_primary {
        sqlx::query("UPDATE contact_persons SET is_primary = false WHERE customer_id = $1")
            .bind(customer_id)
            .execute(&mut *conn)
            .await?;
    }
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO contact_persons (customer_id, name, email, phone, designation, is_primary)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(customer_id)
    .bind(contact.name.trim())
    .bind(&contact.email)
    .bind(&contact.phone)
    .bind(&contact.designation)
    .bind(contact.is_primary)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Insert or update a customer keyed by code; returns (id, created)
async fn upsert_by_code(conn: &mut PgConnection, lab_id: Uuid, input: &CustomerInput) -> AppResult<(Uuid, bool)> {
    let row = sqlx::query_as::<_, (Uuid, bool)>(
        r#"
        INSERT INTO customers (lab_id, code, name, email, phone, gstin, billing_address, city,
                               state, postal_code, country, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (lab_id, code) DO UPDATE SET
            name = EXCLUDED.name,
            email = COALESCE(EXCLUDED.email, customers.email),
            phone = COALESCE(EXCLUDED.phone, customers.phone),
            gstin = COALESCE(EXCLUDED.gstin, customers.gstin),
            billing_address = COALESCE(EXCLUDED.billing_address, customers.billing_address),
            city = COALESCE(EXCLUDED.city, customers.city),
            state = COALESCE(EXCLUDED.state, customers.state),
            postal_code = COALESCE(EXCLUDED.postal_code, customers.postal_code),
            country = COALESCE(EXCLUDED.country, customers.country),
            notes = COALESCE(EXCLUDED.notes, customers.notes),
            updated_at = NOW()
        RETURNING id, (xmax = 0) AS created
        "#,
    )
    .bind(lab_id)
    .bind(&input.code)
    .bind(&input.name)
    .bind(&input.email)
    .bind(&input.phone)
    .bind(&input.gstin)
    .bind(&input.billing_address)
    .bind(&input.city)
    .bind(&input.state)
    .bind(&input.postal_code)
    .bind(&input.country)
    .bind(&input.notes)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

impl CustomerService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_customers(
        &self,
        lab_id: Uuid,
        filter: &CustomerFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<Customer>> {
        let search = filter.search.as_ref().map(|s| format!("%{}%", s.trim()));

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM customers
            WHERE lab_id = $1
              AND ($2::text IS NULL OR name ILIKE $2 OR code ILIKE $2 OR email ILIKE $2)
              AND ($3::bool IS NULL OR is_active = $3)
            "#,
        )
        .bind(lab_id)
        .bind(&search)
        .bind(filter.is_active)
        .fetch_one(&self.db)
        .await?;

        let customers = sqlx::query_as::<_, Customer>(&format!(
            r#"
            SELECT {} FROM customers
            WHERE lab_id = $1
              AND ($2::text IS NULL OR name ILIKE $2 OR code ILIKE $2 OR email ILIKE $2)
              AND ($3::bool IS NULL OR is_active = $3)
            ORDER BY name
            LIMIT $4 OFFSET $5
            "#,
            CUSTOMER_COLUMNS
        ))
        .bind(lab_id)
        .bind(&search)
        .bind(filter.is_active)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(customers, pagination, total as u64))
    }

    pub async fn get_customer(&self, lab_id: Uuid, customer_id: Uuid) -> AppResult<CustomerWithContacts> {
        let mut conn = self.db.acquire().await?;
        let customer = find_customer(&mut conn, lab_id, customer_id).await?;

        let contacts = sqlx::query_as::<_, ContactPerson>(
            r#"
            SELECT id, customer_id, name, email, phone, designation, is_primary
            FROM contact_persons
            WHERE customer_id = $1
            ORDER BY is_primary DESC, name
            "#,
        )
        .bind(customer_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(CustomerWithContacts { customer, contacts })
    }

    pub async fn create_customer(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        mut input: CustomerInput,
    ) -> AppResult<CustomerWithContacts> {
        input.code = input.code.trim().to_uppercase();
        validate_customer_fields(&input)?;

        let mut tx = self.db.begin().await?;

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM customers WHERE lab_id = $1 AND code = $2)",
        )
        .bind(lab_id)
        .bind(&input.code)
        .fetch_one(&mut *tx)
        .await?;
        if exists {
            return Err(AppError::Conflict(format!(
                "Customer code {} already exists",
                input.code
            )));
        }

        let (customer_id, _) = upsert_by_code(&mut tx, lab_id, &input).await?;
        for contact in &input.contacts {
            insert_contact(&mut tx, customer_id, contact).await?;
        }

        AuditEvent::new(lab_id, Some(user_id), "create", "customer")
            .entity(customer_id)
            .details(serde_json::json!({ "code": input.code, "name": input.name }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_customer(lab_id, customer_id).await
    }

    pub async fn update_customer(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        customer_id: Uuid,
        input: UpdateCustomerInput,
    ) -> AppResult<CustomerWithContacts> {
        let mut tx = self.db.begin().await?;
        let existing = find_customer(&mut tx, lab_id, customer_id).await?;

        let merged = CustomerInput {
            code: existing.code.clone(),
            name: input.name.unwrap_or(existing.name),
            email: shared::patch(input.email, existing.email),
            phone: shared::patch(input.phone, existing.phone),
            gstin: shared::patch(input.gstin.map(|g| g.map(|g| g.to_uppercase())), existing.gstin),
            billing_address: shared::patch(input.billing_address, existing.billing_address),
            city: shared::patch(input.city, existing.city),
            state: shared::patch(input.state, existing.state),
            postal_code: shared::patch(input.postal_code, existing.postal_code),
            country: shared::patch(input.country, existing.country),
            notes: shared::patch(input.notes, existing.notes),
            contacts: Vec::new(),
        };
        validate_customer_fields(&merged)?;

        sqlx::query(
            r#"
            UPDATE customers
            SET name = $1, email = $2, phone = $3, gstin = $4, billing_address = $5, city = $6,
                state = $7, postal_code = $8, country = $9, notes = $10, is_active = $11,
                updated_at = NOW()
            WHERE id = $12 AND lab_id = $13
            "#,
        )
        .bind(&merged.name)
        .bind(&merged.email)
        .bind(&merged.phone)
        .bind(&merged.gstin)
        .bind(&merged.billing_address)
        .bind(&merged.city)
        .bind(&merged.state)
        .bind(&merged.postal_code)
        .bind(&merged.country)
        .bind(&merged.notes)
        .bind(input.is_active.unwrap_or(existing.is_active))
        .bind(customer_id)
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "update", "customer")
            .entity(customer_id)
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_customer(lab_id, customer_id).await
    }

    /// Delete a customer that no sample or billing document references
    pub async fn delete_customer(&self, lab_id: Uuid, user_id: Uuid, customer_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let customer = find_customer(&mut tx, lab_id, customer_id).await?;

        let (samples, quotations, contracts, invoices) = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM samples WHERE customer_id = $1),
                (SELECT COUNT(*) FROM quotations WHERE customer_id = $1),
                (SELECT COUNT(*) FROM contracts WHERE customer_id = $1),
                (SELECT COUNT(*) FROM invoices WHERE customer_id = $1)
            "#,
        )
        .bind(customer_id)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(message) = delete_blockers(samples, quotations, contracts, invoices) {
            return Err(AppError::DeleteBlocked(message));
        }

        sqlx::query("DELETE FROM customers WHERE id = $1 AND lab_id = $2")
            .bind(customer_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "delete", "customer")
            .entity(customer_id)
            .details(serde_json::json!({ "code": customer.code }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn add_contact(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        customer_id: Uuid,
        input: ContactPersonInput,
    ) -> AppResult<CustomerWithContacts> {
        if input.name.trim().is_empty() {
            return Err(AppError::validation("name", "Contact name is required"));
        }
        input.validate()?;
        if let Some(ref email) = input.email {
            validate_email(email).map_err(|m| AppError::validation("email", m))?;
        }

        let mut tx = self.db.begin().await?;
        find_customer(&mut tx, lab_id, customer_id).await?;
        let contact_id = insert_contact(&mut tx, customer_id, &input).await?;
        AuditEvent::new(lab_id, Some(user_id), "add_contact", "customer")
            .entity(customer_id)
            .details(serde_json::json!({ "contact_id": contact_id, "name": input.name }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_customer(lab_id, customer_id).await
    }

    pub async fn update_contact(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        customer_id: Uuid,
        contact_id: Uuid,
        input: ContactPersonInput,
    ) -> AppResult<CustomerWithContacts> {
        if input.name.trim().is_empty() {
            return Err(AppError::validation("name", "Contact name is required"));
        }
        input.validate()?;

        let mut tx = self.db.begin().await?;
        find_customer(&mut tx, lab_id, customer_id).await?;

        if input.is_primary {
            sqlx::query("UPDATE contact_persons SET is_primary = false WHERE customer_id = $1")
                .bind(customer_id)
                .execute(&mut *tx)
                .await?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE contact_persons
            SET name = $1, email = $2, phone = $3, designation = $4, is_primary = $5
            WHERE id = $6 AND customer_id = $7
            "#,
        )
        .bind(input.name.trim())
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.designation)
        .bind(input.is_primary)
        .bind(contact_id)
        .bind(customer_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound("Contact person".to_string()));
        }

        AuditEvent::new(lab_id, Some(user_id), "update_contact", "customer")
            .entity(customer_id)
            .details(serde_json::json!({ "contact_id": contact_id }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_customer(lab_id, customer_id).await
    }

    pub async fn remove_contact(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        customer_id: Uuid,
        contact_id: Uuid,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        find_customer(&mut tx, lab_id, customer_id).await?;

        let deleted = sqlx::query("DELETE FROM contact_persons WHERE id = $1 AND customer_id = $2")
            .bind(contact_id)
            .bind(customer_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound("Contact person".to_string()));
        }

        AuditEvent::new(lab_id, Some(user_id), "remove_contact", "customer")
            .entity(customer_id)
            .details(serde_json::json!({ "contact_id": contact_id }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// All customers of the lab as CSV
    pub async fn export_csv(&self, lab_id: Uuid) -> AppResult<String> {
        let customers = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {} FROM customers WHERE lab_id = $1 ORDER BY code",
            CUSTOMER_COLUMNS
        ))
        .bind(lab_id)
        .fetch_all(&self.db)
        .await?;

        let rows: Vec<CustomerCsvRow> = customers.iter().map(CustomerCsvRow::from).collect();
        export_to_csv(&rows)
    }

    /// Upsert customers by code. Invalid rows are reported with their line
    /// number and skipped; valid rows are applied in one transaction.
    pub async fn import_csv(&self, lab_id: Uuid, user_id: Uuid, data: &[u8]) -> AppResult<ImportSummary> {
        let rows = read_csv_rows::<CustomerCsvRow>(data)?;
        let mut summary = ImportSummary::default();
        let mut seen_codes = std::collections::HashSet::new();

        let mut tx = self.db.begin().await?;
        for (line, row) in rows {
            let input = match row {
                Ok(row) => CustomerInput::from(row),
                Err(message) => {
                    summary.reject(line, message);
                    continue;
                }
            };
            if let Err(e) = validate_customer_fields(&input) {
                summary.reject(line, e.to_string());
                continue;
            }
            if !seen_codes.insert(input.code.clone()) {
                summary.reject(line, format!("Duplicate code {} in file", input.code));
                continue;
            }

            // A row the database refuses is rolled back alone
            let mut savepoint = (&mut *tx).begin().await?;
            match upsert_by_code(&mut savepoint, lab_id, &input).await {
                Ok((_, created)) => {
                    savepoint.commit().await?;
                    if created {
                        summary.created += 1;
                    } else {
                        summary.updated += 1;
                    }
                }
                Err(AppError::DatabaseError(e)) => {
                    savepoint.rollback().await?;
                    tracing::warn!(%lab_id, line, error = %e, "customer import row refused");
                    summary.reject(line, format!("Row could not be saved: {}", e));
                }
                Err(e) => return Err(e),
            }
        }

        AuditEvent::new(lab_id, Some(user_id), "import", "customer")
            .details(serde_json::json!({
                "created": summary.created,
                "updated": summary.updated,
                "rejected": summary.errors.len(),
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            %lab_id,
            created = summary.created,
            updated = summary.updated,
            rejected = summary.errors.len(),
            "customer import finished"
        );
        Ok(summary)
    }
}

/// Human message naming what still references a customer
pub fn delete_blockers(samples: i64, quotations: i64, contracts: i64, invoices: i64) -> Option<String> {
    let parts: Vec<String> = [
        (samples, "sample(s)"),
        (quotations, "quotation(s)"),
        (contracts, "contract(s)"),
        (invoices, "invoice(s)"),
    ]
    .iter()
    .filter(|(count, _)| *count > 0)
    .map(|(count, label)| format!("{} {}", count, label))
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(format!(
            "Cannot delete customer. It is referenced by {}.",
            parts.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_blockers_message() {
        assert_eq!(delete_blockers(0, 0, 0, 0), None);
        assert_eq!(
            delete_blockers(3, 0, 0, 1).as_deref(),
            Some("Cannot delete customer. It is referenced by 3 sample(s), 1 invoice(s).")
        );
    }

    #[test]
    fn test_csv_row_normalisation() {
        let input = CustomerInput::from(CustomerCsvRow {
            code: " cust-01 ".into(),
            name: " Bharat Fuels ".into(),
            email: Some("".into()),
            phone: None,
            gstin: Some("27aapfu0939f1zv".into()),
            billing_address: None,
            city: Some("Pune".into()),
            state: None,
            postal_code: None,
            country: None,
            notes: None,
        });
        assert_eq!(input.code, "CUST-01");
        assert_eq!(input.name, "Bharat Fuels");
        assert_eq!(input.email, None);
        assert_eq!(input.gstin.as_deref(), Some("27AAPFU0939F1ZV"));
        assert!(validate_customer_fields(&input).is_ok());
    }

    #[test]
    fn test_invalid_gstin_rejected() {
        let input = CustomerInput {
            code: "C1".into(),
            name: "X".into(),
            gstin: Some("BAD".into()),
            ..Default::default()
        };
        assert!(matches!(
            validate_customer_fields(&input),
            Err(AppError::Validation { ref field, .. }) if field == "gstin"
        ));
    }

    #[test]
    fn test_import_row_longer_than_column_is_rejected() {
        let input = CustomerInput::from(CustomerCsvRow {
            code: "c-1".into(),
            name: "Bharat Petroleum".into(),
            email: None,
            phone: None,
            gstin: None,
            billing_address: None,
            city: Some("M".repeat(101)),
            state: None,
            postal_code: Some("400001".into()),
            country: None,
            notes: None,
        });
        let err = validate_customer_fields(&input).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(ref m) if m.contains("city")));

        let contact = CustomerInput {
            code: "C1".into(),
            name: "X".into(),
            contacts: vec![ContactPersonInput {
                name: "R. Iyer".into(),
                designation: Some("D".repeat(101)),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(validate_customer_fields(&contact).is_err());
    }
}
