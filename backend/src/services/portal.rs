//! Customer portal: portal accounts managed by staff and the read-only
//! views a customer sees of their own samples, reports and invoices.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use crate::services::auth::{encode_claims, hash_password, verify_password};
use crate::services::customer::find_customer;
use crate::services::document::DocumentRenderer;
use crate::services::invoice::{load_payments, render_invoice, Invoice, InvoiceDetail, INVOICE_SELECT};
use crate::services::line_items::{load_items, ItemTable};
use crate::services::report::{Report, ReportService, REPORT_SELECT};
use crate::services::sample::{Sample, SAMPLE_SELECT};
use shared::{validate_password, InvoiceStatus, PaginatedResponse, Pagination, ReportStatus, SampleStatus};

/// Scope claim of portal access tokens
pub const PORTAL_SCOPE: &str = "portal";

/// JWT claims of a portal session
#[derive(Debug, Serialize, Deserialize)]
pub struct PortalClaims {
    pub sub: String,
    pub lab_id: String,
    pub customer_id: String,
    pub scope: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Clone)]
pub struct PortalService {
    db: PgPool,
    jwt_secret: String,
    token_expiry: i64,
    public_base_url: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PortalAccount {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub email: String,
    pub name: String,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePortalUserInput {
    pub customer_id: Uuid,
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 200, message = "is required"))]
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPortalPasswordInput {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SetPortalActiveInput {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct PortalLoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct PortalToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub customer_id: Uuid,
    pub customer_name: String,
}

/// What a signed-in portal user is allowed to see
#[derive(Debug, Clone, Copy)]
pub struct PortalScope {
    pub lab_id: Uuid,
    pub customer_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct PortalLoginRow {
    id: Uuid,
    lab_id: Uuid,
    customer_id: Uuid,
    customer_name: String,
    password_hash: String,
    is_active: bool,
    customer_active: bool,
}

const ACCOUNT_SELECT: &str = r#"
    SELECT p.id, p.lab_id, p.customer_id, c.name AS customer_name, p.email, p.name,
           p.is_active, p.last_login_at, p.created_at
    FROM portal_users p
    JOIN customers c ON c.id = p.customer_id
"#;

/// Sample states a customer can see; drafts are internal
fn sample_visible(status: SampleStatus) -> bool {
    status != SampleStatus::Draft
}

impl PortalService {
    pub fn new(db: PgPool, config: &Config) -> Self {
        Self {
            db,
            jwt_secret: config.jwt.secret.clone(),
            token_expiry: config.jwt.portal_token_expiry,
            public_base_url: config.portal.public_base_url.clone(),
        }
    }

    // Staff-side account management

    pub async fn list_accounts(&self, lab_id: Uuid, customer_id: Option<Uuid>) -> AppResult<Vec<PortalAccount>> {
        let accounts = sqlx::query_as::<_, PortalAccount>(&format!(
            "{} WHERE p.lab_id = $1 AND ($2::uuid IS NULL OR p.customer_id = $2) ORDER BY c.name, p.name",
            ACCOUNT_SELECT
        ))
        .bind(lab_id)
        .bind(customer_id)
        .fetch_all(&self.db)
        .await?;
        Ok(accounts)
    }

    pub async fn get_account(&self, lab_id: Uuid, account_id: Uuid) -> AppResult<PortalAccount> {
        sqlx::query_as::<_, PortalAccount>(&format!("{} WHERE p.id = $1 AND p.lab_id = $2", ACCOUNT_SELECT))
            .bind(account_id)
            .bind(lab_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Portal user".to_string()))
    }

    pub async fn create_account(
        &self,
        lab_id: Uuid,
        actor_id: Uuid,
        input: CreatePortalUserInput,
    ) -> AppResult<PortalAccount> {
        input.validate()?;
        validate_password(&input.password).map_err(|m| AppError::validation("password", m))?;
        let email = input.email.trim().to_lowercase();

        let mut tx = self.db.begin().await?;
        let customer = find_customer(&mut tx, lab_id, input.customer_id)
            .await
            .map_err(|e| e.not_found_as("customer_id", "Customer does not exist"))?;
        if !customer.is_active {
            return Err(AppError::validation("customer_id", "Customer is inactive"));
        }

        let taken = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM portal_users WHERE email = $1)")
            .bind(&email)
            .fetch_one(&mut *tx)
            .await?;
        if taken {
            return Err(AppError::Conflict("A portal user with this email already exists".to_string()));
        }

        let account_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO portal_users (lab_id, customer_id, email, password_hash, name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(lab_id)
        .bind(input.customer_id)
        .bind(&email)
        .bind(hash_password(&input.password)?)
        .bind(input.name.trim())
        .fetch_one(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(actor_id), "create", "portal_user")
            .entity(account_id)
            .details(serde_json::json!({ "email": email, "customer_id": input.customer_id }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_account(lab_id, account_id).await
    }

    pub async fn reset_password(
        &self,
        lab_id: Uuid,
        actor_id: Uuid,
        account_id: Uuid,
        input: ResetPortalPasswordInput,
    ) -> AppResult<()> {
        validate_password(&input.password).map_err(|m| AppError::validation("password", m))?;
        self.get_account(lab_id, account_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE portal_users SET password_hash = $1, updated_at = NOW() WHERE id = $2 AND lab_id = $3")
            .bind(hash_password(&input.password)?)
            .bind(account_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;
        AuditEvent::new(lab_id, Some(actor_id), "reset_password", "portal_user")
            .entity(account_id)
            .record(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_active(
        &self,
        lab_id: Uuid,
        actor_id: Uuid,
        account_id: Uuid,
        is_active: bool,
    ) -> AppResult<PortalAccount> {
        self.get_account(lab_id, account_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE portal_users SET is_active = $1, updated_at = NOW() WHERE id = $2 AND lab_id = $3")
            .bind(is_active)
            .bind(account_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;
        AuditEvent::new(lab_id, Some(actor_id), if is_active { "activate" } else { "deactivate" }, "portal_user")
            .entity(account_id)
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_account(lab_id, account_id).await
    }

    pub async fn delete_account(&self, lab_id: Uuid, actor_id: Uuid, account_id: Uuid) -> AppResult<()> {
        let account = self.get_account(lab_id, account_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM portal_users WHERE id = $1 AND lab_id = $2")
            .bind(account_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;
        AuditEvent::new(lab_id, Some(actor_id), "delete", "portal_user")
            .entity(account_id)
            .details(serde_json::json!({ "email": account.email }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // Customer-side session

    pub async fn login(&self, input: PortalLoginInput) -> AppResult<PortalToken> {
        let email = input.email.trim().to_lowercase();

        let account = sqlx::query_as::<_, PortalLoginRow>(
            r#"
            SELECT p.id, p.lab_id, p.customer_id, c.name AS customer_name, p.password_hash,
                   p.is_active, c.is_active AS customer_active
            FROM portal_users p
            JOIN customers c ON c.id = p.customer_id
            WHERE p.email = $1
            "#,
        )
        .bind(&email)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

        if !verify_password(&input.password, &account.password_hash)? {
            tracing::info!(portal_user_id = %account.id, "portal login rejected: bad password");
            return Err(AppError::InvalidCredentials);
        }
        if !account.is_active || !account.customer_active {
            return Err(AppError::Unauthorized("Portal access is disabled".to_string()));
        }

        sqlx::query("UPDATE portal_users SET last_login_at = NOW() WHERE id = $1")
            .bind(account.id)
            .execute(&self.db)
            .await?;

        let now = Utc::now();
        let claims = PortalClaims {
            sub: account.id.to_string(),
            lab_id: account.lab_id.to_string(),
            customer_id: account.customer_id.to_string(),
            scope: PORTAL_SCOPE.to_string(),
            exp: (now + Duration::seconds(self.token_expiry)).timestamp(),
            iat: now.timestamp(),
        };

        Ok(PortalToken {
            access_token: encode_claims(&claims, &self.jwt_secret)?,
            token_type: "Bearer".to_string(),
            expires_in: self.token_expiry,
            customer_id: account.customer_id,
            customer_name: account.customer_name,
        })
    }

    // Read-only views, always filtered by the caller's customer

    pub async fn list_samples(&self, scope: PortalScope, pagination: &Pagination) -> AppResult<PaginatedResponse<Sample>> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM samples WHERE lab_id = $1 AND customer_id = $2 AND status <> $3",
        )
        .bind(scope.lab_id)
        .bind(scope.customer_id)
        .bind(SampleStatus::Draft.as_str())
        .fetch_one(&self.db)
        .await?;

        let samples = sqlx::query_as::<_, Sample>(&format!(
            "{} WHERE s.lab_id = $1 AND s.customer_id = $2 AND s.status <> $3 ORDER BY s.received_at DESC LIMIT $4 OFFSET $5",
            SAMPLE_SELECT
        ))
        .bind(scope.lab_id)
        .bind(scope.customer_id)
        .bind(SampleStatus::Draft.as_str())
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(samples, pagination, total as u64))
    }

    pub async fn get_sample(&self, scope: PortalScope, sample_id: Uuid) -> AppResult<Sample> {
        let sample = sqlx::query_as::<_, Sample>(&format!(
            "{} WHERE s.id = $1 AND s.lab_id = $2 AND s.customer_id = $3",
            SAMPLE_SELECT
        ))
        .bind(sample_id)
        .bind(scope.lab_id)
        .bind(scope.customer_id)
        .fetch_optional(&self.db)
        .await?
        .filter(|s| s.status().is_ok_and(sample_visible))
        .ok_or_else(|| AppError::NotFound("Sample".to_string()))?;
        Ok(sample)
    }

    pub async fn list_reports(&self, scope: PortalScope, pagination: &Pagination) -> AppResult<PaginatedResponse<Report>> {
        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM reports r
            JOIN samples s ON s.id = r.sample_id
            WHERE r.lab_id = $1 AND s.customer_id = $2 AND r.status = $3
            "#,
        )
        .bind(scope.lab_id)
        .bind(scope.customer_id)
        .bind(ReportStatus::Published.as_str())
        .fetch_one(&self.db)
        .await?;

        let reports = sqlx::query_as::<_, Report>(&format!(
            "{} WHERE r.lab_id = $1 AND s.customer_id = $2 AND r.status = $3 ORDER BY r.published_at DESC LIMIT $4 OFFSET $5",
            REPORT_SELECT
        ))
        .bind(scope.lab_id)
        .bind(scope.customer_id)
        .bind(ReportStatus::Published.as_str())
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(reports, pagination, total as u64))
    }

    /// A published report of the caller's customer; anything else is "not found"
    async fn visible_report(&self, scope: PortalScope, report_id: Uuid) -> AppResult<Report> {
        sqlx::query_as::<_, Report>(&format!(
            "{} WHERE r.id = $1 AND r.lab_id = $2 AND s.customer_id = $3",
            REPORT_SELECT
        ))
        .bind(report_id)
        .bind(scope.lab_id)
        .bind(scope.customer_id)
        .fetch_optional(&self.db)
        .await?
        .filter(|r| r.status().is_ok_and(|s| s.is_public()))
        .ok_or_else(|| AppError::NotFound("Report".to_string()))
    }

    pub async fn get_report(&self, scope: PortalScope, report_id: Uuid) -> AppResult<Report> {
        self.visible_report(scope, report_id).await
    }

    pub async fn render_coa(&self, renderer: &DocumentRenderer, scope: PortalScope, report_id: Uuid) -> AppResult<String> {
        let report = self.visible_report(scope, report_id).await?;
        ReportService::new(self.db.clone(), &self.jwt_secret, &self.public_base_url)
            .render_coa(renderer, scope.lab_id, report.id)
            .await
    }

    pub async fn list_invoices(&self, scope: PortalScope, pagination: &Pagination) -> AppResult<PaginatedResponse<Invoice>> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM invoices WHERE lab_id = $1 AND customer_id = $2 AND status <> $3",
        )
        .bind(scope.lab_id)
        .bind(scope.customer_id)
        .bind(InvoiceStatus::Draft.as_str())
        .fetch_one(&self.db)
        .await?;

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "{} WHERE i.lab_id = $1 AND i.customer_id = $2 AND i.status <> $3 ORDER BY i.issue_date DESC, i.invoice_number DESC LIMIT $4 OFFSET $5",
            INVOICE_SELECT
        ))
        .bind(scope.lab_id)
        .bind(scope.customer_id)
        .bind(InvoiceStatus::Draft.as_str())
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(invoices, pagination, total as u64))
    }

    async fn visible_invoice(&self, scope: PortalScope, invoice_id: Uuid) -> AppResult<Invoice> {
        sqlx::query_as::<_, Invoice>(&format!(
            "{} WHERE i.id = $1 AND i.lab_id = $2 AND i.customer_id = $3",
            INVOICE_SELECT
        ))
        .bind(invoice_id)
        .bind(scope.lab_id)
        .bind(scope.customer_id)
        .fetch_optional(&self.db)
        .await?
        .filter(|i| i.status().is_ok_and(|s| s.is_public()))
        .ok_or_else(|| AppError::NotFound("Invoice".to_string()))
    }

    pub async fn get_invoice(&self, scope: PortalScope, invoice_id: Uuid) -> AppResult<InvoiceDetail> {
        let invoice = self.visible_invoice(scope, invoice_id).await?;
        let mut conn = self.db.acquire().await?;
        let items = load_items(&mut conn, ItemTable::Invoice, invoice.id).await?;
        let payments = load_payments(&mut conn, invoice.id).await?;
        Ok(InvoiceDetail {
            balance_due: invoice.balance_due(),
            invoice,
            items,
            payments,
        })
    }

    pub async fn render_invoice(&self, renderer: &DocumentRenderer, scope: PortalScope, invoice_id: Uuid) -> AppResult<String> {
        let invoice = self.visible_invoice(scope, invoice_id).await?;
        let mut conn = self.db.acquire().await?;
        render_invoice(&mut conn, renderer, &invoice).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::decode_claims;

    #[test]
    fn test_draft_samples_hidden() {
        assert!(!sample_visible(SampleStatus::Draft));
        assert!(sample_visible(SampleStatus::Registered));
        assert!(sample_visible(SampleStatus::Reported));
    }

    #[test]
    fn test_portal_claims_roundtrip() {
        let now = Utc::now();
        let claims = PortalClaims {
            sub: Uuid::new_v4().to_string(),
            lab_id: Uuid::new_v4().to_string(),
            customer_id: Uuid::new_v4().to_string(),
            scope: PORTAL_SCOPE.to_string(),
            exp: (now + Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
        };
        let token = encode_claims(&claims, "portal-secret").unwrap();
        let decoded: PortalClaims = decode_claims(&token, "portal-secret").unwrap();
        assert_eq!(decoded.customer_id, claims.customer_id);
        assert_eq!(decoded.scope, PORTAL_SCOPE);
        assert!(matches!(
            decode_claims::<PortalClaims>(&token, "other-secret"),
            Err(AppError::InvalidToken)
        ));
    }
}
