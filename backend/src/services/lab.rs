//! Lab (tenant) profile

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::external::StorageClient;
use crate::services::audit::AuditEvent;
use shared::{validate_gstin, validate_phone};

#[derive(Clone)]
pub struct LabService {
    db: PgPool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Lab {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub accreditation_number: Option<String>,
    pub tax_id: Option<String>,
    pub currency: String,
    pub logo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateLabInput {
    #[validate(length(min = 2, max = 200, message = "must be 2-200 characters"))]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub city: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub state: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub postal_code: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub country: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub phone: Option<Option<String>>,
    #[validate(email(message = "must be a valid email address"))]
    #[serde(default, deserialize_with = "shared::nullable")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub website: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub accreditation_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub tax_id: Option<Option<String>>,
    #[validate(length(equal = 3, message = "must be a 3-letter ISO code"))]
    pub currency: Option<String>,
}

/// Load a lab by id; used by document rendering as well
pub async fn load_lab<'e, E: PgExecutor<'e>>(executor: E, lab_id: Uuid) -> AppResult<Lab> {
    sqlx::query_as::<_, Lab>(
        r#"
        SELECT id, name, code, address, city, state, postal_code, country, phone, email,
               website, accreditation_number, tax_id, currency, logo_url, created_at, updated_at
        FROM labs
        WHERE id = $1
        "#,
    )
    .bind(lab_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound("Lab".to_string()))
}

impl LabService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn get_lab(&self, lab_id: Uuid) -> AppResult<Lab> {
        load_lab(&self.db, lab_id).await
    }

    pub async fn update_lab(&self, lab_id: Uuid, user_id: Uuid, input: UpdateLabInput) -> AppResult<Lab> {
        input.validate()?;
        if let Some(Some(ref phone)) = input.phone {
            validate_phone(phone).map_err(|m| AppError::validation("phone", m))?;
        }
        if let Some(Some(ref tax_id)) = input.tax_id {
            validate_gstin(tax_id).map_err(|m| AppError::validation("tax_id", m))?;
        }

        let existing = self.get_lab(lab_id).await?;
        let currency = input
            .currency
            .as_ref()
            .map(|c| c.to_uppercase())
            .unwrap_or(existing.currency);

        let mut tx = self.db.begin().await?;
        sqlx::query(
            r#"
            UPDATE labs
            SET name = $1, address = $2, city = $3, state = $4, postal_code = $5, country = $6,
                phone = $7, email = $8, website = $9, accreditation_number = $10, tax_id = $11,
                currency = $12, updated_at = NOW()
            WHERE id = $13
            "#,
        )
        .bind(input.name.as_ref().unwrap_or(&existing.name))
        .bind(shared::patch(input.address.clone(), existing.address.clone()))
        .bind(shared::patch(input.city.clone(), existing.city.clone()))
        .bind(shared::patch(input.state.clone(), existing.state.clone()))
        .bind(shared::patch(input.postal_code.clone(), existing.postal_code.clone()))
        .bind(shared::patch(input.country.clone(), existing.country.clone()))
        .bind(shared::patch(input.phone.clone(), existing.phone.clone()))
        .bind(shared::patch(input.email.clone(), existing.email.clone()))
        .bind(shared::patch(input.website.clone(), existing.website.clone()))
        .bind(shared::patch(
            input.accreditation_number.clone(),
            existing.accreditation_number.clone(),
        ))
        .bind(shared::patch(input.tax_id.clone(), existing.tax_id.clone()))
        .bind(&currency)
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "update", "lab")
            .entity(lab_id)
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_lab(lab_id).await
    }

    pub async fn upload_logo(
        &self,
        storage: &StorageClient,
        lab_id: Uuid,
        user_id: Uuid,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> AppResult<Lab> {
        let path = StorageClient::object_path(lab_id, "branding", "logo", content_type)?;
        let stored = storage.upload_image(&path, content_type, bytes).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE labs SET logo_url = $1, updated_at = NOW() WHERE id = $2")
            .bind(&stored.public_url)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;
        AuditEvent::new(lab_id, Some(user_id), "upload_logo", "lab")
            .entity(lab_id)
            .details(serde_json::json!({ "path": stored.path }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_lab(lab_id).await
    }
}
