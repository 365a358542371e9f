//! Report (COA) templates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use crate::services::document::check_template_syntax;

#[derive(Clone)]
pub struct ReportTemplateService {
    db: PgPool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReportTemplate {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub name: String,
    pub header_text: Option<String>,
    pub footer_text: Option<String>,
    pub body_template: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTemplateInput {
    #[validate(length(min = 1, max = 200, message = "is required"))]
    pub name: String,
    pub header_text: Option<String>,
    pub footer_text: Option<String>,
    pub body_template: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateInput {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub header_text: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub footer_text: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub body_template: Option<Option<String>>,
    pub is_default: Option<bool>,
}

const TEMPLATE_COLUMNS: &str =
    "id, lab_id, name, header_text, footer_text, body_template, is_default, created_at, updated_at";

pub async fn find_template(conn: &mut PgConnection, lab_id: Uuid, template_id: Uuid) -> AppResult<ReportTemplate> {
    sqlx::query_as::<_, ReportTemplate>(&format!(
        "SELECT {} FROM report_templates WHERE id = $1 AND lab_id = $2",
        TEMPLATE_COLUMNS
    ))
    .bind(template_id)
    .bind(lab_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Report template".to_string()))
}

/// The lab's default template, if one is flagged
pub async fn default_template(conn: &mut PgConnection, lab_id: Uuid) -> AppResult<Option<ReportTemplate>> {
    let template = sqlx::query_as::<_, ReportTemplate>(&format!(
        "SELECT {} FROM report_templates WHERE lab_id = $1 AND is_default",
        TEMPLATE_COLUMNS
    ))
    .bind(lab_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(template)
}

async fn clear_default(conn: &mut PgConnection, lab_id: Uuid) -> AppResult<()> {
    sqlx::query("UPDATE report_templates SET is_default = false WHERE lab_id = $1 AND is_default")
        .bind(lab_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn ensure_name_free(conn: &mut PgConnection, lab_id: Uuid, name: &str, except: Option<Uuid>) -> AppResult<()> {
    let taken = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM report_templates
            WHERE lab_id = $1 AND name = $2 AND ($3::uuid IS NULL OR id <> $3)
        )
        "#,
    )
    .bind(lab_id)
    .bind(name)
    .bind(except)
    .fetch_one(&mut *conn)
    .await?;
    if taken {
        return Err(AppError::Conflict(format!("Template {} already exists", name)));
    }
    Ok(())
}

pub fn template_in_use_message(reports: i64) -> String {
    format!(
        "Cannot delete template. {} report(s) use this template.",
        reports
    )
}

impl ReportTemplateService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_templates(&self, lab_id: Uuid) -> AppResult<Vec<ReportTemplate>> {
        let templates = sqlx::query_as::<_, ReportTemplate>(&format!(
            "SELECT {} FROM report_templates WHERE lab_id = $1 ORDER BY is_default DESC, name",
            TEMPLATE_COLUMNS
        ))
        .bind(lab_id)
        .fetch_all(&self.db)
        .await?;
        Ok(templates)
    }

    pub async fn get_template(&self, lab_id: Uuid, template_id: Uuid) -> AppResult<ReportTemplate> {
        let mut conn = self.db.acquire().await?;
        find_template(&mut conn, lab_id, template_id).await
    }

    pub async fn create_template(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        input: CreateTemplateInput,
    ) -> AppResult<ReportTemplate> {
        input.validate()?;
        if let Some(ref body) = input.body_template {
            check_template_syntax(body)?;
        }

        let mut tx = self.db.begin().await?;
        let name = input.name.trim();
        ensure_name_free(&mut tx, lab_id, name, None).await?;
        if input.is_default {
            clear_default(&mut tx, lab_id).await?;
        }

        let template_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO report_templates (lab_id, name, header_text, footer_text, body_template, is_default)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(lab_id)
        .bind(name)
        .bind(&input.header_text)
        .bind(&input.footer_text)
        .bind(&input.body_template)
        .bind(input.is_default)
        .fetch_one(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "create", "report_template")
            .entity(template_id)
            .details(serde_json::json!({ "name": name, "is_default": input.is_default }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_template(lab_id, template_id).await
    }

    pub async fn update_template(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        template_id: Uuid,
        input: UpdateTemplateInput,
    ) -> AppResult<ReportTemplate> {
        if let Some(Some(ref body)) = input.body_template {
            check_template_syntax(body)?;
        }

        let mut tx = self.db.begin().await?;
        let existing = find_template(&mut tx, lab_id, template_id).await?;

        let name = match input.name.as_deref().map(str::trim) {
            Some("") => return Err(AppError::validation("name", "is required")),
            Some(name) => {
                ensure_name_free(&mut tx, lab_id, name, Some(template_id)).await?;
                name.to_string()
            }
            None => existing.name.clone(),
        };
        let is_default = input.is_default.unwrap_or(existing.is_default);
        if is_default && !existing.is_default {
            clear_default(&mut tx, lab_id).await?;
        }

        sqlx::query(
            r#"
            UPDATE report_templates
            SET name = $1, header_text = $2, footer_text = $3, body_template = $4,
                is_default = $5, updated_at = NOW()
            WHERE id = $6 AND lab_id = $7
            "#,
        )
        .bind(&name)
        .bind(shared::patch(input.header_text, existing.header_text))
        .bind(shared::patch(input.footer_text, existing.footer_text))
        .bind(shared::patch(input.body_template, existing.body_template))
        .bind(is_default)
        .bind(template_id)
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "update", "report_template")
            .entity(template_id)
            .details(serde_json::json!({ "name": name, "is_default": is_default }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_template(lab_id, template_id).await
    }

    pub async fn delete_template(&self, lab_id: Uuid, user_id: Uuid, template_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let existing = find_template(&mut tx, lab_id, template_id).await?;

        let in_use = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reports WHERE template_id = $1")
            .bind(template_id)
            .fetch_one(&mut *tx)
            .await?;
        if in_use > 0 {
            return Err(AppError::DeleteBlocked(template_in_use_message(in_use)));
        }

        sqlx::query("DELETE FROM report_templates WHERE id = $1 AND lab_id = $2")
            .bind(template_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "delete", "report_template")
            .entity(template_id)
            .details(serde_json::json!({ "name": existing.name }))
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
    fn test_in_use_message_names_count() {
        assert_eq!(
            template_in_use_message(3),
            "Cannot delete template. 3 report(s) use this template."
        );
    }
}
