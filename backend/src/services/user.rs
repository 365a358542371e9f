//! Staff user management

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::external::StorageClient;
use crate::services::audit::AuditEvent;
use crate::services::auth::{hash_password, verify_password};
use shared::validate_password;

#[derive(Clone)]
pub struct UserService {
    db: PgPool,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub role_id: Uuid,
    pub role_name: String,
    pub email: String,
    pub name: String,
    pub designation: Option<String>,
    pub phone: Option<String>,
    pub signature_url: Option<String>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserInput {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 200, message = "is required"))]
    pub name: String,
    pub password: String,
    pub role_id: Uuid,
    pub designation: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserInput {
    pub name: Option<String>,
    pub role_id: Option<Uuid>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub designation: Option<Option<String>>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub phone: Option<Option<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordInput {
    pub current_password: String,
    pub new_password: String,
}

const USER_SELECT: &str = r#"
    SELECT u.id, u.lab_id, u.role_id, r.name AS role_name, u.email, u.name, u.designation,
           u.phone, u.signature_url, u.is_active, u.last_login_at, u.created_at
    FROM users u
    JOIN roles r ON r.id = u.role_id
"#;

impl UserService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_users(&self, lab_id: Uuid) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "{} WHERE u.lab_id = $1 ORDER BY u.name",
            USER_SELECT
        ))
        .bind(lab_id)
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    pub async fn get_user(&self, lab_id: Uuid, user_id: Uuid) -> AppResult<User> {
        sqlx::query_as::<_, User>(&format!("{} WHERE u.id = $1 AND u.lab_id = $2", USER_SELECT))
            .bind(user_id)
            .bind(lab_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    pub async fn create_user(
        &self,
        lab_id: Uuid,
        actor_id: Uuid,
        input: CreateUserInput,
    ) -> AppResult<User> {
        input.validate()?;
        validate_password(&input.password).map_err(|m| AppError::validation("password", m))?;
        self.ensure_role_in_lab(lab_id, input.role_id).await?;

        let email = input.email.trim().to_lowercase();
        let taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = $1")
            .bind(&email)
            .fetch_one(&self.db)
            .await?;
        if taken > 0 {
            return Err(AppError::Conflict("Email is already registered".to_string()));
        }

        let password_hash = hash_password(&input.password)?;

        let mut tx = self.db.begin().await?;
        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO users (lab_id, role_id, email, password_hash, name, designation, phone)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(lab_id)
        .bind(input.role_id)
        .bind(&email)
        .bind(&password_hash)
        .bind(&input.name)
        .bind(&input.designation)
        .bind(&input.phone)
        .fetch_one(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(actor_id), "create", "user")
            .entity(user_id)
            .details(serde_json::json!({ "email": email, "role_id": input.role_id }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_user(lab_id, user_id).await
    }

    pub async fn update_user(
        &self,
        lab_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
        input: UpdateUserInput,
    ) -> AppResult<User> {
        let existing = self.get_user(lab_id, user_id).await?;

        if actor_id == user_id && input.is_active == Some(false) {
            return Err(AppError::validation("is_active", "You cannot deactivate your own account"));
        }
        if actor_id == user_id && input.role_id.is_some_and(|r| r != existing.role_id) {
            return Err(AppError::validation("role_id", "You cannot change your own role"));
        }
        if let Some(role_id) = input.role_id {
            self.ensure_role_in_lab(lab_id, role_id).await?;
        }

        let mut tx = self.db.begin().await?;
        sqlx::query(
            r#"
            UPDATE users
            SET name = $1, role_id = $2, designation = $3, phone = $4, is_active = $5,
                updated_at = NOW()
            WHERE id = $6 AND lab_id = $7
            "#,
        )
        .bind(input.name.as_deref().unwrap_or(&existing.name))
        .bind(input.role_id.unwrap_or(existing.role_id))
        .bind(shared::patch(input.designation.clone(), existing.designation.clone()))
        .bind(shared::patch(input.phone.clone(), existing.phone.clone()))
        .bind(input.is_active.unwrap_or(existing.is_active))
        .bind(user_id)
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        if input.is_active == Some(false) {
            revoke_sessions(&mut tx, user_id).await?;
        }

        AuditEvent::new(lab_id, Some(actor_id), "update", "user")
            .entity(user_id)
            .details(serde_json::json!({
                "role_id": input.role_id,
                "is_active": input.is_active,
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_user(lab_id, user_id).await
    }

    /// Deactivate a user and revoke their refresh tokens
    pub async fn deactivate_user(&self, lab_id: Uuid, actor_id: Uuid, user_id: Uuid) -> AppResult<()> {
        if actor_id == user_id {
            return Err(AppError::validation("user_id", "You cannot deactivate your own account"));
        }
        self.get_user(lab_id, user_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE users SET is_active = false, updated_at = NOW() WHERE id = $1 AND lab_id = $2")
            .bind(user_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;
        revoke_sessions(&mut tx, user_id).await?;

        AuditEvent::new(lab_id, Some(actor_id), "deactivate", "user")
            .entity(user_id)
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(%lab_id, %user_id, "user deactivated");
        Ok(())
    }

    pub async fn change_password(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        input: ChangePasswordInput,
    ) -> AppResult<()> {
        validate_password(&input.new_password).map_err(|m| AppError::validation("new_password", m))?;

        let current_hash = sqlx::query_scalar::<_, String>(
            "SELECT password_hash FROM users WHERE id = $1 AND lab_id = $2",
        )
        .bind(user_id)
        .bind(lab_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        if !verify_password(&input.current_password, &current_hash)? {
            return Err(AppError::validation("current_password", "Current password is incorrect"));
        }

        let new_hash = hash_password(&input.new_password)?;

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(&new_hash)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        revoke_sessions(&mut tx, user_id).await?;
        AuditEvent::new(lab_id, Some(user_id), "change_password", "user")
            .entity(user_id)
            .record(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Store a signature image and link it to the user
    pub async fn upload_signature(
        &self,
        storage: &StorageClient,
        lab_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> AppResult<User> {
        self.get_user(lab_id, user_id).await?;

        let path = StorageClient::object_path(lab_id, "signatures", &user_id.to_string(), content_type)?;
        let stored = storage.upload_image(&path, content_type, bytes).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE users SET signature_url = $1, updated_at = NOW() WHERE id = $2 AND lab_id = $3")
            .bind(&stored.public_url)
            .bind(user_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;
        AuditEvent::new(lab_id, Some(actor_id), "upload_signature", "user")
            .entity(user_id)
            .details(serde_json::json!({ "path": stored.path }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_user(lab_id, user_id).await
    }

    async fn ensure_role_in_lab(&self, lab_id: Uuid, role_id: Uuid) -> AppResult<()> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1 AND lab_id = $2)",
        )
        .bind(role_id)
        .bind(lab_id)
        .fetch_one(&self.db)
        .await?;
        if !exists {
            return Err(AppError::validation("role_id", "Role does not exist in this lab"));
        }
        Ok(())
    }
}

async fn revoke_sessions(conn: &mut sqlx::PgConnection, user_id: Uuid) -> AppResult<()> {
    sqlx::query("UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
