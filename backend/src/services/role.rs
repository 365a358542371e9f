//! Role management service for custom roles and permissions

use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use shared::{ADMIN_ROLE, SYSTEM_ROLE_NAMES};

/// Role service for managing lab roles
#[derive(Clone)]
pub struct RoleService {
    db: PgPool,
}

/// Role information
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Role {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_system_role: bool,
    pub user_count: i64,
}

/// Permission information
#[derive(Debug, Serialize, Clone, sqlx::FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
}

/// Input for creating a custom role
#[derive(Debug, Deserialize)]
pub struct CreateRoleInput {
    pub name: String,
    pub description: Option<String>,
    pub permission_ids: Vec<Uuid>,
}

/// Input for updating a role
#[derive(Debug, Deserialize)]
pub struct UpdateRoleInput {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub description: Option<Option<String>>,
    pub permission_ids: Option<Vec<Uuid>>,
}

/// Role with its permissions
#[derive(Debug, Serialize)]
pub struct RoleWithPermissions {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<Permission>,
}

const ROLE_COLUMNS: &str = r#"
    SELECT r.id, r.lab_id, r.name, r.description, r.is_system_role,
           (SELECT COUNT(*) FROM users u WHERE u.role_id = r.id) AS user_count
    FROM roles r
"#;

fn is_reserved_name(name: &str) -> bool {
    SYSTEM_ROLE_NAMES.contains(&name.trim().to_lowercase().as_str())
}

impl RoleService {
    /// Create a new RoleService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Get all roles for a lab
    pub async fn get_roles(&self, lab_id: Uuid) -> AppResult<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(&format!(
            "{} WHERE r.lab_id = $1 ORDER BY r.is_system_role DESC, r.name ASC",
            ROLE_COLUMNS
        ))
        .bind(lab_id)
        .fetch_all(&self.db)
        .await?;

        Ok(roles)
    }

    /// Get a role by ID with its permissions
    pub async fn get_role_with_permissions(
        &self,
        lab_id: Uuid,
        role_id: Uuid,
    ) -> AppResult<RoleWithPermissions> {
        let mut conn = self.db.acquire().await?;
        let role = find_role(&mut conn, lab_id, role_id).await?;

        let permissions = sqlx::query_as::<_, Permission>(
            r#"
            SELECT p.id, p.resource, p.action, p.description
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = $1
            ORDER BY p.resource, p.action
            "#,
        )
        .bind(role_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(RoleWithPermissions { role, permissions })
    }

    /// Get all available permissions
    pub async fn get_all_permissions(&self) -> AppResult<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            r#"
            SELECT id, resource, action, description
            FROM permissions
            ORDER BY resource, action
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(permissions)
    }

    /// Create a custom role
    pub async fn create_role(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        input: CreateRoleInput,
    ) -> AppResult<RoleWithPermissions> {
        let name = input.name.trim().to_string();
        if name.is_empty() || name.len() > 50 {
            return Err(AppError::validation("name", "Role name must be 1-50 characters"));
        }
        if is_reserved_name(&name) {
            return Err(AppError::validation("name", "Cannot use reserved role name"));
        }

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM roles WHERE lab_id = $1 AND LOWER(name) = LOWER($2)",
        )
        .bind(lab_id)
        .bind(&name)
        .fetch_one(&self.db)
        .await?;

        if existing > 0 {
            return Err(AppError::Conflict("Role with this name already exists".to_string()));
        }

        let mut tx = self.db.begin().await?;

        validate_permission_ids(&mut tx, &input.permission_ids).await?;

        let role_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO roles (lab_id, name, description, is_system_role)
            VALUES ($1, $2, $3, false)
            RETURNING id
            "#,
        )
        .bind(lab_id)
        .bind(&name)
        .bind(&input.description)
        .fetch_one(&mut *tx)
        .await?;

        assign_permissions(&mut tx, role_id, &input.permission_ids).await?;

        AuditEvent::new(lab_id, Some(user_id), "create", "role")
            .entity(role_id)
            .details(serde_json::json!({
                "name": name,
                "permission_count": input.permission_ids.len(),
            }))
            .record(&mut *tx)
            .await?;

        tx.commit().await?;

        self.get_role_with_permissions(lab_id, role_id).await
    }

    /// Update a role; system roles keep their name and the admin role its permissions
    pub async fn update_role(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
        input: UpdateRoleInput,
    ) -> AppResult<RoleWithPermissions> {
        let mut tx = self.db.begin().await?;
        let existing = find_role(&mut tx, lab_id, role_id).await?;

        if existing.is_system_role && input.name.is_some() {
            return Err(AppError::validation("name", "Cannot rename system roles"));
        }
        if existing.name == ADMIN_ROLE && existing.is_system_role && input.permission_ids.is_some() {
            return Err(AppError::validation(
                "permission_ids",
                "The admin role always holds every permission",
            ));
        }

        if let Some(ref name) = input.name {
            let name = name.trim();
            if name.is_empty() || name.len() > 50 {
                return Err(AppError::validation("name", "Role name must be 1-50 characters"));
            }
            if is_reserved_name(name) {
                return Err(AppError::validation("name", "Cannot use reserved role name"));
            }

            let duplicate = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM roles WHERE lab_id = $1 AND LOWER(name) = LOWER($2) AND id != $3",
            )
            .bind(lab_id)
            .bind(name)
            .bind(role_id)
            .fetch_one(&mut *tx)
            .await?;

            if duplicate > 0 {
                return Err(AppError::Conflict("Role with this name already exists".to_string()));
            }
        }

        if !existing.is_system_role {
            let name = input
                .name
                .as_deref()
                .map(|n| n.trim().to_string())
                .unwrap_or(existing.name);
            let description = shared::patch(input.description.clone(), existing.description);

            sqlx::query("UPDATE roles SET name = $1, description = $2 WHERE id = $3")
                .bind(&name)
                .bind(&description)
                .bind(role_id)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(ref permission_ids) = input.permission_ids {
            validate_permission_ids(&mut tx, permission_ids).await?;

            sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
                .bind(role_id)
                .execute(&mut *tx)
                .await?;

            assign_permissions(&mut tx, role_id, permission_ids).await?;
        }

        AuditEvent::new(lab_id, Some(user_id), "update", "role")
            .entity(role_id)
            .details(serde_json::json!({
                "renamed": input.name.is_some(),
                "permission_count": input.permission_ids.as_ref().map(|p| p.len()),
            }))
            .record(&mut *tx)
            .await?;

        tx.commit().await?;

        self.get_role_with_permissions(lab_id, role_id).await
    }

    /// Delete a custom role (system roles and roles in use cannot be deleted)
    pub async fn delete_role(&self, lab_id: Uuid, user_id: Uuid, role_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let role = find_role(&mut tx, lab_id, role_id).await?;

        if role.is_system_role {
            return Err(AppError::DeleteBlocked("Cannot delete system roles".to_string()));
        }

        if role.user_count > 0 {
            return Err(AppError::DeleteBlocked(format!(
                "Cannot delete role. {} user(s) are assigned to it.",
                role.user_count
            )));
        }

        sqlx::query("DELETE FROM roles WHERE id = $1 AND lab_id = $2")
            .bind(role_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "delete", "role")
            .entity(role_id)
            .details(serde_json::json!({ "name": role.name }))
            .record(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

async fn find_role(conn: &mut PgConnection, lab_id: Uuid, role_id: Uuid) -> AppResult<Role> {
    sqlx::query_as::<_, Role>(&format!("{} WHERE r.id = $1 AND r.lab_id = $2", ROLE_COLUMNS))
        .bind(role_id)
        .bind(lab_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Role".to_string()))
}

async fn validate_permission_ids(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let valid_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT id) FROM permissions WHERE id = ANY($1)")
            .bind(ids)
            .fetch_one(&mut *conn)
            .await?;

    let mut unique = ids.to_vec();
    unique.sort();
    unique.dedup();
    if valid_count != unique.len() as i64 {
        return Err(AppError::validation(
            "permission_ids",
            "One or more permission IDs are invalid",
        ));
    }
    Ok(())
}

async fn assign_permissions(conn: &mut PgConnection, role_id: Uuid, ids: &[Uuid]) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO role_permissions (role_id, permission_id)
        SELECT $1, UNNEST($2::uuid[])
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(role_id)
    .bind(ids)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved_name("Admin"));
        assert!(is_reserved_name(" viewer "));
        assert!(!is_reserved_name("QA Reviewer"));
    }
}
