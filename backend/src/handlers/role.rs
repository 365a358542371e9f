//! Role management handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::services::role::{CreateRoleInput, Permission, Role, RoleWithPermissions, UpdateRoleInput};
use crate::services::RoleService;
use crate::AppState;

/// Response for list of roles
#[derive(Serialize)]
pub struct RolesResponse {
    pub roles: Vec<Role>,
}

/// Response for list of permissions
#[derive(Serialize)]
pub struct PermissionsResponse {
    pub permissions: Vec<Permission>,
}

/// Get all roles of the current lab
pub async fn list_roles(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<RolesResponse>, AppError> {
    user.require("role", "view")?;

    let roles = RoleService::new(state.db.clone()).get_roles(user.lab_id).await?;
    Ok(Json(RolesResponse { roles }))
}

/// Get a specific role with its permissions
pub async fn get_role(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(role_id): Path<Uuid>,
) -> Result<Json<RoleWithPermissions>, AppError> {
    user.require("role", "view")?;

    let role = RoleService::new(state.db.clone())
        .get_role_with_permissions(user.lab_id, role_id)
        .await?;
    Ok(Json(role))
}

/// Permission catalogue
pub async fn list_permissions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<PermissionsResponse>, AppError> {
    user.require("role", "view")?;

    let permissions = RoleService::new(state.db.clone()).get_all_permissions().await?;
    Ok(Json(PermissionsResponse { permissions }))
}

/// Create a new custom role
pub async fn create_role(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateRoleInput>,
) -> Result<(StatusCode, Json<RoleWithPermissions>), AppError> {
    user.require("role", "create")?;

    let role = RoleService::new(state.db.clone())
        .create_role(user.lab_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// Update an existing role
pub async fn update_role(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(role_id): Path<Uuid>,
    Json(input): Json<UpdateRoleInput>,
) -> Result<Json<RoleWithPermissions>, AppError> {
    user.require("role", "edit")?;

    let role = RoleService::new(state.db.clone())
        .update_role(user.lab_id, user.user_id, role_id, input)
        .await?;
    Ok(Json(role))
}

/// Delete a custom role
pub async fn delete_role(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(role_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require("role", "delete")?;

    RoleService::new(state.db.clone())
        .delete_role(user.lab_id, user.user_id, role_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
