//! Staff user handlers

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::read_upload;
use crate::middleware::{AccountKey, CurrentUser};
use crate::services::user::{ChangePasswordInput, CreateUserInput, UpdateUserInput, User};
use crate::services::UserService;
use crate::AppState;

pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<User>>, AppError> {
    user.require("user", "view")?;
    let users = UserService::new(state.db.clone()).list_users(user.lab_id).await?;
    Ok(Json(users))
}

pub async fn get_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<User>, AppError> {
    user.require("user", "view")?;
    let found = UserService::new(state.db.clone()).get_user(user.lab_id, user_id).await?;
    Ok(Json(found))
}

pub async fn create_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateUserInput>,
) -> Result<(StatusCode, Json<User>), AppError> {
    user.require("user", "create")?;
    let created = UserService::new(state.db.clone())
        .create_user(user.lab_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
    Json(input): Json<UpdateUserInput>,
) -> Result<Json<User>, AppError> {
    user.require("user", "edit")?;
    let updated = UserService::new(state.db.clone())
        .update_user(user.lab_id, user.user_id, user_id, input)
        .await?;
    state.accounts.forget(AccountKey::staff(user.lab_id, user_id)).await;
    Ok(Json(updated))
}

/// Users are deactivated rather than removed; reports keep their signatories
pub async fn deactivate_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require("user", "delete")?;
    UserService::new(state.db.clone())
        .deactivate_user(user.lab_id, user.user_id, user_id)
        .await?;
    state.accounts.forget(AccountKey::staff(user.lab_id, user_id)).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn upload_signature(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<User>, AppError> {
    // Anyone may upload their own signature
    if user_id != user.user_id {
        user.require("user", "edit")?;
    }
    let upload = read_upload(multipart).await?;
    let updated = UserService::new(state.db.clone())
        .upload_signature(
            &state.storage,
            user.lab_id,
            user.user_id,
            user_id,
            &upload.content_type,
            upload.bytes,
        )
        .await?;
    Ok(Json(updated))
}

pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<ChangePasswordInput>,
) -> Result<StatusCode, AppError> {
    UserService::new(state.db.clone())
        .change_password(user.lab_id, user.user_id, input)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
