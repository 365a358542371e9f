//! Lab profile and document numbering handlers

use axum::{
    extract::{Multipart, Path, State},
    Json,
};

use crate::error::AppError;
use crate::handlers::read_upload;
use crate::middleware::CurrentUser;
use crate::services::lab::{Lab, UpdateLabInput};
use crate::services::numbering::{NumberingSetting, UpdatePrefixInput};
use crate::services::{LabService, NumberingService};
use crate::AppState;

pub async fn get_lab(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Lab>, AppError> {
    user.require("lab", "view")?;
    let lab = LabService::new(state.db.clone()).get_lab(user.lab_id).await?;
    Ok(Json(lab))
}

pub async fn update_lab(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<UpdateLabInput>,
) -> Result<Json<Lab>, AppError> {
    user.require("lab", "edit")?;
    let lab = LabService::new(state.db.clone())
        .update_lab(user.lab_id, user.user_id, input)
        .await?;
    Ok(Json(lab))
}

/// Upload the lab logo printed on certificates and invoices
pub async fn upload_logo(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> Result<Json<Lab>, AppError> {
    user.require("lab", "edit")?;
    let upload = read_upload(multipart).await?;
    let lab = LabService::new(state.db.clone())
        .upload_logo(&state.storage, user.lab_id, user.user_id, &upload.content_type, upload.bytes)
        .await?;
    Ok(Json(lab))
}

pub async fn list_numbering(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<NumberingSetting>>, AppError> {
    user.require("numbering", "view")?;
    let settings = NumberingService::new(state.db.clone())
        .list_settings(user.lab_id)
        .await?;
    Ok(Json(settings))
}

pub async fn update_numbering_prefix(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(module): Path<String>,
    Json(input): Json<UpdatePrefixInput>,
) -> Result<Json<NumberingSetting>, AppError> {
    user.require("numbering", "edit")?;
    let setting = NumberingService::new(state.db.clone())
        .update_prefix(user.lab_id, user.user_id, &module, input)
        .await?;
    Ok(Json(setting))
}

/// Next number of a module without consuming it
pub async fn preview_number(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(module): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    user.require("numbering", "view")?;
    let next = NumberingService::new(state.db.clone())
        .preview(user.lab_id, &module)
        .await?;
    Ok(Json(serde_json::json!({ "module": module, "next_number": next })))
}
