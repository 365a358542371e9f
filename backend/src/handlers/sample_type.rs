//! Sample type handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::{csv_response, read_upload};
use crate::middleware::CurrentUser;
use crate::services::csv_io::ImportSummary;
use crate::services::sample_type::{SampleType, SampleTypeInput, SampleTypeWithParameters, UpdateSampleTypeInput};
use crate::services::SampleTypeService;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SampleTypeQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_sample_types(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<SampleTypeQuery>,
) -> Result<Json<Vec<SampleType>>, AppError> {
    user.require("sample_type", "view")?;
    let types = SampleTypeService::new(state.db.clone())
        .list_sample_types(user.lab_id, query.include_inactive)
        .await?;
    Ok(Json(types))
}

pub async fn get_sample_type(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(sample_type_id): Path<Uuid>,
) -> Result<Json<SampleTypeWithParameters>, AppError> {
    user.require("sample_type", "view")?;
    let sample_type = SampleTypeService::new(state.db.clone())
        .get_sample_type(user.lab_id, sample_type_id)
        .await?;
    Ok(Json(sample_type))
}

pub async fn create_sample_type(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<SampleTypeInput>,
) -> Result<(StatusCode, Json<SampleTypeWithParameters>), AppError> {
    user.require("sample_type", "create")?;
    let sample_type = SampleTypeService::new(state.db.clone())
        .create_sample_type(user.lab_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(sample_type)))
}

pub async fn update_sample_type(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(sample_type_id): Path<Uuid>,
    Json(input): Json<UpdateSampleTypeInput>,
) -> Result<Json<SampleTypeWithParameters>, AppError> {
    user.require("sample_type", "edit")?;
    let sample_type = SampleTypeService::new(state.db.clone())
        .update_sample_type(user.lab_id, user.user_id, sample_type_id, input)
        .await?;
    Ok(Json(sample_type))
}

pub async fn delete_sample_type(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(sample_type_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require("sample_type", "delete")?;
    SampleTypeService::new(state.db.clone())
        .delete_sample_type(user.lab_id, user.user_id, sample_type_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn export_sample_types(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    user.require("sample_type", "export")?;
    let csv = SampleTypeService::new(state.db.clone()).export_csv(user.lab_id).await?;
    Ok(csv_response("sample_types.csv", csv))
}

pub async fn import_sample_types(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> Result<Json<ImportSummary>, AppError> {
    user.require("sample_type", "create")?;
    user.require("sample_type", "edit")?;
    let upload = read_upload(multipart).await?;
    let summary = SampleTypeService::new(state.db.clone())
        .import_csv(user.lab_id, user.user_id, &upload.bytes)
        .await?;
    Ok(Json(summary))
}
