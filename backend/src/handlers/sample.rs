//! Sample registration and test result handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::services::sample::{
    RegisterSampleInput, Sample, SampleFilter, SampleWithResults, TransitionInput, UpdateSampleInput,
};
use crate::services::test_result::{RecordResultsInput, TestResult, UpdateResultInput};
use crate::services::{SampleService, TestResultService};
use crate::AppState;
use shared::{PaginatedResponse, Pagination};

// ============================================================================
// Samples
// ============================================================================

pub async fn list_samples(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<SampleFilter>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<Sample>>, AppError> {
    user.require("sample", "view")?;
    let samples = SampleService::new(state.db.clone())
        .list_samples(user.lab_id, &filter, &pagination)
        .await?;
    Ok(Json(samples))
}

pub async fn get_sample(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(sample_id): Path<Uuid>,
) -> Result<Json<SampleWithResults>, AppError> {
    user.require("sample", "view")?;
    let sample = SampleService::new(state.db.clone())
        .get_sample(user.lab_id, sample_id)
        .await?;
    Ok(Json(sample))
}

/// Register a sample; result rows are created from its type's parameters
pub async fn register_sample(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<RegisterSampleInput>,
) -> Result<(StatusCode, Json<SampleWithResults>), AppError> {
    user.require("sample", "create")?;
    let sample = SampleService::new(state.db.clone())
        .register_sample(user.lab_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(sample)))
}

pub async fn update_sample(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(sample_id): Path<Uuid>,
    Json(input): Json<UpdateSampleInput>,
) -> Result<Json<SampleWithResults>, AppError> {
    user.require("sample", "edit")?;
    let sample = SampleService::new(state.db.clone())
        .update_sample(user.lab_id, user.user_id, sample_id, input)
        .await?;
    Ok(Json(sample))
}

pub async fn transition_sample(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(sample_id): Path<Uuid>,
    Json(input): Json<TransitionInput>,
) -> Result<Json<SampleWithResults>, AppError> {
    user.require("sample", "edit")?;
    let sample = SampleService::new(state.db.clone())
        .transition(user.lab_id, user.user_id, sample_id, input.status)
        .await?;
    Ok(Json(sample))
}

pub async fn delete_sample(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(sample_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require("sample", "delete")?;
    SampleService::new(state.db.clone())
        .delete_sample(user.lab_id, user.user_id, sample_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Test results
// ============================================================================

pub async fn list_results(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(sample_id): Path<Uuid>,
) -> Result<Json<Vec<TestResult>>, AppError> {
    user.require("test_result", "view")?;
    let results = TestResultService::new(state.db.clone())
        .list_results(user.lab_id, sample_id)
        .await?;
    Ok(Json(results))
}

/// Batch entry of measured values for one sample
pub async fn record_results(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(sample_id): Path<Uuid>,
    Json(input): Json<RecordResultsInput>,
) -> Result<Json<Vec<TestResult>>, AppError> {
    user.require("test_result", "edit")?;
    let results = TestResultService::new(state.db.clone())
        .record_results(user.lab_id, user.user_id, sample_id, input)
        .await?;
    Ok(Json(results))
}

pub async fn complete_results(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(sample_id): Path<Uuid>,
) -> Result<Json<Vec<TestResult>>, AppError> {
    user.require("test_result", "approve")?;
    let results = TestResultService::new(state.db.clone())
        .complete_results(user.lab_id, user.user_id, sample_id)
        .await?;
    Ok(Json(results))
}

pub async fn update_result(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(result_id): Path<Uuid>,
    Json(input): Json<UpdateResultInput>,
) -> Result<Json<TestResult>, AppError> {
    user.require("test_result", "edit")?;
    let result = TestResultService::new(state.db.clone())
        .update_result(user.lab_id, user.user_id, result_id, input)
        .await?;
    Ok(Json(result))
}

pub async fn reopen_result(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(result_id): Path<Uuid>,
) -> Result<Json<TestResult>, AppError> {
    user.require("test_result", "approve")?;
    let result = TestResultService::new(state.db.clone())
        .reopen_result(user.lab_id, user.user_id, result_id)
        .await?;
    Ok(Json(result))
}

pub async fn delete_result(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(result_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require("test_result", "delete")?;
    TestResultService::new(state.db.clone())
        .delete_result(user.lab_id, user.user_id, result_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
