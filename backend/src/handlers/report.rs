//! Analysis report, certificate and report template handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Html,
    Json,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::services::report::{
    CreateReportInput, RejectReportInput, Report, ReportDetail, ReportFilter, UpdateReportInput,
    VerificationSummary,
};
use crate::services::report_template::{CreateTemplateInput, ReportTemplate, UpdateTemplateInput};
use crate::services::{ReportService, ReportTemplateService};
use crate::AppState;
use shared::{PaginatedResponse, Pagination};

fn report_service(state: &AppState) -> ReportService {
    ReportService::new(
        state.db.clone(),
        &state.config.jwt.secret,
        &state.config.portal.public_base_url,
    )
}

// ============================================================================
// Reports
// ============================================================================

pub async fn list_reports(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<ReportFilter>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<Report>>, AppError> {
    user.require("report", "view")?;
    let reports = report_service(&state)
        .list_reports(user.lab_id, &filter, &pagination)
        .await?;
    Ok(Json(reports))
}

pub async fn get_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(report_id): Path<Uuid>,
) -> Result<Json<ReportDetail>, AppError> {
    user.require("report", "view")?;
    let report = report_service(&state).get_report(user.lab_id, report_id).await?;
    Ok(Json(report))
}

pub async fn create_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateReportInput>,
) -> Result<(StatusCode, Json<ReportDetail>), AppError> {
    user.require("report", "create")?;
    let report = report_service(&state)
        .create_report(user.lab_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn update_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(report_id): Path<Uuid>,
    Json(input): Json<UpdateReportInput>,
) -> Result<Json<ReportDetail>, AppError> {
    user.require("report", "edit")?;
    let report = report_service(&state)
        .update_report(user.lab_id, user.user_id, report_id, input)
        .await?;
    Ok(Json(report))
}

pub async fn submit_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(report_id): Path<Uuid>,
) -> Result<Json<ReportDetail>, AppError> {
    user.require("report", "edit")?;
    let report = report_service(&state)
        .submit_report(user.lab_id, user.user_id, report_id)
        .await?;
    Ok(Json(report))
}

pub async fn approve_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(report_id): Path<Uuid>,
) -> Result<Json<ReportDetail>, AppError> {
    user.require("report", "approve")?;
    let report = report_service(&state)
        .approve_report(user.lab_id, user.user_id, report_id)
        .await?;
    Ok(Json(report))
}

pub async fn reject_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(report_id): Path<Uuid>,
    Json(input): Json<RejectReportInput>,
) -> Result<Json<ReportDetail>, AppError> {
    user.require("report", "approve")?;
    let report = report_service(&state)
        .reject_report(user.lab_id, user.user_id, report_id, input)
        .await?;
    Ok(Json(report))
}

pub async fn publish_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(report_id): Path<Uuid>,
) -> Result<Json<ReportDetail>, AppError> {
    user.require("report", "approve")?;
    let report = report_service(&state)
        .publish_report(user.lab_id, user.user_id, report_id)
        .await?;
    Ok(Json(report))
}

pub async fn reissue_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(report_id): Path<Uuid>,
) -> Result<Json<ReportDetail>, AppError> {
    user.require("report", "approve")?;
    let report = report_service(&state)
        .reissue_report(user.lab_id, user.user_id, report_id)
        .await?;
    Ok(Json(report))
}

pub async fn delete_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(report_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require("report", "delete")?;
    report_service(&state)
        .delete_report(user.lab_id, user.user_id, report_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Printable certificate of analysis
pub async fn render_coa(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(report_id): Path<Uuid>,
) -> Result<Html<String>, AppError> {
    user.require("report", "export")?;
    let html = report_service(&state)
        .render_coa(&state.renderer, user.lab_id, report_id)
        .await?;
    Ok(Html(html))
}

/// Public certificate check behind the QR code; no session required
pub async fn verify_report(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<VerificationSummary>, AppError> {
    let summary = report_service(&state).verify(&code).await?;
    Ok(Json(summary))
}

// ============================================================================
// Report templates
// ============================================================================

pub async fn list_templates(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ReportTemplate>>, AppError> {
    user.require("report_template", "view")?;
    let templates = ReportTemplateService::new(state.db.clone())
        .list_templates(user.lab_id)
        .await?;
    Ok(Json(templates))
}

pub async fn get_template(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(template_id): Path<Uuid>,
) -> Result<Json<ReportTemplate>, AppError> {
    user.require("report_template", "view")?;
    let template = ReportTemplateService::new(state.db.clone())
        .get_template(user.lab_id, template_id)
        .await?;
    Ok(Json(template))
}

pub async fn create_template(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateTemplateInput>,
) -> Result<(StatusCode, Json<ReportTemplate>), AppError> {
    user.require("report_template", "create")?;
    let template = ReportTemplateService::new(state.db.clone())
        .create_template(user.lab_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn update_template(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(template_id): Path<Uuid>,
    Json(input): Json<UpdateTemplateInput>,
) -> Result<Json<ReportTemplate>, AppError> {
    user.require("report_template", "edit")?;
    let template = ReportTemplateService::new(state.db.clone())
        .update_template(user.lab_id, user.user_id, template_id, input)
        .await?;
    Ok(Json(template))
}

pub async fn delete_template(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(template_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require("report_template", "delete")?;
    ReportTemplateService::new(state.db.clone())
        .delete_template(user.lab_id, user.user_id, template_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
