//! Audit trail handlers

use axum::{
    extract::{Query, State},
    response::Response,
    Json,
};

use crate::error::AppError;
use crate::handlers::csv_response;
use crate::middleware::CurrentUser;
use crate::services::audit::{AuditLogEntry, AuditLogFilter};
use crate::services::AuditService;
use crate::AppState;
use shared::{PaginatedResponse, Pagination};

pub async fn list_audit_logs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<AuditLogFilter>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<AuditLogEntry>>, AppError> {
    user.require("audit_log", "view")?;
    let entries = AuditService::new(state.db.clone())
        .list(user.lab_id, &filter, &pagination)
        .await?;
    Ok(Json(entries))
}

pub async fn export_audit_logs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<AuditLogFilter>,
) -> Result<Response, AppError> {
    user.require("audit_log", "export")?;
    let csv = AuditService::new(state.db.clone())
        .export_csv(user.lab_id, &filter)
        .await?;
    Ok(csv_response("audit_log.csv", csv))
}
