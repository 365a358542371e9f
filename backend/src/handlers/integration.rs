//! Zoho Books integration handlers

use axum::{extract::State, Json};

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::services::zoho_sync::ZohoSyncRun;
use crate::services::ZohoSyncService;
use crate::AppState;

/// Pull customers from Zoho Books contacts
pub async fn sync_zoho_customers(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ZohoSyncRun>, AppError> {
    user.require("integration", "edit")?;
    let client = state
        .zoho
        .as_ref()
        .ok_or_else(|| AppError::Configuration("Zoho Books is not configured".to_string()))?;

    let run = ZohoSyncService::new(state.db.clone())
        .sync_customers(client, user.lab_id, user.user_id)
        .await?;
    Ok(Json(run))
}

pub async fn list_zoho_sync_runs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ZohoSyncRun>>, AppError> {
    user.require("integration", "view")?;
    let runs = ZohoSyncService::new(state.db.clone()).list_runs(user.lab_id).await?;
    Ok(Json(runs))
}
