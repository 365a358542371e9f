//! Dashboard handler

use axum::{extract::State, Json};

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::services::dashboard::DashboardMetrics;
use crate::services::DashboardService;
use crate::AppState;

/// Workload and receivables overview of the current lab
pub async fn get_dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<DashboardMetrics>, AppError> {
    user.require("lab", "view")?;
    let metrics = DashboardService::new(state.db.clone())
        .get_metrics(user.lab_id)
        .await?;
    Ok(Json(metrics))
}
