//! Customer portal handlers
//!
//! Staff endpoints manage portal accounts; the `portal_*` endpoints serve
//! the customer's own read-only views under a portal session.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Html,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::auth::session_cookie;
use crate::middleware::auth::{PortalUser, PORTAL_SESSION_COOKIE};
use crate::middleware::{AccountKey, CurrentPortalUser, CurrentUser};
use crate::services::invoice::{Invoice, InvoiceDetail};
use crate::services::portal::{
    CreatePortalUserInput, PortalAccount, PortalLoginInput, PortalScope, PortalToken, ResetPortalPasswordInput,
    SetPortalActiveInput,
};
use crate::services::report::Report;
use crate::services::sample::Sample;
use crate::services::PortalService;
use crate::AppState;
use shared::{PaginatedResponse, Pagination};

#[derive(Debug, Default, Deserialize)]
pub struct PortalAccountQuery {
    pub customer_id: Option<Uuid>,
}

fn portal_service(state: &AppState) -> PortalService {
    PortalService::new(state.db.clone(), &state.config)
}

fn scope_of(user: &PortalUser) -> PortalScope {
    PortalScope {
        lab_id: user.lab_id,
        customer_id: user.customer_id,
    }
}

// ============================================================================
// Account management (staff)
// ============================================================================

pub async fn list_portal_users(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PortalAccountQuery>,
) -> Result<Json<Vec<PortalAccount>>, AppError> {
    user.require("portal_user", "view")?;
    let accounts = portal_service(&state)
        .list_accounts(user.lab_id, query.customer_id)
        .await?;
    Ok(Json(accounts))
}

pub async fn get_portal_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(account_id): Path<Uuid>,
) -> Result<Json<PortalAccount>, AppError> {
    user.require("portal_user", "view")?;
    let account = portal_service(&state).get_account(user.lab_id, account_id).await?;
    Ok(Json(account))
}

pub async fn create_portal_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreatePortalUserInput>,
) -> Result<(StatusCode, Json<PortalAccount>), AppError> {
    user.require("portal_user", "create")?;
    let account = portal_service(&state)
        .create_account(user.lab_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn reset_portal_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(account_id): Path<Uuid>,
    Json(input): Json<ResetPortalPasswordInput>,
) -> Result<StatusCode, AppError> {
    user.require("portal_user", "edit")?;
    portal_service(&state)
        .reset_password(user.lab_id, user.user_id, account_id, input)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_portal_user_active(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(account_id): Path<Uuid>,
    Json(input): Json<SetPortalActiveInput>,
) -> Result<Json<PortalAccount>, AppError> {
    user.require("portal_user", "edit")?;
    let account = portal_service(&state)
        .set_active(user.lab_id, user.user_id, account_id, input.is_active)
        .await?;
    state.accounts.forget(AccountKey::portal(user.lab_id, account_id)).await;
    Ok(Json(account))
}

pub async fn delete_portal_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(account_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require("portal_user", "delete")?;
    portal_service(&state)
        .delete_account(user.lab_id, user.user_id, account_id)
        .await?;
    state.accounts.forget(AccountKey::portal(user.lab_id, account_id)).await;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Portal session
// ============================================================================

pub async fn portal_login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(input): Json<PortalLoginInput>,
) -> Result<(CookieJar, Json<PortalToken>), AppError> {
    let token = portal_service(&state).login(input).await?;
    let cookie = session_cookie(
        PORTAL_SESSION_COOKIE,
        token.access_token.clone(),
        state.config.environment == "production",
    );
    Ok((jar.add(cookie), Json(token)))
}

pub async fn portal_logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    (
        jar.remove(Cookie::build(PORTAL_SESSION_COOKIE).path("/").build()),
        StatusCode::NO_CONTENT,
    )
}

// ============================================================================
// Customer views
// ============================================================================

pub async fn portal_list_samples(
    State(state): State<AppState>,
    CurrentPortalUser(user): CurrentPortalUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<Sample>>, AppError> {
    let samples = portal_service(&state)
        .list_samples(scope_of(&user), &pagination)
        .await?;
    Ok(Json(samples))
}

pub async fn portal_get_sample(
    State(state): State<AppState>,
    CurrentPortalUser(user): CurrentPortalUser,
    Path(sample_id): Path<Uuid>,
) -> Result<Json<Sample>, AppError> {
    let sample = portal_service(&state)
        .get_sample(scope_of(&user), sample_id)
        .await?;
    Ok(Json(sample))
}

pub async fn portal_list_reports(
    State(state): State<AppState>,
    CurrentPortalUser(user): CurrentPortalUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<Report>>, AppError> {
    let reports = portal_service(&state)
        .list_reports(scope_of(&user), &pagination)
        .await?;
    Ok(Json(reports))
}

pub async fn portal_get_report(
    State(state): State<AppState>,
    CurrentPortalUser(user): CurrentPortalUser,
    Path(report_id): Path<Uuid>,
) -> Result<Json<Report>, AppError> {
    let report = portal_service(&state)
        .get_report(scope_of(&user), report_id)
        .await?;
    Ok(Json(report))
}

/// Certificate of a published report
pub async fn portal_report_coa(
    State(state): State<AppState>,
    CurrentPortalUser(user): CurrentPortalUser,
    Path(report_id): Path<Uuid>,
) -> Result<Html<String>, AppError> {
    let html = portal_service(&state)
        .render_coa(&state.renderer, scope_of(&user), report_id)
        .await?;
    Ok(Html(html))
}

pub async fn portal_list_invoices(
    State(state): State<AppState>,
    CurrentPortalUser(user): CurrentPortalUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<Invoice>>, AppError> {
    let invoices = portal_service(&state)
        .list_invoices(scope_of(&user), &pagination)
        .await?;
    Ok(Json(invoices))
}

pub async fn portal_get_invoice(
    State(state): State<AppState>,
    CurrentPortalUser(user): CurrentPortalUser,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetail>, AppError> {
    let invoice = portal_service(&state)
        .get_invoice(scope_of(&user), invoice_id)
        .await?;
    Ok(Json(invoice))
}

pub async fn portal_print_invoice(
    State(state): State<AppState>,
    CurrentPortalUser(user): CurrentPortalUser,
    Path(invoice_id): Path<Uuid>,
) -> Result<Html<String>, AppError> {
    let html = portal_service(&state)
        .render_invoice(&state.renderer, scope_of(&user), invoice_id)
        .await?;
    Ok(Html(html))
}
