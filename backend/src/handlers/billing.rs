//! Quotation, contract and invoice handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Html,
    Json,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::services::contract::{
    Contract, ContractDetail, ContractFilter, ContractTransitionInput, CreateContractInput, UpdateContractInput,
};
use crate::services::invoice::{
    CreateInvoiceInput, Invoice, InvoiceDetail, InvoiceFilter, InvoiceTransitionInput, RecordPaymentInput,
    UpdateInvoiceInput,
};
use crate::services::quotation::{
    ConvertQuotationInput, CreateQuotationInput, Quotation, QuotationDetail, QuotationFilter,
    QuotationTransitionInput, UpdateQuotationInput,
};
use crate::services::{ContractService, InvoiceService, QuotationService};
use crate::AppState;
use shared::{PaginatedResponse, Pagination};

// ============================================================================
// Quotations
// ============================================================================

pub async fn list_quotations(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<QuotationFilter>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<Quotation>>, AppError> {
    user.require("quotation", "view")?;
    let quotations = QuotationService::new(state.db.clone())
        .list_quotations(user.lab_id, &filter, &pagination)
        .await?;
    Ok(Json(quotations))
}

pub async fn get_quotation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(quotation_id): Path<Uuid>,
) -> Result<Json<QuotationDetail>, AppError> {
    user.require("quotation", "view")?;
    let quotation = QuotationService::new(state.db.clone())
        .get_quotation(user.lab_id, quotation_id)
        .await?;
    Ok(Json(quotation))
}

pub async fn create_quotation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateQuotationInput>,
) -> Result<(StatusCode, Json<QuotationDetail>), AppError> {
    user.require("quotation", "create")?;
    let quotation = QuotationService::new(state.db.clone())
        .create_quotation(user.lab_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(quotation)))
}

pub async fn update_quotation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(quotation_id): Path<Uuid>,
    Json(input): Json<UpdateQuotationInput>,
) -> Result<Json<QuotationDetail>, AppError> {
    user.require("quotation", "edit")?;
    let quotation = QuotationService::new(state.db.clone())
        .update_quotation(user.lab_id, user.user_id, quotation_id, input)
        .await?;
    Ok(Json(quotation))
}

pub async fn transition_quotation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(quotation_id): Path<Uuid>,
    Json(input): Json<QuotationTransitionInput>,
) -> Result<Json<QuotationDetail>, AppError> {
    user.require("quotation", "edit")?;
    let quotation = QuotationService::new(state.db.clone())
        .transition(user.lab_id, user.user_id, quotation_id, input.status)
        .await?;
    Ok(Json(quotation))
}

pub async fn delete_quotation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(quotation_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require("quotation", "delete")?;
    QuotationService::new(state.db.clone())
        .delete_quotation(user.lab_id, user.user_id, quotation_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Turn an accepted quotation into a contract carrying the same items
pub async fn convert_quotation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(quotation_id): Path<Uuid>,
    input: Option<Json<ConvertQuotationInput>>,
) -> Result<(StatusCode, Json<ContractDetail>), AppError> {
    user.require("quotation", "approve")?;
    user.require("contract", "create")?;
    let input = input.map(|Json(i)| i).unwrap_or_default();
    let contract = QuotationService::new(state.db.clone())
        .convert_to_contract(user.lab_id, user.user_id, quotation_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(contract)))
}

pub async fn print_quotation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(quotation_id): Path<Uuid>,
) -> Result<Html<String>, AppError> {
    user.require("quotation", "view")?;
    let html = QuotationService::new(state.db.clone())
        .render_print(&state.renderer, user.lab_id, quotation_id)
        .await?;
    Ok(Html(html))
}

// ============================================================================
// Contracts
// ============================================================================

pub async fn list_contracts(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<ContractFilter>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<Contract>>, AppError> {
    user.require("contract", "view")?;
    let contracts = ContractService::new(state.db.clone())
        .list_contracts(user.lab_id, &filter, &pagination)
        .await?;
    Ok(Json(contracts))
}

pub async fn get_contract(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(contract_id): Path<Uuid>,
) -> Result<Json<ContractDetail>, AppError> {
    user.require("contract", "view")?;
    let contract = ContractService::new(state.db.clone())
        .get_contract(user.lab_id, contract_id)
        .await?;
    Ok(Json(contract))
}

pub async fn create_contract(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateContractInput>,
) -> Result<(StatusCode, Json<ContractDetail>), AppError> {
    user.require("contract", "create")?;
    let contract = ContractService::new(state.db.clone())
        .create_contract(user.lab_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(contract)))
}

pub async fn update_contract(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(contract_id): Path<Uuid>,
    Json(input): Json<UpdateContractInput>,
) -> Result<Json<ContractDetail>, AppError> {
    user.require("contract", "edit")?;
    let contract = ContractService::new(state.db.clone())
        .update_contract(user.lab_id, user.user_id, contract_id, input)
        .await?;
    Ok(Json(contract))
}

pub async fn transition_contract(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(contract_id): Path<Uuid>,
    Json(input): Json<ContractTransitionInput>,
) -> Result<Json<ContractDetail>, AppError> {
    user.require("contract", "edit")?;
    let contract = ContractService::new(state.db.clone())
        .transition(user.lab_id, user.user_id, contract_id, input.status)
        .await?;
    Ok(Json(contract))
}

pub async fn delete_contract(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(contract_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require("contract", "delete")?;
    ContractService::new(state.db.clone())
        .delete_contract(user.lab_id, user.user_id, contract_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Invoices
// ============================================================================

pub async fn list_invoices(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<InvoiceFilter>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<Invoice>>, AppError> {
    user.require("invoice", "view")?;
    let invoices = InvoiceService::new(state.db.clone())
        .list_invoices(user.lab_id, &filter, &pagination)
        .await?;
    Ok(Json(invoices))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetail>, AppError> {
    user.require("invoice", "view")?;
    let invoice = InvoiceService::new(state.db.clone())
        .get_invoice(user.lab_id, invoice_id)
        .await?;
    Ok(Json(invoice))
}

pub async fn create_invoice(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateInvoiceInput>,
) -> Result<(StatusCode, Json<InvoiceDetail>), AppError> {
    user.require("invoice", "create")?;
    let invoice = InvoiceService::new(state.db.clone())
        .create_invoice(user.lab_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(invoice_id): Path<Uuid>,
    Json(input): Json<UpdateInvoiceInput>,
) -> Result<Json<InvoiceDetail>, AppError> {
    user.require("invoice", "edit")?;
    let invoice = InvoiceService::new(state.db.clone())
        .update_invoice(user.lab_id, user.user_id, invoice_id, input)
        .await?;
    Ok(Json(invoice))
}

pub async fn transition_invoice(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(invoice_id): Path<Uuid>,
    Json(input): Json<InvoiceTransitionInput>,
) -> Result<Json<InvoiceDetail>, AppError> {
    user.require("invoice", "edit")?;
    let invoice = InvoiceService::new(state.db.clone())
        .transition(user.lab_id, user.user_id, invoice_id, input.status)
        .await?;
    Ok(Json(invoice))
}

pub async fn record_payment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(invoice_id): Path<Uuid>,
    Json(input): Json<RecordPaymentInput>,
) -> Result<(StatusCode, Json<InvoiceDetail>), AppError> {
    user.require("invoice", "approve")?;
    let invoice = InvoiceService::new(state.db.clone())
        .record_payment(user.lab_id, user.user_id, invoice_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

/// Issue the tax invoice for a proforma
pub async fn convert_proforma(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(invoice_id): Path<Uuid>,
) -> Result<(StatusCode, Json<InvoiceDetail>), AppError> {
    user.require("invoice", "create")?;
    let invoice = InvoiceService::new(state.db.clone())
        .convert_proforma_to_tax(user.lab_id, user.user_id, invoice_id)
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require("invoice", "delete")?;
    InvoiceService::new(state.db.clone())
        .delete_invoice(user.lab_id, user.user_id, invoice_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn print_invoice(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(invoice_id): Path<Uuid>,
) -> Result<Html<String>, AppError> {
    user.require("invoice", "export")?;
    let html = InvoiceService::new(state.db.clone())
        .render_print(&state.renderer, user.lab_id, invoice_id)
        .await?;
    Ok(Html(html))
}
