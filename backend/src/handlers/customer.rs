//! Customer handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::{csv_response, read_upload};
use crate::middleware::CurrentUser;
use crate::services::csv_io::ImportSummary;
use crate::services::customer::{
    ContactPersonInput, Customer, CustomerFilter, CustomerInput, CustomerWithContacts, UpdateCustomerInput,
};
use crate::services::CustomerService;
use crate::AppState;
use shared::{PaginatedResponse, Pagination};

pub async fn list_customers(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<CustomerFilter>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<Customer>>, AppError> {
    user.require("customer", "view")?;
    let customers = CustomerService::new(state.db.clone())
        .list_customers(user.lab_id, &filter, &pagination)
        .await?;
    Ok(Json(customers))
}

pub async fn get_customer(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<CustomerWithContacts>, AppError> {
    user.require("customer", "view")?;
    let customer = CustomerService::new(state.db.clone())
        .get_customer(user.lab_id, customer_id)
        .await?;
    Ok(Json(customer))
}

pub async fn create_customer(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CustomerInput>,
) -> Result<(StatusCode, Json<CustomerWithContacts>), AppError> {
    user.require("customer", "create")?;
    let customer = CustomerService::new(state.db.clone())
        .create_customer(user.lab_id, user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn update_customer(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(customer_id): Path<Uuid>,
    Json(input): Json<UpdateCustomerInput>,
) -> Result<Json<CustomerWithContacts>, AppError> {
    user.require("customer", "edit")?;
    let customer = CustomerService::new(state.db.clone())
        .update_customer(user.lab_id, user.user_id, customer_id, input)
        .await?;
    Ok(Json(customer))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(customer_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require("customer", "delete")?;
    CustomerService::new(state.db.clone())
        .delete_customer(user.lab_id, user.user_id, customer_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_contact(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(customer_id): Path<Uuid>,
    Json(input): Json<ContactPersonInput>,
) -> Result<(StatusCode, Json<CustomerWithContacts>), AppError> {
    user.require("customer", "edit")?;
    let customer = CustomerService::new(state.db.clone())
        .add_contact(user.lab_id, user.user_id, customer_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn update_contact(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((customer_id, contact_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<ContactPersonInput>,
) -> Result<Json<CustomerWithContacts>, AppError> {
    user.require("customer", "edit")?;
    let customer = CustomerService::new(state.db.clone())
        .update_contact(user.lab_id, user.user_id, customer_id, contact_id, input)
        .await?;
    Ok(Json(customer))
}

pub async fn remove_contact(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((customer_id, contact_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    user.require("customer", "edit")?;
    CustomerService::new(state.db.clone())
        .remove_contact(user.lab_id, user.user_id, customer_id, contact_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn export_customers(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    user.require("customer", "export")?;
    let csv = CustomerService::new(state.db.clone()).export_csv(user.lab_id).await?;
    Ok(csv_response("customers.csv", csv))
}

/// Upsert customers from an uploaded CSV; row errors come back in the summary
pub async fn import_customers(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> Result<Json<ImportSummary>, AppError> {
    user.require("customer", "create")?;
    user.require("customer", "edit")?;
    let upload = read_upload(multipart).await?;
    let summary = CustomerService::new(state.db.clone())
        .import_csv(user.lab_id, user.user_id, &upload.bytes)
        .await?;
    Ok(Json(summary))
}
