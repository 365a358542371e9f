//! HTTP handlers

pub mod audit;
pub mod auth;
pub mod billing;
pub mod customer;
pub mod dashboard;
pub mod health;
pub mod integration;
pub mod lab;
pub mod portal;
pub mod report;
pub mod role;
pub mod sample;
pub mod sample_type;
pub mod user;

pub use audit::*;
pub use auth::*;
pub use billing::*;
pub use customer::*;
pub use dashboard::*;
pub use health::*;
pub use integration::*;
pub use lab::*;
pub use portal::*;
pub use report::*;
pub use role::*;
pub use sample::*;
pub use sample_type::*;
pub use user::*;

use axum::{
    extract::Multipart,
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::{AppError, AppResult};

/// A file taken from a multipart body
pub struct Upload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Read the `file` field of a multipart request
pub async fn read_upload(mut multipart: Multipart) -> AppResult<Upload> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation("file", format!("Failed to read upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::validation("file", format!("Failed to read file data: {}", e)))?;
        return Ok(Upload {
            content_type,
            bytes: bytes.to_vec(),
        });
    }
    Err(AppError::validation("file", "No file provided"))
}

/// CSV download response
pub fn csv_response(filename: &str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}
