//! Shared types and models for the LIMS platform
//!
//! This crate contains types shared between the backend, the browser
//! helpers (via WASM) and tests: workflow states, document numbering,
//! line-item arithmetic and input validation.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
