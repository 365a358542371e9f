//! HTTP middleware

pub mod accounts;
pub mod auth;
pub mod request_id;

pub use accounts::{AccountKey, AccountStatusCache};
pub use auth::{
    auth_middleware, portal_auth_middleware, AuthUser, CurrentPortalUser, CurrentUser, PortalUser,
};
pub use request_id::request_id_middleware;
