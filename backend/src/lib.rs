//! LIMS Platform - Backend library
//!
//! Laboratory information management for oil and fuel testing labs:
//! sample intake, test results, certificates of analysis, billing
//! documents and a customer portal.

use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod external;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

pub use config::Config;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Arc<Config>,
    /// Zoho Books client with its cached access token, when configured
    pub zoho: Option<Arc<external::ZohoClient>>,
    pub storage: Arc<external::StorageClient>,
    pub renderer: Arc<services::DocumentRenderer>,
    /// Recent answers to "is this session's account still active"
    pub accounts: Arc<middleware::AccountStatusCache>,
}

impl AppState {
    pub fn new(db: sqlx::PgPool, config: Config) -> Self {
        let zoho = config
            .zoho
            .as_ref()
            .map(|z| Arc::new(external::ZohoClient::new(z.clone())));
        let storage = Arc::new(external::StorageClient::new(&config.storage));
        Self {
            db,
            config: Arc::new(config),
            zoho,
            storage,
            renderer: Arc::new(services::DocumentRenderer::new()),
            accounts: Arc::new(middleware::AccountStatusCache::default()),
        }
    }
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(axum_middleware::from_fn(
            middleware::request_id_middleware,
        ))
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "LIMS Platform API v1.0"
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
