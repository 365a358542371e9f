//! Route definitions for the LIMS API

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{
    handlers,
    middleware::{auth_middleware, portal_auth_middleware},
    AppState,
};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Auth routes (public)
        .nest("/auth", auth_routes(&state))
        // Certificate verification behind the QR code (public)
        .route("/verify/:code", get(handlers::verify_report))
        // Customer portal (own session)
        .nest("/portal", portal_routes(&state))
        // Protected routes
        .merge(staff_routes(&state))
}

/// Authentication routes
fn auth_routes(state: &AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/logout", post(handlers::logout))
        .route("/me", get(handlers::me))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/refresh", post(handlers::refresh))
        .merge(protected)
}

/// Everything behind a staff session
fn staff_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(handlers::get_dashboard))
        .nest("/lab", lab_routes(state))
        .nest("/users", user_routes(state))
        .nest("/roles", role_routes())
        .nest("/customers", customer_routes(state))
        .nest("/sample-types", sample_type_routes(state))
        .nest("/samples", sample_routes())
        .nest("/results", result_routes())
        .nest("/reports", report_routes())
        .nest("/report-templates", template_routes())
        .nest("/quotations", quotation_routes())
        .nest("/contracts", contract_routes())
        .nest("/invoices", invoice_routes())
        .nest("/portal-users", portal_user_routes())
        .nest("/audit-logs", audit_routes())
        .nest("/integrations", integration_routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
}

/// Uploads are capped at the configured storage limit
fn upload_limit(state: &AppState) -> DefaultBodyLimit {
    DefaultBodyLimit::max(state.config.storage.max_upload_bytes)
}

/// Lab profile and numbering routes
fn lab_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::get_lab).put(handlers::update_lab))
        .route(
            "/logo",
            post(handlers::upload_logo).layer(upload_limit(state)),
        )
        .route("/numbering", get(handlers::list_numbering))
        .route("/numbering/:module", put(handlers::update_numbering_prefix))
        .route("/numbering/:module/preview", get(handlers::preview_number))
}

/// Staff user routes
fn user_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_users).post(handlers::create_user))
        .route("/me/password", put(handlers::change_password))
        .route(
            "/:user_id",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::deactivate_user),
        )
        .route(
            "/:user_id/signature",
            post(handlers::upload_signature).layer(upload_limit(state)),
        )
}

/// Role management routes
fn role_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_roles).post(handlers::create_role))
        .route("/permissions", get(handlers::list_permissions))
        .route(
            "/:role_id",
            get(handlers::get_role)
                .put(handlers::update_role)
                .delete(handlers::delete_role),
        )
}

/// Customer routes
fn customer_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_customers).post(handlers::create_customer))
        .route("/export", get(handlers::export_customers))
        .route(
            "/import",
            post(handlers::import_customers).layer(upload_limit(state)),
        )
        .route(
            "/:customer_id",
            get(handlers::get_customer)
                .put(handlers::update_customer)
                .delete(handlers::delete_customer),
        )
        .route("/:customer_id/contacts", post(handlers::add_contact))
        .route(
            "/:customer_id/contacts/:contact_id",
            put(handlers::update_contact).delete(handlers::remove_contact),
        )
}

/// Sample type catalogue routes
fn sample_type_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_sample_types).post(handlers::create_sample_type),
        )
        .route("/export", get(handlers::export_sample_types))
        .route(
            "/import",
            post(handlers::import_sample_types).layer(upload_limit(state)),
        )
        .route(
            "/:sample_type_id",
            get(handlers::get_sample_type)
                .put(handlers::update_sample_type)
                .delete(handlers::delete_sample_type),
        )
}

/// Sample routes, including the results of a sample
fn sample_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_samples).post(handlers::register_sample))
        .route(
            "/:sample_id",
            get(handlers::get_sample)
                .put(handlers::update_sample)
                .delete(handlers::delete_sample),
        )
        .route("/:sample_id/status", put(handlers::transition_sample))
        .route(
            "/:sample_id/results",
            get(handlers::list_results).put(handlers::record_results),
        )
        .route("/:sample_id/results/complete", post(handlers::complete_results))
}

/// Single test result routes
fn result_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/:result_id",
            put(handlers::update_result).delete(handlers::delete_result),
        )
        .route("/:result_id/reopen", post(handlers::reopen_result))
}

/// Report routes
fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_reports).post(handlers::create_report))
        .route(
            "/:report_id",
            get(handlers::get_report)
                .put(handlers::update_report)
                .delete(handlers::delete_report),
        )
        .route("/:report_id/submit", post(handlers::submit_report))
        .route("/:report_id/approve", post(handlers::approve_report))
        .route("/:report_id/reject", post(handlers::reject_report))
        .route("/:report_id/publish", post(handlers::publish_report))
        .route("/:report_id/reissue", post(handlers::reissue_report))
        .route("/:report_id/coa", get(handlers::render_coa))
}

/// Report template routes
fn template_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_templates).post(handlers::create_template))
        .route(
            "/:template_id",
            get(handlers::get_template)
                .put(handlers::update_template)
                .delete(handlers::delete_template),
        )
}

/// Quotation routes
fn quotation_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_quotations).post(handlers::create_quotation))
        .route(
            "/:quotation_id",
            get(handlers::get_quotation)
                .put(handlers::update_quotation)
                .delete(handlers::delete_quotation),
        )
        .route("/:quotation_id/status", put(handlers::transition_quotation))
        .route("/:quotation_id/convert", post(handlers::convert_quotation))
        .route("/:quotation_id/print", get(handlers::print_quotation))
}

/// Contract routes
fn contract_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_contracts).post(handlers::create_contract))
        .route(
            "/:contract_id",
            get(handlers::get_contract)
                .put(handlers::update_contract)
                .delete(handlers::delete_contract),
        )
        .route("/:contract_id/status", put(handlers::transition_contract))
}

/// Invoice routes
fn invoice_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_invoices).post(handlers::create_invoice))
        .route(
            "/:invoice_id",
            get(handlers::get_invoice)
                .put(handlers::update_invoice)
                .delete(handlers::delete_invoice),
        )
        .route("/:invoice_id/status", put(handlers::transition_invoice))
        .route("/:invoice_id/payments", post(handlers::record_payment))
        .route("/:invoice_id/convert", post(handlers::convert_proforma))
        .route("/:invoice_id/print", get(handlers::print_invoice))
}

/// Portal account management routes (staff side)
fn portal_user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_portal_users).post(handlers::create_portal_user),
        )
        .route(
            "/:account_id",
            get(handlers::get_portal_user).delete(handlers::delete_portal_user),
        )
        .route("/:account_id/password", put(handlers::reset_portal_password))
        .route("/:account_id/active", put(handlers::set_portal_user_active))
}

/// Audit trail routes
fn audit_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_audit_logs))
        .route("/export", get(handlers::export_audit_logs))
}

/// Integration routes
fn integration_routes() -> Router<AppState> {
    Router::new()
        .route("/zoho/runs", get(handlers::list_zoho_sync_runs))
        .route("/zoho/sync", post(handlers::sync_zoho_customers))
}

/// Customer portal routes
fn portal_routes(state: &AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/samples", get(handlers::portal_list_samples))
        .route("/samples/:sample_id", get(handlers::portal_get_sample))
        .route("/reports", get(handlers::portal_list_reports))
        .route("/reports/:report_id", get(handlers::portal_get_report))
        .route("/reports/:report_id/coa", get(handlers::portal_report_coa))
        .route("/invoices", get(handlers::portal_list_invoices))
        .route("/invoices/:invoice_id", get(handlers::portal_get_invoice))
        .route("/invoices/:invoice_id/print", get(handlers::portal_print_invoice))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            portal_auth_middleware,
        ));

    Router::new()
        .route("/login", post(handlers::portal_login))
        .route("/logout", post(handlers::portal_logout))
        .merge(protected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::middleware::AccountKey;
    use crate::services::auth::{encode_claims, Claims, STAFF_SCOPE};
    use crate::services::portal::{PortalClaims, PORTAL_SCOPE};
    use crate::services::report::verification_url;
    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, Request, StatusCode},
    };
    use chrono::Utc;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;
    use uuid::Uuid;

    // Requests below are answered before any query runs, so the pool never
    // connects. Account status is seeded into the cache instead.
    fn app() -> (Router, AppState) {
        let config = Config::for_tests();
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database.url)
            .expect("lazy pool");
        let state = AppState::new(pool, config);
        (api_routes(state.clone()).with_state(state.clone()), state)
    }

    async fn staff_token_with(state: &AppState, permissions: &[&str], active: bool) -> String {
        let now = Utc::now().timestamp();
        let (lab_id, user_id) = (Uuid::new_v4(), Uuid::new_v4());
        state
            .accounts
            .remember(AccountKey::staff(lab_id, user_id), active)
            .await;
        let claims = Claims {
            sub: user_id.to_string(),
            lab_id: lab_id.to_string(),
            role_id: Uuid::new_v4().to_string(),
            role: "analyst".to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            scope: STAFF_SCOPE.to_string(),
            exp: now + 600,
            iat: now,
        };
        encode_claims(&claims, &state.config.jwt.secret).unwrap()
    }

    async fn staff_token(state: &AppState, permissions: &[&str]) -> String {
        staff_token_with(state, permissions, true).await
    }

    async fn portal_token_with(state: &AppState, active: bool) -> String {
        let now = Utc::now().timestamp();
        let (lab_id, portal_user_id) = (Uuid::new_v4(), Uuid::new_v4());
        state
            .accounts
            .remember(AccountKey::portal(lab_id, portal_user_id), active)
            .await;
        let claims = PortalClaims {
            sub: portal_user_id.to_string(),
            lab_id: lab_id.to_string(),
            customer_id: Uuid::new_v4().to_string(),
            scope: PORTAL_SCOPE.to_string(),
            exp: now + 600,
            iat: now,
        };
        encode_claims(&claims, &state.config.jwt.secret).unwrap()
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn staff_routes_require_a_token() {
        let (app, _) = app();
        let response = app.oneshot(get("/roles", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_permission_is_forbidden() {
        let (app, state) = app();
        let token = staff_token(&state, &["customer:view"]).await;
        let response = app.oneshot(get("/roles", Some(&token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn export_needs_its_own_permission() {
        let (app, state) = app();
        let token = staff_token(&state, &["audit_log:view"]).await;
        let response = app
            .oneshot(get("/audit-logs/export", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn portal_token_is_rejected_on_staff_routes() {
        let (app, state) = app();
        let token = portal_token_with(&state, true).await;
        let response = app.oneshot(get("/customers", Some(&token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn staff_token_is_rejected_on_portal_routes() {
        let (app, state) = app();
        let token = staff_token(&state, &["report:view"]).await;
        let response = app
            .oneshot(get("/portal/reports", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_signed_with_another_secret_is_rejected() {
        let (app, state) = app();
        let mut other = state.clone();
        let mut config = (*state.config).clone();
        config.jwt.secret = "another-secret".to_string();
        other.config = std::sync::Arc::new(config);
        let token = staff_token(&other, &["role:view"]).await;
        let response = app.oneshot(get("/roles", Some(&token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn deactivated_staff_session_is_rejected() {
        let (app, state) = app();
        let token = staff_token_with(&state, &["role:view"], false).await;
        let response = app.oneshot(get("/roles", Some(&token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["error"]["message"], "Account is inactive or no longer exists");
    }

    #[tokio::test]
    async fn deactivated_portal_session_is_rejected() {
        let (app, state) = app();
        let token = portal_token_with(&state, false).await;
        let response = app
            .oneshot(get("/portal/reports", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn verification_link_reaches_the_verify_handler() {
        let (_, state) = app();
        let base = state.config.portal.public_base_url.clone();
        let app = crate::create_app(state);

        // A forged code is refused by the handler itself, which answers with
        // the JSON error body rather than the router's empty 404.
        let url = verification_url(&base, "0123456789abcdef.00");
        let path = url.strip_prefix(base.trim_end_matches('/')).unwrap().to_string();
        let response = app.oneshot(get(&path, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "Verification code not found");
    }

    #[tokio::test]
    async fn zoho_sync_without_configuration_is_reported() {
        let (app, state) = app();
        let token = staff_token(&state, &["integration:edit"]).await;
        let request = Request::builder()
            .method("POST")
            .uri("/integrations/zoho/sync")
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
