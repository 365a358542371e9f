//! Authentication handlers
//!
//! Tokens are returned in the body and mirrored into an HTTP-only session
//! cookie for browser clients.

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::auth::SESSION_COOKIE;
use crate::middleware::CurrentUser;
use crate::services::auth::{AuthTokens, MeResponse, RegisterLabInput, RegisterResponse};
use crate::services::AuthService;
use crate::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize, Default)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

/// HTTP-only cookie carrying an access token; the token's own expiry
/// bounds the session
pub fn session_cookie(name: &'static str, token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

fn is_production(state: &AppState) -> bool {
    state.config.environment == "production"
}

/// Register a lab with its administrator
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<RegisterLabInput>,
) -> Result<(StatusCode, CookieJar, Json<RegisterResponse>), AppError> {
    let auth_service = AuthService::new(state.db.clone(), &state.config);
    let result = auth_service.register_lab(body).await?;

    let cookie = session_cookie(
        SESSION_COOKIE,
        result.tokens.access_token.clone(),
        is_production(&state),
    );
    Ok((StatusCode::CREATED, jar.add(cookie), Json(result)))
}

/// Login endpoint handler
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthTokens>), AppError> {
    let auth_service = AuthService::new(state.db.clone(), &state.config);
    let tokens = auth_service.login(&body.email, &body.password).await?;

    let cookie = session_cookie(
        SESSION_COOKIE,
        tokens.access_token.clone(),
        is_production(&state),
    );
    Ok((jar.add(cookie), Json(tokens)))
}

/// Refresh token endpoint handler
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<RefreshRequest>,
) -> Result<(CookieJar, Json<AuthTokens>), AppError> {
    let auth_service = AuthService::new(state.db.clone(), &state.config);
    let tokens = auth_service.refresh_token(&body.refresh_token).await?;

    let cookie = session_cookie(
        SESSION_COOKIE,
        tokens.access_token.clone(),
        is_production(&state),
    );
    Ok((jar.add(cookie), Json(tokens)))
}

/// Revoke refresh tokens and clear the session cookie
pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    body: Option<Json<LogoutRequest>>,
) -> Result<(CookieJar, StatusCode), AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    AuthService::new(state.db.clone(), &state.config)
        .logout(user.user_id, body.refresh_token.as_deref())
        .await?;

    Ok((
        jar.remove(Cookie::build(SESSION_COOKIE).path("/").build()),
        StatusCode::NO_CONTENT,
    ))
}

/// Profile and permissions of the signed-in user
pub async fn me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MeResponse>, AppError> {
    let me = AuthService::new(state.db.clone(), &state.config)
        .me(user.lab_id, user.user_id)
        .await?;
    Ok(Json(me))
}
