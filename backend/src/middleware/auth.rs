//! Authentication middleware
//!
//! JWT authentication for staff and portal sessions plus the permission
//! checks handlers run before touching data.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::accounts::AccountKey;
use crate::services::auth::{decode_claims, Claims, STAFF_SCOPE};
use crate::services::portal::{PortalClaims, PORTAL_SCOPE};
use crate::AppState;

/// Cookie carrying the staff access token
pub const SESSION_COOKIE: &str = "lims_session";

/// Cookie carrying the portal access token
pub const PORTAL_SESSION_COOKIE: &str = "lims_portal_session";

/// Authenticated staff user extracted from the JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub lab_id: Uuid,
    pub role_id: Uuid,
    pub role: String,
    pub permissions: Vec<String>,
}

impl AuthUser {
    /// Check if user has a specific permission
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        let permission = format!("{}:{}", resource, action);
        self.permissions.contains(&permission)
    }

    /// Check if user has any of the specified permissions
    pub fn has_any_permission(&self, perms: &[(&str, &str)]) -> bool {
        perms.iter().any(|(r, a)| self.has_permission(r, a))
    }

    /// Permission guard for handlers
    pub fn require(&self, resource: &str, action: &str) -> Result<(), AppError> {
        if self.has_permission(resource, action) {
            Ok(())
        } else {
            tracing::debug!(
                user_id = %self.user_id,
                permission = %format!("{}:{}", resource, action),
                "permission denied"
            );
            Err(AppError::InsufficientPermissions)
        }
    }
}

impl TryFrom<Claims> for AuthUser {
    type Error = AppError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        if claims.scope != STAFF_SCOPE {
            return Err(AppError::Unauthorized(
                "Token is not valid for staff access".to_string(),
            ));
        }
        Ok(Self {
            user_id: parse_id(&claims.sub)?,
            lab_id: parse_id(&claims.lab_id)?,
            role_id: parse_id(&claims.role_id)?,
            role: claims.role,
            permissions: claims.permissions,
        })
    }
}

/// Authenticated portal user extracted from a portal JWT
#[derive(Clone, Debug)]
pub struct PortalUser {
    pub portal_user_id: Uuid,
    pub lab_id: Uuid,
    pub customer_id: Uuid,
}

impl TryFrom<PortalClaims> for PortalUser {
    type Error = AppError;

    fn try_from(claims: PortalClaims) -> Result<Self, Self::Error> {
        if claims.scope != PORTAL_SCOPE {
            return Err(AppError::Unauthorized(
                "Token is not valid for portal access".to_string(),
            ));
        }
        Ok(Self {
            portal_user_id: parse_id(&claims.sub)?,
            lab_id: parse_id(&claims.lab_id)?,
            customer_id: parse_id(&claims.customer_id)?,
        })
    }
}

fn parse_id(value: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value).map_err(|_| AppError::InvalidToken)
}

/// Bearer token from the Authorization header, falling back to a cookie
pub fn extract_token(request: &Request, cookie_name: &str) -> Option<String> {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    bearer.or_else(|| {
        CookieJar::from_headers(request.headers())
            .get(cookie_name)
            .map(|c| c.value().to_string())
    })
}

/// Staff authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_token(&request, SESSION_COOKIE) else {
        return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
            .into_response();
    };

    let user = match decode_claims::<Claims>(&token, &state.config.jwt.secret)
        .and_then(AuthUser::try_from)
    {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    let key = AccountKey::staff(user.lab_id, user.user_id);
    if let Err(e) = ensure_active(&state, key).await {
        return e.into_response();
    }

    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Reject sessions whose account was deactivated or removed after the
/// token was issued
async fn ensure_active(state: &AppState, key: AccountKey) -> Result<(), AppError> {
    if state.accounts.is_active(&state.db, key).await? {
        Ok(())
    } else {
        Err(AppError::Unauthorized(
            "Account is inactive or no longer exists".to_string(),
        ))
    }
}

/// Portal authentication middleware; staff tokens are rejected here
pub async fn portal_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_token(&request, PORTAL_SESSION_COOKIE) else {
        return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
            .into_response();
    };

    let user = match decode_claims::<PortalClaims>(&token, &state.config.jwt.secret)
        .and_then(PortalUser::try_from)
    {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    let key = AccountKey::portal(user.lab_id, user.portal_user_id);
    if let Err(e) = ensure_active(&state, key).await {
        return e.into_response();
    }

    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Extractor for the authenticated staff user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

/// Extractor for the authenticated portal user
#[derive(Clone, Debug)]
pub struct CurrentPortalUser(pub PortalUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentPortalUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<PortalUser>()
            .cloned()
            .map(CurrentPortalUser)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(perms: &[&str]) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            lab_id: Uuid::new_v4(),
            role_id: Uuid::new_v4(),
            role: "analyst".to_string(),
            permissions: perms.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_require_permission() {
        let u = user(&["sample:view", "sample:create"]);
        assert!(u.require("sample", "view").is_ok());
        assert!(matches!(
            u.require("sample", "delete"),
            Err(AppError::InsufficientPermissions)
        ));
        assert!(u.has_any_permission(&[("report", "view"), ("sample", "create")]));
    }

    #[test]
    fn test_token_from_cookie() {
        let request = Request::builder()
            .header("cookie", format!("{}=abc.def.ghi", SESSION_COOKIE))
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(
            extract_token(&request, SESSION_COOKIE).as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(extract_token(&request, PORTAL_SESSION_COOKIE), None);
    }

    #[test]
    fn test_bearer_preferred_over_cookie() {
        let request = Request::builder()
            .header("authorization", "Bearer header-token")
            .header("cookie", format!("{}=cookie-token", SESSION_COOKIE))
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(
            extract_token(&request, SESSION_COOKIE).as_deref(),
            Some("header-token")
        );
    }
}
