//! Authentication service for lab registration, login, and token management

use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use shared::{default_roles, validate_lab_code, validate_password, ADMIN_ROLE};

/// Scope claim of staff access tokens
pub const STAFF_SCOPE: &str = "staff";

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    db: PgPool,
    jwt_secret: String,
    access_token_expiry: i64,
    refresh_token_expiry: i64,
    default_currency: String,
}

/// Input for registering a new lab with its administrator
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterLabInput {
    #[validate(length(min = 2, max = 200, message = "must be 2-200 characters"))]
    pub lab_name: String,
    pub lab_code: String,
    #[validate(length(min = 1, max = 200, message = "is required"))]
    pub admin_name: String,
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub currency: Option<String>,
}

/// Response after successful registration
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub lab_id: Uuid,
    pub user_id: Uuid,
    #[serde(flatten)]
    pub tokens: AuthTokens,
}

/// JWT claims of a staff session
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub lab_id: String,
    pub role_id: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub scope: String,
    pub exp: i64,
    pub iat: i64,
}

/// Authentication tokens
#[derive(Debug, Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// User info from database
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    lab_id: Uuid,
    role_id: Uuid,
    role_name: String,
    password_hash: String,
    is_active: bool,
}

/// Profile of the signed-in user
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MeResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub designation: Option<String>,
    pub signature_url: Option<String>,
    pub lab_id: Uuid,
    pub lab_name: String,
    pub lab_code: String,
    pub role_id: Uuid,
    pub role: String,
    #[sqlx(skip)]
    pub permissions: Vec<String>,
}

/// Decode and validate a JWT, mapping expiry separately from other failures
pub fn decode_claims<T: DeserializeOwned>(token: &str, secret: &str) -> AppResult<T> {
    decode::<T>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::InvalidToken,
    })
}

/// Sign claims with the shared secret
pub fn encode_claims<T: Serialize>(claims: &T, secret: &str) -> AppResult<String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

/// SHA-256 hex digest used to store refresh tokens
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Hash a password with bcrypt
pub fn hash_password(password: &str) -> AppResult<String> {
    hash(password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against a bcrypt hash
pub fn verify_password(password: &str, password_hash: &str) -> AppResult<bool> {
    verify(password, password_hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
}

/// Permission strings granted to a user through their role
pub async fn user_permissions(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Vec<String>> {
    let permissions = sqlx::query_scalar::<_, String>(
        r#"
        SELECT CONCAT(p.resource, ':', p.action)
        FROM users u
        JOIN role_permissions rp ON rp.role_id = u.role_id
        JOIN permissions p ON p.id = rp.permission_id
        WHERE u.id = $1
        ORDER BY p.resource, p.action
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(permissions)
}

impl AuthService {
    /// Create a new AuthService instance
    pub fn new(db: PgPool, config: &Config) -> Self {
        Self {
            db,
            jwt_secret: config.jwt.secret.clone(),
            access_token_expiry: config.jwt.access_token_expiry,
            refresh_token_expiry: config.jwt.refresh_token_expiry,
            default_currency: config.billing.default_currency.clone(),
        }
    }

    /// Register a new lab with default roles and an admin account
    pub async fn register_lab(&self, input: RegisterLabInput) -> AppResult<RegisterResponse> {
        input.validate()?;
        validate_lab_code(&input.lab_code).map_err(|m| AppError::validation("lab_code", m))?;
        validate_password(&input.password).map_err(|m| AppError::validation("password", m))?;

        let email = input.email.trim().to_lowercase();

        // Check if lab code or email already exists
        let code_taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM labs WHERE code = $1")
            .bind(&input.lab_code)
            .fetch_one(&self.db)
            .await?;
        if code_taken > 0 {
            return Err(AppError::Conflict("Lab code already exists".to_string()));
        }

        let email_taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = $1")
            .bind(&email)
            .fetch_one(&self.db)
            .await?;
        if email_taken > 0 {
            return Err(AppError::Conflict("Email is already registered".to_string()));
        }

        let password_hash = hash_password(&input.password)?;
        let currency = input
            .currency
            .clone()
            .unwrap_or_else(|| self.default_currency.clone());

        // Start transaction
        let mut tx = self.db.begin().await?;

        let lab_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO labs (name, code, phone, email, currency)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&input.lab_name)
        .bind(&input.lab_code)
        .bind(&input.phone)
        .bind(&email)
        .bind(&currency)
        .fetch_one(&mut *tx)
        .await?;

        // Default roles with their permission sets
        let mut admin_role_id = None;
        for (name, permissions) in default_roles() {
            let role_id = sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO roles (lab_id, name, description, is_system_role)
                VALUES ($1, $2, $3, true)
                RETURNING id
                "#,
            )
            .bind(lab_id)
            .bind(name)
            .bind(format!("Default {} role", name))
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO role_permissions (role_id, permission_id)
                SELECT $1, id FROM permissions WHERE CONCAT(resource, ':', action) = ANY($2)
                "#,
            )
            .bind(role_id)
            .bind(&permissions)
            .execute(&mut *tx)
            .await?;

            if name == ADMIN_ROLE {
                admin_role_id = Some(role_id);
            }
        }
        let admin_role_id = admin_role_id
            .ok_or_else(|| AppError::Internal("Admin role missing from defaults".to_string()))?;

        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO users (lab_id, role_id, email, password_hash, name, phone, designation)
            VALUES ($1, $2, $3, $4, $5, $6, 'Lab Administrator')
            RETURNING id
            "#,
        )
        .bind(lab_id)
        .bind(admin_role_id)
        .bind(&email)
        .bind(&password_hash)
        .bind(&input.admin_name)
        .bind(&input.phone)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO report_templates (lab_id, name, header_text, footer_text, is_default)
            VALUES ($1, 'Standard Certificate of Analysis', 'Certificate of Analysis',
                    'This certificate relates only to the sample tested.', true)
            "#,
        )
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "register", "lab")
            .entity(lab_id)
            .details(serde_json::json!({ "code": input.lab_code, "admin_email": email }))
            .record(&mut *tx)
            .await?;

        let permissions = user_permissions(&mut tx, user_id).await?;
        let tokens = self.generate_tokens(user_id, lab_id, admin_role_id, ADMIN_ROLE, permissions)?;
        self.store_refresh_token(&mut tx, user_id, &tokens.refresh_token)
            .await?;

        tx.commit().await?;

        tracing::info!(%lab_id, lab_code = %input.lab_code, "lab registered");

        Ok(RegisterResponse {
            lab_id,
            user_id,
            tokens,
        })
    }

    /// Authenticate user with email and password
    pub async fn login(&self, email: &str, password: &str) -> AppResult<AuthTokens> {
        let email = email.trim().to_lowercase();

        let user = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.lab_id, u.role_id, r.name AS role_name, u.password_hash, u.is_active
            FROM users u
            JOIN roles r ON r.id = u.role_id
            WHERE u.email = $1
            "#,
        )
        .bind(&email)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

        if !verify_password(password, &user.password_hash)? {
            tracing::info!(user_id = %user.id, "login rejected: bad password");
            return Err(AppError::InvalidCredentials);
        }

        if !user.is_active {
            return Err(AppError::Unauthorized("Account is disabled".to_string()));
        }

        let mut tx = self.db.begin().await?;

        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;

        let permissions = user_permissions(&mut tx, user.id).await?;
        let tokens =
            self.generate_tokens(user.id, user.lab_id, user.role_id, &user.role_name, permissions)?;
        self.store_refresh_token(&mut tx, user.id, &tokens.refresh_token)
            .await?;

        AuditEvent::new(user.lab_id, Some(user.id), "login", "user")
            .entity(user.id)
            .record(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(tokens)
    }

    /// Rotate a refresh token: the presented token is revoked and a new pair issued
    pub async fn refresh_token(&self, refresh_token: &str) -> AppResult<AuthTokens> {
        let token_hash = hash_token(refresh_token);

        let mut tx = self.db.begin().await?;

        let user = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.lab_id, u.role_id, r.name AS role_name, u.password_hash, u.is_active
            FROM refresh_tokens rt
            JOIN users u ON u.id = rt.user_id
            JOIN roles r ON r.id = u.role_id
            WHERE rt.token_hash = $1
              AND rt.expires_at > NOW()
              AND rt.revoked_at IS NULL
              AND u.is_active = true
            FOR UPDATE OF rt
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired refresh token".to_string()))?;

        sqlx::query("UPDATE refresh_tokens SET revoked_at = NOW() WHERE token_hash = $1")
            .bind(&token_hash)
            .execute(&mut *tx)
            .await?;

        let permissions = user_permissions(&mut tx, user.id).await?;
        let tokens =
            self.generate_tokens(user.id, user.lab_id, user.role_id, &user.role_name, permissions)?;
        self.store_refresh_token(&mut tx, user.id, &tokens.refresh_token)
            .await?;

        tx.commit().await?;

        Ok(tokens)
    }

    /// Revoke one refresh token, or every active token of the user
    pub async fn logout(&self, user_id: Uuid, refresh_token: Option<&str>) -> AppResult<()> {
        match refresh_token {
            Some(token) => {
                sqlx::query(
                    "UPDATE refresh_tokens SET revoked_at = NOW() WHERE token_hash = $1 AND user_id = $2 AND revoked_at IS NULL",
                )
                .bind(hash_token(token))
                .bind(user_id)
                .execute(&self.db)
                .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
                )
                .bind(user_id)
                .execute(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    /// Profile of the signed-in user with current permissions
    pub async fn me(&self, lab_id: Uuid, user_id: Uuid) -> AppResult<MeResponse> {
        let mut conn = self.db.acquire().await?;

        let mut me = sqlx::query_as::<_, MeResponse>(
            r#"
            SELECT u.id, u.name, u.email, u.designation, u.signature_url,
                   l.id AS lab_id, l.name AS lab_name, l.code AS lab_code,
                   r.id AS role_id, r.name AS role
            FROM users u
            JOIN labs l ON l.id = u.lab_id
            JOIN roles r ON r.id = u.role_id
            WHERE u.id = $1 AND u.lab_id = $2
            "#,
        )
        .bind(user_id)
        .bind(lab_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        me.permissions = user_permissions(&mut conn, user_id).await?;
        Ok(me)
    }

    /// Generate access and refresh tokens
    fn generate_tokens(
        &self,
        user_id: Uuid,
        lab_id: Uuid,
        role_id: Uuid,
        role: &str,
        permissions: Vec<String>,
    ) -> AppResult<AuthTokens> {
        let now = Utc::now();
        let access_exp = now + Duration::seconds(self.access_token_expiry);

        let claims = Claims {
            sub: user_id.to_string(),
            lab_id: lab_id.to_string(),
            role_id: role_id.to_string(),
            role: role.to_string(),
            permissions,
            scope: STAFF_SCOPE.to_string(),
            exp: access_exp.timestamp(),
            iat: now.timestamp(),
        };

        let access_token = encode_claims(&claims, &self.jwt_secret)?;

        // Refresh token is opaque; only its hash is stored
        let refresh_token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());

        Ok(AuthTokens {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry,
        })
    }

    /// Store refresh token in database
    async fn store_refresh_token(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        token: &str,
    ) -> AppResult<()> {
        let expires_at = Utc::now() + Duration::seconds(self.refresh_token_expiry);

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(hash_token(token))
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_sha256_hex() {
        let hashed = hash_token("refresh-token");
        assert_eq!(hashed.len(), 64);
        assert_eq!(hashed, hash_token("refresh-token"));
        assert_ne!(hashed, hash_token("other-token"));
    }

    #[test]
    fn test_claims_round_trip_and_expiry() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            lab_id: Uuid::new_v4().to_string(),
            role_id: Uuid::new_v4().to_string(),
            role: "analyst".to_string(),
            permissions: vec!["sample:view".to_string()],
            scope: STAFF_SCOPE.to_string(),
            exp: now + 60,
            iat: now,
        };
        let token = encode_claims(&claims, "secret").unwrap();
        let decoded: Claims = decode_claims(&token, "secret").unwrap();
        assert_eq!(decoded.permissions, claims.permissions);

        assert!(matches!(
            decode_claims::<Claims>(&token, "wrong"),
            Err(AppError::InvalidToken)
        ));

        let expired = Claims {
            exp: now - 3600,
            ..claims
        };
        let token = encode_claims(&expired, "secret").unwrap();
        assert!(matches!(
            decode_claims::<Claims>(&token, "secret"),
            Err(AppError::TokenExpired)
        ));
    }
}
