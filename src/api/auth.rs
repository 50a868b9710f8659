use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    validate_email, validate_name, validate_otp, validate_password, validate_phone,
};
use crate::config::AuthConfig;
use crate::db::{
    begin_write, now_rfc3339, AuthResponse, LoginRequest, SendOtpRequest, User, UserResponse,
    UserRole, VerifyOtpRequest,
};
use crate::engine::Actor;
use crate::{AppState, DbPool};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT payload for both access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: UserRole,
    pub kind: TokenKind,
    pub iat: u64,
    pub exp: u64,
    /// Unique per token so two tokens minted in the same second differ
    pub jti: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Hash a secret (OTP code or refresh token) for storage
pub(crate) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of a presented secret against its stored hash
fn matches_stored_hash(presented: &str, stored_hash: &str) -> bool {
    let presented_hash = hash_token(presented);
    presented_hash.len() == stored_hash.len()
        && presented_hash.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

fn generate_otp() -> String {
    let mut rng = rand::rng();
    format!("{:06}", rng.random_range(0..1_000_000u32))
}

fn otp_key(email: &str) -> String {
    format!("otp:{}", email)
}

fn otp_attempts_key(email: &str) -> String {
    format!("otp_attempts:{}", email)
}

pub(crate) fn refresh_key(user_id: &str) -> String {
    format!("refresh:{}", user_id)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Mint a signed token of the given kind for `user`
pub fn issue_token(config: &AuthConfig, user: &User, kind: TokenKind) -> Result<String, ApiError> {
    let ttl = match kind {
        TokenKind::Access => config.access_token_ttl,
        TokenKind::Refresh => config.refresh_token_ttl,
    };
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    let claims = Claims {
        sub: user.id.clone(),
        role: user.role_enum(),
        kind,
        iat: now,
        exp: now + ttl,
        jti: uuid::Uuid::new_v4().to_string(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to sign token");
        ApiError::internal("Failed to issue token")
    })
}

/// Verify signature, expiry and kind of a token
pub fn decode_token(config: &AuthConfig, token: &str, kind: TokenKind) -> Result<Claims, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;

    if data.claims.kind != kind {
        return Err(ApiError::unauthorized("Invalid or expired token"));
    }
    Ok(data.claims)
}

/// Extract the access token: `Authorization: Bearer` first, then the cookie
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    CookieJar::from_headers(headers)
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
}

async fn find_user(db: &DbPool, id: &str) -> Result<Option<User>, ApiError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(user)
}

/// Resolve an access token to an active user
pub async fn authenticate(state: &AppState, token: &str) -> Result<User, ApiError> {
    let claims = decode_token(&state.config.auth, token, TokenKind::Access)?;
    let user = find_user(&state.db, &claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User no longer exists"))?;

    if !user.is_active {
        return Err(ApiError::forbidden("Account is deactivated"));
    }
    Ok(user)
}

/// Extractor for the authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor::from(&self.0)
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.0.role_enum().is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Admin access required"))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        authenticate(state, &token).await.map(AuthUser)
    }
}

fn session_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(false)
        .same_site(SameSite::Lax)
        .build()
}

/// Issue a fresh token pair, remember the refresh token's hash and set cookies
fn start_session(
    state: &AppState,
    jar: CookieJar,
    user: User,
) -> Result<(CookieJar, AuthResponse), ApiError> {
    let access_token = issue_token(&state.config.auth, &user, TokenKind::Access)?;
    let refresh_token = issue_token(&state.config.auth, &user, TokenKind::Refresh)?;

    state.kv.set_ex(
        refresh_key(&user.id),
        hash_token(&refresh_token),
        Duration::from_secs(state.config.auth.refresh_token_ttl),
    );

    let jar = jar
        .add(session_cookie(ACCESS_COOKIE, access_token.clone()))
        .add(session_cookie(REFRESH_COOKIE, refresh_token.clone()));

    Ok((
        jar,
        AuthResponse {
            success: true,
            access_token,
            refresh_token,
            user: UserResponse::from(user),
        },
    ))
}

/// Fields for a new account
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub name: &'a str,
    pub phone: Option<&'a str>,
    pub role: UserRole,
}

/// Insert a user; tour-guides also get an empty buddy profile
pub async fn create_user(db: &DbPool, new_user: NewUser<'_>) -> Result<User, ApiError> {
    let id = uuid::Uuid::new_v4().to_string();
    let password_hash = hash_password(new_user.password).map_err(|e| {
        tracing::error!(error = %e, "Failed to hash password");
        ApiError::internal("Failed to create account")
    })?;
    let now = now_rfc3339();

    let mut tx = begin_write(db).await?;
    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, name, phone, role, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(new_user.email)
    .bind(&password_hash)
    .bind(new_user.name.trim())
    .bind(new_user.phone.filter(|p| !p.is_empty()))
    .bind(new_user.role.as_str())
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    if new_user.role == UserRole::TourGuide {
        sqlx::query("INSERT INTO buddy_profiles (user_id, updated_at) VALUES (?, ?)")
            .bind(&id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.id, role = %new_user.role, "Created user");
    Ok(user)
}

/// Send a signup code to an email address that is not yet registered
pub async fn send_otp(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendOtpRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = normalize_email(&request.email);
    validate_email(&email).map_err(|e| ApiError::validation_field("email", e))?;

    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_some() {
        return Err(ApiError::conflict("Email is already registered"));
    }

    let code = generate_otp();
    let ttl = state.config.otp.ttl_seconds;
    state
        .kv
        .set_ex(otp_key(&email), hash_token(&code), Duration::from_secs(ttl));
    state.kv.del(&otp_attempts_key(&email));

    if let Err(e) = state.mailer.send_otp_email(&email, &code, ttl / 60).await {
        tracing::error!(email = %email, error = %e, "Failed to send verification code");
        state.kv.del(&otp_key(&email));
        return Err(ApiError::internal("Failed to send verification email"));
    }

    tracing::info!(email = %email, "Verification code issued");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Verification code sent",
    })))
}

/// Check a signup code, create the account and log it in
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), ApiError> {
    let email = normalize_email(&request.email);

    let role = match request.role.as_deref() {
        None | Some("") => Ok(UserRole::Traveller),
        Some(raw) => match raw.parse::<UserRole>() {
            Ok(UserRole::Admin) | Err(_) => Err("Role must be traveller or tour-guide".to_string()),
            Ok(role) => Ok(role),
        },
    };

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("email", validate_email(&email))
        .check("otp", validate_otp(&request.otp))
        .check("name", validate_name(&request.name))
        .check("password", validate_password(&request.password))
        .check("phone", validate_phone(&request.phone))
        .check("role", role.as_ref().map(|_| ()).map_err(|e| e.clone()));
    errors.finish()?;
    let role = role.map_err(|e| ApiError::validation_field("role", e))?;

    let key = otp_key(&email);
    let stored = state
        .kv
        .get(&key)
        .ok_or_else(|| ApiError::validation_field("otp", "Invalid or expired verification code"))?;
    if !matches_stored_hash(&request.otp, &stored) {
        let attempts_key = otp_attempts_key(&email);
        let ttl = Duration::from_secs(state.config.otp.ttl_seconds);
        let attempts = state.kv.incr(&attempts_key, ttl);
        if attempts >= state.config.otp.max_attempts {
            state.kv.del(&key);
            state.kv.del(&attempts_key);
            tracing::warn!(email = %email, attempts, "Verification code discarded after failed attempts");
        }
        return Err(ApiError::validation_field("otp", "Invalid or expired verification code"));
    }
    state.kv.del(&key);
    state.kv.del(&otp_attempts_key(&email));

    let user = create_user(
        &state.db,
        NewUser {
            email: &email,
            password: &request.password,
            name: &request.name,
            phone: request.phone.as_deref(),
            role,
        },
    )
    .await?;

    let (jar, response) = start_session(&state, jar, user)?;
    Ok((StatusCode::CREATED, jar, Json(response)))
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let email = normalize_email(&request.email);
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    let user = user.ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    if !verify_password(&request.password, &user.password_hash) {
        tracing::debug!(email = %email, "Rejected login with wrong password");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    if !user.is_active {
        return Err(ApiError::forbidden("Account is deactivated"));
    }

    tracing::info!(user_id = %user.id, "User logged in");
    let (jar, response) = start_session(&state, jar, user)?;
    Ok((jar, Json(response)))
}

/// Exchange a refresh token for a new token pair. The old refresh token
/// stops working.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let token = body
        .and_then(|Json(b)| b.refresh_token)
        .or_else(|| jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()))
        .ok_or_else(|| ApiError::unauthorized("Refresh token required"))?;

    let claims = decode_token(&state.config.auth, &token, TokenKind::Refresh)?;

    let stored = state
        .kv
        .get(&refresh_key(&claims.sub))
        .ok_or_else(|| ApiError::unauthorized("Refresh token has been revoked"))?;
    if !matches_stored_hash(&token, &stored) {
        tracing::warn!(user_id = %claims.sub, "Rejected stale refresh token");
        return Err(ApiError::unauthorized("Refresh token has been revoked"));
    }

    let user = find_user(&state.db, &claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User no longer exists"))?;
    if !user.is_active {
        return Err(ApiError::forbidden("Account is deactivated"));
    }

    let (jar, response) = start_session(&state, jar, user)?;
    Ok((jar, Json(response)))
}

/// Forget the stored refresh token and clear both cookies
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    auth: AuthUser,
) -> (CookieJar, Json<serde_json::Value>) {
    state.kv.del(&refresh_key(auth.id()));
    tracing::info!(user_id = %auth.id(), "User logged out");

    let jar = jar
        .remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"));
    (
        jar,
        Json(serde_json::json!({ "success": true, "message": "Logged out" })),
    )
}

/// Current user
pub async fn me(auth: AuthUser) -> Json<UserResponse> {
    Json(UserResponse::from(auth.0))
}

/// Create the configured admin account on first start
pub async fn ensure_admin_user(db: &DbPool, config: &AuthConfig) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(());
    };
    let email = normalize_email(email);

    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(db)
        .await?;
    if exists.is_some() {
        return Ok(());
    }

    create_user(
        db,
        NewUser {
            email: &email,
            password,
            name: &config.admin_name,
            phone: None,
            role: UserRole::Admin,
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to create admin user: {}", e))?;

    tracing::info!(email = %email, "Created admin user from configuration");
    Ok(())
}
