//! Authentication endpoints

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    error::{AppError, AppResult},
    models::user::{CreateUser, LoginRequest, Role, User},
};

use super::{AuthenticatedUser, TOKEN_COOKIE};

/// Login response with JWT token
#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    /// JWT access token
    pub token: String,
    /// Token type (always "Bearer")
    pub token_type: String,
    /// Instant after which the token is rejected
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Deserialize, ToSchema)]
pub struct NonceRequest {
    pub email: String,
}

#[derive(Serialize, ToSchema)]
pub struct NonceResponse {
    /// Message to sign for signature login
    pub nonce: String,
}

/// Register a new account.
///
/// Registering an admin needs an admin token unless
/// `auth.open_admin_registration` is set.
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = CreateUser,
    responses(
        (status = 201, description = "Account created", body = User),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
        (status = 403, description = "Admin registration not allowed", body = crate::error::ErrorResponse),
        (status = 409, description = "Email already registered", body = crate::error::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::error::ErrorResponse)
    )
)]
pub async fn register(
    State(state): State<crate::AppState>,
    caller: Option<AuthenticatedUser>,
    Json(request): Json<CreateUser>,
) -> AppResult<(StatusCode, Json<User>)> {
    state.services.limiter.check()?;

    if request.role == Some(Role::Admin) && !state.config.auth.open_admin_registration {
        let by_admin = matches!(&caller, Some(AuthenticatedUser(claims)) if claims.role == Role::Admin);
        if !by_admin {
            return Err(AppError::Forbidden(
                "Only an admin can register another admin".to_string(),
            ));
        }
    }

    let user = state.services.auth.register(request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Authenticate and receive a JWT token, also set as the `token` cookie
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials or signature", body = crate::error::ErrorResponse),
        (status = 404, description = "Unknown email", body = crate::error::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::error::ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<crate::AppState>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    state.services.limiter.check()?;

    let (user, issued) = state.services.auth.login(request).await?;

    let expires = time::OffsetDateTime::from_unix_timestamp(issued.expires_at.timestamp())
        .map_err(|e| AppError::Internal(format!("Invalid token expiry: {}", e)))?;
    let cookie = Cookie::build((TOKEN_COOKIE, issued.token.clone()))
        .expires(expires)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            token: issued.token,
            token_type: "Bearer".to_string(),
            expires_at: issued.expires_at,
            user,
        }),
    ))
}

/// Get the nonce to sign for signature login
#[utoipa::path(
    post,
    path = "/auth/nonce",
    tag = "auth",
    request_body = NonceRequest,
    responses(
        (status = 200, description = "Current nonce", body = NonceResponse),
        (status = 404, description = "Unknown email", body = crate::error::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::error::ErrorResponse)
    )
)]
pub async fn nonce(
    State(state): State<crate::AppState>,
    Json(request): Json<NonceRequest>,
) -> AppResult<Json<NonceResponse>> {
    state.services.limiter.check()?;

    let nonce = state.services.auth.nonce(&request.email).await?;
    Ok(Json(NonceResponse { nonce }))
}

/// Get current user info
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse)
    )
)]
pub async fn me(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<User>> {
    let user = state.services.auth.get_user(claims.user_id).await?;
    Ok(Json(user))
}
