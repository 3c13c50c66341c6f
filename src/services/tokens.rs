//! Access token issuing and verification

use chrono::{DateTime, Duration, Utc};

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::user::{Role, User, UserClaims},
};

/// A freshly signed token and the instant it stops being accepted
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    validity: Duration,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        Self::with_validity(&config.jwt_secret, Duration::hours(config.jwt_expiration_hours as i64))
    }

    pub fn with_validity(secret: &str, validity: Duration) -> Self {
        Self {
            secret: secret.to_string(),
            validity,
        }
    }

    /// Sign a token carrying the user's id and role
    pub fn issue(&self, user: &User) -> AppResult<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + self.validity;

        let claims = UserClaims {
            sub: user.email.clone(),
            user_id: user.id,
            role: user.role,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let token = claims
            .create_token(&self.secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Check signature and expiry. Every failure is reported the same way.
    pub fn verify(&self, token: &str) -> AppResult<UserClaims> {
        UserClaims::from_token(token, &self.secret).map_err(|e| {
            tracing::debug!("Rejected access token: {}", e);
            AppError::Unauthorized
        })
    }

    /// Authorization gate: resolve a presented token into claims, optionally
    /// requiring a role.
    pub fn authorize(&self, token: Option<&str>, required: Option<Role>) -> AppResult<UserClaims> {
        let token = token.ok_or(AppError::Unauthorized)?;
        let claims = self.verify(token)?;
        if let Some(role) = required {
            claims.require_role(role)?;
        }
        Ok(claims)
    }
}
