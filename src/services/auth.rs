//! Registration, login and nonce retrieval

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::user::{CreateUser, LoginRequest, NewUser, Role, User},
};

use super::{
    authenticator::{generate_nonce, hash_password, Authenticator},
    tokens::{IssuedToken, TokenIssuer},
    transaction::TransactionCoordinator,
};

#[derive(Clone)]
pub struct AuthService {
    transactions: TransactionCoordinator,
    authenticator: Authenticator,
    tokens: TokenIssuer,
}

impl AuthService {
    pub fn new(
        transactions: TransactionCoordinator,
        authenticator: Authenticator,
        tokens: TokenIssuer,
    ) -> Self {
        Self {
            transactions,
            authenticator,
            tokens,
        }
    }

    pub fn authenticator(&self) -> Authenticator {
        self.authenticator
    }

    /// Create an account with a hashed password and a fresh nonce
    pub async fn register(&self, request: CreateUser) -> AppResult<User> {
        request.validate()?;
        if request.name.trim().is_empty() {
            return Err(AppError::Validation("Name is required".to_string()));
        }
        match &request.address {
            Some(address) => {
                let valid = address
                    .strip_prefix("0x")
                    .map_or(false, |digits| digits.len() == 40 && hex::decode(digits).is_ok());
                if !valid {
                    return Err(AppError::Validation(
                        "Address must be 0x followed by 40 hex digits".to_string(),
                    ));
                }
            }
            None if self.authenticator == Authenticator::Signature => {
                return Err(AppError::Validation(
                    "Address is required for signature login".to_string(),
                ));
            }
            None => {}
        }

        let new_user = NewUser {
            name: request.name.trim().to_string(),
            email: request.email,
            role: request.role.unwrap_or(Role::User),
            password_hash: hash_password(&request.password)?,
            nonce: generate_nonce(),
            address: request.address.map(|a| a.to_lowercase()),
        };

        let user = self
            .transactions
            .run(move |q| Box::pin(async move { q.create_user(&new_user).await }))
            .await?;

        tracing::info!("Registered user id={} role={}", user.id, user.role);
        Ok(user)
    }

    /// Check credentials with the configured strategy and issue a token.
    ///
    /// A successful signature login replaces the nonce; the token is only
    /// handed out once the replacement has been stored.
    pub async fn login(&self, request: LoginRequest) -> AppResult<(User, IssuedToken)> {
        let user = self.find_by_email(&request.email).await?;

        let issued = self
            .authenticator
            .login(&user, &request, &self.tokens)
            .map_err(|e| {
                tracing::warn!("Rejected login for user id={}: {}", user.id, e);
                e
            })?;

        if self.authenticator.consumes_nonce() {
            let user_id = user.id;
            let current = user.nonce.clone();
            let next = generate_nonce();
            let rotated = self
                .transactions
                .run(move |q| {
                    Box::pin(async move { q.rotate_nonce(user_id, &current, &next).await })
                })
                .await?;
            if rotated == 0 {
                tracing::warn!("Nonce for user id={} was consumed concurrently", user_id);
                return Err(AppError::InvalidSignature);
            }
        }

        tracing::info!("User id={} logged in", user.id);
        Ok((user, issued))
    }

    /// Current challenge to sign for signature login
    pub async fn nonce(&self, email: &str) -> AppResult<String> {
        Ok(self.find_by_email(email).await?.nonce)
    }

    pub async fn get_user(&self, id: i32) -> AppResult<User> {
        let mut conn = self.transactions.connection().await?;
        conn.get_user_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    async fn find_by_email(&self, email: &str) -> AppResult<User> {
        let mut conn = self.transactions.connection().await?;
        conn.get_user_by_email(email)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}
