//! Business logic services

pub mod auth;
pub mod authenticator;
pub mod lending;
pub mod rate_limit;
pub mod tokens;
pub mod transaction;

use std::sync::Arc;

use crate::{config::AppConfig, repository::LedgerStore};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub auth: auth::AuthService,
    pub lending: lending::LendingService,
    pub tokens: tokens::TokenIssuer,
    pub limiter: Arc<rate_limit::RateLimiter>,
}

impl Services {
    /// Create all services over the given ledger store
    pub fn new(store: Arc<dyn LedgerStore>, config: &AppConfig) -> Self {
        let transactions = transaction::TransactionCoordinator::new(
            store,
            config.lending.acquire_timeout(),
            config.lending.transaction_timeout(),
        );
        let tokens = tokens::TokenIssuer::new(&config.auth);
        let authenticator = authenticator::Authenticator::from(config.auth.method);

        Self {
            auth: auth::AuthService::new(transactions.clone(), authenticator, tokens.clone()),
            lending: lending::LendingService::new(transactions, &config.lending),
            tokens,
            limiter: Arc::new(rate_limit::RateLimiter::new(&config.rate_limit)),
        }
    }
}
