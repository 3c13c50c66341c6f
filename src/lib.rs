//! Bookshelf lending server
//!
//! A REST JSON API for a small library: a book catalog, transactional
//! borrowing and returning of copies, password or wallet-signature login,
//! and JWT-gated access.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
