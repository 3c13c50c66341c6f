//! Loan (borrow) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Loan ledger row, keyed by (user, book). Open while `returned_at` is null.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub user_id: i32,
    pub book_id: i32,
    pub borrowed_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn is_open(&self) -> bool {
        self.returned_at.is_none()
    }
}

/// A book currently held by a user
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct OpenLoan {
    pub book_id: i32,
    pub title: String,
    pub description: String,
    pub borrowed_at: DateTime<Utc>,
}
