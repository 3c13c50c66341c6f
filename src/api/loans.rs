//! Borrowing and returning endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{error::AppResult, models::loan::OpenLoan};

use super::AuthenticatedUser;

/// Result of a borrow or return
#[derive(Serialize, ToSchema)]
pub struct LoanResponse {
    pub user_id: i32,
    pub book_id: i32,
    /// Copies on the shelf after the operation
    pub num_copy: i32,
    /// Status message
    pub message: String,
}

/// Get the books a user currently holds
#[utoipa::path(
    get,
    path = "/users/{user_id}/books",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Open loans", body = Vec<OpenLoan>),
        (status = 403, description = "Not your account", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_open_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Vec<OpenLoan>>> {
    claims.require_self_or_admin(user_id)?;

    let loans = state.services.lending.list_open_loans(user_id).await?;
    Ok(Json(loans))
}

/// Borrow one copy of a book
#[utoipa::path(
    post,
    path = "/users/{user_id}/books/{book_id}/borrow",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = i32, Path, description = "User ID"),
        ("book_id" = i32, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Book borrowed", body = LoanResponse),
        (status = 400, description = "No copy available or already borrowed", body = crate::error::ErrorResponse),
        (status = 403, description = "Not your account", body = crate::error::ErrorResponse),
        (status = 404, description = "User or book not found", body = crate::error::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::error::ErrorResponse)
    )
)]
pub async fn borrow(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path((user_id, book_id)): Path<(i32, i32)>,
) -> AppResult<Json<LoanResponse>> {
    claims.require_self_or_admin(user_id)?;
    state.services.limiter.check()?;

    let num_copy = state.services.lending.borrow(user_id, book_id).await?;
    Ok(Json(LoanResponse {
        user_id,
        book_id,
        num_copy,
        message: "Book borrowed successfully".to_string(),
    }))
}

/// Return a borrowed book
#[utoipa::path(
    post,
    path = "/users/{user_id}/books/{book_id}/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = i32, Path, description = "User ID"),
        ("book_id" = i32, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Book returned", body = LoanResponse),
        (status = 403, description = "Not your account", body = crate::error::ErrorResponse),
        (status = 404, description = "No open loan", body = crate::error::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path((user_id, book_id)): Path<(i32, i32)>,
) -> AppResult<Json<LoanResponse>> {
    claims.require_self_or_admin(user_id)?;
    state.services.limiter.check()?;

    let num_copy = state.services.lending.return_book(user_id, book_id).await?;
    Ok(Json(LoanResponse {
        user_id,
        book_id,
        num_copy,
        message: "Book returned successfully".to_string(),
    }))
}
