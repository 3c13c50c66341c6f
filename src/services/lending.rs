//! Lending engine: catalog mutations, borrowing and returning
//!
//! Every mutation runs as one unit of work through the
//! [`TransactionCoordinator`]. Borrow, return and delete read the book's copy
//! count with a row lock first, so concurrent operations on one book are
//! totally ordered and the count can never go negative.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use validator::Validate;

use crate::{
    config::LendingConfig,
    error::{AppError, AppResult},
    models::{
        book::{BookDetails, CreateBook, UpdateBook},
        loan::OpenLoan,
    },
};

use super::transaction::TransactionCoordinator;

#[derive(Clone)]
pub struct LendingService {
    transactions: TransactionCoordinator,
    /// Process-wide mutation lock, when configured
    guard: Option<Arc<Mutex<()>>>,
}

fn book_not_found(id: i32) -> AppError {
    AppError::NotFound(format!("Book with id {} not found", id))
}

fn validate_copies(copies: i32) -> AppResult<()> {
    if copies < 0 {
        return Err(AppError::Validation(
            "Number of copies cannot be negative".to_string(),
        ));
    }
    Ok(())
}

impl LendingService {
    pub fn new(transactions: TransactionCoordinator, config: &LendingConfig) -> Self {
        Self {
            transactions,
            guard: config
                .serialize_mutations
                .then(|| Arc::new(Mutex::new(()))),
        }
    }

    async fn exclusive(&self) -> AppResult<Option<OwnedMutexGuard<()>>> {
        let Some(guard) = &self.guard else {
            return Ok(None);
        };
        tokio::time::timeout(self.transactions.acquire_timeout(), guard.clone().lock_owned())
            .await
            .map(Some)
            .map_err(|_| AppError::Timeout("Timed out waiting for the mutation lock".to_string()))
    }

    /// Create a book together with its authors
    pub async fn create_book(&self, book: CreateBook) -> AppResult<BookDetails> {
        book.validate()?;
        validate_copies(book.copies)?;
        if book.title.trim().is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }

        let _guard = self.exclusive().await?;
        let created = self
            .transactions
            .run(move |q| {
                Box::pin(async move {
                    let id = q.create_book(&book.title, &book.description, book.copies).await?;
                    for author in &book.authors {
                        let author_id = q.add_author(author).await?;
                        q.add_book_author(id, author_id).await?;
                    }
                    q.get_book(id).await?.ok_or_else(|| book_not_found(id))
                })
            })
            .await?;

        tracing::info!("Created book id={} copies={}", created.id, created.num_copy);
        Ok(created)
    }

    /// Replace title, description and copy count
    pub async fn edit_book(&self, id: i32, update: UpdateBook) -> AppResult<BookDetails> {
        update.validate()?;
        validate_copies(update.copies)?;

        let _guard = self.exclusive().await?;
        let updated = self
            .transactions
            .run(move |q| {
                Box::pin(async move {
                    q.lock_book_copies(id).await?.ok_or_else(|| book_not_found(id))?;
                    if q.update_book(id, &update).await? == 0 {
                        return Err(book_not_found(id));
                    }
                    q.get_book(id).await?.ok_or_else(|| book_not_found(id))
                })
            })
            .await?;

        tracing::info!("Updated book id={} copies={}", id, updated.num_copy);
        Ok(updated)
    }

    /// Delete a book; refused while any copy is out on loan
    pub async fn delete_book(&self, id: i32) -> AppResult<()> {
        let _guard = self.exclusive().await?;
        self.transactions
            .run(move |q| {
                Box::pin(async move {
                    q.lock_book_copies(id).await?.ok_or_else(|| book_not_found(id))?;
                    let open = q.count_open_loans_for_book(id).await?;
                    if open > 0 {
                        return Err(AppError::Unavailable(format!(
                            "Book with id {} has {} copies on loan",
                            id, open
                        )));
                    }
                    if q.delete_book(id).await? == 0 {
                        return Err(book_not_found(id));
                    }
                    Ok(())
                })
            })
            .await?;

        tracing::info!("Deleted book id={}", id);
        Ok(())
    }

    /// Confirm the ledger store hands out connections
    pub async fn ping(&self) -> AppResult<()> {
        self.transactions.connection().await.map(|_| ())
    }

    pub async fn get_book(&self, id: i32) -> AppResult<BookDetails> {
        let mut conn = self.transactions.connection().await?;
        conn.get_book(id).await?.ok_or_else(|| book_not_found(id))
    }

    pub async fn list_books(&self) -> AppResult<Vec<BookDetails>> {
        let mut conn = self.transactions.connection().await?;
        conn.list_books().await
    }

    /// Lend one copy to the user, returning the copies left on the shelf
    pub async fn borrow(&self, user_id: i32, book_id: i32) -> AppResult<i32> {
        let _guard = self.exclusive().await?;
        let remaining = self
            .transactions
            .run(move |q| {
                Box::pin(async move {
                    if q.get_user_by_id(user_id).await?.is_none() {
                        return Err(AppError::NotFound(format!(
                            "User with id {} not found",
                            user_id
                        )));
                    }
                    let copies = q
                        .lock_book_copies(book_id)
                        .await?
                        .ok_or_else(|| book_not_found(book_id))?;
                    if q.has_open_loan(user_id, book_id).await? {
                        return Err(AppError::Unavailable(
                            "Book already borrowed by this user".to_string(),
                        ));
                    }
                    if copies == 0 || q.decrement_copies(book_id).await? == 0 {
                        return Err(AppError::Unavailable("No copies available".to_string()));
                    }
                    q.insert_loan(user_id, book_id).await?;
                    Ok(copies - 1)
                })
            })
            .await?;

        tracing::info!(
            "User id={} borrowed book id={}, {} copies left",
            user_id,
            book_id,
            remaining
        );
        Ok(remaining)
    }

    /// Close the user's open loan and put the copy back, returning the new count
    pub async fn return_book(&self, user_id: i32, book_id: i32) -> AppResult<i32> {
        let _guard = self.exclusive().await?;
        let copies = self
            .transactions
            .run(move |q| {
                Box::pin(async move {
                    let copies = q
                        .lock_book_copies(book_id)
                        .await?
                        .ok_or_else(|| book_not_found(book_id))?;
                    if q.close_loan(user_id, book_id).await? == 0 {
                        return Err(AppError::NotFound(format!(
                            "No open loan of book {} for user {}",
                            book_id, user_id
                        )));
                    }
                    q.increment_copies(book_id).await?;
                    Ok(copies + 1)
                })
            })
            .await?;

        tracing::info!(
            "User id={} returned book id={}, {} copies on shelf",
            user_id,
            book_id,
            copies
        );
        Ok(copies)
    }

    /// Books the user currently holds
    pub async fn list_open_loans(&self, user_id: i32) -> AppResult<Vec<OpenLoan>> {
        let mut conn = self.transactions.connection().await?;
        conn.list_open_loans(user_id).await
    }
}
