//! Repository layer for ledger operations
//!
//! [`Queries`] is the typed query capability used by the lending engine. It is
//! implemented both by a direct connection handle and by a transaction handle,
//! so a unit of work never knows which one it was given. [`LedgerStore`] hands
//! out either kind of handle.

pub mod books;
pub mod loans;
pub mod memory;
pub mod postgres;
pub mod users;

use async_trait::async_trait;

use crate::{
    error::AppResult,
    models::{
        author::CreateAuthor,
        book::{BookDetails, UpdateBook},
        loan::OpenLoan,
        user::{NewUser, User},
    },
};

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// Typed ledger operations, bound to a connection or a transaction
#[async_trait]
pub trait Queries: Send {
    /// Insert a book, returning its id
    async fn create_book(&mut self, title: &str, description: &str, copies: i32)
        -> AppResult<i32>;

    /// Replace a book's mutable fields, returning the number of rows touched
    async fn update_book(&mut self, id: i32, book: &UpdateBook) -> AppResult<u64>;

    async fn delete_book(&mut self, id: i32) -> AppResult<u64>;

    async fn get_book(&mut self, id: i32) -> AppResult<Option<BookDetails>>;

    async fn list_books(&mut self) -> AppResult<Vec<BookDetails>>;

    /// Read the copy count, holding a row lock until the transaction ends
    async fn lock_book_copies(&mut self, id: i32) -> AppResult<Option<i32>>;

    /// Take one copy off the shelf; touches no row when none is left
    async fn decrement_copies(&mut self, id: i32) -> AppResult<u64>;

    async fn increment_copies(&mut self, id: i32) -> AppResult<u64>;

    async fn add_author(&mut self, author: &CreateAuthor) -> AppResult<i32>;

    async fn add_book_author(&mut self, book_id: i32, author_id: i32) -> AppResult<()>;

    async fn has_open_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<bool>;

    async fn count_open_loans_for_book(&mut self, book_id: i32) -> AppResult<i64>;

    async fn insert_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<()>;

    /// Stamp `returned_at` on the open loan, returning the number of rows touched
    async fn close_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<u64>;

    async fn list_open_loans(&mut self, user_id: i32) -> AppResult<Vec<OpenLoan>>;

    async fn get_user_by_id(&mut self, id: i32) -> AppResult<Option<User>>;

    async fn get_user_by_email(&mut self, email: &str) -> AppResult<Option<User>>;

    async fn create_user(&mut self, user: &NewUser) -> AppResult<User>;

    /// Replace the nonce only if it still equals `current`, returning rows touched
    async fn rotate_nonce(&mut self, user_id: i32, current: &str, next: &str) -> AppResult<u64>;
}

/// A [`Queries`] handle bound to an open transaction
#[async_trait]
pub trait LedgerTransaction: Queries {
    async fn commit(self: Box<Self>) -> AppResult<()>;

    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

/// Transactional store backing the lending engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Direct handle for reads outside a transaction
    async fn connection(&self) -> AppResult<Box<dyn Queries>>;

    async fn begin(&self) -> AppResult<Box<dyn LedgerTransaction>>;
}

#[cfg(test)]
mockall::mock! {
    pub Transaction {}

    #[async_trait]
    impl Queries for Transaction {
        async fn create_book(&mut self, title: &str, description: &str, copies: i32) -> AppResult<i32>;
        async fn update_book(&mut self, id: i32, book: &UpdateBook) -> AppResult<u64>;
        async fn delete_book(&mut self, id: i32) -> AppResult<u64>;
        async fn get_book(&mut self, id: i32) -> AppResult<Option<BookDetails>>;
        async fn list_books(&mut self) -> AppResult<Vec<BookDetails>>;
        async fn lock_book_copies(&mut self, id: i32) -> AppResult<Option<i32>>;
        async fn decrement_copies(&mut self, id: i32) -> AppResult<u64>;
        async fn increment_copies(&mut self, id: i32) -> AppResult<u64>;
        async fn add_author(&mut self, author: &CreateAuthor) -> AppResult<i32>;
        async fn add_book_author(&mut self, book_id: i32, author_id: i32) -> AppResult<()>;
        async fn has_open_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<bool>;
        async fn count_open_loans_for_book(&mut self, book_id: i32) -> AppResult<i64>;
        async fn insert_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<()>;
        async fn close_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<u64>;
        async fn list_open_loans(&mut self, user_id: i32) -> AppResult<Vec<OpenLoan>>;
        async fn get_user_by_id(&mut self, id: i32) -> AppResult<Option<User>>;
        async fn get_user_by_email(&mut self, email: &str) -> AppResult<Option<User>>;
        async fn create_user(&mut self, user: &NewUser) -> AppResult<User>;
        async fn rotate_nonce(&mut self, user_id: i32, current: &str, next: &str) -> AppResult<u64>;
    }

    #[async_trait]
    impl LedgerTransaction for Transaction {
        async fn commit(self: Box<Self>) -> AppResult<()>;
        async fn rollback(self: Box<Self>) -> AppResult<()>;
    }
}
