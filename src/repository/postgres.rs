//! PostgreSQL ledger binding

use std::ops::DerefMut;

use async_trait::async_trait;
use sqlx::{PgConnection, Pool, Postgres, Transaction};

use crate::{
    error::AppResult,
    models::{
        author::CreateAuthor,
        book::{BookDetails, UpdateBook},
        loan::OpenLoan,
        user::{NewUser, User},
    },
};

use super::{books, loans, users, LedgerStore, LedgerTransaction, Queries};

/// Ledger store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgLedger {
    pool: Pool<Postgres>,
}

impl PgLedger {
    /// Create a new ledger with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn connection(&self) -> AppResult<Box<dyn Queries>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgHandle { conn }))
    }

    async fn begin(&self) -> AppResult<Box<dyn LedgerTransaction>> {
        let conn = self.pool.begin().await?;
        Ok(Box::new(PgHandle { conn }))
    }
}

/// Query handle over anything that dereferences to a connection: a pooled
/// connection for direct access, or an open transaction.
pub struct PgHandle<C> {
    conn: C,
}

impl<C> PgHandle<C>
where
    C: DerefMut<Target = PgConnection>,
{
    fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

#[async_trait]
impl<C> Queries for PgHandle<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn create_book(
        &mut self,
        title: &str,
        description: &str,
        copies: i32,
    ) -> AppResult<i32> {
        books::create(self.conn(), title, description, copies).await
    }

    async fn update_book(&mut self, id: i32, book: &UpdateBook) -> AppResult<u64> {
        books::update(self.conn(), id, book).await
    }

    async fn delete_book(&mut self, id: i32) -> AppResult<u64> {
        books::delete(self.conn(), id).await
    }

    async fn get_book(&mut self, id: i32) -> AppResult<Option<BookDetails>> {
        books::get_by_id(self.conn(), id).await
    }

    async fn list_books(&mut self) -> AppResult<Vec<BookDetails>> {
        books::list(self.conn()).await
    }

    async fn lock_book_copies(&mut self, id: i32) -> AppResult<Option<i32>> {
        books::lock_copies(self.conn(), id).await
    }

    async fn decrement_copies(&mut self, id: i32) -> AppResult<u64> {
        books::decrement_copies(self.conn(), id).await
    }

    async fn increment_copies(&mut self, id: i32) -> AppResult<u64> {
        books::increment_copies(self.conn(), id).await
    }

    async fn add_author(&mut self, author: &CreateAuthor) -> AppResult<i32> {
        books::add_author(self.conn(), author).await
    }

    async fn add_book_author(&mut self, book_id: i32, author_id: i32) -> AppResult<()> {
        books::add_book_author(self.conn(), book_id, author_id).await
    }

    async fn has_open_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<bool> {
        loans::has_open(self.conn(), user_id, book_id).await
    }

    async fn count_open_loans_for_book(&mut self, book_id: i32) -> AppResult<i64> {
        loans::count_open_for_book(self.conn(), book_id).await
    }

    async fn insert_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<()> {
        loans::insert(self.conn(), user_id, book_id).await
    }

    async fn close_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<u64> {
        loans::close(self.conn(), user_id, book_id).await
    }

    async fn list_open_loans(&mut self, user_id: i32) -> AppResult<Vec<OpenLoan>> {
        loans::list_open(self.conn(), user_id).await
    }

    async fn get_user_by_id(&mut self, id: i32) -> AppResult<Option<User>> {
        users::get_by_id(self.conn(), id).await
    }

    async fn get_user_by_email(&mut self, email: &str) -> AppResult<Option<User>> {
        users::get_by_email(self.conn(), email).await
    }

    async fn create_user(&mut self, user: &NewUser) -> AppResult<User> {
        users::create(self.conn(), user).await
    }

    async fn rotate_nonce(&mut self, user_id: i32, current: &str, next: &str) -> AppResult<u64> {
        users::rotate_nonce(self.conn(), user_id, current, next).await
    }
}

#[async_trait]
impl LedgerTransaction for PgHandle<Transaction<'static, Postgres>> {
    async fn commit(self: Box<Self>) -> AppResult<()> {
        let PgHandle { conn } = *self;
        conn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        let PgHandle { conn } = *self;
        conn.rollback().await?;
        Ok(())
    }
}
