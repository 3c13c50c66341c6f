//! In-process ledger
//!
//! Satisfies the same [`LedgerStore`] contract as the PostgreSQL binding. A
//! transaction holds the ledger's lock for its whole lifetime and works on a
//! private copy of the state, which replaces the shared state on commit and is
//! dropped on rollback. Transactions are therefore fully serialized.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::{AppError, AppResult},
    models::{
        author::{Author, CreateAuthor},
        book::{Book, BookDetails, UpdateBook},
        loan::{Loan, OpenLoan},
        user::{NewUser, User},
    },
};

use super::{LedgerStore, LedgerTransaction, Queries};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    books: BTreeMap<i32, Book>,
    authors: BTreeMap<i32, Author>,
    book_authors: Vec<(i32, i32)>,
    users: BTreeMap<i32, User>,
    loans: Vec<Loan>,
    sequences: Sequences,
}

/// Last id handed out per table; ids are never reused after a delete
#[derive(Debug, Clone, Copy, Default)]
struct Sequences {
    books: i32,
    authors: i32,
    users: i32,
}

fn next_id(last: &mut i32) -> AppResult<i32> {
    *last = last
        .checked_add(1)
        .ok_or_else(|| AppError::Internal("sequence exhausted".to_string()))?;
    Ok(*last)
}

impl MemoryState {
    fn details(&self, book: &Book) -> BookDetails {
        let mut authors: Vec<String> = self
            .book_authors
            .iter()
            .filter(|(book_id, _)| *book_id == book.id)
            .filter_map(|(_, author_id)| self.authors.get(author_id))
            .map(|author| author.name.clone())
            .collect();
        authors.sort();

        BookDetails {
            id: book.id,
            title: book.title.clone(),
            description: book.description.clone(),
            num_copy: book.num_copy,
            authors,
        }
    }

    fn open_loan_mut(&mut self, user_id: i32, book_id: i32) -> Option<&mut Loan> {
        self.loans
            .iter_mut()
            .find(|l| l.user_id == user_id && l.book_id == book_id && l.is_open())
    }
}

/// Ledger kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn connection(&self) -> AppResult<Box<dyn Queries>> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryHandle { guard, working: None }))
    }

    async fn begin(&self) -> AppResult<Box<dyn LedgerTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = Some(guard.clone());
        Ok(Box::new(MemoryHandle { guard, working }))
    }
}

/// Handle over the locked state; `working` is the transaction's private copy
struct MemoryHandle {
    guard: OwnedMutexGuard<MemoryState>,
    working: Option<MemoryState>,
}

impl MemoryHandle {
    fn state(&mut self) -> &mut MemoryState {
        match self.working.as_mut() {
            Some(working) => working,
            None => &mut *self.guard,
        }
    }
}

#[async_trait]
impl Queries for MemoryHandle {
    async fn create_book(
        &mut self,
        title: &str,
        description: &str,
        copies: i32,
    ) -> AppResult<i32> {
        if copies < 0 {
            return Err(AppError::Internal("check constraint violated: num_copy >= 0".to_string()));
        }
        let state = self.state();
        let id = next_id(&mut state.sequences.books)?;
        state.books.insert(
            id,
            Book {
                id,
                title: title.to_string(),
                description: description.to_string(),
                num_copy: copies,
            },
        );
        Ok(id)
    }

    async fn update_book(&mut self, id: i32, update: &UpdateBook) -> AppResult<u64> {
        if update.copies < 0 {
            return Err(AppError::Internal("check constraint violated: num_copy >= 0".to_string()));
        }
        match self.state().books.get_mut(&id) {
            Some(book) => {
                book.title = update.title.clone();
                book.description = update.description.clone();
                book.num_copy = update.copies;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_book(&mut self, id: i32) -> AppResult<u64> {
        let state = self.state();
        if state.books.remove(&id).is_none() {
            return Ok(0);
        }
        state.book_authors.retain(|(book_id, _)| *book_id != id);
        state.loans.retain(|l| l.book_id != id);
        Ok(1)
    }

    async fn get_book(&mut self, id: i32) -> AppResult<Option<BookDetails>> {
        let state = self.state();
        Ok(state.books.get(&id).map(|book| state.details(book)))
    }

    async fn list_books(&mut self) -> AppResult<Vec<BookDetails>> {
        let state = self.state();
        Ok(state.books.values().map(|book| state.details(book)).collect())
    }

    async fn lock_book_copies(&mut self, id: i32) -> AppResult<Option<i32>> {
        Ok(self.state().books.get(&id).map(|book| book.num_copy))
    }

    async fn decrement_copies(&mut self, id: i32) -> AppResult<u64> {
        match self.state().books.get_mut(&id) {
            Some(book) if book.num_copy > 0 => {
                book.num_copy -= 1;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn increment_copies(&mut self, id: i32) -> AppResult<u64> {
        match self.state().books.get_mut(&id) {
            Some(book) => {
                book.num_copy = book
                    .num_copy
                    .checked_add(1)
                    .ok_or_else(|| AppError::Internal("integer out of range: num_copy".to_string()))?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn add_author(&mut self, author: &CreateAuthor) -> AppResult<i32> {
        let state = self.state();
        let id = next_id(&mut state.sequences.authors)?;
        state.authors.insert(
            id,
            Author {
                id,
                name: author.name.clone(),
                bio: author.bio.clone(),
            },
        );
        Ok(id)
    }

    async fn add_book_author(&mut self, book_id: i32, author_id: i32) -> AppResult<()> {
        let state = self.state();
        if !state.books.contains_key(&book_id) || !state.authors.contains_key(&author_id) {
            return Err(AppError::Internal("foreign key violation on book_authors".to_string()));
        }
        state.book_authors.push((book_id, author_id));
        Ok(())
    }

    async fn has_open_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<bool> {
        Ok(self.state().open_loan_mut(user_id, book_id).is_some())
    }

    async fn count_open_loans_for_book(&mut self, book_id: i32) -> AppResult<i64> {
        let count = self
            .state()
            .loans
            .iter()
            .filter(|l| l.book_id == book_id && l.is_open())
            .count();
        Ok(count as i64)
    }

    async fn insert_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<()> {
        let state = self.state();
        if !state.users.contains_key(&user_id) || !state.books.contains_key(&book_id) {
            return Err(AppError::Internal("foreign key violation on borrowed_books".to_string()));
        }
        if state.open_loan_mut(user_id, book_id).is_some() {
            return Err(AppError::Internal("unique violation on open loan".to_string()));
        }
        state.loans.push(Loan {
            user_id,
            book_id,
            borrowed_at: Utc::now(),
            returned_at: None,
        });
        Ok(())
    }

    async fn close_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<u64> {
        match self.state().open_loan_mut(user_id, book_id) {
            Some(loan) => {
                loan.returned_at = Some(Utc::now());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn list_open_loans(&mut self, user_id: i32) -> AppResult<Vec<OpenLoan>> {
        let state = self.state();
        let loans = state
            .loans
            .iter()
            .filter(|l| l.user_id == user_id && l.is_open())
            .filter_map(|l| {
                state.books.get(&l.book_id).map(|book| OpenLoan {
                    book_id: book.id,
                    title: book.title.clone(),
                    description: book.description.clone(),
                    borrowed_at: l.borrowed_at,
                })
            })
            .collect();
        Ok(loans)
    }

    async fn get_user_by_id(&mut self, id: i32) -> AppResult<Option<User>> {
        Ok(self.state().users.get(&id).cloned())
    }

    async fn get_user_by_email(&mut self, email: &str) -> AppResult<Option<User>> {
        Ok(self.state().users.values().find(|u| u.email == email).cloned())
    }

    async fn create_user(&mut self, user: &NewUser) -> AppResult<User> {
        let state = self.state();
        if state.users.values().any(|u| u.email == user.email) {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }
        let id = next_id(&mut state.sequences.users)?;
        let created = User {
            id,
            name: Some(user.name.clone()),
            email: user.email.clone(),
            role: user.role,
            password_hash: user.password_hash.clone(),
            nonce: user.nonce.clone(),
            address: user.address.clone(),
        };
        state.users.insert(id, created.clone());
        Ok(created)
    }

    async fn rotate_nonce(&mut self, user_id: i32, current: &str, next: &str) -> AppResult<u64> {
        match self.state().users.get_mut(&user_id) {
            Some(user) if user.nonce == current => {
                user.nonce = next.to_string();
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[async_trait]
impl LedgerTransaction for MemoryHandle {
    async fn commit(self: Box<Self>) -> AppResult<()> {
        let mut handle = *self;
        if let Some(working) = handle.working.take() {
            *handle.guard = working;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}
