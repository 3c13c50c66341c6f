//! Data models for Bookshelf

pub mod author;
pub mod book;
pub mod loan;
pub mod user;

// Re-export commonly used types
pub use author::Author;
pub use book::{Book, BookDetails};
pub use loan::{Loan, OpenLoan};
pub use user::{Role, User, UserClaims};
