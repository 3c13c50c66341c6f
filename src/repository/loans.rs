//! Loan ledger queries for PostgreSQL

use sqlx::PgConnection;

use crate::{error::AppResult, models::loan::OpenLoan};

pub async fn has_open(conn: &mut PgConnection, user_id: i32, book_id: i32) -> AppResult<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM borrowed_books
            WHERE user_id = $1 AND book_id = $2 AND returned_at IS NULL
        )
        "#,
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(exists)
}

pub async fn count_open_for_book(conn: &mut PgConnection, book_id: i32) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM borrowed_books WHERE book_id = $1 AND returned_at IS NULL",
    )
    .bind(book_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

pub async fn insert(conn: &mut PgConnection, user_id: i32, book_id: i32) -> AppResult<()> {
    sqlx::query("INSERT INTO borrowed_books (user_id, book_id) VALUES ($1, $2)")
        .bind(user_id)
        .bind(book_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn close(conn: &mut PgConnection, user_id: i32, book_id: i32) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE borrowed_books
        SET returned_at = CURRENT_TIMESTAMP
        WHERE user_id = $1 AND book_id = $2 AND returned_at IS NULL
        "#,
    )
    .bind(user_id)
    .bind(book_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn list_open(conn: &mut PgConnection, user_id: i32) -> AppResult<Vec<OpenLoan>> {
    let loans = sqlx::query_as::<_, OpenLoan>(
        r#"
        SELECT b.id AS book_id, b.title, b.description, bb.borrowed_at
        FROM borrowed_books bb
        JOIN books b ON bb.book_id = b.id
        WHERE bb.user_id = $1 AND bb.returned_at IS NULL
        ORDER BY bb.borrowed_at
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(loans)
}
