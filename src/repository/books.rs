//! Book and author queries for PostgreSQL

use sqlx::{PgConnection, Row};

use crate::{
    error::AppResult,
    models::{
        author::CreateAuthor,
        book::{BookDetails, UpdateBook},
    },
};

const BOOK_DETAILS_SELECT: &str = r#"
    SELECT b.id, b.title, b.description, b.num_copy,
           COALESCE(
               ARRAY_AGG(a.name ORDER BY a.name) FILTER (WHERE a.id IS NOT NULL),
               '{}'
           ) AS authors
    FROM books b
    LEFT JOIN book_authors ba ON ba.book_id = b.id
    LEFT JOIN authors a ON a.id = ba.author_id
"#;

fn details_from_row(row: &sqlx::postgres::PgRow) -> BookDetails {
    BookDetails {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        num_copy: row.get("num_copy"),
        authors: row.get("authors"),
    }
}

pub async fn create(
    conn: &mut PgConnection,
    title: &str,
    description: &str,
    copies: i32,
) -> AppResult<i32> {
    let id = sqlx::query_scalar::<_, i32>(
        "INSERT INTO books (title, description, num_copy) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(title)
    .bind(description)
    .bind(copies)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

pub async fn update(conn: &mut PgConnection, id: i32, book: &UpdateBook) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE books SET title = $2, description = $3, num_copy = $4 WHERE id = $1",
    )
    .bind(id)
    .bind(&book.title)
    .bind(&book.description)
    .bind(book.copies)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn delete(conn: &mut PgConnection, id: i32) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM books WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

pub async fn get_by_id(conn: &mut PgConnection, id: i32) -> AppResult<Option<BookDetails>> {
    let row = sqlx::query(&format!(
        "{} WHERE b.id = $1 GROUP BY b.id",
        BOOK_DETAILS_SELECT
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.as_ref().map(details_from_row))
}

pub async fn list(conn: &mut PgConnection) -> AppResult<Vec<BookDetails>> {
    let rows = sqlx::query(&format!(
        "{} GROUP BY b.id ORDER BY b.id",
        BOOK_DETAILS_SELECT
    ))
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.iter().map(details_from_row).collect())
}

/// `FOR UPDATE` serializes every transaction touching this book row
pub async fn lock_copies(conn: &mut PgConnection, id: i32) -> AppResult<Option<i32>> {
    let copies = sqlx::query_scalar::<_, i32>(
        "SELECT num_copy FROM books WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(copies)
}

pub async fn decrement_copies(conn: &mut PgConnection, id: i32) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE books SET num_copy = num_copy - 1 WHERE id = $1 AND num_copy > 0",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn increment_copies(conn: &mut PgConnection, id: i32) -> AppResult<u64> {
    let result = sqlx::query("UPDATE books SET num_copy = num_copy + 1 WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

pub async fn add_author(conn: &mut PgConnection, author: &CreateAuthor) -> AppResult<i32> {
    let id = sqlx::query_scalar::<_, i32>(
        "INSERT INTO authors (name, bio) VALUES ($1, $2) RETURNING id",
    )
    .bind(&author.name)
    .bind(&author.bio)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

pub async fn add_book_author(conn: &mut PgConnection, book_id: i32, author_id: i32) -> AppResult<()> {
    sqlx::query("INSERT INTO book_authors (book_id, author_id) VALUES ($1, $2)")
        .bind(book_id)
        .bind(author_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}
