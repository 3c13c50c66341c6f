//! User queries for PostgreSQL

use sqlx::PgConnection;

use crate::{
    error::{AppError, AppResult},
    models::user::{NewUser, User, UserRow},
};

const USER_COLUMNS: &str = "id, name, email, role, password_hash, nonce, address";

pub async fn get_by_id(conn: &mut PgConnection, id: i32) -> AppResult<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {} FROM users WHERE id = $1",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(User::from))
}

pub async fn get_by_email(conn: &mut PgConnection, email: &str) -> AppResult<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {} FROM users WHERE email = $1",
        USER_COLUMNS
    ))
    .bind(email)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(User::from))
}

pub async fn create(conn: &mut PgConnection, user: &NewUser) -> AppResult<User> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        r#"
        INSERT INTO users (name, email, role, password_hash, nonce, address)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(&user.name)
    .bind(&user.email)
    .bind(user.role.as_str())
    .bind(&user.password_hash)
    .bind(&user.nonce)
    .bind(&user.address)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::Conflict("Email already registered".to_string())
        }
        other => AppError::Database(other),
    })?;

    Ok(row.into())
}

pub async fn rotate_nonce(
    conn: &mut PgConnection,
    user_id: i32,
    current: &str,
    next: &str,
) -> AppResult<u64> {
    let result = sqlx::query("UPDATE users SET nonce = $3 WHERE id = $1 AND nonce = $2")
        .bind(user_id)
        .bind(current)
        .bind(next)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}
