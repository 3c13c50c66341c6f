//! API integration tests against a running server
//!
//! The suite registers several accounts, so the server's `rate_limit.burst`
//! must be raised above the default and `auth.open_admin_registration` set
//! before running it.

use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";

fn unique_email(prefix: &str) -> String {
    format!("{}-{}@example.com", prefix, chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

/// Register an account and return (user id, token)
async fn register_and_login(client: &Client, role: &str) -> (i64, String) {
    let email = unique_email(role);
    let response = client
        .post(format!("{}/auth/register", BASE_URL))
        .json(&json!({
            "name": "Integration",
            "email": email,
            "password": "integration-pass",
            "role": role
        }))
        .send()
        .await
        .expect("Failed to send register request");
    assert_eq!(response.status(), 201);
    let user: Value = response.json().await.expect("Failed to parse register response");

    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({
            "email": email,
            "credential": "integration-pass"
        }))
        .send()
        .await
        .expect("Failed to send login request");
    let body: Value = response.json().await.expect("Failed to parse login response");

    (
        user["id"].as_i64().expect("No id in response"),
        body["token"].as_str().expect("No token in response").to_string(),
    )
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_login_unknown_email() {
    let client = Client::new();

    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({
            "email": "nobody@example.com",
            "credential": "wrong"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 404);
}

#[tokio::test]
#[ignore]
async fn test_get_current_user() {
    let client = Client::new();
    let (user_id, token) = register_and_login(&client, "user").await;

    let response = client
        .get(format!("{}/auth/me", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["id"], user_id);
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
#[ignore]
async fn test_borrow_and_return() {
    let client = Client::new();
    let (_, admin_token) = register_and_login(&client, "admin").await;
    let (user_id, token) = register_and_login(&client, "user").await;

    let response = client
        .post(format!("{}/books", BASE_URL))
        .bearer_auth(&admin_token)
        .json(&json!({
            "title": "Integration Book",
            "description": "Created by the API tests",
            "copies": 3,
            "authors": [{ "name": "Test Author" }]
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);
    let book: Value = response.json().await.expect("Failed to parse response");
    let book_id = book["id"].as_i64().expect("No book id");

    let response = client
        .post(format!("{}/users/{}/books/{}/borrow", BASE_URL, user_id, book_id))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["num_copy"], 2);

    let response = client
        .post(format!("{}/users/{}/books/{}/return", BASE_URL, user_id, book_id))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["num_copy"], 3);

    let response = client
        .delete(format!("{}/books/{}", BASE_URL, book_id))
        .bearer_auth(&admin_token)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 204);
}

#[tokio::test]
#[ignore]
async fn test_unauthorized_access() {
    let client = Client::new();

    let response = client
        .post(format!("{}/books", BASE_URL))
        .json(&json!({ "title": "Nope", "copies": 1 }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_borrows_against_database() {
    const READERS: usize = 8;
    const COPIES: i64 = 3;

    let client = Client::new();
    let (_, admin_token) = register_and_login(&client, "admin").await;

    let response = client
        .post(format!("{}/books", BASE_URL))
        .bearer_auth(&admin_token)
        .json(&json!({ "title": "Contended Book", "copies": COPIES }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);
    let book: Value = response.json().await.expect("Failed to parse response");
    let book_id = book["id"].as_i64().expect("No book id");

    let mut readers = Vec::with_capacity(READERS);
    for _ in 0..READERS {
        readers.push(register_and_login(&client, "user").await);
    }

    // every borrow goes out before any response is awaited
    let attempts = readers.iter().map(|(user_id, token)| {
        client
            .post(format!("{}/users/{}/books/{}/borrow", BASE_URL, user_id, book_id))
            .bearer_auth(token)
            .send()
    });
    let statuses: Vec<u16> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|response| response.expect("Failed to send request").status().as_u16())
        .collect();

    let lent = statuses.iter().filter(|&&status| status == 200).count();
    let refused = statuses.iter().filter(|&&status| status == 400).count();
    assert_eq!(lent, COPIES as usize);
    assert_eq!(refused, READERS - COPIES as usize);

    let response = client
        .get(format!("{}/books/{}", BASE_URL, book_id))
        .send()
        .await
        .expect("Failed to send request");
    let book: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(book["num_copy"], 0);
}
