//! In-process lending tests over the memory ledger

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;

use bookshelf_server::{
    api,
    config::{AppConfig, RateLimitConfig},
    models::{
        author::CreateAuthor,
        book::CreateBook,
        user::{CreateUser, NewUser, Role},
    },
    repository::{LedgerStore, MemoryLedger},
    services::Services,
    AppError, AppState,
};

fn new_book(copies: i32) -> CreateBook {
    CreateBook {
        title: "A Wizard of Earthsea".to_string(),
        description: "Roke".to_string(),
        copies,
        authors: vec![CreateAuthor {
            name: "Ursula K. Le Guin".to_string(),
            bio: String::new(),
        }],
    }
}

async fn seed_users(ledger: &MemoryLedger, count: usize) -> Vec<i32> {
    let mut conn = ledger.connection().await.unwrap();
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let user = conn
            .create_user(&NewUser {
                name: format!("Reader {}", i),
                email: format!("reader{}@example.com", i),
                role: Role::User,
                password_hash: String::new(),
                nonce: String::new(),
                address: None,
            })
            .await
            .unwrap();
        ids.push(user.id);
    }
    ids
}

/// Ten readers race for three copies; returns (borrowed, refused, left on shelf)
async fn borrow_race(config: AppConfig) -> (usize, usize, i32) {
    let ledger = Arc::new(MemoryLedger::new());
    let services = Services::new(ledger.clone(), &config);
    let users = seed_users(&ledger, 10).await;
    let book = services.lending.create_book(new_book(3)).await.unwrap();

    let book_id = book.id;
    let handles: Vec<_> = users
        .iter()
        .map(|&user_id| {
            let lending = services.lending.clone();
            tokio::spawn(async move { lending.borrow(user_id, book_id).await })
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let borrowed = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::Unavailable(_))))
        .count();
    let left = services.lending.get_book(book_id).await.unwrap().num_copy;
    (borrowed, refused, left)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_borrows_respect_copy_count() {
    assert_eq!(borrow_race(AppConfig::default()).await, (3, 7, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_borrows_with_serialized_mutations() {
    let mut config = AppConfig::default();
    config.lending.serialize_mutations = true;
    assert_eq!(borrow_race(config).await, (3, 7, 0));
}

#[tokio::test]
async fn test_copy_count_stays_in_bounds() {
    let ledger = Arc::new(MemoryLedger::new());
    let services = Services::new(ledger.clone(), &AppConfig::default());
    let users = seed_users(&ledger, 3).await;
    let book = services.lending.create_book(new_book(2)).await.unwrap();

    // borrow/return pattern that repeatedly hits both the empty shelf and missing loans
    let steps = [
        (0, true), (1, true), (2, true), (0, false), (2, true), (0, false),
        (1, false), (1, false), (2, false), (0, true), (1, true), (2, true),
    ];
    for (who, borrow) in steps {
        let user_id = users[who];
        let _ = if borrow {
            services.lending.borrow(user_id, book.id).await
        } else {
            services.lending.return_book(user_id, book.id).await
        };

        let on_shelf = services.lending.get_book(book.id).await.unwrap().num_copy;
        let mut on_loan = 0;
        for &id in &users {
            on_loan += services.lending.list_open_loans(id).await.unwrap().len() as i32;
        }
        assert!((0..=2).contains(&on_shelf));
        assert_eq!(on_shelf + on_loan, 2);
    }
}

#[tokio::test]
async fn test_failed_borrow_leaves_no_trace() {
    let ledger = Arc::new(MemoryLedger::new());
    let services = Services::new(ledger.clone(), &AppConfig::default());
    let users = seed_users(&ledger, 1).await;
    let book = services.lending.create_book(new_book(1)).await.unwrap();

    assert_ok!(services.lending.borrow(users[0], book.id).await);
    assert_err!(services.lending.borrow(users[0], book.id).await);

    assert_eq!(services.lending.get_book(book.id).await.unwrap().num_copy, 0);
    assert_eq!(services.lending.list_open_loans(users[0]).await.unwrap().len(), 1);
}

fn router(rate_limit: RateLimitConfig) -> Router {
    let mut config = AppConfig {
        rate_limit,
        ..AppConfig::default()
    };
    config.auth.open_admin_registration = true;
    router_with(config)
}

fn router_with(config: AppConfig) -> Router {
    let services = Services::new(Arc::new(MemoryLedger::new()), &config);
    api::create_router(AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    })
}

fn generous() -> RateLimitConfig {
    RateLimitConfig {
        rate_per_second: 1000,
        burst: 1000,
    }
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// Register through the API and log in, returning (user id, token)
async fn sign_up(app: &Router, email: &str, role: &str) -> (i64, String) {
    let (status, user) = call(
        app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            None,
            json!({ "name": "Tester", "email": email, "password": "password123", "role": role }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, login) = call(
        app,
        json_request(
            "POST",
            "/api/v1/auth/login",
            None,
            json!({ "email": email, "credential": "password123" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["token_type"], "Bearer");

    (
        user["id"].as_i64().unwrap(),
        login["token"].as_str().unwrap().to_string(),
    )
}

async fn create_book(app: &Router, admin_token: &str, copies: i32) -> i64 {
    let (status, book) = call(
        app,
        json_request(
            "POST",
            "/api/v1/books",
            Some(admin_token),
            json!({ "title": "Earthsea", "copies": copies, "authors": [{ "name": "Le Guin" }] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    book["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_register_login_borrow_return_scenario() {
    let app = router(generous());
    let (_, admin) = sign_up(&app, "admin@example.com", "admin").await;
    let (reader_id, reader) = sign_up(&app, "reader@example.com", "user").await;
    let book_id = create_book(&app, &admin, 3).await;

    let borrow = format!("/api/v1/users/{}/books/{}/borrow", reader_id, book_id);
    let (status, body) = call(&app, empty_request("POST", &borrow, Some(&reader))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["num_copy"], 2);

    let loans = format!("/api/v1/users/{}/books", reader_id);
    let (_, body) = call(&app, empty_request("GET", &loans, Some(&reader))).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let give_back = format!("/api/v1/users/{}/books/{}/return", reader_id, book_id);
    let (status, body) = call(&app, empty_request("POST", &give_back, Some(&reader))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["num_copy"], 3);

    let (_, body) = call(&app, empty_request("GET", &loans, Some(&reader))).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_gate_statuses() {
    let app = router(generous());
    let (_, admin) = sign_up(&app, "admin@example.com", "admin").await;
    let (reader_id, reader) = sign_up(&app, "reader@example.com", "user").await;
    let book = json!({ "title": "Tehanu", "copies": 1 });

    let (status, _) = call(&app, json_request("POST", "/api/v1/books", None, book.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &app,
        json_request("POST", "/api/v1/books", Some("not.a.token"), book.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &app,
        json_request("POST", "/api/v1/books", Some(&reader), book.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["code"].is_number());

    let (status, _) = call(&app, json_request("POST", "/api/v1/books", Some(&admin), book)).await;
    assert_eq!(status, StatusCode::CREATED);

    // acting on someone else's account
    let other = format!("/api/v1/users/{}/books", reader_id + 1);
    let (status, _) = call(&app, empty_request("GET", &other, Some(&reader))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, empty_request("GET", &other, Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_token_cookie_accepted() {
    let app = router(generous());
    let (reader_id, reader) = sign_up(&app, "reader@example.com", "user").await;

    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/auth/me")
        .header(header::COOKIE, format!("token={}", reader))
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], reader_id);
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn test_lending_error_statuses() {
    let app = router(generous());
    let (_, admin) = sign_up(&app, "admin@example.com", "admin").await;
    let (reader_id, reader) = sign_up(&app, "reader@example.com", "user").await;
    let empty_shelf = create_book(&app, &admin, 0).await;

    let missing = format!("/api/v1/users/{}/books/999/borrow", reader_id);
    let (status, _) = call(&app, empty_request("POST", &missing, Some(&reader))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let none_left = format!("/api/v1/users/{}/books/{}/borrow", reader_id, empty_shelf);
    let (status, _) = call(&app, empty_request("POST", &none_left, Some(&reader))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let not_held = format!("/api/v1/users/{}/books/{}/return", reader_id, empty_shelf);
    let (status, _) = call(&app, empty_request("POST", &not_held, Some(&reader))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            None,
            json!({ "name": "Again", "email": "reader@example.com", "password": "password123" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &app,
        json_request(
            "POST",
            "/api/v1/books",
            Some(&admin),
            json!({ "title": "Negative", "copies": -1 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rate_limit_rejects_after_burst() {
    let app = router(RateLimitConfig {
        rate_per_second: 20,
        burst: 1,
    });
    let nonce = |email: &str| {
        json_request("POST", "/api/v1/auth/nonce", None, json!({ "email": email }))
    };

    // a lookup of an unknown email still spends a token
    let (status, _) = call(&app, nonce("ghost@example.com")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, nonce("ghost@example.com")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    let (status, _) = call(&app, nonce("ghost@example.com")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reads_are_public() {
    let app = router(generous());
    let (_, admin) = sign_up(&app, "admin@example.com", "admin").await;
    let book_id = create_book(&app, &admin, 2).await;

    let (status, body) = call(&app, empty_request("GET", "/api/v1/books", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = call(
        &app,
        empty_request("GET", &format!("/api/v1/books/{}", book_id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authors"][0], "Le Guin");

    let (status, _) = call(&app, empty_request("GET", "/api/v1/ready", None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_registration_needs_admin_token() {
    let config = AppConfig {
        rate_limit: generous(),
        ..AppConfig::default()
    };
    let ledger = Arc::new(MemoryLedger::new());
    let services = Services::new(ledger, &config);
    // the first admin is provisioned out of band
    services
        .auth
        .register(CreateUser {
            name: "Root".to_string(),
            email: "root@example.com".to_string(),
            password: "password123".to_string(),
            role: Some(Role::Admin),
            address: None,
        })
        .await
        .unwrap();
    let app = api::create_router(AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    });

    let admin_signup = |email: &str, token: Option<&str>| {
        json_request(
            "POST",
            "/api/v1/auth/register",
            token,
            json!({ "name": "Mallory", "email": email, "password": "password123", "role": "admin" }),
        )
    };

    let (status, _) = call(&app, admin_signup("mallory@example.com", None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, reader) = sign_up(&app, "reader@example.com", "user").await;
    let (status, _) = call(&app, admin_signup("mallory@example.com", Some(&reader))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, login) = call(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/login",
            None,
            json!({ "email": "root@example.com", "credential": "password123" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let root = login["token"].as_str().unwrap().to_string();

    let (status, body) = call(&app, admin_signup("deputy@example.com", Some(&root))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["role"], "admin");
}

#[tokio::test]
async fn test_login_cookie_expires_with_token() {
    let app = router(generous());
    sign_up(&app, "reader@example.com", "user").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/login",
            None,
            json!({ "email": "reader@example.com", "credential": "password123" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Expires="));
}
