//! End-to-end API tests against a live server on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use ctf_jury::auth::{SaltedSha256, SessionStore};
use ctf_jury::config::JuryConfig;
use ctf_jury::server::{self, AppState};
use ctf_jury::storage::SqliteStore;
use serde_json::{json, Value};

/// Spawn a jury server on an ephemeral port and return its base URL.
async fn spawn_server(start_time: Option<chrono::DateTime<Utc>>) -> String {
    let config = JuryConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        start_time,
        ..JuryConfig::default()
    };
    let state = Arc::new(AppState {
        config,
        store: Arc::new(SqliteStore::in_memory().unwrap()),
        sessions: SessionStore::new(),
        credentials: Arc::new(SaltedSha256),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::router(state).into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn register(client: &reqwest::Client, base: &str, username: &str) -> (String, Value) {
    let response = client
        .post(format!("{base}/api/register"))
        .json(&json!({
            "username": username,
            "email": format!("{username}@example.org"),
            "affiliation": format!("{username} team"),
            "password": "hunter2",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200, "register {username}");
    let body: Value = response.json().await.unwrap();
    (body["token"].as_str().unwrap().to_string(), body["account"].clone())
}

async fn create_task(
    client: &reqwest::Client,
    base: &str,
    admin_token: &str,
    category: i64,
    name: &str,
    score: i64,
    flag: &str,
) -> i64 {
    let response = client
        .post(format!("{base}/api/admin/tasks"))
        .bearer_auth(admin_token)
        .json(&json!({
            "category": category,
            "name": name,
            "description": format!("{name} description"),
            "hint": "try harder",
            "score": score,
            "flag": flag,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200, "create task {name}");
    let body: Value = response.json().await.unwrap();
    body["id"].as_i64().unwrap()
}

async fn submit(
    client: &reqwest::Client,
    base: &str,
    token: &str,
    task_id: i64,
    flag: &str,
) -> bool {
    let response = client
        .post(format!("{base}/api/tasks/{task_id}/submit"))
        .bearer_auth(token)
        .json(&json!({ "flag": flag }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    body["accepted"].as_bool().unwrap()
}

#[tokio::test]
async fn full_competition_flow() {
    let base = spawn_server(None).await;
    let client = reqwest::Client::new();

    // Bootstrap admin, then two participants.
    let (admin_token, admin) = register(&client, &base, "root").await;
    assert_eq!(admin["is_admin"], json!(true));
    assert_eq!(admin["is_hidden"], json!(true));
    let (alice_token, _) = register(&client, &base, "alice").await;
    let (bob_token, _) = register(&client, &base, "bob").await;

    // Admin builds the catalog.
    let response = client
        .post(format!("{base}/api/admin/categories"))
        .bearer_auth(&admin_token)
        .json(&json!({ "name": "web" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let category: Value = response.json().await.unwrap();
    let category_id = category["id"].as_i64().unwrap();

    let easy = create_task(&client, &base, &admin_token, category_id, "xss", 100, "FLAG{xss}").await;
    let hard = create_task(&client, &base, &admin_token, category_id, "sqli", 200, "FLAG{sqli}").await;

    // Wrong flag: flat refusal, no error.
    assert!(!submit(&client, &base, &alice_token, easy, "FLAG{nope}").await);
    // Right flag credits once, then goes idempotent.
    assert!(submit(&client, &base, &alice_token, easy, "FLAG{xss}").await);
    assert!(!submit(&client, &base, &alice_token, easy, "FLAG{xss}").await);

    // Bob sweeps both tasks.
    assert!(submit(&client, &base, &bob_token, easy, "FLAG{xss}").await);
    assert!(submit(&client, &base, &bob_token, hard, "FLAG{sqli}").await);

    // Task grid: ordered by score, percentages over the 2 active accounts.
    let response = client
        .get(format!("{base}/api/tasks"))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    let grid: Value = response.json().await.unwrap();
    let tasks = grid[0]["tasks"].as_array().unwrap();
    assert_eq!(tasks[0]["name"], json!("xss"));
    assert_eq!(tasks[1]["name"], json!("sqli"));
    // Both active users solved "xss": clamped below a full bar.
    assert_eq!(tasks[0]["percent_complete"], json!(99.99));
    assert_eq!(tasks[0]["is_complete"], json!(true));
    // Only bob solved "sqli": 50% and not complete for alice.
    assert_eq!(tasks[1]["percent_complete"], json!(50.0));
    assert_eq!(tasks[1]["is_complete"], json!(false));

    // Task detail carries the solve count.
    let response = client
        .get(format!("{base}/api/tasks/{easy}"))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    let detail: Value = response.json().await.unwrap();
    assert_eq!(detail["solves"], json!(2));
    assert_eq!(detail["category"]["name"], json!("web"));

    // Scoreboard: bob (300) over alice (100); the hidden admin is absent.
    let response = client
        .get(format!("{base}/api/scoreboard"))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    let rows: Value = response.json().await.unwrap();
    let names: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["bob", "alice"]);
    assert_eq!(rows[0]["score"], json!(300));
    assert_eq!(rows[1]["score"], json!(100));

    // The public feed needs no session and matches the ranked rows.
    let response = client
        .get(format!("{base}/scoreboard.json"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let public: Value = response.json().await.unwrap();
    assert_eq!(public, rows);

    // Secret flags never appear in participant-facing views.
    assert!(tasks[0].get("flag").is_none());
    assert!(detail.get("flag").is_none());
}

#[tokio::test]
async fn score_edit_keeps_historical_credits() {
    let base = spawn_server(None).await;
    let client = reqwest::Client::new();

    let (admin_token, _) = register(&client, &base, "root").await;
    let (alice_token, _) = register(&client, &base, "alice").await;
    let (bob_token, _) = register(&client, &base, "bob").await;

    let response = client
        .post(format!("{base}/api/admin/categories"))
        .bearer_auth(&admin_token)
        .json(&json!({ "name": "pwn" }))
        .send()
        .await
        .unwrap();
    let category: Value = response.json().await.unwrap();
    let category_id = category["id"].as_i64().unwrap();
    let task = create_task(&client, &base, &admin_token, category_id, "heap", 100, "FLAG{heap}").await;

    assert!(submit(&client, &base, &alice_token, task, "FLAG{heap}").await);

    // Admin rewrites the score; the flag field is left empty so the secret
    // must survive the edit.
    let response = client
        .put(format!("{base}/api/admin/tasks/{task}"))
        .bearer_auth(&admin_token)
        .json(&json!({
            "category": category_id,
            "name": "heap",
            "description": "heap description",
            "hint": "try harder",
            "score": 500,
            "flag": "",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Bob still solves with the original flag and earns the new score;
    // alice keeps her snapshot.
    assert!(submit(&client, &base, &bob_token, task, "FLAG{heap}").await);

    let response = client
        .get(format!("{base}/scoreboard.json"))
        .send()
        .await
        .unwrap();
    let rows: Value = response.json().await.unwrap();
    assert_eq!(rows[0]["username"], json!("bob"));
    assert_eq!(rows[0]["score"], json!(500));
    assert_eq!(rows[1]["username"], json!("alice"));
    assert_eq!(rows[1]["score"], json!(100));
}

#[tokio::test]
async fn gate_blocks_participants_until_start() {
    let base = spawn_server(Some(Utc::now() + Duration::hours(1))).await;
    let client = reqwest::Client::new();

    // Bootstrap admin gets in before the start.
    let (admin_token, _) = register(&client, &base, "root").await;

    // Further registration is refused while the gate is closed.
    let response = client
        .post(format!("{base}/api/register"))
        .json(&json!({
            "username": "alice",
            "email": "alice@example.org",
            "affiliation": "team",
            "password": "hunter2",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], json!("not_started"));
    assert!(body["starts_at"].is_string());

    // The admin still sees gated routes.
    let response = client
        .get(format!("{base}/api/tasks"))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn login_and_logout_lifecycle() {
    let base = spawn_server(None).await;
    let client = reqwest::Client::new();

    register(&client, &base, "root").await;
    let (token, _) = register(&client, &base, "alice").await;

    // A fresh login issues a distinct working token.
    let response = client
        .post(format!("{base}/api/login"))
        .json(&json!({ "email": "alice@example.org", "password": "hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let login_token = body["token"].as_str().unwrap().to_string();
    assert_ne!(login_token, token);

    // Wrong password is a 401.
    let response = client
        .post(format!("{base}/api/login"))
        .json(&json!({ "email": "alice@example.org", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Logout revokes the token it was called with.
    let response = client
        .post(format!("{base}/api/logout"))
        .bearer_auth(&login_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let response = client
        .get(format!("{base}/api/tasks"))
        .bearer_auth(&login_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // The registration token is untouched.
    let response = client
        .get(format!("{base}/api/tasks"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn admin_account_dump_hides_credentials() {
    let base = spawn_server(None).await;
    let client = reqwest::Client::new();

    let (admin_token, _) = register(&client, &base, "root").await;
    register(&client, &base, "alice").await;

    let response = client
        .get(format!("{base}/api/admin/accounts"))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let accounts: Value = response.json().await.unwrap();
    let accounts = accounts.as_array().unwrap();
    assert_eq!(accounts.len(), 2);
    for account in accounts {
        assert!(account.get("credential").is_none());
        assert!(account.get("password").is_none());
    }
}
