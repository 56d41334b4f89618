//! HTTP server: axum router and request handlers.
//!
//! Handlers compose the guards explicitly and delegate to the engine
//! modules; no business rule lives in this file. Errors bubble as
//! [`JuryError`] and are mapped to JSON responses at the boundary.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{self, Caller, CredentialScheme, SessionStore};
use crate::catalog::{self, CategoryTasks, TaskDetail};
use crate::config::JuryConfig;
use crate::error::JuryError;
use crate::guards;
use crate::ledger::{self, SubmitOutcome};
use crate::scoreboard::{self, ScoreboardRow};
use crate::storage::{Account, Category, NewAccount, NewTask, Store, Task, TaskPatch};

/// Shared state threaded into every handler. Built once at startup.
pub struct AppState {
    pub config: JuryConfig,
    pub store: Arc<dyn Store>,
    pub sessions: SessionStore,
    pub credentials: Arc<dyn CredentialScheme>,
}

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Account as exposed over the API: everything but the credential.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub affiliation: String,
    pub is_admin: bool,
    pub is_hidden: bool,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
            email: account.email,
            affiliation: account.affiliation,
            is_admin: account.is_admin,
            is_hidden: account.is_hidden,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub affiliation: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub account: AccountView,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub flag: String,
}

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    pub category: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hint: String,
    pub score: i64,
    pub flag: String,
    #[serde(default)]
    pub attachment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskUpdateRequest {
    pub category: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hint: String,
    pub score: i64,
    /// Absent or empty keeps the current secret.
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub attachment: Option<String>,
}

// ============================================================================
// HELPERS
// ============================================================================

async fn caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, JuryError> {
    auth::resolve_caller(state.store.as_ref(), &state.sessions, headers).await
}

/// Submitter network origin, for the ledger's diagnostic column. Honors
/// `X-Forwarded-For` when the server sits behind a proxy.
fn request_origin(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

// ============================================================================
// SESSION HANDLERS
// ============================================================================

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<SessionResponse>, JuryError> {
    if req.username.is_empty() {
        return Err(JuryError::BadRequest("empty_user"));
    }
    if req.email.is_empty() || req.password.is_empty() {
        return Err(JuryError::BadRequest("bad_request"));
    }

    let store = state.store.as_ref();
    guards::require_registration_open(store, &state.config).await?;

    if store.account_by_username(&req.username).await?.is_some() {
        return Err(JuryError::BadRequest("already_registered"));
    }

    // The first registrant becomes the bootstrap admin and stays off the
    // public scoreboard.
    let first = store.account_count().await? == 0;
    let account = store
        .create_account(NewAccount {
            username: req.username,
            email: req.email,
            affiliation: req.affiliation,
            credential: state.credentials.derive(&req.password),
            is_admin: first,
            is_hidden: first,
        })
        .await?;
    info!(account_id = account.id, username = %account.username, admin = first, "account registered");

    let token = state.sessions.issue(account.id);
    Ok(Json(SessionResponse {
        token,
        account: account.into(),
    }))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, JuryError> {
    let account = state
        .store
        .account_by_email(&req.email)
        .await?
        .ok_or(JuryError::Unauthenticated)?;
    if !state.credentials.verify(&account.credential, &req.password) {
        return Err(JuryError::Unauthenticated);
    }
    let token = state.sessions.issue(account.id);
    Ok(Json(SessionResponse {
        token,
        account: account.into(),
    }))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, JuryError> {
    let resolved = caller(&state, &headers).await?;
    guards::require_user(&resolved)?;
    if let Some(token) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        state.sessions.revoke(token.trim());
    }
    Ok(Json(json!({ "ok": true })))
}

// ============================================================================
// PARTICIPANT HANDLERS
// ============================================================================

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<CategoryTasks>>, JuryError> {
    let resolved = caller(&state, &headers).await?;
    let account = guards::require_user(&resolved)?;
    guards::require_started(state.store.as_ref(), &state.config, account).await?;
    let grid = catalog::task_grid(state.store.as_ref(), account.id).await?;
    Ok(Json(grid))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<TaskDetail>, JuryError> {
    let resolved = caller(&state, &headers).await?;
    let account = guards::require_user(&resolved)?;
    guards::require_started(state.store.as_ref(), &state.config, account).await?;
    let detail = catalog::task_detail(state.store.as_ref(), account.id, task_id).await?;
    Ok(Json(detail))
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitOutcome>, JuryError> {
    let resolved = caller(&state, &headers).await?;
    let account = guards::require_user(&resolved)?;
    guards::require_started(state.store.as_ref(), &state.config, account).await?;

    let origin = request_origin(&headers, peer.map(|ConnectInfo(addr)| addr));
    let outcome = ledger::submit_flag(
        state.store.as_ref(),
        account.id,
        task_id,
        &req.flag,
        &origin,
        Utc::now().timestamp_millis(),
    )
    .await?;
    Ok(Json(outcome))
}

async fn get_scoreboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ScoreboardRow>>, JuryError> {
    let resolved = caller(&state, &headers).await?;
    let account = guards::require_user(&resolved)?;
    guards::require_started(state.store.as_ref(), &state.config, account).await?;
    let rows = scoreboard::compute_scoreboard(state.store.as_ref()).await?;
    Ok(Json(rows))
}

/// Unauthenticated machine-readable scoreboard for external leaderboards.
async fn public_scoreboard(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ScoreboardRow>>, JuryError> {
    let rows = scoreboard::compute_scoreboard(state.store.as_ref()).await?;
    Ok(Json(rows))
}

// ============================================================================
// ADMIN HANDLERS
// ============================================================================

async fn create_category(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CategoryRequest>,
) -> Result<Json<Category>, JuryError> {
    let resolved = caller(&state, &headers).await?;
    guards::require_admin(&resolved)?;
    if req.name.is_empty() {
        return Err(JuryError::BadRequest("bad_request"));
    }
    let category = state.store.create_category(&req.name).await?;
    Ok(Json(category))
}

async fn rename_category(
    State(state): State<Arc<AppState>>,
    Path(category_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<CategoryRequest>,
) -> Result<Json<serde_json::Value>, JuryError> {
    let resolved = caller(&state, &headers).await?;
    guards::require_admin(&resolved)?;
    if req.name.is_empty() {
        return Err(JuryError::BadRequest("bad_request"));
    }
    state.store.rename_category(category_id, &req.name).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn delete_category(
    State(state): State<Arc<AppState>>,
    Path(category_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, JuryError> {
    let resolved = caller(&state, &headers).await?;
    guards::require_admin(&resolved)?;
    state.store.delete_category(category_id).await?;
    Ok(Json(json!({ "ok": true })))
}

fn validate_task_fields(name: &str, score: i64) -> Result<(), JuryError> {
    if name.is_empty() {
        return Err(JuryError::BadRequest("bad_request"));
    }
    if score < 0 {
        return Err(JuryError::BadRequest("bad_request"));
    }
    Ok(())
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<TaskRequest>,
) -> Result<Json<Task>, JuryError> {
    let resolved = caller(&state, &headers).await?;
    guards::require_admin(&resolved)?;
    validate_task_fields(&req.name, req.score)?;
    if req.flag.is_empty() {
        return Err(JuryError::BadRequest("bad_request"));
    }
    let task = state
        .store
        .create_task(NewTask {
            category: req.category,
            name: req.name,
            description: req.description,
            hint: req.hint,
            score: req.score,
            flag: req.flag,
            attachment: req.attachment,
        })
        .await?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<TaskUpdateRequest>,
) -> Result<Json<serde_json::Value>, JuryError> {
    let resolved = caller(&state, &headers).await?;
    guards::require_admin(&resolved)?;
    validate_task_fields(&req.name, req.score)?;
    if state.store.task_by_id(task_id).await?.is_none() {
        return Err(JuryError::TaskNotFound);
    }
    state
        .store
        .update_task(
            task_id,
            TaskPatch {
                category: req.category,
                name: req.name,
                description: req.description,
                hint: req.hint,
                score: req.score,
                flag: req.flag.filter(|flag| !flag.is_empty()),
                attachment: req.attachment,
            },
        )
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, JuryError> {
    let resolved = caller(&state, &headers).await?;
    guards::require_admin(&resolved)?;
    if state.store.task_by_id(task_id).await?.is_none() {
        return Err(JuryError::TaskNotFound);
    }
    state.store.delete_task(task_id).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn list_accounts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AccountView>>, JuryError> {
    let resolved = caller(&state, &headers).await?;
    guards::require_admin(&resolved)?;
    let accounts = state.store.all_accounts().await?;
    Ok(Json(accounts.into_iter().map(AccountView::from).collect()))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// ROUTER & STARTUP
// ============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/submit", post(submit))
        .route("/api/scoreboard", get(get_scoreboard))
        .route("/scoreboard.json", get(public_scoreboard))
        .route("/api/admin/categories", post(create_category))
        .route(
            "/api/admin/categories/:id",
            put(rename_category).delete(delete_category),
        )
        .route("/api/admin/tasks", post(create_task))
        .route("/api/admin/tasks/:id", put(update_task).delete(delete_task))
        .route("/api/admin/accounts", get(list_accounts))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("jury server listening on {addr}");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
