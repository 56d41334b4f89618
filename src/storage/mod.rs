//! Data persistence layer.
//!
//! The engine talks to storage through the [`Store`] trait; two backends are
//! shipped, SQLite for single-node deployments and tests, PostgreSQL for
//! server deployments. The one contract both must honor to the letter:
//! [`Store::insert_submission`] is guarded by a uniqueness constraint on
//! `(user_id, task_id)` and reports whether the row was actually inserted.
//! That constraint, not any prior existence check, is the arbiter of credit
//! under concurrent duplicate submissions.

mod pg;
mod sqlite;

pub use pg::PgStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("referential violation: {0}")]
    ReferentialViolation(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StorageError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        StorageError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// RECORDS
// ============================================================================

/// Registered account. The credential is opaque to the engine; only the
/// [`crate::auth::CredentialScheme`] capability ever interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub affiliation: String,
    pub credential: String,
    pub is_admin: bool,
    pub is_hidden: bool,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub affiliation: String,
    pub credential: String,
    pub is_admin: bool,
    pub is_hidden: bool,
}

/// Task category. Purely organizational; ordering is insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// Challenge task. The flag is the secret; it never leaves the engine
/// except through admin-facing storage access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub category: i64,
    pub name: String,
    pub description: String,
    pub hint: String,
    pub score: i64,
    pub flag: String,
    pub attachment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub category: i64,
    pub name: String,
    pub description: String,
    pub hint: String,
    pub score: i64,
    pub flag: String,
    pub attachment: Option<String>,
}

/// Admin edit of a task. `flag: None` keeps the existing secret, and a
/// missing attachment keeps the existing reference.
#[derive(Debug, Clone)]
pub struct TaskPatch {
    pub category: i64,
    pub name: String,
    pub description: String,
    pub hint: String,
    pub score: i64,
    pub flag: Option<String>,
    pub attachment: Option<String>,
}

/// Ledger entry: user `user_id` has been credited for task `task_id`.
///
/// `score` is the task's score at submission time; later task edits do not
/// touch it. `origin` is diagnostic only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub task_id: i64,
    pub user_id: i64,
    pub score: i64,
    pub timestamp_ms: i64,
    pub origin: String,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

#[async_trait]
pub trait Store: Send + Sync {
    // ==================== Accounts ====================

    async fn create_account(&self, account: NewAccount) -> Result<Account>;
    async fn account_by_id(&self, id: i64) -> Result<Option<Account>>;
    async fn account_by_email(&self, email: &str) -> Result<Option<Account>>;
    async fn account_by_username(&self, username: &str) -> Result<Option<Account>>;
    /// Total number of accounts, hidden included. Feeds the clock gate.
    async fn account_count(&self) -> Result<i64>;
    /// Accounts with `is_hidden == false`; the denominator for completion
    /// percentages.
    async fn active_account_count(&self) -> Result<i64>;
    /// Non-hidden accounts, the scoreboard population.
    async fn visible_accounts(&self) -> Result<Vec<Account>>;
    async fn all_accounts(&self) -> Result<Vec<Account>>;

    // ==================== Categories ====================

    async fn create_category(&self, name: &str) -> Result<Category>;
    async fn rename_category(&self, id: i64, name: &str) -> Result<()>;
    /// Fails with [`StorageError::ReferentialViolation`] while tasks still
    /// reference the category.
    async fn delete_category(&self, id: i64) -> Result<()>;
    /// All categories in insertion order.
    async fn categories(&self) -> Result<Vec<Category>>;
    async fn category_by_id(&self, id: i64) -> Result<Option<Category>>;

    // ==================== Tasks ====================

    async fn create_task(&self, task: NewTask) -> Result<Task>;
    async fn update_task(&self, id: i64, patch: TaskPatch) -> Result<()>;
    async fn delete_task(&self, id: i64) -> Result<()>;
    async fn task_by_id(&self, id: i64) -> Result<Option<Task>>;
    /// All tasks ordered by category, then ascending score, then insertion
    /// order.
    async fn tasks(&self) -> Result<Vec<Task>>;

    // ==================== Submission ledger ====================

    /// Insert a ledger entry under the `(user_id, task_id)` uniqueness
    /// constraint. Returns `true` iff the row was inserted; a duplicate is a
    /// quiet `false`, never an error.
    async fn insert_submission(&self, submission: &Submission) -> Result<bool>;
    async fn has_submission(&self, user_id: i64, task_id: i64) -> Result<bool>;
    /// Task ids the user has been credited for.
    async fn solved_task_ids(&self, user_id: i64) -> Result<Vec<i64>>;
    async fn submissions(&self) -> Result<Vec<Submission>>;
    /// Credit count per task id. Tasks nobody solved are absent.
    async fn completion_counts(&self) -> Result<HashMap<i64, i64>>;
    async fn solve_count(&self, task_id: i64) -> Result<i64>;
}
