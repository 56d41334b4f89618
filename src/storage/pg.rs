//! PostgreSQL storage backend.
//!
//! Pooled connections via deadpool; schema is applied idempotently at
//! startup. `INSERT ... ON CONFLICT DO NOTHING` on the submission table's
//! composite primary key is the uniqueness arbiter for crediting.

use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::error::SqlState;
use tokio_postgres::NoTls;
use tracing::info;

use super::{
    Account, Category, NewAccount, NewTask, Result, StorageError, Store, Submission, Task,
    TaskPatch,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id BIGSERIAL PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL,
    affiliation TEXT NOT NULL,
    credential TEXT NOT NULL,
    is_admin BOOLEAN NOT NULL DEFAULT FALSE,
    is_hidden BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS categories (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id BIGSERIAL PRIMARY KEY,
    category BIGINT NOT NULL REFERENCES categories(id),
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    hint TEXT NOT NULL,
    score BIGINT NOT NULL,
    flag TEXT NOT NULL,
    attachment TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_category ON tasks(category);

-- The ledger. No foreign keys: entries are immutable history and must
-- survive task deletion with their score snapshot intact.
CREATE TABLE IF NOT EXISTS submissions (
    task_id BIGINT NOT NULL,
    user_id BIGINT NOT NULL,
    score BIGINT NOT NULL,
    submitted_at BIGINT NOT NULL,
    origin TEXT NOT NULL,
    PRIMARY KEY (user_id, task_id)
);

CREATE INDEX IF NOT EXISTS idx_submissions_task ON submissions(task_id);
"#;

pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Connect and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut config = Config::new();
        config.url = Some(database_url.to_string());
        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let client = pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        info!("PostgreSQL storage initialized");

        Ok(Self { pool })
    }
}

fn map_constraint(err: tokio_postgres::Error, what: &str) -> StorageError {
    if err.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION) {
        StorageError::ReferentialViolation(what.to_string())
    } else {
        StorageError::from(err)
    }
}

fn account_from_row(row: &tokio_postgres::Row) -> Account {
    Account {
        id: row.get(0),
        username: row.get(1),
        email: row.get(2),
        affiliation: row.get(3),
        credential: row.get(4),
        is_admin: row.get(5),
        is_hidden: row.get(6),
    }
}

fn task_from_row(row: &tokio_postgres::Row) -> Task {
    Task {
        id: row.get(0),
        category: row.get(1),
        name: row.get(2),
        description: row.get(3),
        hint: row.get(4),
        score: row.get(5),
        flag: row.get(6),
        attachment: row.get(7),
    }
}

#[async_trait]
impl Store for PgStore {
    // ==================== Accounts ====================

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO accounts (username, email, affiliation, credential, is_admin, is_hidden)
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
                &[
                    &account.username,
                    &account.email,
                    &account.affiliation,
                    &account.credential,
                    &account.is_admin,
                    &account.is_hidden,
                ],
            )
            .await?;
        Ok(Account {
            id: row.get(0),
            username: account.username,
            email: account.email,
            affiliation: account.affiliation,
            credential: account.credential,
            is_admin: account.is_admin,
            is_hidden: account.is_hidden,
        })
    }

    async fn account_by_id(&self, id: i64) -> Result<Option<Account>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, username, email, affiliation, credential, is_admin, is_hidden
                 FROM accounts WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, username, email, affiliation, credential, is_admin, is_hidden
                 FROM accounts WHERE email = $1",
                &[&email],
            )
            .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, username, email, affiliation, credential, is_admin, is_hidden
                 FROM accounts WHERE username = $1",
                &[&username],
            )
            .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn account_count(&self) -> Result<i64> {
        let client = self.pool.get().await?;
        let row = client.query_one("SELECT COUNT(*) FROM accounts", &[]).await?;
        Ok(row.get(0))
    }

    async fn active_account_count(&self) -> Result<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM accounts WHERE NOT is_hidden", &[])
            .await?;
        Ok(row.get(0))
    }

    async fn visible_accounts(&self) -> Result<Vec<Account>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, username, email, affiliation, credential, is_admin, is_hidden
                 FROM accounts WHERE NOT is_hidden ORDER BY id",
                &[],
            )
            .await?;
        Ok(rows.iter().map(account_from_row).collect())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, username, email, affiliation, credential, is_admin, is_hidden
                 FROM accounts ORDER BY id",
                &[],
            )
            .await?;
        Ok(rows.iter().map(account_from_row).collect())
    }

    // ==================== Categories ====================

    async fn create_category(&self, name: &str) -> Result<Category> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO categories (name) VALUES ($1) RETURNING id",
                &[&name],
            )
            .await?;
        Ok(Category {
            id: row.get(0),
            name: name.to_string(),
        })
    }

    async fn rename_category(&self, id: i64, name: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute("UPDATE categories SET name = $1 WHERE id = $2", &[&name, &id])
            .await?;
        Ok(())
    }

    async fn delete_category(&self, id: i64) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM categories WHERE id = $1", &[&id])
            .await
            .map_err(|e| map_constraint(e, "tasks still reference this category"))?;
        Ok(())
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT id, name FROM categories ORDER BY id", &[])
            .await?;
        Ok(rows
            .iter()
            .map(|row| Category {
                id: row.get(0),
                name: row.get(1),
            })
            .collect())
    }

    async fn category_by_id(&self, id: i64) -> Result<Option<Category>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT id, name FROM categories WHERE id = $1", &[&id])
            .await?;
        Ok(row.map(|row| Category {
            id: row.get(0),
            name: row.get(1),
        }))
    }

    // ==================== Tasks ====================

    async fn create_task(&self, task: NewTask) -> Result<Task> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO tasks (category, name, description, hint, score, flag, attachment)
                 VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
                &[
                    &task.category,
                    &task.name,
                    &task.description,
                    &task.hint,
                    &task.score,
                    &task.flag,
                    &task.attachment,
                ],
            )
            .await
            .map_err(|e| map_constraint(e, "task references a missing category"))?;
        Ok(Task {
            id: row.get(0),
            category: task.category,
            name: task.name,
            description: task.description,
            hint: task.hint,
            score: task.score,
            flag: task.flag,
            attachment: task.attachment,
        })
    }

    async fn update_task(&self, id: i64, patch: TaskPatch) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE tasks SET category = $1, name = $2, description = $3, hint = $4,
                        score = $5, flag = COALESCE($6, flag),
                        attachment = COALESCE($7, attachment)
                 WHERE id = $8",
                &[
                    &patch.category,
                    &patch.name,
                    &patch.description,
                    &patch.hint,
                    &patch.score,
                    &patch.flag,
                    &patch.attachment,
                    &id,
                ],
            )
            .await
            .map_err(|e| map_constraint(e, "task references a missing category"))?;
        Ok(())
    }

    async fn delete_task(&self, id: i64) -> Result<()> {
        let client = self.pool.get().await?;
        client.execute("DELETE FROM tasks WHERE id = $1", &[&id]).await?;
        Ok(())
    }

    async fn task_by_id(&self, id: i64) -> Result<Option<Task>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, category, name, description, hint, score, flag, attachment
                 FROM tasks WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(task_from_row))
    }

    async fn tasks(&self) -> Result<Vec<Task>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, category, name, description, hint, score, flag, attachment
                 FROM tasks ORDER BY category, score, id",
                &[],
            )
            .await?;
        Ok(rows.iter().map(task_from_row).collect())
    }

    // ==================== Submission ledger ====================

    async fn insert_submission(&self, submission: &Submission) -> Result<bool> {
        let client = self.pool.get().await?;
        // ON CONFLICT DO NOTHING against the (user_id, task_id) primary key
        // is the arbiter: of two racing duplicates exactly one reports a row.
        let inserted = client
            .execute(
                "INSERT INTO submissions (task_id, user_id, score, submitted_at, origin)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (user_id, task_id) DO NOTHING",
                &[
                    &submission.task_id,
                    &submission.user_id,
                    &submission.score,
                    &submission.timestamp_ms,
                    &submission.origin,
                ],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn has_submission(&self, user_id: i64, task_id: i64) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM submissions WHERE user_id = $1 AND task_id = $2",
                &[&user_id, &task_id],
            )
            .await?;
        let count: i64 = row.get(0);
        Ok(count > 0)
    }

    async fn solved_task_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT task_id FROM submissions WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn submissions(&self) -> Result<Vec<Submission>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT task_id, user_id, score, submitted_at, origin FROM submissions
                 ORDER BY submitted_at",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| Submission {
                task_id: row.get(0),
                user_id: row.get(1),
                score: row.get(2),
                timestamp_ms: row.get(3),
                origin: row.get(4),
            })
            .collect())
    }

    async fn completion_counts(&self) -> Result<HashMap<i64, i64>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT task_id, COUNT(*) FROM submissions GROUP BY task_id",
                &[],
            )
            .await?;
        Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
    }

    async fn solve_count(&self, task_id: i64) -> Result<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM submissions WHERE task_id = $1",
                &[&task_id],
            )
            .await?;
        Ok(row.get(0))
    }
}
