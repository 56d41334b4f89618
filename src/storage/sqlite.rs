//! SQLite storage backend.
//!
//! Single connection behind a mutex; fine for single-node deployments and
//! the default for tests via [`SqliteStore::in_memory`]. Foreign keys are
//! switched on per connection so category references are enforced here, not
//! in application code. The submission table's composite primary key is the
//! uniqueness arbiter for crediting.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::{
    Account, Category, NewAccount, NewTask, Result, StorageError, Store, Submission, Task,
    TaskPatch,
};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL,
    affiliation TEXT NOT NULL,
    credential TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0,
    is_hidden INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category INTEGER NOT NULL REFERENCES categories(id),
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    hint TEXT NOT NULL,
    score INTEGER NOT NULL,
    flag TEXT NOT NULL,
    attachment TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_category ON tasks(category);

-- The ledger. No foreign keys: entries are immutable history and must
-- survive task deletion with their score snapshot intact.
CREATE TABLE IF NOT EXISTS submissions (
    task_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    score INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    origin TEXT NOT NULL,
    PRIMARY KEY (user_id, task_id)
);

CREATE INDEX IF NOT EXISTS idx_submissions_task ON submissions(task_id);
"#;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and if needed create) a database file.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("SQLite storage initialized at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Translate a constraint failure into [`StorageError::ReferentialViolation`];
/// everything else stays a database error.
fn map_constraint(err: rusqlite::Error, what: &str) -> StorageError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::ReferentialViolation(what.to_string())
        }
        _ => StorageError::from(err),
    }
}

fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        affiliation: row.get(3)?,
        credential: row.get(4)?,
        is_admin: row.get::<_, i64>(5)? != 0,
        is_hidden: row.get::<_, i64>(6)? != 0,
    })
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        category: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        hint: row.get(4)?,
        score: row.get(5)?,
        flag: row.get(6)?,
        attachment: row.get(7)?,
    })
}

const ACCOUNT_COLS: &str = "id, username, email, affiliation, credential, is_admin, is_hidden";
const TASK_COLS: &str = "id, category, name, description, hint, score, flag, attachment";

#[async_trait]
impl Store for SqliteStore {
    // ==================== Accounts ====================

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO accounts (username, email, affiliation, credential, is_admin, is_hidden)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                account.username,
                account.email,
                account.affiliation,
                account.credential,
                account.is_admin as i64,
                account.is_hidden as i64,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Account {
            id,
            username: account.username,
            email: account.email,
            affiliation: account.affiliation,
            credential: account.credential,
            is_admin: account.is_admin,
            is_hidden: account.is_hidden,
        })
    }

    async fn account_by_id(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn.lock();
        let account = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE id = ?1"),
                params![id],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock();
        let account = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE email = ?1"),
                params![email],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock();
        let account = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE username = ?1"),
                params![username],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    async fn account_count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(count)
    }

    async fn active_account_count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE is_hidden = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn visible_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLS} FROM accounts WHERE is_hidden = 0 ORDER BY id"
        ))?;
        let accounts = stmt
            .query_map([], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {ACCOUNT_COLS} FROM accounts ORDER BY id"))?;
        let accounts = stmt
            .query_map([], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    // ==================== Categories ====================

    async fn create_category(&self, name: &str) -> Result<Category> {
        let conn = self.conn.lock();
        conn.execute("INSERT INTO categories (name) VALUES (?1)", params![name])?;
        Ok(Category {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    async fn rename_category(&self, id: i64, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE categories SET name = ?1 WHERE id = ?2",
            params![name, id],
        )?;
        Ok(())
    }

    async fn delete_category(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM categories WHERE id = ?1", params![id])
            .map_err(|e| map_constraint(e, "tasks still reference this category"))?;
        Ok(())
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name FROM categories ORDER BY id")?;
        let categories = stmt
            .query_map([], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    async fn category_by_id(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn.lock();
        let category = conn
            .query_row(
                "SELECT id, name FROM categories WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(category)
    }

    // ==================== Tasks ====================

    async fn create_task(&self, task: NewTask) -> Result<Task> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tasks (category, name, description, hint, score, flag, attachment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.category,
                task.name,
                task.description,
                task.hint,
                task.score,
                task.flag,
                task.attachment,
            ],
        )
        .map_err(|e| map_constraint(e, "task references a missing category"))?;
        let id = conn.last_insert_rowid();
        Ok(Task {
            id,
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
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE tasks SET category = ?1, name = ?2, description = ?3, hint = ?4,
                    score = ?5, flag = COALESCE(?6, flag),
                    attachment = COALESCE(?7, attachment)
             WHERE id = ?8",
            params![
                patch.category,
                patch.name,
                patch.description,
                patch.hint,
                patch.score,
                patch.flag,
                patch.attachment,
                id,
            ],
        )
        .map_err(|e| map_constraint(e, "task references a missing category"))?;
        Ok(())
    }

    async fn delete_task(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn task_by_id(&self, id: i64) -> Result<Option<Task>> {
        let conn = self.conn.lock();
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLS} FROM tasks WHERE id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    async fn tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLS} FROM tasks ORDER BY category, score, id"
        ))?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    // ==================== Submission ledger ====================

    async fn insert_submission(&self, submission: &Submission) -> Result<bool> {
        let conn = self.conn.lock();
        // INSERT OR IGNORE against the (user_id, task_id) primary key is the
        // arbiter: of two racing duplicates exactly one reports a row.
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO submissions (task_id, user_id, score, timestamp, origin)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                submission.task_id,
                submission.user_id,
                submission.score,
                submission.timestamp_ms,
                submission.origin,
            ],
        )?;
        Ok(inserted > 0)
    }

    async fn has_submission(&self, user_id: i64, task_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM submissions WHERE user_id = ?1 AND task_id = ?2",
            params![user_id, task_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn solved_task_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT task_id FROM submissions WHERE user_id = ?1")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    async fn submissions(&self) -> Result<Vec<Submission>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT task_id, user_id, score, timestamp, origin FROM submissions
             ORDER BY timestamp",
        )?;
        let submissions = stmt
            .query_map([], |row| {
                Ok(Submission {
                    task_id: row.get(0)?,
                    user_id: row.get(1)?,
                    score: row.get(2)?,
                    timestamp_ms: row.get(3)?,
                    origin: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(submissions)
    }

    async fn completion_counts(&self) -> Result<HashMap<i64, i64>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT task_id, COUNT(*) FROM submissions GROUP BY task_id")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(counts)
    }

    async fn solve_count(&self, task_id: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM submissions WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(username: &str, hidden: bool) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            email: format!("{username}@example.org"),
            affiliation: "test team".to_string(),
            credential: "opaque".to_string(),
            is_admin: false,
            is_hidden: hidden,
        }
    }

    fn task(category: i64, name: &str, score: i64) -> NewTask {
        NewTask {
            category,
            name: name.to_string(),
            description: "desc".to_string(),
            hint: "hint".to_string(),
            score,
            flag: format!("FLAG{{{name}}}"),
            attachment: None,
        }
    }

    fn entry(user_id: i64, task_id: i64, score: i64, ts: i64) -> Submission {
        Submission {
            task_id,
            user_id,
            score,
            timestamp_ms: ts,
            origin: "127.0.0.1".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_submission_is_ignored_not_an_error() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store.insert_submission(&entry(1, 1, 100, 1000)).await.unwrap();
        let second = store.insert_submission(&entry(1, 1, 100, 2000)).await.unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(store.submissions().await.unwrap().len(), 1);
        // The surviving row is the first one.
        assert_eq!(store.submissions().await.unwrap()[0].timestamp_ms, 1000);
    }

    #[tokio::test]
    async fn same_task_different_users_both_credit() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.insert_submission(&entry(1, 7, 100, 1)).await.unwrap());
        assert!(store.insert_submission(&entry(2, 7, 100, 2)).await.unwrap());
        assert_eq!(store.solve_count(7).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn category_with_tasks_cannot_be_deleted() {
        let store = SqliteStore::in_memory().unwrap();
        let cat = store.create_category("web").await.unwrap();
        store.create_task(task(cat.id, "xss", 100)).await.unwrap();

        let err = store.delete_category(cat.id).await.unwrap_err();
        assert!(matches!(err, StorageError::ReferentialViolation(_)));
        // The category must still be there.
        assert!(store.category_by_id(cat.id).await.unwrap().is_some());

        // After removing the task the delete goes through.
        let tasks = store.tasks().await.unwrap();
        store.delete_task(tasks[0].id).await.unwrap();
        store.delete_category(cat.id).await.unwrap();
        assert!(store.category_by_id(cat.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn task_with_unknown_category_is_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store.create_task(task(999, "orphan", 50)).await.unwrap_err();
        assert!(matches!(err, StorageError::ReferentialViolation(_)));
    }

    #[tokio::test]
    async fn tasks_are_ordered_by_category_then_score() {
        let store = SqliteStore::in_memory().unwrap();
        let web = store.create_category("web").await.unwrap();
        let pwn = store.create_category("pwn").await.unwrap();
        store.create_task(task(pwn.id, "heap", 300)).await.unwrap();
        store.create_task(task(web.id, "sqli", 200)).await.unwrap();
        store.create_task(task(web.id, "xss", 100)).await.unwrap();

        let names: Vec<String> = store
            .tasks()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["xss", "sqli", "heap"]);
    }

    #[tokio::test]
    async fn update_task_keeps_flag_when_patch_omits_it() {
        let store = SqliteStore::in_memory().unwrap();
        let cat = store.create_category("misc").await.unwrap();
        let created = store.create_task(task(cat.id, "trivia", 50)).await.unwrap();

        store
            .update_task(
                created.id,
                TaskPatch {
                    category: cat.id,
                    name: "trivia v2".to_string(),
                    description: "updated".to_string(),
                    hint: "updated hint".to_string(),
                    score: 75,
                    flag: None,
                    attachment: None,
                },
            )
            .await
            .unwrap();

        let updated = store.task_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(updated.name, "trivia v2");
        assert_eq!(updated.score, 75);
        assert_eq!(updated.flag, created.flag);
    }

    #[tokio::test]
    async fn hidden_accounts_are_excluded_from_active_counts() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_account(account("admin", true)).await.unwrap();
        store.create_account(account("alice", false)).await.unwrap();
        store.create_account(account("bob", false)).await.unwrap();

        assert_eq!(store.account_count().await.unwrap(), 3);
        assert_eq!(store.active_account_count().await.unwrap(), 2);
        let visible = store.visible_accounts().await.unwrap();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|a| !a.is_hidden));
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jury.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.create_account(account("alice", false)).await.unwrap();
            store.insert_submission(&entry(1, 1, 100, 1000)).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.account_count().await.unwrap(), 1);
        assert_eq!(store.submissions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completion_counts_group_by_task() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert_submission(&entry(1, 10, 100, 1)).await.unwrap();
        store.insert_submission(&entry(2, 10, 100, 2)).await.unwrap();
        store.insert_submission(&entry(1, 11, 200, 3)).await.unwrap();

        let counts = store.completion_counts().await.unwrap();
        assert_eq!(counts.get(&10), Some(&2));
        assert_eq!(counts.get(&11), Some(&1));
        assert_eq!(counts.get(&12), None);
    }
}
