//! Task catalog views.
//!
//! Read-only joins of tasks to categories, augmented with per-task
//! completion stats for the requesting user. The secret flag never appears
//! in any view produced here.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;

use crate::error::JuryError;
use crate::storage::{Category, Store, Task};

/// One task as shown to a participant.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: i64,
    pub category: i64,
    pub name: String,
    pub description: String,
    pub hint: String,
    pub score: i64,
    pub attachment: Option<String>,
    /// Share of active (non-hidden) accounts credited for this task, in
    /// percent. Clamped below 100 here at the presentation boundary; the
    /// stored ledger is untouched.
    pub percent_complete: f64,
    /// Whether the requesting user has been credited for this task.
    pub is_complete: bool,
}

/// A category and its tasks, ordered by ascending score.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryTasks {
    pub category: Category,
    pub tasks: Vec<TaskView>,
}

/// Detail view of a single task, with its overall solve count.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub id: i64,
    pub category: Category,
    pub name: String,
    pub description: String,
    pub hint: String,
    pub score: i64,
    pub attachment: Option<String>,
    pub solves: i64,
    pub is_complete: bool,
}

/// Completion percentage for a task, given how many active accounts exist.
///
/// An exact 100 renders as a full bar glitch downstream, so it is clamped to
/// 99.99 — a cosmetic adjustment only, never persisted.
pub(crate) fn percent_complete(credits: i64, active_accounts: i64) -> f64 {
    if active_accounts == 0 {
        return 0.0;
    }
    let percent = credits as f64 / active_accounts as f64 * 100.0;
    if percent == 100.0 {
        99.99
    } else {
        percent
    }
}

fn task_view(task: Task, credits: i64, active_accounts: i64, solved: &HashSet<i64>) -> TaskView {
    TaskView {
        percent_complete: percent_complete(credits, active_accounts),
        is_complete: solved.contains(&task.id),
        id: task.id,
        category: task.category,
        name: task.name,
        description: task.description,
        hint: task.hint,
        score: task.score,
        attachment: task.attachment,
    }
}

/// Build the full task grid for a viewer: categories in insertion order,
/// tasks within each by ascending score then insertion order.
pub async fn task_grid(store: &dyn Store, viewer_id: i64) -> Result<Vec<CategoryTasks>, JuryError> {
    let categories = store.categories().await?;
    let tasks = store.tasks().await?;
    let credits = store.completion_counts().await?;
    let active_accounts = store.active_account_count().await?;
    let solved: HashSet<i64> = store.solved_task_ids(viewer_id).await?.into_iter().collect();

    let mut grid: IndexMap<i64, CategoryTasks> = categories
        .into_iter()
        .map(|category| {
            (
                category.id,
                CategoryTasks {
                    category,
                    tasks: Vec::new(),
                },
            )
        })
        .collect();

    // Tasks arrive ordered (category, score, id); pushing preserves that.
    for task in tasks {
        let task_credits = credits.get(&task.id).copied().unwrap_or(0);
        if let Some(group) = grid.get_mut(&task.category) {
            group
                .tasks
                .push(task_view(task, task_credits, active_accounts, &solved));
        }
    }

    Ok(grid.into_values().collect())
}

/// Look up a single task for the viewer.
pub async fn task_detail(
    store: &dyn Store,
    viewer_id: i64,
    task_id: i64,
) -> Result<TaskDetail, JuryError> {
    let task = store
        .task_by_id(task_id)
        .await?
        .ok_or(JuryError::TaskNotFound)?;
    let category = store
        .category_by_id(task.category)
        .await?
        .ok_or(JuryError::TaskNotFound)?;
    let solves = store.solve_count(task.id).await?;
    let is_complete = store.has_submission(viewer_id, task.id).await?;
    Ok(TaskDetail {
        id: task.id,
        category,
        name: task.name,
        description: task.description,
        hint: task.hint,
        score: task.score,
        attachment: task.attachment,
        solves,
        is_complete,
    })
}
