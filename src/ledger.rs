//! Submission ledger: idempotent flag crediting.
//!
//! The flow is deliberately thin — look up the task, short-circuit if
//! already credited, compare the flag, insert under the uniqueness
//! constraint. The storage constraint is the only arbiter of credit; the
//! earlier existence check is an optimization and nothing more.

use serde::Serialize;
use tracing::{debug, info};

use crate::auth::flag_matches;
use crate::error::JuryError;
use crate::storage::{Store, Submission};

/// Outcome of a submission attempt. Wrong flag and already-solved are both
/// `accepted: false`; neither is an error.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubmitOutcome {
    pub accepted: bool,
}

/// Attempt to credit `user_id` for `task_id` with `candidate`.
///
/// The recorded score is the task's score at this instant; later edits to
/// the task leave historical entries untouched.
pub async fn submit_flag(
    store: &dyn Store,
    user_id: i64,
    task_id: i64,
    candidate: &str,
    origin: &str,
    now_ms: i64,
) -> Result<SubmitOutcome, JuryError> {
    let task = store
        .task_by_id(task_id)
        .await?
        .ok_or(JuryError::TaskNotFound)?;

    // Fast path; the insert below re-decides this authoritatively.
    if store.has_submission(user_id, task_id).await? {
        debug!(user_id, task_id, "submission for already-credited task");
        return Ok(SubmitOutcome { accepted: false });
    }

    if !flag_matches(&task.flag, candidate) {
        debug!(user_id, task_id, origin, "flag mismatch");
        return Ok(SubmitOutcome { accepted: false });
    }

    let entry = Submission {
        task_id,
        user_id,
        score: task.score,
        timestamp_ms: now_ms,
        origin: origin.to_string(),
    };
    // Two racers can both reach this point; the constraint lets exactly one
    // row through and the loser quietly reports not-accepted.
    let inserted = store.insert_submission(&entry).await?;
    if inserted {
        info!(user_id, task_id, score = task.score, origin, "flag accepted");
    }
    Ok(SubmitOutcome { accepted: inserted })
}
