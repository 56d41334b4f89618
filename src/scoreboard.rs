//! Scoreboard ranking.
//!
//! A pure aggregation over the ledger, recomputed on every call. There is no
//! denormalized total anywhere that could drift from the ledger rows.

use serde::Serialize;
use std::collections::HashMap;

use crate::error::JuryError;
use crate::storage::{Account, Store, Submission};

/// One ranked scoreboard row.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScoreboardRow {
    pub username: String,
    pub affiliation: String,
    pub score: i64,
    /// Millisecond timestamp of the user's latest credit; absent for users
    /// with no credits.
    pub last_submit: Option<i64>,
}

/// Rank visible accounts by total credited score.
///
/// Left-join semantics: every account appears, zero-scorers included.
/// Ordering is score descending, then earliest last-submission first; users
/// without any submission sort as infinitely late among equal scores.
fn rank(accounts: Vec<Account>, submissions: &[Submission]) -> Vec<ScoreboardRow> {
    let mut totals: HashMap<i64, (i64, i64)> = HashMap::new();
    for entry in submissions {
        let slot = totals.entry(entry.user_id).or_insert((0, i64::MIN));
        slot.0 += entry.score;
        slot.1 = slot.1.max(entry.timestamp_ms);
    }

    let mut rows: Vec<ScoreboardRow> = accounts
        .into_iter()
        .map(|account| {
            let stats = totals.get(&account.id).copied();
            ScoreboardRow {
                username: account.username,
                affiliation: account.affiliation,
                score: stats.map(|(total, _)| total).unwrap_or(0),
                last_submit: stats.map(|(_, last)| last),
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.score.cmp(&a.score).then_with(|| {
            a.last_submit
                .unwrap_or(i64::MAX)
                .cmp(&b.last_submit.unwrap_or(i64::MAX))
        })
    });
    rows
}

/// Compute the ranked scoreboard from current ledger state.
pub async fn compute_scoreboard(store: &dyn Store) -> Result<Vec<ScoreboardRow>, JuryError> {
    let accounts = store.visible_accounts().await?;
    let submissions = store.submissions().await?;
    Ok(rank(accounts, &submissions))
}
