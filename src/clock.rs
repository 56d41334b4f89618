//! Competition start gate.
//!
//! A single predicate decides whether the competition is open for a given
//! caller. Admins bypass the gate so the event can be configured before it
//! opens, and an empty account table bypasses it so the first registrant (who
//! becomes admin) can get in at all.

use chrono::{DateTime, Utc};

/// Decide whether the competition is open for this caller at `now`.
///
/// `start_time == None` means no start was configured and the gate always
/// passes.
pub fn competition_open(
    now: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    account_count: i64,
    caller_is_admin: bool,
) -> bool {
    if caller_is_admin {
        return true;
    }
    // Bootstrap: before any account exists there is nobody to gate out.
    if account_count == 0 {
        return true;
    }
    match start_time {
        Some(start) => now >= start,
        None => true,
    }
}
