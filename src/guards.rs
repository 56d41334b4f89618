//! Composable request guards.
//!
//! Each guard returns a verdict the handler consumes; handlers chain them
//! explicitly instead of being wrapped. Participant-facing operations need
//! `require_user` + `require_started`; admin operations need `require_admin`
//! and are never gated by the competition clock.

use chrono::Utc;

use crate::auth::Caller;
use crate::clock;
use crate::config::JuryConfig;
use crate::error::JuryError;
use crate::storage::{Account, Store};

/// The caller must be logged in.
pub fn require_user(caller: &Caller) -> Result<&Account, JuryError> {
    match caller {
        Caller::Account(account) => Ok(account),
        Caller::Anonymous => Err(JuryError::Unauthenticated),
    }
}

/// The caller must be logged in and hold the admin role.
pub fn require_admin(caller: &Caller) -> Result<&Account, JuryError> {
    let account = require_user(caller)?;
    if !account.is_admin {
        return Err(JuryError::Forbidden);
    }
    Ok(account)
}

/// The competition must be open for this account.
///
/// The account count is read fresh on every check; nothing here may be
/// cached across requests.
pub async fn require_started(
    store: &dyn Store,
    config: &JuryConfig,
    account: &Account,
) -> Result<(), JuryError> {
    let account_count = store.account_count().await?;
    if clock::competition_open(Utc::now(), config.start_time, account_count, account.is_admin) {
        Ok(())
    } else {
        Err(JuryError::CompetitionNotStarted {
            starts_at: config.start_time,
        })
    }
}

/// Registration variant of the gate: there is no caller yet, so only the
/// bootstrap (empty account table) bypass applies.
pub async fn require_registration_open(
    store: &dyn Store,
    config: &JuryConfig,
) -> Result<(), JuryError> {
    let account_count = store.account_count().await?;
    if clock::competition_open(Utc::now(), config.start_time, account_count, false) {
        Ok(())
    } else {
        Err(JuryError::CompetitionNotStarted {
            starts_at: config.start_time,
        })
    }
}
