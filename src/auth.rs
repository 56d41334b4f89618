//! Sessions and caller identity.
//!
//! A session is an opaque bearer token mapped to an account id; nothing else
//! is ever stored in it. Credential hashing is a capability behind
//! [`CredentialScheme`] — the engine stores and forwards opaque strings and
//! never interprets them itself.

use axum::http::HeaderMap;
use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::JuryError;
use crate::storage::{Account, Store};

/// The resolved identity of a request.
#[derive(Debug, Clone)]
pub enum Caller {
    Anonymous,
    Account(Account),
}

/// In-process session table: bearer token -> account id.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, i64>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for the account.
    pub fn issue(&self, account_id: i64) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.sessions.insert(token.clone(), account_id);
        token
    }

    pub fn revoke(&self, token: &str) {
        self.sessions.remove(token);
    }

    pub fn account_id(&self, token: &str) -> Option<i64> {
        self.sessions.get(token).map(|entry| *entry)
    }
}

/// Pull the bearer token out of the `Authorization` header, if any.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Resolve the caller's account from the request headers.
///
/// A missing, malformed, or revoked token is `Anonymous`, not an error; the
/// guards decide whether anonymity is acceptable for the operation.
pub async fn resolve_caller(
    store: &dyn Store,
    sessions: &SessionStore,
    headers: &HeaderMap,
) -> Result<Caller, JuryError> {
    let Some(token) = bearer_token(headers) else {
        return Ok(Caller::Anonymous);
    };
    let Some(account_id) = sessions.account_id(token) else {
        return Ok(Caller::Anonymous);
    };
    match store.account_by_id(account_id).await? {
        Some(account) => Ok(Caller::Account(account)),
        None => Ok(Caller::Anonymous),
    }
}

// ============================================================================
// CREDENTIALS
// ============================================================================

/// Credential verification capability. The stored form is opaque to every
/// other part of the engine.
pub trait CredentialScheme: Send + Sync {
    /// Derive the stored form of a fresh password.
    fn derive(&self, password: &str) -> String;
    /// Check a login attempt against the stored form.
    fn verify(&self, stored: &str, candidate: &str) -> bool;
}

/// Salted SHA-256, stored as `salt$digest` in hex.
pub struct SaltedSha256;

impl CredentialScheme for SaltedSha256 {
    fn derive(&self, password: &str) -> String {
        let salt: [u8; 16] = rand::thread_rng().gen();
        let salt = hex::encode(salt);
        let digest = hex::encode(Sha256::digest(format!("{salt}{password}")));
        format!("{salt}${digest}")
    }

    fn verify(&self, stored: &str, candidate: &str) -> bool {
        let Some((salt, digest)) = stored.split_once('$') else {
            return false;
        };
        let computed = hex::encode(Sha256::digest(format!("{salt}{candidate}")));
        digests_match(&computed, digest)
    }
}

/// Compare a submitted flag against a task's secret.
///
/// Comparing digests instead of the strings themselves keeps the comparison
/// time independent of how much of the flag was guessed correctly.
pub fn flag_matches(expected: &str, candidate: &str) -> bool {
    digests_match(expected, candidate)
}

fn digests_match(a: &str, b: &str) -> bool {
    Sha256::digest(a.as_bytes()) == Sha256::digest(b.as_bytes())
}
