//! Capture-the-flag competition state engine.
//!
//! The jury server keeps the minimal mutable state of a timed CTF: who is
//! registered, which tasks exist, and who has been credited for which task.
//! Everything else (page rendering, attachment hosting, the challenge
//! programs themselves) lives outside this crate and consumes the JSON API.
//!
//! ## Module Structure
//!
//! - `config`: startup configuration, built once and threaded through state
//! - `clock`: competition start gate
//! - `auth`: sessions, caller resolution, credential capability
//! - `guards`: composable request guards (login / admin / gate)
//! - `storage`: repository trait with SQLite and PostgreSQL backends
//! - `catalog`: task grid grouped by category with completion stats
//! - `ledger`: idempotent flag-submission crediting
//! - `scoreboard`: ranking computed fresh from the ledger
//! - `server`: axum router and request handlers

/// Startup configuration
pub mod config;

/// Engine error taxonomy and HTTP mapping
pub mod error;

/// Competition start gate
pub mod clock;

/// Sessions and caller identity
pub mod auth;

/// Composable request guards
pub mod guards;

/// Data persistence layer
pub mod storage;

/// Task catalog views
pub mod catalog;

/// Submission ledger
pub mod ledger;

/// Scoreboard ranking
pub mod scoreboard;

/// HTTP server
pub mod server;

pub use auth::{Caller, CredentialScheme, SaltedSha256, SessionStore};
pub use config::{DatabaseConfig, JuryConfig};
pub use error::JuryError;
pub use server::AppState;
pub use storage::{PgStore, SqliteStore, Store};
