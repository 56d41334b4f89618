//! Jury server configuration.
//!
//! All runtime knobs live in one immutable struct built at startup and
//! threaded through the shared state. There are no ambient globals: a config
//! value that is not reachable from [`JuryConfig`] does not exist.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete jury server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JuryConfig {
    /// Listen address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Competition start instant. `None` means the competition is open
    /// immediately (the gate only ever passes).
    pub start_time: Option<DateTime<Utc>>,
    /// Storage backend
    pub database: DatabaseConfig,
}

impl Default for JuryConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            start_time: None,
            database: DatabaseConfig::default(),
        }
    }
}

/// Storage backend selection. Any durable relational store works; the two
/// shipped backends cover single-node (SQLite) and server (PostgreSQL) use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: String },
    Postgres { url: String },
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::Sqlite {
            path: "jury.db".to_string(),
        }
    }
}

impl JuryConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: JuryConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}
