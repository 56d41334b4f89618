//! CTF Jury Server
//!
//! Runs the competition state engine as a standalone HTTP server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use ctf_jury::auth::{SaltedSha256, SessionStore};
use ctf_jury::config::{DatabaseConfig, JuryConfig};
use ctf_jury::server::AppState;
use ctf_jury::storage::{PgStore, SqliteStore, Store};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "jury-server")]
#[command(about = "CTF jury server - competition state engine over HTTP")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "JURY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen host (overrides the config file)
    #[arg(long, env = "JURY_HOST")]
    host: Option<String>,

    /// Listen port (overrides the config file)
    #[arg(short, long, env = "JURY_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ctf_jury=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => JuryConfig::load(path)?,
        None => JuryConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    info!("Starting CTF jury server");
    match &config.start_time {
        Some(start) => info!("  Competition starts at {start}"),
        None => info!("  No start time configured; competition is open"),
    }
    info!("  Listening on: {}:{}", config.host, config.port);

    let store: Arc<dyn Store> = match &config.database {
        DatabaseConfig::Sqlite { path } => {
            info!("  Storage: SQLite at {path}");
            Arc::new(SqliteStore::open(path.as_ref())?)
        }
        DatabaseConfig::Postgres { url } => {
            info!("  Storage: PostgreSQL");
            Arc::new(PgStore::connect(url).await?)
        }
    };

    let state = Arc::new(AppState {
        config,
        store,
        sessions: SessionStore::new(),
        credentials: Arc::new(SaltedSha256),
    });

    ctf_jury::server::run(state).await
}
