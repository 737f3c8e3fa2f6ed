//! Run configuration. Everything a component needs is carried explicitly;
//! there is no ambient session directory or process-wide singleton.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Session name; namespaces the event log.
    pub session: String,
    /// Path of the SQLite event database.
    pub db_path: PathBuf,
    /// Agent command and arguments (speaks the protocol over stdio).
    pub agent_program: String,
    pub agent_args: Vec<String>,
    /// Working directory handed to the agent session.
    pub cwd: PathBuf,
    /// Optional model override; unavailable models fall back to the server
    /// default.
    pub model: Option<String>,
    /// Iteration budget; the run completes when it is exhausted.
    pub max_iterations: u32,
    /// Attempts per iteration before the run errors out.
    pub max_attempts: u32,
    /// Base backoff between retries; doubles per attempt.
    pub retry_base: Duration,
    /// How long a shutting-down agent gets before it is killed.
    pub shutdown_grace: Duration,
}

impl Config {
    pub fn new(
        session: String,
        db: Option<PathBuf>,
        agent_program: String,
        agent_args: Vec<String>,
        model: Option<String>,
        max_iterations: u32,
        cwd: Option<PathBuf>,
    ) -> Result<Self> {
        let cwd = match cwd {
            Some(dir) => dir,
            None => std::env::current_dir().context("Failed to resolve working directory")?,
        };
        Ok(Self {
            session,
            db_path: db.unwrap_or_else(default_db_path),
            agent_program,
            agent_args,
            cwd,
            model,
            max_iterations,
            max_attempts: 3,
            retry_base: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
        })
    }

    /// The cwd as a UTF-8 string for the wire; lossy only for paths that
    /// were never valid UTF-8 to begin with.
    pub fn cwd_str(&self) -> String {
        self.cwd.to_string_lossy().into_owned()
    }
}

/// Default database location under the platform data directory.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drover")
        .join("sessions.db")
}
