//! SQLite-backed append-only event log.
//!
//! The orchestrator process and `drover tool` child processes each open the
//! same database file and append independently; SQLite's write serialization
//! (WAL plus a busy timeout) turns those into one total order per session.
//! Nothing here ever updates or deletes a row outside of `reset`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::errors::StoreError;
use crate::store::event::{EventPayload, StoredEvent};
use crate::store::state::{SessionState, fold};

pub struct SessionDb {
    conn: Connection,
}

impl SessionDb {
    /// Open (or create) the event database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let open_err = |detail: String| StoreError::Open {
            path: path.to_path_buf(),
            detail,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| open_err(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| open_err(e.to_string()))?;
        let db = Self { conn };
        db.init(path)?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: PathBuf::from(":memory:"),
            detail: e.to_string(),
        })?;
        let db = Self { conn };
        db.init(Path::new(":memory:"))?;
        Ok(db)
    }

    fn init(&self, path: &Path) -> Result<(), StoreError> {
        let open_err = |e: rusqlite::Error| StoreError::Open {
            path: path.to_path_buf(),
            detail: e.to_string(),
        };
        // journal_mode returns the resulting mode as a row.
        self.conn
            .query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .map_err(open_err)?;
        self.conn
            .busy_timeout(Duration::from_secs(5))
            .map_err(open_err)?;
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS events (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    session TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_events_session ON events(session, seq);
                ",
            )
            .map_err(open_err)?;
        Ok(())
    }

    /// Durably append one event and return its assigned sequence number.
    pub fn append(&self, session: &str, payload: &EventPayload) -> Result<u64, StoreError> {
        let json = serde_json::to_string(payload).map_err(|e| StoreError::Corrupt {
            seq: 0,
            detail: e.to_string(),
        })?;
        self.conn
            .execute(
                "INSERT INTO events (session, kind, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![session, payload.kind(), json, Utc::now().to_rfc3339()],
            )
            .map_err(StoreError::Write)?;
        Ok(self.conn.last_insert_rowid() as u64)
    }

    /// All events for a session, in sequence order. Rows with a kind this
    /// build does not know are skipped; a known kind that fails to parse is
    /// corruption.
    pub fn events(&self, session: &str) -> Result<Vec<StoredEvent>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT seq, kind, payload, created_at FROM events
                 WHERE session = ?1 ORDER BY seq",
            )
            .map_err(StoreError::Read)?;
        let rows = stmt
            .query_map(params![session], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(StoreError::Read)?;

        let mut events = Vec::new();
        for row in rows {
            let (seq, kind, payload, created_at) = row.map_err(StoreError::Read)?;
            let seq = seq as u64;
            if !EventPayload::is_known_kind(&kind) {
                debug!(seq, kind, "skipping event of unknown kind");
                continue;
            }
            let payload: EventPayload =
                serde_json::from_str(&payload).map_err(|e| StoreError::Corrupt {
                    seq,
                    detail: e.to_string(),
                })?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::Corrupt {
                    seq,
                    detail: format!("bad timestamp: {}", e),
                })?;
            events.push(StoredEvent {
                seq,
                payload,
                created_at,
            });
        }
        Ok(events)
    }

    /// Replay the full log into a fresh `SessionState`.
    pub fn replay(&self, session: &str) -> Result<SessionState, StoreError> {
        Ok(fold(&self.events(session)?))
    }

    /// Destructively clear one session's log. Only the explicit reset
    /// command uses this.
    pub fn reset(&self, session: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM events WHERE session = ?1", params![session])
            .map_err(StoreError::Write)?;
        Ok(())
    }

    /// Session names that have at least one event.
    pub fn sessions(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT session FROM events ORDER BY session")
            .map_err(StoreError::Read)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StoreError::Read)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(StoreError::Read)?);
        }
        Ok(sessions)
    }
}

/// Async-safe handle to the event database.
///
/// Wraps `SessionDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<SessionDb>>,
}

impl StoreHandle {
    pub fn new(db: SessionDb) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&SessionDb) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::TaskPanicked(e.to_string()))?
    }

    pub async fn append(&self, session: &str, payload: EventPayload) -> Result<u64, StoreError> {
        let session = session.to_string();
        self.call(move |db| db.append(&session, &payload)).await
    }

    pub async fn replay(&self, session: &str) -> Result<SessionState, StoreError> {
        let session = session.to_string();
        self.call(move |db| db.replay(&session)).await
    }

    pub async fn reset(&self, session: &str) -> Result<(), StoreError> {
        let session = session.to_string();
        self.call(move |db| db.reset(&session)).await
    }
}
