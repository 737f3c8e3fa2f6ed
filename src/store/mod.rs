//! Event-sourced session store: an append-only, replayable log of every
//! task/note/iteration mutation, namespaced by session name.

mod db;
mod event;
mod state;

pub use db::{SessionDb, StoreHandle};
pub use event::{EventPayload, StoredEvent};
pub use state::{SessionState, fold, task_next};
