//! The session write/read API the agent's tool invocations call as child
//! processes — `drover tool <op>`.
//!
//! Every mutating op appends exactly one event kind per item; reads replay
//! the log. Results are single-line JSON on stdout so the agent can parse
//! ids back out. These processes append concurrently with the orchestrator;
//! the store's durability layer serializes them.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;

use drover::model::{NoteKind, TaskStatus, clamp_priority};
use drover::store::{EventPayload, SessionDb, SessionState, StoreHandle, task_next};

use super::super::ToolCommands;

pub async fn cmd_tool(db_path: &Path, command: ToolCommands) -> Result<()> {
    let store = StoreHandle::new(SessionDb::open(db_path)?);
    match command {
        ToolCommands::TaskAdd {
            session,
            content,
            priority,
        } => {
            let id = store
                .append(
                    &session,
                    EventPayload::TaskAdd {
                        content,
                        priority: clamp_priority(priority),
                    },
                )
                .await?;
            print_json(&json!({ "ok": true, "id": id }));
        }

        ToolCommands::TaskBatchAdd {
            session,
            contents,
            priority,
        } => {
            if contents.is_empty() {
                anyhow::bail!("task-batch-add needs at least one --content");
            }
            let mut ids = Vec::with_capacity(contents.len());
            for content in contents {
                let id = store
                    .append(
                        &session,
                        EventPayload::TaskAdd {
                            content,
                            priority: clamp_priority(priority),
                        },
                    )
                    .await?;
                ids.push(id);
            }
            print_json(&json!({ "ok": true, "ids": ids }));
        }

        ToolCommands::TaskStatus {
            session,
            id,
            status,
        } => {
            let status: TaskStatus = status
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Unsupported --status value")?;
            let state = replay(&store, &session).await?;
            ensure_task(&state, id, &session)?;
            store
                .append(&session, EventPayload::TaskStatus { id, status })
                .await?;
            print_json(&json!({ "ok": true, "id": id, "status": status.as_str() }));
        }

        ToolCommands::TaskPriority {
            session,
            id,
            priority,
        } => {
            let state = replay(&store, &session).await?;
            ensure_task(&state, id, &session)?;
            let priority = clamp_priority(priority);
            store
                .append(&session, EventPayload::TaskPriority { id, priority })
                .await?;
            print_json(&json!({ "ok": true, "id": id, "priority": priority }));
        }

        ToolCommands::TaskDepends {
            session,
            id,
            depends_on,
        } => {
            if depends_on.is_empty() {
                anyhow::bail!("task-depends needs at least one --on");
            }
            if depends_on.contains(&id) {
                anyhow::bail!("Task {} cannot depend on itself", id);
            }
            let state = replay(&store, &session).await?;
            ensure_task(&state, id, &session)?;
            for dep in &depends_on {
                ensure_task(&state, *dep, &session)?;
            }
            store
                .append(&session, EventPayload::TaskDepends { id, depends_on })
                .await?;
            print_json(&json!({ "ok": true, "id": id }));
        }

        ToolCommands::TaskList { session } => {
            let state = replay(&store, &session).await?;
            let tasks: Vec<_> = state.tasks.values().collect();
            print_json(&tasks);
        }

        ToolCommands::TaskNext { session } => {
            let state = replay(&store, &session).await?;
            match task_next(&state) {
                Some(task) => print_json(task),
                None => print_json(&json!(null)),
            }
        }

        ToolCommands::NoteAdd {
            session,
            content,
            note_type,
        } => {
            let note_kind: NoteKind = note_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Unsupported --type value")?;
            let id = store
                .append(&session, EventPayload::NoteAdd { content, note_kind })
                .await?;
            print_json(&json!({ "ok": true, "id": id }));
        }

        ToolCommands::NoteUpdate {
            session,
            id,
            content,
        } => {
            let state = replay(&store, &session).await?;
            if !state.notes.contains_key(&id) {
                anyhow::bail!("Note {} not found in session '{}'", id, session);
            }
            store
                .append(&session, EventPayload::NoteUpdate { id, content })
                .await?;
            print_json(&json!({ "ok": true, "id": id }));
        }

        ToolCommands::NoteDelete { session, id } => {
            let state = replay(&store, &session).await?;
            if !state.notes.contains_key(&id) {
                anyhow::bail!("Note {} not found in session '{}'", id, session);
            }
            store
                .append(&session, EventPayload::NoteDelete { id })
                .await?;
            print_json(&json!({ "ok": true, "id": id }));
        }

        ToolCommands::NoteList { session } => {
            let state = replay(&store, &session).await?;
            let notes: Vec<_> = state.notes.values().collect();
            print_json(&notes);
        }

        ToolCommands::IterationSummary {
            session,
            summary,
            number,
        } => {
            // Default to the iteration currently in flight.
            let number = match number {
                Some(n) => n,
                None => replay(&store, &session).await?.current_iteration + 1,
            };
            store
                .append(&session, EventPayload::IterationSummary { number, summary })
                .await?;
            print_json(&json!({ "ok": true, "number": number }));
        }

        ToolCommands::SessionComplete { session } => {
            store
                .append(&session, EventPayload::SessionComplete)
                .await?;
            print_json(&json!({ "ok": true }));
        }
    }
    Ok(())
}

async fn replay(store: &StoreHandle, session: &str) -> Result<SessionState> {
    Ok(store.replay(session).await?)
}

fn ensure_task(state: &SessionState, id: u64, session: &str) -> Result<()> {
    if !state.tasks.contains_key(&id) {
        anyhow::bail!("Task {} not found in session '{}'", id, session);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{}", json),
        Err(e) => println!("{}", json!({ "ok": false, "error": e.to_string() })),
    }
}
