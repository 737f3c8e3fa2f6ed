//! Deterministic fold of the event log into session state.
//!
//! State is never mutated in place by callers; every consumer replays the
//! log and folds its own copy. Replaying the same log twice yields identical
//! state.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{
    IterationSummary, Note, Task, TaskStatus, clamp_priority, priority_rank,
};
use crate::store::event::{EventPayload, StoredEvent};

/// Read-only projection of one session's event log.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SessionState {
    pub tasks: BTreeMap<u64, Task>,
    pub notes: BTreeMap<u64, Note>,
    pub iterations: Vec<IterationSummary>,
    pub complete: bool,
    pub current_iteration: u32,
}

/// Fold events, in sequence order, into a fresh `SessionState`.
pub fn fold(events: &[StoredEvent]) -> SessionState {
    let mut state = SessionState::default();
    for event in events {
        apply(&mut state, event);
    }
    state
}

fn apply(state: &mut SessionState, event: &StoredEvent) {
    match &event.payload {
        EventPayload::TaskAdd { content, priority } => {
            // First write wins; the seq-derived id makes duplicates unreachable
            // in practice, but a replayed log must never flip-flop.
            state.tasks.entry(event.seq).or_insert_with(|| Task {
                id: event.seq,
                content: content.clone(),
                status: TaskStatus::Remaining,
                priority: clamp_priority(*priority),
                depends_on: Default::default(),
                created_at: event.created_at,
                updated_at: event.created_at,
            });
        }
        EventPayload::TaskStatus { id, status } => {
            if let Some(task) = state.tasks.get_mut(id) {
                if !task.status.is_terminal() {
                    task.status = *status;
                    task.updated_at = event.created_at;
                }
            }
        }
        EventPayload::TaskPriority { id, priority } => {
            if let Some(task) = state.tasks.get_mut(id) {
                task.priority = clamp_priority(*priority);
                task.updated_at = event.created_at;
            }
        }
        EventPayload::TaskDepends { id, depends_on } => {
            if let Some(task) = state.tasks.get_mut(id) {
                for dep in depends_on {
                    // A task never depends on itself.
                    if dep != id {
                        task.depends_on.insert(*dep);
                    }
                }
                task.updated_at = event.created_at;
            }
        }
        EventPayload::NoteAdd { content, note_kind } => {
            state.notes.entry(event.seq).or_insert_with(|| Note {
                id: event.seq,
                kind: *note_kind,
                content: content.clone(),
                created_at: event.created_at,
                updated_at: event.created_at,
            });
        }
        EventPayload::NoteUpdate { id, content } => {
            if let Some(note) = state.notes.get_mut(id) {
                note.content = content.clone();
                note.updated_at = event.created_at;
            }
        }
        EventPayload::NoteDelete { id } => {
            state.notes.remove(id);
        }
        EventPayload::IterationSummary { number, summary } => {
            state.iterations.push(IterationSummary {
                number: *number,
                summary: summary.clone(),
                timestamp: event.created_at,
            });
            state.current_iteration = state.current_iteration.max(*number);
        }
        EventPayload::SessionComplete => {
            state.complete = true;
        }
    }
}

/// The task the agent should work on next: the most urgent remaining task
/// whose dependencies are all completed. Ties break toward the lower id,
/// i.e. creation order.
pub fn task_next(state: &SessionState) -> Option<&Task> {
    state
        .tasks
        .values()
        .filter(|task| task.status == TaskStatus::Remaining)
        .filter(|task| {
            task.depends_on.iter().all(|dep| {
                state
                    .tasks
                    .get(dep)
                    .is_some_and(|d| d.status == TaskStatus::Completed)
            })
        })
        .min_by_key(|task| (priority_rank(task.priority), task.id))
}
