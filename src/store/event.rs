//! Event kinds persisted to the session log.
//!
//! Every mutation of session state is one of these payloads, serialized as
//! internally tagged JSON. The log is append-only; replaying it in sequence
//! order is the only way state is ever constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{NoteKind, TaskStatus};

fn default_priority() -> u8 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventPayload {
    TaskAdd {
        content: String,
        #[serde(default = "default_priority")]
        priority: u8,
    },

    TaskStatus {
        id: u64,
        status: TaskStatus,
    },

    TaskPriority {
        id: u64,
        priority: u8,
    },

    TaskDepends {
        id: u64,
        depends_on: Vec<u64>,
    },

    NoteAdd {
        content: String,
        #[serde(rename = "type")]
        note_kind: NoteKind,
    },

    NoteUpdate {
        id: u64,
        content: String,
    },

    NoteDelete {
        id: u64,
    },

    IterationSummary {
        number: u32,
        summary: String,
    },

    SessionComplete,
}

impl EventPayload {
    pub const KNOWN_KINDS: [&'static str; 9] = [
        "task-add",
        "task-status",
        "task-priority",
        "task-depends",
        "note-add",
        "note-update",
        "note-delete",
        "iteration-summary",
        "session-complete",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskAdd { .. } => "task-add",
            Self::TaskStatus { .. } => "task-status",
            Self::TaskPriority { .. } => "task-priority",
            Self::TaskDepends { .. } => "task-depends",
            Self::NoteAdd { .. } => "note-add",
            Self::NoteUpdate { .. } => "note-update",
            Self::NoteDelete { .. } => "note-delete",
            Self::IterationSummary { .. } => "iteration-summary",
            Self::SessionComplete => "session-complete",
        }
    }

    /// Kinds this build understands. Rows written by a newer build with an
    /// unknown kind are skipped on replay rather than treated as corruption.
    pub fn is_known_kind(kind: &str) -> bool {
        Self::KNOWN_KINDS.contains(&kind)
    }
}

/// One row of the event log: a payload plus the metadata the durability
/// layer assigned at append time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub seq: u64,
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_kind_matches_serialized_tag() {
        let payload = EventPayload::TaskAdd {
            content: "write tests".into(),
            priority: 1,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], payload.kind());
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let payloads = vec![
            EventPayload::TaskAdd {
                content: "a".into(),
                priority: 0,
            },
            EventPayload::TaskStatus {
                id: 1,
                status: TaskStatus::InProgress,
            },
            EventPayload::TaskPriority { id: 1, priority: 3 },
            EventPayload::TaskDepends {
                id: 2,
                depends_on: vec![1],
            },
            EventPayload::NoteAdd {
                content: "n".into(),
                note_kind: NoteKind::Tip,
            },
            EventPayload::NoteUpdate {
                id: 5,
                content: "n2".into(),
            },
            EventPayload::NoteDelete { id: 5 },
            EventPayload::IterationSummary {
                number: 1,
                summary: "did things".into(),
            },
            EventPayload::SessionComplete,
        ];
        for payload in payloads {
            let json = serde_json::to_string(&payload).unwrap();
            let back: EventPayload = serde_json::from_str(&json).unwrap();
            assert_eq!(back, payload);
            assert!(EventPayload::is_known_kind(payload.kind()));
        }
    }

    #[test]
    fn test_task_add_priority_defaults_to_normal() {
        let json = r#"{"kind":"task-add","content":"no priority"}"#;
        let payload: EventPayload = serde_json::from_str(json).unwrap();
        match payload {
            EventPayload::TaskAdd { priority, .. } => assert_eq!(priority, 2),
            _ => panic!("Expected TaskAdd"),
        }
    }

    #[test]
    fn test_unknown_kind_is_not_known() {
        assert!(!EventPayload::is_known_kind("task-split"));
    }
}
