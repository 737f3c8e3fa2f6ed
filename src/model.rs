//! Domain types shared by the store, the orchestrator, and the CLI.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Most urgent priority.
pub const PRIORITY_CRITICAL: u8 = 0;
/// Least urgent priority.
pub const PRIORITY_BACKLOG: u8 = 4;

/// Clamp a raw priority into the supported 0..=4 band.
pub fn clamp_priority(priority: u8) -> u8 {
    priority.min(PRIORITY_BACKLOG)
}

/// Ordering rank for a priority: lower rank is picked first.
///
/// The convention is 0 = critical .. 4 = backlog, so the rank is the clamped
/// priority itself. This is the only place the convention lives; `task_next`
/// and the CLI display both go through it.
pub fn priority_rank(priority: u8) -> u8 {
    clamp_priority(priority)
}

/// Human-readable label for a priority value.
pub fn priority_label(priority: u8) -> &'static str {
    match clamp_priority(priority) {
        0 => "critical",
        1 => "high",
        2 => "normal",
        3 => "low",
        _ => "backlog",
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Remaining,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remaining => "remaining",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled tasks never leave those states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remaining" => Ok(Self::Remaining),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "blocked" => Ok(Self::Blocked),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    Learning,
    Stuck,
    Tip,
    Decision,
}

impl NoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Learning => "learning",
            Self::Stuck => "stuck",
            Self::Tip => "tip",
            Self::Decision => "decision",
        }
    }
}

impl FromStr for NoteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "learning" => Ok(Self::Learning),
            "stuck" => Ok(Self::Stuck),
            "tip" => Ok(Self::Tip),
            "decision" => Ok(Self::Decision),
            _ => Err(format!("Invalid note kind: {}", s)),
        }
    }
}

/// A unit of work tracked across iterations. The id is the store sequence
/// number of the task-add event, so ids are unique and creation-ordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: u64,
    pub content: String,
    pub status: TaskStatus,
    pub priority: u8,
    pub depends_on: BTreeSet<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Free-form knowledge the agent records for later iterations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: u64,
    pub kind: NoteKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationSummary {
    pub number: u32,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_rank_zero_is_most_urgent() {
        assert!(priority_rank(PRIORITY_CRITICAL) < priority_rank(1));
        assert!(priority_rank(1) < priority_rank(PRIORITY_BACKLOG));
    }

    #[test]
    fn test_priority_clamped_above_backlog() {
        assert_eq!(clamp_priority(200), PRIORITY_BACKLOG);
        assert_eq!(priority_rank(200), priority_rank(PRIORITY_BACKLOG));
        assert_eq!(priority_label(200), "backlog");
    }

    #[test]
    fn test_task_status_round_trip() {
        for status in [
            TaskStatus::Remaining,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Blocked,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Remaining.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn test_note_kind_round_trip() {
        for kind in [
            NoteKind::Learning,
            NoteKind::Stuck,
            NoteKind::Tip,
            NoteKind::Decision,
        ] {
            assert_eq!(kind.as_str().parse::<NoteKind>().unwrap(), kind);
        }
    }
}
