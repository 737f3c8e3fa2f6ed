//! Renders the per-iteration prompt from replayed session state.

use std::fmt::Write;

use crate::model::priority_label;
use crate::store::{SessionState, task_next};

/// Build the prompt for one iteration. The agent sees the current task and
/// note board and is told to record every change through the `drover tool`
/// commands so the next iteration can replay it.
pub fn render(state: &SessionState, session: &str, iteration: u32, max_iterations: u32) -> String {
    let mut tasks_section = String::new();
    if state.tasks.is_empty() {
        tasks_section.push_str("No tasks recorded yet. Start by breaking the work into tasks.\n");
    } else {
        for task in state.tasks.values() {
            let _ = writeln!(
                tasks_section,
                "- [{}] #{} ({}) {}",
                task.status.as_str(),
                task.id,
                priority_label(task.priority),
                task.content
            );
            if !task.depends_on.is_empty() {
                let deps: Vec<String> = task.depends_on.iter().map(|d| format!("#{}", d)).collect();
                let _ = writeln!(tasks_section, "  depends on: {}", deps.join(", "));
            }
        }
    }

    let next_section = match task_next(state) {
        Some(task) => format!("Work on task #{} next: {}\n", task.id, task.content),
        None => "No task is currently unblocked. Re-plan or finish the session.\n".to_string(),
    };

    let mut notes_section = String::new();
    for note in state.notes.values() {
        let _ = writeln!(
            notes_section,
            "- ({}) #{} {}",
            note.kind.as_str(),
            note.id,
            note.content
        );
    }
    if notes_section.is_empty() {
        notes_section.push_str("No notes recorded yet.\n");
    }

    let last_summary = state
        .iterations
        .last()
        .map(|s| format!("Previous iteration ({}): {}\n", s.number, s.summary))
        .unwrap_or_else(|| "This is the first iteration.\n".to_string());

    format!(
        r#"You are iteration {iteration} of {max_iterations} in session "{session}".

## TASKS
{tasks_section}
{next_section}
## NOTES
{notes_section}
## HISTORY
{last_summary}
## RULES
1. Work on exactly one task this iteration.
2. Record every state change through the session tools, with --session {session}:
   - drover tool task-add --session {session} --content <text> [--priority 0..4]
   - drover tool task-status --session {session} --id <n> --status <remaining|in_progress|completed|blocked|cancelled>
   - drover tool task-priority / task-depends / task-list / task-next
   - drover tool note-add --session {session} --content <text> --type <learning|stuck|tip|decision>
   - drover tool iteration-summary --session {session} --summary <text>
3. Before finishing, record an iteration summary of what you did.
4. Only when every task is completed or cancelled, run:
   drover tool session-complete --session {session}
"#
    )
}
