//! Read-side and maintenance commands — `drover status`, `drover reset`.

use std::path::Path;

use anyhow::Result;
use console::style;

use drover::model::priority_label;
use drover::store::{SessionDb, StoreHandle, task_next};

pub async fn cmd_status(db_path: &Path, session: &str) -> Result<()> {
    let store = StoreHandle::new(SessionDb::open(db_path)?);
    let state = store.replay(session).await?;

    println!();
    println!("{} {}", style("Session:").bold(), session);
    let completion = if state.complete {
        style("complete").green().to_string()
    } else {
        style("in progress").yellow().to_string()
    };
    println!("Status:  {}", completion);
    println!("Iterations: {}", state.current_iteration);
    println!();

    if state.tasks.is_empty() {
        println!("No tasks recorded.");
    } else {
        println!("{}", style("Tasks").bold());
        for task in state.tasks.values() {
            println!(
                "  #{:<4} [{:<11}] {:<8} {}",
                task.id,
                task.status.as_str(),
                priority_label(task.priority),
                task.content
            );
            if !task.depends_on.is_empty() {
                let deps: Vec<String> =
                    task.depends_on.iter().map(|d| format!("#{}", d)).collect();
                println!("        {} {}", style("depends on").dim(), deps.join(", "));
            }
        }
        if let Some(next) = task_next(&state) {
            println!();
            println!("{} #{} {}", style("Next:").bold(), next.id, next.content);
        }
    }

    if !state.notes.is_empty() {
        println!();
        println!("{}", style("Notes").bold());
        for note in state.notes.values() {
            println!("  #{:<4} ({}) {}", note.id, note.kind.as_str(), note.content);
        }
    }

    if let Some(last) = state.iterations.last() {
        println!();
        println!(
            "{} ({}) {}",
            style("Last iteration:").bold(),
            last.number,
            last.summary
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_reset(db_path: &Path, session: &str, force: bool) -> Result<()> {
    if !force {
        anyhow::bail!(
            "This permanently clears the event log for session '{}'. Re-run with --force to confirm.",
            session
        );
    }
    let store = StoreHandle::new(SessionDb::open(db_path)?);
    store.reset(session).await?;
    println!("Session '{}' reset", session);
    Ok(())
}
