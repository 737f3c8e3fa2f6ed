//! Iteration-loop entry point — `drover run <session>`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use drover::acp::{AgentClient, AgentEvent};
use drover::config::Config;
use drover::orchestrator::{Orchestrator, RunOutcome};
use drover::store::{SessionDb, StoreHandle};

pub struct RunArgs {
    pub session: String,
    pub db: PathBuf,
    pub agent: String,
    pub agent_args: Vec<String>,
    pub model: Option<String>,
    pub max_iterations: u32,
    pub cwd: Option<PathBuf>,
}

pub async fn run_orchestrator(args: RunArgs) -> Result<()> {
    let config = Config::new(
        args.session,
        Some(args.db),
        args.agent,
        args.agent_args,
        args.model,
        args.max_iterations,
        args.cwd,
    )?;

    let store = StoreHandle::new(SessionDb::open(&config.db_path)?);
    let (client, events) =
        AgentClient::spawn(&config.agent_program, &config.agent_args, &config.cwd)
            .with_context(|| format!("Failed to start agent '{}'", config.agent_program))?;
    if let Some(pid) = client.pid() {
        println!(
            "{} {} (pid {})",
            console::style("Agent:").bold(),
            config.agent_program,
            pid
        );
    }

    let (mut orchestrator, controller) =
        Orchestrator::new(client, events, store, config.clone());

    // Stream agent activity to the terminal.
    let (observer_tx, mut observer_rx) = mpsc::channel(64);
    orchestrator.observe(observer_tx);
    let printer = tokio::spawn(async move {
        use std::io::Write;
        while let Some(event) = observer_rx.recv().await {
            match event {
                AgentEvent::MessageChunk { text } => {
                    print!("{}", text);
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::ToolCall(call) => {
                    let label = if call.title.is_empty() {
                        call.id.clone()
                    } else {
                        call.title.clone()
                    };
                    println!(
                        "\n  {} {} [{}]",
                        console::style("tool").cyan(),
                        label,
                        console::style(call.status.as_str()).dim()
                    );
                }
            }
        }
    });

    // Ctrl-C takes the cooperative stop path: abort the blocked prompt,
    // give the agent its grace period, then kill it.
    let ctrl = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("Stopping...");
            ctrl.stop();
        }
    });

    let outcome = orchestrator.run().await?;
    printer.abort();

    println!();
    match outcome {
        RunOutcome::SessionComplete => {
            println!("{} Session complete", console::style("done").green().bold());
        }
        RunOutcome::BudgetExhausted => {
            println!(
                "{} Iteration budget exhausted; run again to continue",
                console::style("paused").yellow().bold()
            );
        }
        RunOutcome::Stopped => {
            println!("{} Stopped; state is saved, run again to resume", console::style("stopped").dim());
        }
    }
    Ok(())
}
