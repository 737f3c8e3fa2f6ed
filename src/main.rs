use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "drover")]
#[command(version, about = "Durable iteration orchestrator for stdio coding agents")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the session database. Defaults to <data dir>/drover/sessions.db
    #[arg(long, global = true, env = "DROVER_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive the agent through iterations until the session completes
    Run {
        session: String,

        /// Agent command to spawn (speaks JSON-RPC over stdio)
        #[arg(long, env = "DROVER_AGENT", default_value = "claude-code-acp")]
        agent: String,

        /// Extra argument passed to the agent command (repeatable)
        #[arg(long = "agent-arg")]
        agent_args: Vec<String>,

        /// Model to request; falls back to the server default if unavailable
        #[arg(long)]
        model: Option<String>,

        #[arg(long, default_value = "32")]
        max_iterations: u32,

        /// Working directory handed to the agent session
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Print a session digest replayed from the event log
    Status { session: String },
    /// Permanently clear a session's event log
    Reset {
        session: String,
        #[arg(long)]
        force: bool,
    },
    /// Session write/read API invoked by agent tool calls
    Tool {
        #[command(subcommand)]
        command: ToolCommands,
    },
}

#[derive(Subcommand)]
pub enum ToolCommands {
    /// Add one task; prints its assigned id
    TaskAdd {
        #[arg(long)]
        session: String,
        #[arg(long)]
        content: String,
        /// 0 = critical .. 4 = backlog
        #[arg(long, default_value = "2")]
        priority: u8,
    },
    /// Add several tasks at once (repeat --content)
    TaskBatchAdd {
        #[arg(long)]
        session: String,
        #[arg(long = "content")]
        contents: Vec<String>,
        #[arg(long, default_value = "2")]
        priority: u8,
    },
    TaskStatus {
        #[arg(long)]
        session: String,
        #[arg(long)]
        id: u64,
        /// remaining | in_progress | completed | blocked | cancelled
        #[arg(long)]
        status: String,
    },
    TaskPriority {
        #[arg(long)]
        session: String,
        #[arg(long)]
        id: u64,
        #[arg(long)]
        priority: u8,
    },
    TaskDepends {
        #[arg(long)]
        session: String,
        #[arg(long)]
        id: u64,
        /// Task id this task waits on (repeatable)
        #[arg(long = "on")]
        depends_on: Vec<u64>,
    },
    TaskList {
        #[arg(long)]
        session: String,
    },
    /// The unblocked task to pick up next
    TaskNext {
        #[arg(long)]
        session: String,
    },
    NoteAdd {
        #[arg(long)]
        session: String,
        #[arg(long)]
        content: String,
        /// learning | stuck | tip | decision
        #[arg(long = "type", default_value = "learning")]
        note_type: String,
    },
    NoteUpdate {
        #[arg(long)]
        session: String,
        #[arg(long)]
        id: u64,
        #[arg(long)]
        content: String,
    },
    NoteDelete {
        #[arg(long)]
        session: String,
        #[arg(long)]
        id: u64,
    },
    NoteList {
        #[arg(long)]
        session: String,
    },
    /// Record a summary for the iteration in flight
    IterationSummary {
        #[arg(long)]
        session: String,
        #[arg(long)]
        summary: String,
        #[arg(long)]
        number: Option<u32>,
    },
    /// Mark the session finished; the orchestrator loop ends at the next boundary
    SessionComplete {
        #[arg(long)]
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "drover=debug" } else { "drover=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let db = cli.db.clone().unwrap_or_else(drover::config::default_db_path);

    match cli.command {
        Commands::Run {
            session,
            agent,
            agent_args,
            model,
            max_iterations,
            cwd,
        } => {
            cmd::run_orchestrator(cmd::run::RunArgs {
                session,
                db,
                agent,
                agent_args,
                model,
                max_iterations,
                cwd,
            })
            .await?
        }
        Commands::Status { session } => cmd::cmd_status(&db, &session).await?,
        Commands::Reset { session, force } => cmd::cmd_reset(&db, &session, force).await?,
        Commands::Tool { command } => cmd::cmd_tool(&db, command).await?,
    }

    Ok(())
}
