//! Run-phase state machine and the control surface exposed to the UI/CLI.
//!
//! Only the driver task transitions the phase; controllers send commands
//! over a channel and observe the phase through watch receivers. This keeps
//! pause/resume free of shared mutable flags: queries never block and
//! commands take effect at the driver's next checkpoint.

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Starting,
    Running,
    PauseRequested,
    Paused,
    Complete,
    Errored,
    Stopped,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::PauseRequested => "pause_requested",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Errored => "errored",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    CancelPause,
    Resume,
    Stop,
}

/// Handle for driving and observing a running orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct Controller {
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<RunPhase>,
    busy: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl Controller {
    /// Ask the driver to pause at the next iteration boundary. Takes effect
    /// only after the in-flight prompt returns.
    pub fn request_pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    /// Withdraw a pause request that has not reached its boundary yet.
    pub fn cancel_pause(&self) {
        let _ = self.commands.send(Command::CancelPause);
    }

    /// Start the next iteration from `Paused`.
    pub fn resume(&self) {
        let _ = self.commands.send(Command::Resume);
    }

    /// Cancel the run: aborts a blocked prompt and shuts the agent down.
    /// This is the normal shutdown path, not an error.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
        self.cancel.cancel();
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.phase() == RunPhase::Paused
    }

    pub fn agent_busy(&self) -> bool {
        *self.busy.borrow()
    }
}

/// Driver-side ends of the control channels.
pub(crate) struct ControlLink {
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub phase: watch::Sender<RunPhase>,
    pub busy: watch::Sender<bool>,
    pub cancel: CancellationToken,
}

pub(crate) fn control_pair() -> (Controller, ControlLink) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (phase_tx, phase_rx) = watch::channel(RunPhase::Starting);
    let (busy_tx, busy_rx) = watch::channel(false);
    let cancel = CancellationToken::new();
    let controller = Controller {
        commands: cmd_tx,
        phase: phase_rx,
        busy: busy_rx,
        cancel: cancel.clone(),
    };
    let link = ControlLink {
        commands: cmd_rx,
        phase: phase_tx,
        busy: busy_tx,
        cancel,
    };
    (controller, link)
}
