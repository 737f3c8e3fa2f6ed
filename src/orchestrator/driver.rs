//! The iteration loop.
//!
//! One driver task owns the run: it replays the store to resume, performs
//! the protocol handshake once, then loops prompt/record until the session
//! completes, the budget runs out, the operator stops it, or an error
//! survives the retry bound. While a prompt is in flight the driver keeps
//! draining agent events and control commands, so pause requests become
//! visible immediately but only take effect at the iteration boundary.

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::AgentEvent;
use crate::config::Config;
use crate::errors::{AgentError, OrchestratorError};
use crate::orchestrator::control::{Command, ControlLink, Controller, RunPhase, control_pair};
use crate::orchestrator::session::AgentSession;
use crate::prompt;
use crate::store::{EventPayload, StoreHandle};

const SUMMARY_MAX_CHARS: usize = 500;

/// How a run ended. Anything else surfaces as an `OrchestratorError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The agent recorded a session-complete event.
    SessionComplete,
    /// The iteration budget ran out first.
    BudgetExhausted,
    /// Stopped by the operator; the normal shutdown path.
    Stopped,
}

pub struct Orchestrator<A: AgentSession> {
    agent: A,
    events: mpsc::Receiver<AgentEvent>,
    store: StoreHandle,
    config: Config,
    link: ControlLink,
    observer: Option<mpsc::Sender<AgentEvent>>,
    session_id: String,
}

impl<A: AgentSession> Orchestrator<A> {
    pub fn new(
        agent: A,
        events: mpsc::Receiver<AgentEvent>,
        store: StoreHandle,
        config: Config,
    ) -> (Self, Controller) {
        let (controller, link) = control_pair();
        let orchestrator = Self {
            agent,
            events,
            store,
            config,
            link,
            observer: None,
            session_id: String::new(),
        };
        (orchestrator, controller)
    }

    /// Forward agent events to an external consumer (the UI layer). Events
    /// keep flowing to the summary transcript either way.
    pub fn observe(&mut self, tx: mpsc::Sender<AgentEvent>) {
        self.observer = Some(tx);
    }

    /// Run to a terminal state. Always shuts the agent subprocess down on
    /// the way out, including on error and cancellation.
    pub async fn run(mut self) -> Result<RunOutcome, OrchestratorError> {
        let result = self.run_loop().await;
        self.link.busy.send_replace(false);
        let phase = match &result {
            Ok(RunOutcome::Stopped) | Err(OrchestratorError::Cancelled) => RunPhase::Stopped,
            Ok(_) => RunPhase::Complete,
            Err(_) => RunPhase::Errored,
        };
        self.link.phase.send_replace(phase);

        if let Err(e) = self.agent.shutdown(self.config.shutdown_grace).await {
            warn!(error = %e, "agent shutdown reported an error");
        }

        match result {
            Err(OrchestratorError::Cancelled) => Ok(RunOutcome::Stopped),
            other => other,
        }
    }

    async fn run_loop(&mut self) -> Result<RunOutcome, OrchestratorError> {
        let session = self.config.session.clone();
        let state = self.store.replay(&session).await?;
        info!(
            session = %session,
            iteration = state.current_iteration,
            tasks = state.tasks.len(),
            "resuming session from event log"
        );
        if state.complete {
            info!("session already complete, nothing to do");
            return Ok(RunOutcome::SessionComplete);
        }

        self.handshake().await?;
        self.link.phase.send_replace(RunPhase::Running);

        loop {
            self.drain_commands();
            if self.link.cancel.is_cancelled() {
                return Ok(RunOutcome::Stopped);
            }
            if *self.link.phase.borrow() == RunPhase::PauseRequested {
                self.link.phase.send_replace(RunPhase::Paused);
                info!("paused");
            }
            if *self.link.phase.borrow() == RunPhase::Paused {
                self.wait_for_resume().await;
                if self.link.cancel.is_cancelled() {
                    return Ok(RunOutcome::Stopped);
                }
            }

            let state = self.store.replay(&session).await?;
            if state.complete {
                info!("session complete");
                return Ok(RunOutcome::SessionComplete);
            }
            if state.current_iteration >= self.config.max_iterations {
                info!(
                    max_iterations = self.config.max_iterations,
                    "iteration budget exhausted"
                );
                return Ok(RunOutcome::BudgetExhausted);
            }

            let iteration = state.current_iteration + 1;
            let text = prompt::render(&state, &session, iteration, self.config.max_iterations);
            info!(iteration, "starting iteration");
            let transcript = self.prompt_with_retry(&text).await?;

            // Prefer a summary the agent recorded itself this iteration;
            // fall back to the assistant transcript.
            let after = self.store.replay(&session).await?;
            if after.current_iteration < iteration {
                let summary = summarize(&transcript);
                self.store
                    .append(
                        &session,
                        EventPayload::IterationSummary {
                            number: iteration,
                            summary,
                        },
                    )
                    .await?;
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), OrchestratorError> {
        self.agent.initialize().await?;
        let session_id = self.agent.new_session(&self.config.cwd_str()).await?;
        debug!(session_id = %session_id, "agent session created");

        if let Some(model) = self.config.model.clone() {
            match self.agent.set_model(&session_id, &model).await {
                Ok(()) => info!(model = %model, "model selected"),
                Err(AgentError::ModelUnavailable { model, reason }) => {
                    warn!(model = %model, reason = %reason, "model unavailable, keeping server default");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.session_id = session_id;
        Ok(())
    }

    async fn prompt_with_retry(&mut self, text: &str) -> Result<String, OrchestratorError> {
        let mut attempt: u32 = 1;
        loop {
            match self.run_prompt(text).await {
                Ok(transcript) => return Ok(transcript),
                Err(OrchestratorError::Agent(e)) if e.is_retryable() => {
                    if attempt >= self.config.max_attempts {
                        return Err(OrchestratorError::RetriesExhausted {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    let backoff = self.config.retry_base * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "iteration attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.link.cancel.cancelled() => {
                            return Err(OrchestratorError::Cancelled);
                        }
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One prompt call. Selects over the prompt future, the agent event
    /// stream, control commands, and cancellation; notifications are
    /// delivered before the prompt result is surfaced.
    async fn run_prompt(&mut self, text: &str) -> Result<String, OrchestratorError> {
        if self.link.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        self.link.busy.send_replace(true);
        let mut transcript = String::new();

        let result = {
            let agent = &mut self.agent;
            let events = &mut self.events;
            let commands = &mut self.link.commands;
            let phase = &self.link.phase;
            let cancel = &self.link.cancel;
            let observer = self.observer.clone();

            let mut fut = agent.prompt(&self.session_id, text);

            let mut events_open = true;
            let mut commands_open = true;
            let outcome = loop {
                tokio::select! {
                    res = &mut fut => break Some(res),
                    maybe = events.recv(), if events_open => match maybe {
                        Some(event) => {
                            absorb_event(&mut transcript, observer.as_ref(), event).await;
                        }
                        None => events_open = false,
                    },
                    maybe = commands.recv(), if commands_open => match maybe {
                        Some(cmd) => apply_command(phase, cancel, cmd),
                        None => commands_open = false,
                    },
                    _ = cancel.cancelled() => break None,
                }
            };
            drop(fut);

            // Everything the read loop enqueued before the response must be
            // delivered before the result is. After cancellation, nothing
            // more is delivered at all.
            if outcome.is_some() {
                while let Ok(event) = events.try_recv() {
                    absorb_event(&mut transcript, observer.as_ref(), event).await;
                }
            }
            outcome
        };

        self.link.busy.send_replace(false);
        match result {
            None => Err(OrchestratorError::Cancelled),
            Some(Ok(stop_reason)) => {
                debug!(stop_reason = %stop_reason, "prompt finished");
                Ok(transcript)
            }
            Some(Err(e)) => Err(OrchestratorError::Agent(e)),
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.link.commands.try_recv() {
            apply_command(&self.link.phase, &self.link.cancel, cmd);
        }
    }

    async fn wait_for_resume(&mut self) {
        loop {
            tokio::select! {
                _ = self.link.cancel.cancelled() => return,
                cmd = self.link.commands.recv() => match cmd {
                    Some(Command::Resume) => {
                        self.link.phase.send_replace(RunPhase::Running);
                        info!("resumed");
                        return;
                    }
                    Some(Command::Stop) => {
                        self.link.cancel.cancel();
                        return;
                    }
                    Some(Command::Pause) | Some(Command::CancelPause) => {}
                    None => {
                        // Every controller is gone; nothing can resume us.
                        self.link.cancel.cancel();
                        return;
                    }
                },
            }
        }
    }
}

fn apply_command(phase: &watch::Sender<RunPhase>, cancel: &CancellationToken, cmd: Command) {
    let current = *phase.borrow();
    match (cmd, current) {
        (Command::Pause, RunPhase::Running) => {
            phase.send_replace(RunPhase::PauseRequested);
            info!("pause requested");
        }
        (Command::CancelPause, RunPhase::PauseRequested) => {
            phase.send_replace(RunPhase::Running);
            info!("pause request cancelled");
        }
        (Command::Stop, _) => cancel.cancel(),
        _ => debug!(?cmd, phase = current.as_str(), "command ignored in current phase"),
    }
}

async fn absorb_event(
    transcript: &mut String,
    observer: Option<&mpsc::Sender<AgentEvent>>,
    event: AgentEvent,
) {
    if let AgentEvent::MessageChunk { text } = &event {
        transcript.push_str(text);
    }
    if let Some(tx) = observer {
        let _ = tx.send(event).await;
    }
}

fn summarize(transcript: &str) -> String {
    let trimmed = transcript.trim();
    if trimmed.is_empty() {
        return "(no assistant output recorded)".to_string();
    }
    let mut summary: String = trimmed.chars().take(SUMMARY_MAX_CHARS).collect();
    if trimmed.chars().count() > SUMMARY_MAX_CHARS {
        summary.push_str("...");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use crate::store::SessionDb;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone)]
    struct MockAgent {
        delay: Duration,
        failures: Arc<Mutex<VecDeque<AgentError>>>,
        prompts: Arc<AtomicU32>,
        shutdowns: Arc<AtomicU32>,
        /// Append session-complete after this many prompts, as an agent
        /// tool invocation would.
        complete_after: Option<(StoreHandle, String, u32)>,
    }

    impl MockAgent {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                failures: Arc::new(Mutex::new(VecDeque::new())),
                prompts: Arc::new(AtomicU32::new(0)),
                shutdowns: Arc::new(AtomicU32::new(0)),
                complete_after: None,
            }
        }

        fn failing_with(self, failures: Vec<AgentError>) -> Self {
            *self.failures.lock().unwrap() = failures.into();
            self
        }

        fn completing_after(mut self, store: StoreHandle, session: &str, prompts: u32) -> Self {
            self.complete_after = Some((store, session.to_string(), prompts));
            self
        }
    }

    #[async_trait]
    impl AgentSession for MockAgent {
        async fn initialize(&mut self) -> Result<(), AgentError> {
            Ok(())
        }

        async fn new_session(&mut self, _cwd: &str) -> Result<String, AgentError> {
            Ok("mock-session".to_string())
        }

        async fn set_model(&mut self, _session_id: &str, _model_id: &str) -> Result<(), AgentError> {
            Ok(())
        }

        async fn prompt(&mut self, _session_id: &str, _text: &str) -> Result<String, AgentError> {
            let n = self.prompts.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if let Some(failure) = self.failures.lock().unwrap().pop_front() {
                return Err(failure);
            }
            if let Some((store, session, after)) = &self.complete_after {
                if n >= *after {
                    store
                        .append(session, EventPayload::SessionComplete)
                        .await
                        .unwrap();
                }
            }
            Ok("end_turn".to_string())
        }

        async fn shutdown(&mut self, _grace: Duration) -> Result<(), AgentError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_config(max_iterations: u32) -> Config {
        Config {
            session: "t".into(),
            db_path: PathBuf::from(":memory:"),
            agent_program: "mock".into(),
            agent_args: vec![],
            cwd: PathBuf::from("."),
            model: None,
            max_iterations,
            max_attempts: 3,
            retry_base: Duration::from_millis(1),
            shutdown_grace: Duration::from_millis(100),
        }
    }

    fn test_store() -> StoreHandle {
        StoreHandle::new(SessionDb::open_in_memory().unwrap())
    }

    fn build(
        agent: MockAgent,
        store: &StoreHandle,
        max_iterations: u32,
    ) -> (Orchestrator<MockAgent>, Controller) {
        let (_tx, rx) = mpsc::channel(8);
        Orchestrator::new(agent, rx, store.clone(), test_config(max_iterations))
    }

    #[tokio::test]
    async fn test_budget_exhaustion_appends_summaries() {
        let store = test_store();
        let agent = MockAgent::new(Duration::ZERO);
        let prompts = agent.prompts.clone();
        let (orchestrator, _controller) = build(agent, &store, 2);

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::BudgetExhausted);
        assert_eq!(prompts.load(Ordering::SeqCst), 2);

        let state = store.replay("t").await.unwrap();
        assert_eq!(state.current_iteration, 2);
        assert_eq!(state.iterations.len(), 2);
        assert!(!state.complete);
    }

    #[tokio::test]
    async fn test_session_complete_ends_run() {
        let store = test_store();
        store
            .append(
                "t",
                EventPayload::TaskAdd {
                    content: "only task".into(),
                    priority: 0,
                },
            )
            .await
            .unwrap();
        let agent = MockAgent::new(Duration::ZERO).completing_after(store.clone(), "t", 1);
        let shutdowns = agent.shutdowns.clone();
        let (orchestrator, _controller) = build(agent, &store, 10);

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::SessionComplete);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

        let state = store.replay("t").await.unwrap();
        assert!(state.complete);
        assert_eq!(state.current_iteration, 1);
    }

    #[tokio::test]
    async fn test_already_complete_session_does_not_prompt() {
        let store = test_store();
        store.append("t", EventPayload::SessionComplete).await.unwrap();
        let agent = MockAgent::new(Duration::ZERO);
        let prompts = agent.prompts.clone();
        let (orchestrator, _controller) = build(agent, &store, 10);

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::SessionComplete);
        assert_eq!(prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = test_store();
        let agent = MockAgent::new(Duration::ZERO).failing_with(vec![
            AgentError::ConnectionClosed,
            AgentError::Protocol("garbage line".into()),
        ]);
        let prompts = agent.prompts.clone();
        let (orchestrator, _controller) = build(agent, &store, 1);
        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::BudgetExhausted);
        // Two failures then one success, all within a single iteration.
        assert_eq!(prompts.load(Ordering::SeqCst), 3);
        assert_eq!(store.replay("t").await.unwrap().current_iteration, 1);
    }

    #[tokio::test]
    async fn test_retry_bound_surfaces_last_error() {
        let store = test_store();
        let agent = MockAgent::new(Duration::ZERO).failing_with(vec![
            AgentError::ConnectionClosed,
            AgentError::ConnectionClosed,
            AgentError::ConnectionClosed,
        ]);
        let (orchestrator, controller) = build(agent, &store, 5);

        let err = orchestrator.run().await.unwrap_err();
        match err {
            OrchestratorError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, AgentError::ConnectionClosed));
            }
            other => panic!("Expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(controller.phase(), RunPhase::Errored);
    }

    #[tokio::test]
    async fn test_pause_takes_effect_at_iteration_boundary() {
        let store = test_store();
        let agent = MockAgent::new(Duration::from_millis(150));
        let (orchestrator, controller) = build(agent, &store, 10);
        let handle = tokio::spawn(orchestrator.run());

        // Mid-prompt: the request is acknowledged but not yet in effect.
        tokio::time::sleep(Duration::from_millis(40)).await;
        controller.request_pause();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!controller.is_paused());
        assert!(controller.agent_busy());
        assert_eq!(controller.phase(), RunPhase::PauseRequested);

        // After the prompt returns the boundary is reached.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(controller.is_paused());
        assert!(!controller.agent_busy());

        store.append("t", EventPayload::SessionComplete).await.unwrap();
        controller.resume();
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, RunOutcome::SessionComplete);
    }

    #[tokio::test]
    async fn test_cancel_pause_never_pauses() {
        let store = test_store();
        let agent =
            MockAgent::new(Duration::from_millis(100)).completing_after(store.clone(), "t", 2);
        let (orchestrator, controller) = build(agent, &store, 10);
        let handle = tokio::spawn(orchestrator.run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        controller.request_pause();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.phase(), RunPhase::PauseRequested);
        controller.cancel_pause();

        // Sample across both iterations; the run must never pause.
        for _ in 0..30 {
            assert!(!controller.is_paused());
            tokio::time::sleep(Duration::from_millis(10)).await;
            if controller.phase() == RunPhase::Complete {
                break;
            }
        }
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, RunOutcome::SessionComplete);
    }

    #[tokio::test]
    async fn test_stop_aborts_blocked_prompt() {
        let store = test_store();
        let agent = MockAgent::new(Duration::from_secs(60));
        let shutdowns = agent.shutdowns.clone();
        let (orchestrator, controller) = build(agent, &store, 10);
        let handle = tokio::spawn(orchestrator.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.stop();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("stop must unblock the run promptly")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
        assert_eq!(controller.phase(), RunPhase::Stopped);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_agent_summary_is_preferred_over_fallback() {
        let store = test_store();
        // The "agent" records its own iteration summary mid-prompt, as the
        // tool subprocess would.
        struct SummarizingAgent {
            store: StoreHandle,
        }

        #[async_trait]
        impl AgentSession for SummarizingAgent {
            async fn initialize(&mut self) -> Result<(), AgentError> {
                Ok(())
            }
            async fn new_session(&mut self, _cwd: &str) -> Result<String, AgentError> {
                Ok("mock-session".to_string())
            }
            async fn set_model(
                &mut self,
                _session_id: &str,
                _model_id: &str,
            ) -> Result<(), AgentError> {
                Ok(())
            }
            async fn prompt(&mut self, _session_id: &str, _text: &str) -> Result<String, AgentError> {
                self.store
                    .append(
                        "t",
                        EventPayload::IterationSummary {
                            number: 1,
                            summary: "agent-authored".into(),
                        },
                    )
                    .await
                    .unwrap();
                self.store
                    .append("t", EventPayload::SessionComplete)
                    .await
                    .unwrap();
                Ok("end_turn".to_string())
            }
            async fn shutdown(&mut self, _grace: Duration) -> Result<(), AgentError> {
                Ok(())
            }
        }

        let agent = SummarizingAgent {
            store: store.clone(),
        };
        let (_tx, rx) = mpsc::channel(8);
        let (orchestrator, _controller) =
            Orchestrator::new(agent, rx, store.clone(), test_config(10));

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::SessionComplete);

        let state = store.replay("t").await.unwrap();
        assert_eq!(state.iterations.len(), 1);
        assert_eq!(state.iterations[0].summary, "agent-authored");
    }

    #[tokio::test]
    async fn test_events_feed_fallback_summary() {
        let store = test_store();
        let (tx, rx) = mpsc::channel(8);
        let agent = MockAgent::new(Duration::from_millis(30));
        let (orchestrator, _controller) =
            Orchestrator::new(agent, rx, store.clone(), test_config(1));

        tx.send(AgentEvent::MessageChunk {
            text: "did the thing".into(),
        })
        .await
        .unwrap();
        drop(tx);

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::BudgetExhausted);
        let state = store.replay("t").await.unwrap();
        assert_eq!(state.iterations[0].summary, "did the thing");
    }

    #[test]
    fn test_summarize_truncates_on_char_boundary() {
        let long: String = "x".repeat(SUMMARY_MAX_CHARS + 10);
        let summary = summarize(&long);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS + 3);
        assert_eq!(summarize("   "), "(no assistant output recorded)");
    }

    #[tokio::test]
    async fn test_status_event_monotonicity_survives_run() {
        // Terminal statuses written by tool processes stay terminal across
        // the driver's own appends.
        let store = test_store();
        let id = store
            .append(
                "t",
                EventPayload::TaskAdd {
                    content: "task".into(),
                    priority: 2,
                },
            )
            .await
            .unwrap();
        store
            .append(
                "t",
                EventPayload::TaskStatus {
                    id,
                    status: TaskStatus::Completed,
                },
            )
            .await
            .unwrap();
        store
            .append(
                "t",
                EventPayload::TaskStatus {
                    id,
                    status: TaskStatus::Remaining,
                },
            )
            .await
            .unwrap();

        let agent = MockAgent::new(Duration::ZERO).completing_after(store.clone(), "t", 1);
        let (orchestrator, _controller) = build(agent, &store, 5);
        orchestrator.run().await.unwrap();

        let state = store.replay("t").await.unwrap();
        assert_eq!(state.tasks[&id].status, TaskStatus::Completed);
    }
}
