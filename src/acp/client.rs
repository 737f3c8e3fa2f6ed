//! Agent protocol client: owns the agent subprocess and the JSON-RPC
//! connection over its standard streams.
//!
//! The subprocess is spawned once per orchestrator run and one session
//! persists across every prompt. A dedicated read-loop task demultiplexes
//! stdout lines: responses complete the matching pending request, and
//! `session/update` notifications are pushed, in wire arrival order, onto a
//! bounded channel the consumer drains. Every notification that precedes a
//! response on the wire is enqueued before that response is released to its
//! waiter.
//!
//! The client never retries; retry policy belongs to the orchestrator.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::acp::wire::{AgentEvent, IncomingFrame, SessionNotification};
use crate::errors::AgentError;

/// Bound on buffered, undelivered notifications. A full buffer applies
/// back-pressure to the read loop rather than dropping events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type Waiter = oneshot::Sender<Result<Value, AgentError>>;

/// Why the read loop stopped; replayed to every waiter that arrives after.
#[derive(Debug, Clone)]
enum CloseReason {
    Eof,
    Protocol(String),
    Io(String),
}

impl CloseReason {
    fn to_error(&self) -> AgentError {
        match self {
            CloseReason::Eof => AgentError::ConnectionClosed,
            CloseReason::Protocol(msg) => AgentError::Protocol(msg.clone()),
            CloseReason::Io(msg) => AgentError::Transport(msg.clone()),
        }
    }
}

#[derive(Default)]
struct Pending {
    waiters: HashMap<u64, Waiter>,
    closed: Option<CloseReason>,
}

impl Pending {
    /// Fail every outstanding request and refuse new ones.
    fn close(&mut self, reason: CloseReason) {
        if self.closed.is_none() {
            self.closed = Some(reason.clone());
        }
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(reason.to_error()));
        }
    }
}

pub struct AgentClient {
    child: Child,
    stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    pending: Arc<Mutex<Pending>>,
    next_id: AtomicU64,
}

impl AgentClient {
    /// Spawn the agent subprocess and start the read loop. Returns the
    /// client plus the receiving end of the notification stream.
    pub fn spawn(
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<(Self, mpsc::Receiver<AgentEvent>), AgentError> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(AgentError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Transport("agent stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Transport("agent stdout unavailable".to_string()))?;

        // Agent diagnostics go to the log, not the operator's terminal.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "drover::agent", "{}", line);
                }
            });
        }

        let stdin = Arc::new(tokio::sync::Mutex::new(Some(stdin)));
        let pending: Arc<Mutex<Pending>> = Arc::new(Mutex::new(Pending::default()));
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(read_loop(
            stdout,
            Arc::clone(&pending),
            Arc::clone(&stdin),
            events_tx,
        ));

        let client = Self {
            child,
            stdin,
            pending,
            next_id: AtomicU64::new(1),
        };
        Ok((client, events_rx))
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// `initialize`: version and capability exchange. Must be the first call.
    pub async fn initialize(&self) -> Result<(), AgentError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": 1,
                    "clientCapabilities": {
                        "fs": { "readTextFile": false, "writeTextFile": false }
                    }
                }),
            )
            .await?;
        if !result.is_object() {
            return Err(AgentError::Protocol(format!(
                "initialize returned non-object result: {}",
                result
            )));
        }
        Ok(())
    }

    /// `session/new`: create the session the whole run will use.
    pub async fn new_session(&self, cwd: &str) -> Result<String, AgentError> {
        let result = self
            .request(
                "session/new",
                // mcpServers must be present even when empty.
                json!({ "cwd": cwd, "mcpServers": [] }),
            )
            .await?;
        result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AgentError::Protocol("session/new result missing sessionId".to_string())
            })
    }

    /// `session/set_model`: optional; callers may treat failure as non-fatal
    /// and keep the server's default model.
    pub async fn set_model(&self, session_id: &str, model_id: &str) -> Result<(), AgentError> {
        match self
            .request(
                "session/set_model",
                json!({ "sessionId": session_id, "modelId": model_id }),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(AgentError::Rpc { message, .. }) => Err(AgentError::ModelUnavailable {
                model: model_id.to_string(),
                reason: message,
            }),
            Err(e) => Err(e),
        }
    }

    /// `session/prompt`: blocks until the matching response arrives. The
    /// read loop keeps delivering notifications to the event channel the
    /// whole time; they are all enqueued before this returns.
    pub async fn prompt(&self, session_id: &str, text: &str) -> Result<String, AgentError> {
        let result = self
            .request(
                "session/prompt",
                json!({
                    "sessionId": session_id,
                    "prompt": [{ "type": "text", "text": text }]
                }),
            )
            .await?;
        result
            .get("stopReason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AgentError::Protocol("session/prompt result missing stopReason".to_string())
            })
    }

    /// Close the write side to request a graceful exit, then kill the
    /// subprocess if it outlives the grace period.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<(), AgentError> {
        {
            let mut stdin = self.stdin.lock().await;
            if let Some(mut s) = stdin.take() {
                let _ = s.shutdown().await;
            }
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(?status, "agent exited");
                Ok(())
            }
            Ok(Err(e)) => Err(AgentError::Transport(e.to_string())),
            Err(_) => {
                warn!("agent did not exit within grace period, killing");
                self.child
                    .start_kill()
                    .map_err(|e| AgentError::Transport(e.to_string()))?;
                let _ = self.child.wait().await;
                Ok(())
            }
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, AgentError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| AgentError::Transport("pending state poisoned".to_string()))?;
            if let Some(reason) = &pending.closed {
                return Err(reason.to_error());
            }
            pending.waiters.insert(id, tx);
        }

        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if let Err(e) = write_frame(&self.stdin, &frame).await {
            if let Ok(mut pending) = self.pending.lock() {
                pending.waiters.remove(&id);
            }
            return Err(e);
        }

        match rx.await {
            Ok(outcome) => outcome,
            // Read loop dropped the waiter without answering.
            Err(_) => Err(AgentError::ConnectionClosed),
        }
    }
}

async fn write_frame(
    stdin: &Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    frame: &Value,
) -> Result<(), AgentError> {
    let mut line = frame.to_string();
    line.push('\n');
    let mut guard = stdin.lock().await;
    let Some(stdin) = guard.as_mut() else {
        return Err(AgentError::ConnectionClosed);
    };
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| AgentError::Transport(e.to_string()))?;
    stdin
        .flush()
        .await
        .map_err(|e| AgentError::Transport(e.to_string()))
}

async fn read_loop(
    stdout: tokio::process::ChildStdout,
    pending: Arc<Mutex<Pending>>,
    stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    events: mpsc::Sender<AgentEvent>,
) {
    let close = |reason: CloseReason| {
        if let Ok(mut p) = pending.lock() {
            p.close(reason);
        }
    };

    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let frame: IncomingFrame = match serde_json::from_str(line) {
                    Ok(frame) => frame,
                    Err(e) => {
                        // One unparseable line poisons the whole stream: we
                        // can no longer trust framing.
                        warn!(error = %e, "malformed line from agent, aborting read loop");
                        close(CloseReason::Protocol(format!(
                            "malformed JSON from agent: {}",
                            e
                        )));
                        return;
                    }
                };
                dispatch_frame(frame, &pending, &stdin, &events).await;
            }
            Ok(None) => {
                debug!("agent stdout reached end of stream");
                close(CloseReason::Eof);
                return;
            }
            Err(e) => {
                close(CloseReason::Io(e.to_string()));
                return;
            }
        }
    }
}

async fn dispatch_frame(
    frame: IncomingFrame,
    pending: &Arc<Mutex<Pending>>,
    stdin: &Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    events: &mpsc::Sender<AgentEvent>,
) {
    match (frame.id, frame.method.as_deref()) {
        // Response to one of our requests.
        (Some(id), None) => {
            let outcome = match frame.error {
                Some(err) => Err(AgentError::Rpc {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(frame.result.unwrap_or(Value::Null)),
            };
            let waiter = pending.lock().ok().and_then(|mut p| p.waiters.remove(&id));
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(outcome);
                }
                None => debug!(id, "response for unknown or abandoned request"),
            }
        }
        // Notification.
        (None, Some("session/update")) => {
            let params = frame.params.unwrap_or(Value::Null);
            match serde_json::from_value::<SessionNotification>(params) {
                Ok(note) => {
                    if let Some(event) = note.update.into_event() {
                        // Consumer gone: keep reading so responses still
                        // resolve, just stop forwarding.
                        if events.send(event).await.is_err() {
                            debug!("event consumer dropped, discarding notification");
                        }
                    }
                }
                Err(e) => debug!(error = %e, "ignoring undecodable session/update"),
            }
        }
        (None, Some(method)) => {
            debug!(method, "ignoring unsolicited notification");
        }
        // Server-initiated request. We advertise no client capabilities, so
        // decline anything the agent asks of us.
        (Some(id), Some(method)) => {
            debug!(id, method, "declining server-initiated request");
            let reply = json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "method not supported" }
            });
            let _ = write_frame(stdin, &reply).await;
        }
        (None, None) => debug!("frame with neither id nor method, ignoring"),
    }
}
