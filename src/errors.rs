//! Typed error hierarchy for the drover orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `AgentError` — agent subprocess transport and protocol failures
//! - `StoreError` — event-log durability failures
//! - `OrchestratorError` — iteration-loop failures
//!
//! The agent client and the store never retry internally; retry policy lives
//! in the orchestrator driver so it can be inspected and tested in one place.

use thiserror::Error;

/// Errors from the agent protocol client.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Agent transport error: {0}")]
    Transport(String),

    #[error("Agent connection closed")]
    ConnectionClosed,

    #[error("Agent protocol error: {0}")]
    Protocol(String),

    #[error("Agent returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Model {model} unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },
}

impl AgentError {
    /// Whether the orchestrator may retry the iteration that produced this
    /// error. RPC-level rejections and spawn failures are not transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Transport(_) | AgentError::ConnectionClosed | AgentError::Protocol(_)
        )
    }
}

/// Errors from the event-sourced session store. Durability failures are
/// always fatal to the caller; no event may be silently lost or reordered.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open session database at {path}: {detail}")]
    Open {
        path: std::path::PathBuf,
        detail: String,
    },

    #[error("Failed to append event: {0}")]
    Write(#[source] rusqlite::Error),

    #[error("Failed to read event log: {0}")]
    Read(#[source] rusqlite::Error),

    #[error("Corrupt event payload at seq {seq}: {detail}")]
    Corrupt { seq: u64, detail: String },

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Store task panicked: {0}")]
    TaskPanicked(String),
}

/// Errors from the iteration orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Agent failure: {0}")]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Iteration failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: AgentError,
    },

    #[error("Run cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_error_spawn_is_matchable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "agent not found");
        let err = AgentError::Spawn(io_err);
        match &err {
            AgentError::Spawn(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            _ => panic!("Expected Spawn variant"),
        }
    }

    #[test]
    fn agent_error_rpc_carries_code_and_message() {
        let err = AgentError::Rpc {
            code: -32601,
            message: "method not found".into(),
        };
        assert!(err.to_string().contains("-32601"));
        assert!(err.to_string().contains("method not found"));
    }

    #[test]
    fn transport_and_protocol_errors_are_retryable() {
        assert!(AgentError::Transport("broken pipe".into()).is_retryable());
        assert!(AgentError::ConnectionClosed.is_retryable());
        assert!(AgentError::Protocol("bad json".into()).is_retryable());
    }

    #[test]
    fn rpc_and_model_errors_are_not_retryable() {
        let rpc = AgentError::Rpc {
            code: -32000,
            message: "refused".into(),
        };
        assert!(!rpc.is_retryable());
        let model = AgentError::ModelUnavailable {
            model: "gpt-oss".into(),
            reason: "unknown model".into(),
        };
        assert!(!model.is_retryable());
    }

    #[test]
    fn orchestrator_error_converts_from_agent_error() {
        let err: OrchestratorError = AgentError::ConnectionClosed.into();
        assert!(matches!(
            err,
            OrchestratorError::Agent(AgentError::ConnectionClosed)
        ));
    }

    #[test]
    fn retries_exhausted_carries_attempts_and_source() {
        let err = OrchestratorError::RetriesExhausted {
            attempts: 3,
            source: AgentError::ConnectionClosed,
        };
        assert!(err.to_string().contains('3'));
        match err {
            OrchestratorError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, AgentError::ConnectionClosed));
            }
            _ => panic!("Expected RetriesExhausted"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&AgentError::ConnectionClosed);
        assert_std_error(&StoreError::LockPoisoned);
        assert_std_error(&OrchestratorError::Cancelled);
    }
}
