//! Abstraction over the agent connection for testability.
//! Real implementation: `AgentClient`. Test double: mock sessions in the
//! driver's tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::acp::AgentClient;
use crate::errors::AgentError;

#[async_trait]
pub trait AgentSession: Send {
    async fn initialize(&mut self) -> Result<(), AgentError>;

    async fn new_session(&mut self, cwd: &str) -> Result<String, AgentError>;

    async fn set_model(&mut self, session_id: &str, model_id: &str) -> Result<(), AgentError>;

    /// Blocks until the agent finishes the turn; returns the stop reason.
    async fn prompt(&mut self, session_id: &str, text: &str) -> Result<String, AgentError>;

    async fn shutdown(&mut self, grace: Duration) -> Result<(), AgentError>;
}

#[async_trait]
impl AgentSession for AgentClient {
    async fn initialize(&mut self) -> Result<(), AgentError> {
        AgentClient::initialize(self).await
    }

    async fn new_session(&mut self, cwd: &str) -> Result<String, AgentError> {
        AgentClient::new_session(self, cwd).await
    }

    async fn set_model(&mut self, session_id: &str, model_id: &str) -> Result<(), AgentError> {
        AgentClient::set_model(self, session_id, model_id).await
    }

    async fn prompt(&mut self, session_id: &str, text: &str) -> Result<String, AgentError> {
        AgentClient::prompt(self, session_id, text).await
    }

    async fn shutdown(&mut self, grace: Duration) -> Result<(), AgentError> {
        AgentClient::shutdown(self, grace).await
    }
}
