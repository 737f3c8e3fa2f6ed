//! Agent protocol: JSON-RPC 2.0 over the agent subprocess's stdio.

mod client;
pub mod wire;

pub use client::AgentClient;
pub use wire::{AgentEvent, ToolCallEvent, ToolCallStatus};
