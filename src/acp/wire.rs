//! Wire shapes for the agent protocol: JSON-RPC 2.0, newline-delimited,
//! over the agent subprocess's standard streams.
//!
//! Incoming lines are demultiplexed by shape: a frame with an `id` and no
//! `method` is a response; `method == "session/update"` with no `id` is a
//! notification; a frame carrying both is a server-initiated request.

use serde::Deserialize;
use serde_json::Value;

/// One parsed line from the agent's stdout.
#[derive(Debug, Deserialize)]
pub struct IncomingFrame {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Params of a `session/update` notification.
#[derive(Debug, Deserialize)]
pub struct SessionNotification {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub update: SessionUpdate,
}

/// The `sessionUpdate` discriminator. Unknown discriminators deserialize to
/// `Unknown` and are dropped, so newer agents can add update kinds freely.
#[derive(Debug, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    AgentMessageChunk {
        content: ContentBlock,
    },

    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        kind: String,
        #[serde(default = "pending_status")]
        status: String,
        #[serde(default, rename = "rawInput")]
        raw_input: Option<Value>,
    },

    ToolCallUpdate {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        status: String,
        #[serde(default)]
        content: Option<Vec<ToolCallContent>>,
        #[serde(default, rename = "rawOutput")]
        raw_output: Option<Value>,
    },

    AvailableCommandsUpdate,

    #[serde(other)]
    Unknown,
}

fn pending_status() -> String {
    "pending".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },

    #[serde(other)]
    Unknown,
}

/// Entry of a `tool_call_update.content` array; completed tool calls carry
/// their output at `content[0].content.text`.
#[derive(Debug, Deserialize)]
pub struct ToolCallContent {
    #[serde(default)]
    pub content: Option<ContentBlock>,
}

/// Typed event stream handed to consumers, in wire arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    MessageChunk { text: String },
    ToolCall(ToolCallEvent),
}

/// One step of a tool-call lifecycle. Repeated events share the same id;
/// consumers correlate them for in-place updates, the client does not
/// deduplicate.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallEvent {
    pub id: String,
    pub title: String,
    pub kind: String,
    pub status: ToolCallStatus,
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Other(String),
}

impl ToolCallStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Other(s) => s,
        }
    }
}

impl SessionUpdate {
    /// Lower a notification into the event consumers see, or `None` for
    /// updates the client ignores.
    pub fn into_event(self) -> Option<AgentEvent> {
        match self {
            SessionUpdate::AgentMessageChunk {
                content: ContentBlock::Text { text },
            } => Some(AgentEvent::MessageChunk { text }),
            SessionUpdate::AgentMessageChunk { .. } => None,
            SessionUpdate::ToolCall {
                tool_call_id,
                title,
                kind,
                status,
                ..
            } => Some(AgentEvent::ToolCall(ToolCallEvent {
                id: tool_call_id,
                title,
                kind,
                status: ToolCallStatus::parse(&status),
                output: None,
            })),
            SessionUpdate::ToolCallUpdate {
                tool_call_id,
                status,
                content,
                ..
            } => {
                let status = ToolCallStatus::parse(&status);
                // Output only materializes once the call completes.
                let output = if status == ToolCallStatus::Completed {
                    content.and_then(|blocks| {
                        blocks.into_iter().next().and_then(|b| match b.content {
                            Some(ContentBlock::Text { text }) => Some(text),
                            _ => None,
                        })
                    })
                } else {
                    None
                };
                Some(AgentEvent::ToolCall(ToolCallEvent {
                    id: tool_call_id,
                    title: String::new(),
                    kind: String::new(),
                    status,
                    output,
                }))
            }
            SessionUpdate::AvailableCommandsUpdate | SessionUpdate::Unknown => None,
        }
    }
}
