//! Minimal A2A task and message surface.
//!
//! The agent messaging transport (task creation, message delivery, event
//! streaming) is an external collaborator. This module models only the
//! slice of it the payment extension reads and writes: an identifier, a
//! context, and a generic metadata map. Anything richer stays in the host
//! runtime.

use serde::{Deserialize, Serialize};

/// Identifier of an A2A task. The correlation id of the payment protocol.
pub type TaskId = String;

/// Generic metadata map attached to tasks and messages.
///
/// Protocol data is stored here under the `x402.payment.*` keys; typed
/// access goes through [`crate::metadata`].
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// The slice of an A2A task the payment extension operates on.
///
/// The task is the sole unit of ownership and concurrency: all payment
/// state for one payment attempt lives in its metadata, and callers must
/// serialize concurrent access to the same task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Conversation context this task belongs to.
    pub context_id: String,

    /// Attached metadata, including the `x402.payment.*` keys.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Task {
    /// Creates a task with empty metadata.
    #[must_use]
    pub fn new(id: impl Into<TaskId>, context_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context_id: context_id.into(),
            metadata: Metadata::new(),
        }
    }
}

/// The slice of an A2A message the payment extension operates on.
///
/// A payment submission message MUST carry the originating task's id in
/// `task_id`, copied verbatim from the requirement-bearing task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier.
    pub message_id: String,

    /// Correlation id: the task this message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,

    /// Conversation context, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    /// Attached metadata, including the `x402.payment.*` keys.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    /// Creates a message correlated to the given task.
    #[must_use]
    pub fn for_task(message_id: impl Into<String>, task: &Task) -> Self {
        Self {
            message_id: message_id.into(),
            task_id: Some(task.id.clone()),
            context_id: Some(task.context_id.clone()),
            metadata: Metadata::new(),
        }
    }
}
