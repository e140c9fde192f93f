// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};

/// One message in an agent's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message_type: MessageType,
    #[serde(default)]
    pub content: String,
}

impl AgentMessage {
    pub fn new(message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: None,
            message_type,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    UserMessage,
    AssistantMessage,
    ReasoningMessage,
    ToolCallMessage,
    ToolReturnMessage,
    SystemMessage,
    #[serde(other)]
    Other,
}

/// Everything an agent produced in response to one input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageReply {
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
}

impl MessageReply {
    /// Concatenated assistant output.
    pub fn assistant_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.message_type == MessageType::AssistantMessage)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of compacting an agent's history into a summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactionSummary {
    pub messages_before: usize,
    pub messages_after: usize,
}

/// Streaming callback invoked for each message as it arrives.
pub type MessageSink = dyn Fn(&AgentMessage) + Send + Sync;
