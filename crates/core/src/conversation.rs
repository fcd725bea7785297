//! Conversation model
//!
//! A conversation is an ordered, append-only list of chat messages. Tool
//! results carry the outcome of one SQL execution and are shown to the model
//! as user turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix every failing execution observation starts with.
pub const FAILURE_MARKER: &str = "SQL execution failed:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    #[serde(alias = "USER")]
    User,
    #[serde(alias = "ASSISTANT")]
    Assistant,
    #[serde(alias = "TOOL_RESULT")]
    ToolResult,
    /// Only found in older persisted history; never sent to the model.
    #[serde(alias = "SYSTEM")]
    System,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::ToolResult => "tool_result",
            ChatRole::System => "system",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Explicit outcome of a tool result. Absent on history written before
    /// the flag existed; `is_failure` then falls back to the content marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ChatMessage {
    fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(Utc::now()),
            failed: None,
            metadata: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn tool_success(content: impl Into<String>) -> Self {
        Self {
            failed: Some(false),
            ..Self::new(ChatRole::ToolResult, content)
        }
    }

    pub fn tool_failure(content: impl Into<String>) -> Self {
        Self {
            failed: Some(true),
            ..Self::new(ChatRole::ToolResult, content)
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == ChatRole::ToolResult
    }

    pub fn is_failure(&self) -> bool {
        if !self.is_tool_result() {
            return false;
        }
        match self.failed {
            Some(failed) => failed,
            None => self.content.trim_start().starts_with(FAILURE_MARKER),
        }
    }

    pub fn is_success(&self) -> bool {
        self.is_tool_result() && !self.is_failure()
    }

    /// String field from the metadata bag.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

/// Append-only message log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChatMessage> {
        self.messages.iter()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }

    /// Last message that is not a system note.
    pub fn last_turn(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role != ChatRole::System)
    }

    pub fn last_tool_result(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.is_tool_result())
    }

    /// Most recent assistant messages, newest first.
    pub fn recent_assistant(&self, n: usize) -> impl Iterator<Item = &ChatMessage> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == ChatRole::Assistant)
            .take(n)
    }
}

impl From<Vec<ChatMessage>> for Conversation {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a ChatMessage;
    type IntoIter = std::slice::Iter<'a, ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
