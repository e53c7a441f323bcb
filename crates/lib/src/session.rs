//! Chat session and message types.
//!
//! A session holds an ordered message history (user/assistant turns). Assistant messages may
//! carry the tool invocations the remote flow reported while producing the reply.
//! Field names serialize in camelCase so persisted and exported JSON keep the web client's shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// Unique message identifier (opaque string).
pub type MessageId = String;

/// Title given to sessions before their first message.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Number of characters of the first message kept in a derived title.
pub const TITLE_MAX_CHARS: usize = 30;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One external capability the assistant used (tool name, input, rendered output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    /// Usually markdown. Non-string outputs are kept as their JSON text.
    #[serde(default, deserialize_with = "text_or_json")]
    pub tool_output: String,
}

impl ToolInvocation {
    /// Human-readable tool name: `web_search` -> `Web Search`.
    pub fn display_name(&self) -> String {
        self.tool
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The `input` field when the tool input is an object carrying one, else compact JSON.
    pub fn display_input(&self) -> String {
        match self.tool_input.get("input") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(v) if !v.is_null() && v.as_str().is_none() => v.to_string(),
            _ => self.tool_input.to_string(),
        }
    }
}

fn text_or_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// True while the assistant reply is still streaming.
    #[serde(default)]
    pub is_loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_tools: Option<Vec<ToolInvocation>>,
}

impl Message {
    pub fn user(content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: new_message_id(Role::User),
            role: Role::User,
            content: content.into(),
            timestamp: now,
            is_loading: false,
            used_tools: None,
        }
    }

    /// Empty assistant message that the stream will fill in.
    pub fn assistant_placeholder(now: DateTime<Utc>) -> Self {
        Self {
            id: new_message_id(Role::Assistant),
            role: Role::Assistant,
            content: String::new(),
            timestamp: now,
            is_loading: true,
            used_tools: None,
        }
    }

    /// Tool invocations attached to this message (empty when none).
    pub fn tools(&self) -> &[ToolInvocation] {
        self.used_tools.as_deref().unwrap_or(&[])
    }
}

/// A conversation thread: title, preview of the last message, and ordered history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    #[serde(default)]
    pub last_message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    /// New empty session with a generated id.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: new_session_id(),
            title: DEFAULT_TITLE.to_string(),
            last_message: String::new(),
            timestamp: now,
            messages: Vec::new(),
        }
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

/// Title derived from the first user message: first 30 characters, plus `...` when cut.
pub fn derive_title(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

pub fn new_session_id() -> SessionId {
    format!("session_{}", uuid::Uuid::new_v4().simple())
}

pub fn new_message_id(role: Role) -> MessageId {
    let suffix = match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    format!("msg_{}_{}", uuid::Uuid::new_v4().simple(), suffix)
}
