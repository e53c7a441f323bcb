//! Reply accumulation for one streamed assistant message.
//!
//! Tokens append to an accumulator that only grows. A tool-activity signal shows a trailing
//! `Thinking...` marker in the displayed content, never in the accumulator, and metadata
//! attaches the tool list without touching content.

use serde::{Deserialize, Serialize};

use crate::llm::frames::tools_from;
use crate::llm::StreamEvent;
use crate::session::ToolInvocation;

/// Marker appended to displayed content while tools are running.
pub const THINKING_MARKER: &str = "\n\nThinking...";

/// How to recover tool invocations when tools were signalled but no metadata listed them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolRecovery {
    /// Parse the whole reply as JSON and read its `usedTools` field.
    #[default]
    FromContent,
    /// Trust metadata events only.
    MetadataOnly,
}

/// Incremental change to apply to the in-flight message.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Replace the displayed content.
    Content(String),
    /// Attach the tool list.
    Tools(Vec<ToolInvocation>),
}

/// Final content and tools for a finished reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub used_tools: Option<Vec<ToolInvocation>>,
}

#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    thinking_shown: bool,
    tools: Vec<ToolInvocation>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated content so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn apply(&mut self, event: StreamEvent) -> Option<Patch> {
        match event {
            StreamEvent::Token(token) => {
                self.content.push_str(&token);
                Some(Patch::Content(self.content.clone()))
            }
            StreamEvent::UsedToolsSignal => {
                self.thinking_shown = true;
                Some(Patch::Content(format!("{}{}", self.content, THINKING_MARKER)))
            }
            StreamEvent::Metadata(Some(tools)) => {
                self.tools = tools.clone();
                Some(Patch::Tools(tools))
            }
            StreamEvent::Metadata(None) | StreamEvent::Unknown => None,
        }
    }

    pub fn finish(mut self, recovery: ToolRecovery) -> Completion {
        if self.thinking_shown && self.tools.is_empty() && recovery == ToolRecovery::FromContent {
            match serde_json::from_str::<serde_json::Value>(&self.content) {
                Ok(value) => {
                    if let Some(tools) = tools_from(&value) {
                        log::debug!("recovered {} tool invocations from reply body", tools.len());
                        self.tools = tools;
                    }
                }
                Err(e) => log::debug!("reply body is not JSON, no tools recovered: {}", e),
            }
        }
        let content = self.content.replace(THINKING_MARKER, "");
        let used_tools = if self.tools.is_empty() {
            None
        } else {
            Some(self.tools)
        };
        Completion {
            content,
            used_tools,
        }
    }
}
