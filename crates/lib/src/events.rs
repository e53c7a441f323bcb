//! Engine events for front ends. Subscribers re-read state from the engine on each event.

use chrono::{DateTime, Utc};

use crate::session::{MessageId, SessionId};
use crate::status::ConnectivityStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// The session list changed (create, rename, delete, new messages).
    SessionsChanged,
    CurrentSessionChanged(Option<SessionId>),
    /// One message's content, tools, or loading flag changed.
    MessageUpdated {
        session_id: SessionId,
        message_id: MessageId,
    },
    StatusChanged(ConnectivityStatus),
    /// A send started (`Some`) or settled (`None`).
    LoadingChanged { started_at: Option<DateTime<Utc>> },
    /// The reply is taking longer than the configured threshold.
    SlowResponse {
        session_id: SessionId,
        message_id: MessageId,
    },
    Notice(Notice),
}
