//! In-memory session registry: ordered sessions (newest first) plus the current selection.
//!
//! The registry is a plain state container. Every command re-checks the selection invariant
//! (the current id, when set, names an existing session) before returning. Callers that share
//! it across tasks wrap it in a lock so no one observes a half-applied command.

use chrono::{DateTime, Utc};

use crate::session::{derive_title, Message, MessageId, Session, SessionId};
use crate::stream::THINKING_MARKER;

/// Outcome of resolving which session a send should target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    Active(SessionId),
    NoActiveSession,
}

/// What to do when a send finds no active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPolicy {
    /// Create a fresh session and select it.
    #[default]
    AutoCreate,
    /// Report `NoActiveSession` and leave the registry untouched.
    RequireExisting,
}

/// Ids produced when a user message and its assistant placeholder are appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub session_id: SessionId,
    pub user_message_id: MessageId,
    pub assistant_message_id: MessageId,
    /// True when the session was created for this exchange.
    pub created_session: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
    current_session_id: Option<SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from loaded state, repairing a stale selection.
    pub fn from_parts(sessions: Vec<Session>, current_session_id: Option<SessionId>) -> Self {
        let mut registry = Self {
            sessions,
            current_session_id,
        };
        registry.repair();
        registry
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.current_session_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn message(&self, session_id: &str, message_id: &str) -> Option<&Message> {
        self.get(session_id).and_then(|s| s.message(message_id))
    }

    /// Restore the selection invariant. Returns true if the current id changed.
    pub fn repair(&mut self) -> bool {
        let Some(current) = self.current_session_id.as_deref() else {
            return false;
        };
        if self.sessions.iter().any(|s| s.id == current) {
            return false;
        }
        let replacement = self.sessions.first().map(|s| s.id.clone());
        match &replacement {
            Some(id) => log::debug!("current session {} is gone, selecting {}", current, id),
            None => log::debug!("current session {} is gone and no sessions remain", current),
        }
        self.current_session_id = replacement;
        true
    }

    /// Insert a new empty session at the front and select it.
    pub fn create_session(&mut self, now: DateTime<Utc>) -> SessionId {
        let session = Session::new(now);
        let id = session.id.clone();
        self.sessions.insert(0, session);
        self.current_session_id = Some(id.clone());
        log::info!("created session {}", id);
        id
    }

    /// Select unconditionally; an unknown id is repaired right after.
    pub fn select_session(&mut self, id: impl Into<SessionId>) {
        self.current_session_id = Some(id.into());
        self.repair();
    }

    /// Rename a session. Blank titles and unknown ids are ignored (returns false).
    pub fn rename_session(&mut self, id: &str, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        match self.get_mut(id) {
            Some(session) => {
                session.title = title.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove a session. Deleting the current one selects the newest remaining session.
    pub fn delete_session(&mut self, id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() == before {
            return false;
        }
        if self.current_session_id.as_deref() == Some(id) {
            self.current_session_id = self.sessions.first().map(|s| s.id.clone());
        }
        self.repair();
        log::info!("deleted session {}", id);
        true
    }

    /// Resolve the session a send should go to, applying the policy when none is active.
    pub fn ensure_session(&mut self, policy: SessionPolicy, now: DateTime<Utc>) -> SessionTarget {
        if let Some(session) = self.current_session() {
            return SessionTarget::Active(session.id.clone());
        }
        match policy {
            SessionPolicy::AutoCreate => SessionTarget::Active(self.create_session(now)),
            SessionPolicy::RequireExisting => SessionTarget::NoActiveSession,
        }
    }

    /// Append the user message and an assistant placeholder to the target session.
    ///
    /// A session with no messages yet takes its title from the text. The session stays
    /// (or becomes) current.
    pub fn begin_exchange(
        &mut self,
        text: &str,
        policy: SessionPolicy,
        now: DateTime<Utc>,
    ) -> Option<Exchange> {
        let existed = self.current_session().is_some();
        let session_id = match self.ensure_session(policy, now) {
            SessionTarget::Active(id) => id,
            SessionTarget::NoActiveSession => return None,
        };
        let user = Message::user(text, now);
        let assistant = Message::assistant_placeholder(now);
        let exchange = Exchange {
            session_id: session_id.clone(),
            user_message_id: user.id.clone(),
            assistant_message_id: assistant.id.clone(),
            created_session: !existed,
        };
        let session = self.get_mut(&session_id)?;
        if session.messages.is_empty() {
            session.title = derive_title(text);
        }
        session.last_message = text.to_string();
        session.timestamp = now;
        session.messages.push(user);
        session.messages.push(assistant);
        self.current_session_id = Some(session_id);
        Some(exchange)
    }

    /// Apply `f` to a message that is still loading. Finalized messages are left alone.
    pub fn patch_loading_message<F>(&mut self, session_id: &str, message_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        match self
            .get_mut(session_id)
            .and_then(|s| s.message_mut(message_id))
        {
            Some(msg) if msg.is_loading => {
                f(msg);
                true
            }
            _ => false,
        }
    }

    /// Finalize replies still marked loading, as left by a run that stopped mid-stream.
    /// Partial content is kept without the thinking marker; empty replies get `empty_reply`.
    pub fn settle_interrupted_replies(&mut self, empty_reply: &str) -> usize {
        let mut settled = 0;
        for msg in self
            .sessions
            .iter_mut()
            .flat_map(|s| s.messages.iter_mut())
            .filter(|m| m.is_loading)
        {
            let content = msg.content.replace(THINKING_MARKER, "");
            msg.content = if content.is_empty() {
                empty_reply.to_string()
            } else {
                content
            };
            msg.is_loading = false;
            settled += 1;
        }
        settled
    }

    /// Take the state apart for persistence.
    pub fn snapshot(&self) -> (Vec<Session>, Option<SessionId>) {
        (self.sessions.clone(), self.current_session_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant(r: &SessionRegistry) {
        if let Some(id) = r.current_session_id() {
            assert!(r.get(id).is_some(), "current id {} must reference a session", id);
        }
    }

    #[test]
    fn create_inserts_newest_first_and_selects() {
        let mut r = SessionRegistry::new();
        let a = r.create_session(Utc::now());
        let b = r.create_session(Utc::now());
        assert_eq!(r.sessions()[0].id, b);
        assert_eq!(r.sessions()[1].id, a);
        assert_eq!(r.current_session_id(), Some(b.as_str()));
        assert_eq!(r.sessions()[0].title, "New Chat");
    }

    #[test]
    fn deleting_current_of_two_selects_the_other() {
        let mut r = SessionRegistry::new();
        let a = r.create_session(Utc::now());
        let b = r.create_session(Utc::now());
        assert!(r.delete_session(&b));
        assert_eq!(r.current_session_id(), Some(a.as_str()));
        assert!(r.delete_session(&a));
        assert_eq!(r.current_session_id(), None);
    }

    #[test]
    fn deleting_other_session_keeps_selection() {
        let mut r = SessionRegistry::new();
        let a = r.create_session(Utc::now());
        let b = r.create_session(Utc::now());
        r.select_session(a.clone());
        assert!(r.delete_session(&b));
        assert_eq!(r.current_session_id(), Some(a.as_str()));
        assert!(!r.delete_session("missing"));
    }

    #[test]
    fn invariant_holds_across_create_delete_sequences() {
        let mut r = SessionRegistry::new();
        let mut ids: Vec<SessionId> = Vec::new();
        // Deterministic mix of creates, deletes from both ends, and stale selects.
        for step in 0..60usize {
            match step % 5 {
                0 | 1 => ids.push(r.create_session(Utc::now())),
                2 => {
                    if let Some(id) = ids.pop() {
                        r.delete_session(&id);
                    }
                }
                3 => {
                    if !ids.is_empty() {
                        let id = ids.remove(0);
                        r.delete_session(&id);
                    }
                }
                _ => r.select_session(format!("stale-{}", step)),
            }
            assert_invariant(&r);
        }
    }

    #[test]
    fn select_unknown_id_heals_to_first_or_none() {
        let mut r = SessionRegistry::new();
        r.select_session("ghost");
        assert_eq!(r.current_session_id(), None);
        let a = r.create_session(Utc::now());
        r.select_session("ghost");
        assert_eq!(r.current_session_id(), Some(a.as_str()));
    }

    #[test]
    fn from_parts_repairs_stale_selection() {
        let session = Session::new(Utc::now());
        let id = session.id.clone();
        let r = SessionRegistry::from_parts(vec![session], Some("deleted".into()));
        assert_eq!(r.current_session_id(), Some(id.as_str()));
        let empty = SessionRegistry::from_parts(Vec::new(), Some("deleted".into()));
        assert_eq!(empty.current_session_id(), None);
    }

    #[test]
    fn rename_requires_non_blank_title() {
        let mut r = SessionRegistry::new();
        let a = r.create_session(Utc::now());
        assert!(!r.rename_session(&a, "   "));
        assert_eq!(r.get(&a).unwrap().title, "New Chat");
        assert!(r.rename_session(&a, "  Drone ideas "));
        assert_eq!(r.get(&a).unwrap().title, "Drone ideas");
        assert!(!r.rename_session("missing", "x"));
    }

    #[test]
    fn first_exchange_without_session_creates_one_with_two_messages() {
        let mut r = SessionRegistry::new();
        let ex = r
            .begin_exchange("A bicycle that folds into a backpack", SessionPolicy::AutoCreate, Utc::now())
            .unwrap();
        assert!(ex.created_session);
        assert_eq!(r.sessions().len(), 1);
        let s = r.get(&ex.session_id).unwrap();
        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.messages[0].id, ex.user_message_id);
        assert_eq!(s.messages[1].id, ex.assistant_message_id);
        assert!(s.messages[1].is_loading);
        assert_eq!(s.messages[1].content, "");
        assert_eq!(s.title, "A bicycle that folds into a ba...");
        assert_eq!(s.last_message, "A bicycle that folds into a backpack");
        assert_eq!(r.current_session_id(), Some(ex.session_id.as_str()));
    }

    #[test]
    fn later_exchanges_keep_title() {
        let mut r = SessionRegistry::new();
        let first = r.begin_exchange("first idea", SessionPolicy::AutoCreate, Utc::now()).unwrap();
        r.rename_session(&first.session_id, "Renamed");
        let second = r.begin_exchange("second idea", SessionPolicy::AutoCreate, Utc::now()).unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert!(!second.created_session);
        let s = r.get(&second.session_id).unwrap();
        assert_eq!(s.title, "Renamed");
        assert_eq!(s.last_message, "second idea");
        assert_eq!(s.messages.len(), 4);
    }

    #[test]
    fn require_existing_policy_reports_no_session() {
        let mut r = SessionRegistry::new();
        assert_eq!(
            r.ensure_session(SessionPolicy::RequireExisting, Utc::now()),
            SessionTarget::NoActiveSession
        );
        assert!(r
            .begin_exchange("hello", SessionPolicy::RequireExisting, Utc::now())
            .is_none());
        assert!(r.sessions().is_empty());
    }

    #[test]
    fn finalized_messages_are_not_patched() {
        let mut r = SessionRegistry::new();
        let ex = r.begin_exchange("q", SessionPolicy::AutoCreate, Utc::now()).unwrap();
        assert!(r.patch_loading_message(&ex.session_id, &ex.assistant_message_id, |m| {
            m.content = "done".into();
            m.is_loading = false;
        }));
        assert!(!r.patch_loading_message(&ex.session_id, &ex.assistant_message_id, |m| {
            m.content = "late".into();
        }));
        assert!(!r.patch_loading_message(&ex.session_id, &ex.user_message_id, |m| {
            m.content = "edited".into();
        }));
        let s = r.get(&ex.session_id).unwrap();
        assert_eq!(s.messages[1].content, "done");
        assert_eq!(s.messages[0].content, "q");
    }

    #[test]
    fn interrupted_replies_are_settled() {
        let mut r = SessionRegistry::new();
        let empty = r.begin_exchange("first", SessionPolicy::AutoCreate, Utc::now()).unwrap();
        let partial = r.begin_exchange("second", SessionPolicy::AutoCreate, Utc::now()).unwrap();
        r.patch_loading_message(&partial.session_id, &partial.assistant_message_id, |m| {
            m.content = format!("Half an answer{}", THINKING_MARKER);
        });
        assert_eq!(r.settle_interrupted_replies("stopped"), 2);
        let s = r.get(&empty.session_id).unwrap();
        assert_eq!(s.message(&empty.assistant_message_id).unwrap().content, "stopped");
        assert_eq!(
            s.message(&partial.assistant_message_id).unwrap().content,
            "Half an answer"
        );
        assert!(s.messages.iter().all(|m| !m.is_loading));
        assert_eq!(r.settle_interrupted_replies("stopped"), 0);
    }
}
