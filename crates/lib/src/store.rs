//! Persistent session store over a small key-value substrate.
//!
//! Three keys are used, matching the web client's local storage layout: the session
//! collection (JSON array), the current session id (plain string), and chat settings (JSON).
//! Loading never fails: absent or malformed entries fall back to empty state or defaults.

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::session::{Session, SessionId};

pub const SESSIONS_KEY: &str = "ideaSketch_sessions";
pub const CURRENT_SESSION_KEY: &str = "ideaSketch_currentSessionId";
pub const SETTINGS_KEY: &str = "ideaSketch_settings";

const LOCK_FILE: &str = ".lock";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Durable string-keyed storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// One file per key under a directory. Writes go to a temp file and are renamed into place
/// while holding an exclusive lock on `<dir>/.lock`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn locked<T, F>(&self, exclusive: bool, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> std::io::Result<T> + Send + 'static,
    {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir)?;
            let lock = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(dir.join(LOCK_FILE))?;
            if exclusive {
                FileExt::lock_exclusive(&lock)?;
            } else {
                FileExt::lock_shared(&lock)?;
            }
            let out = f(&dir);
            FileExt::unlock(&lock)?;
            out
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
        .map_err(StoreError::from)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.locked(false, move |dir| match std::fs::read_to_string(dir.join(&key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.locked(true, move |dir| {
            let tmp = dir.join(format!("{}.tmp", key));
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
            std::fs::rename(&tmp, dir.join(&key))
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.locked(true, move |dir| match std::fs::remove_file(dir.join(&key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        })
        .await
    }
}

/// Volatile store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.write().await.remove(key);
        Ok(())
    }
}

/// Load sessions and the current id. Read or parse failures start from empty state.
pub async fn load_sessions(store: &dyn KeyValueStore) -> (Vec<Session>, Option<SessionId>) {
    let sessions = match store.get(SESSIONS_KEY).await {
        Ok(Some(s)) => match serde_json::from_str::<Vec<Session>>(&s) {
            Ok(sessions) => {
                log::info!("loaded {} sessions from storage", sessions.len());
                sessions
            }
            Err(e) => {
                log::warn!("stored sessions are malformed, starting empty: {}", e);
                Vec::new()
            }
        },
        Ok(None) => Vec::new(),
        Err(e) => {
            log::warn!("reading stored sessions failed, starting empty: {}", e);
            Vec::new()
        }
    };
    let current = match store.get(CURRENT_SESSION_KEY).await {
        Ok(id) => id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        Err(e) => {
            log::warn!("reading stored current session failed: {}", e);
            None
        }
    };
    (sessions, current)
}

/// Write the full collection and the current id (removing the key when there is none).
pub async fn save_sessions(
    store: &dyn KeyValueStore,
    sessions: &[Session],
    current: Option<&str>,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(sessions)?;
    store.set(SESSIONS_KEY, &json).await?;
    match current {
        Some(id) => store.set(CURRENT_SESSION_KEY, id).await,
        None => store.remove(CURRENT_SESSION_KEY).await,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontSize {
    Small,
    #[default]
    Medium,
    Large,
}

/// Display preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    pub font_size: FontSize,
    pub dark_mode: bool,
    pub sound_enabled: bool,
    pub typing_indicator: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            font_size: FontSize::Medium,
            dark_mode: false,
            sound_enabled: true,
            typing_indicator: true,
        }
    }
}

pub async fn load_settings(store: &dyn KeyValueStore) -> ChatSettings {
    match store.get(SETTINGS_KEY).await {
        Ok(Some(s)) => serde_json::from_str(&s).unwrap_or_else(|e| {
            log::warn!("stored settings are malformed, using defaults: {}", e);
            ChatSettings::default()
        }),
        Ok(None) => ChatSettings::default(),
        Err(e) => {
            log::warn!("reading stored settings failed, using defaults: {}", e);
            ChatSettings::default()
        }
    }
}

pub async fn save_settings(
    store: &dyn KeyValueStore,
    settings: &ChatSettings,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(settings)?;
    store.set(SETTINGS_KEY, &json).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Message;
    use chrono::Utc;

    fn sample_session() -> Session {
        let now = Utc::now();
        let mut session = Session::new(now);
        session.title = "Foldable kayak".into();
        session.messages.push(Message::user("Foldable kayak", now));
        session
    }

    #[tokio::test]
    async fn sessions_round_trip_through_memory_store() {
        let store = MemoryStore::new();
        let session = sample_session();
        save_sessions(&store, std::slice::from_ref(&session), Some(&session.id))
            .await
            .unwrap();
        let (sessions, current) = load_sessions(&store).await;
        assert_eq!(sessions, vec![session.clone()]);
        assert_eq!(current.as_deref(), Some(session.id.as_str()));
    }

    #[tokio::test]
    async fn clearing_selection_removes_key() {
        let store = MemoryStore::new();
        store.set(CURRENT_SESSION_KEY, "session_1").await.unwrap();
        save_sessions(&store, &[], None).await.unwrap();
        assert_eq!(store.get(CURRENT_SESSION_KEY).await.unwrap(), None);
        assert_eq!(store.get(SESSIONS_KEY).await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn malformed_sessions_start_empty() {
        let store = MemoryStore::new();
        store.set(SESSIONS_KEY, "{not json").await.unwrap();
        store.set(CURRENT_SESSION_KEY, "session_1").await.unwrap();
        let (sessions, current) = load_sessions(&store).await;
        assert!(sessions.is_empty());
        assert_eq!(current.as_deref(), Some("session_1"));
    }

    #[tokio::test]
    async fn loads_web_client_layout() {
        let store = MemoryStore::new();
        let stored = r#"[{"id":"session_1700000000000","title":"Hi","lastMessage":"Hi","timestamp":"2024-01-02T03:04:05.000Z","messages":[{"id":"msg_1700000000000_user","role":"user","content":"Hi","timestamp":"2024-01-02T03:04:05.000Z"},{"id":"msg_1700000000000_assistant","role":"assistant","content":"Hello","timestamp":"2024-01-02T03:04:05.000Z","isLoading":false,"usedTools":[{"tool":"search","toolInput":{"input":"x"},"toolOutput":"y"}]}]}]"#;
        store.set(SESSIONS_KEY, stored).await.unwrap();
        let (sessions, _) = load_sessions(&store).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].messages[1].tools()[0].tool, "search");
        assert_eq!(sessions[0].timestamp.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[tokio::test]
    async fn file_store_persists_between_instances() {
        let dir = std::env::temp_dir().join(format!("ideasketch-store-test-{}", uuid::Uuid::new_v4()));
        let store = FileStore::new(&dir);
        assert_eq!(store.get(SESSIONS_KEY).await.unwrap(), None);
        let session = sample_session();
        save_sessions(&store, std::slice::from_ref(&session), Some(&session.id))
            .await
            .unwrap();

        let reopened = FileStore::new(&dir);
        let (sessions, current) = load_sessions(&reopened).await;
        assert_eq!(sessions, vec![session.clone()]);
        assert_eq!(current, Some(session.id.clone()));

        reopened.remove(CURRENT_SESSION_KEY).await.unwrap();
        reopened.remove(CURRENT_SESSION_KEY).await.unwrap();
        assert_eq!(reopened.get(CURRENT_SESSION_KEY).await.unwrap(), None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn settings_default_and_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(load_settings(&store).await, ChatSettings::default());

        store.set(SETTINGS_KEY, r#"{"darkMode":true}"#).await.unwrap();
        let partial = load_settings(&store).await;
        assert!(partial.dark_mode);
        assert!(partial.typing_indicator);

        let settings = ChatSettings {
            font_size: FontSize::Large,
            dark_mode: true,
            sound_enabled: false,
            typing_indicator: false,
        };
        save_settings(&store, &settings).await.unwrap();
        assert_eq!(load_settings(&store).await, settings);

        store.set(SETTINGS_KEY, "[]").await.unwrap();
        assert_eq!(load_settings(&store).await, ChatSettings::default());
    }
}
