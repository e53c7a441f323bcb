//! Chat engine: owns the session registry, sends messages to the prediction API, and folds the
//! streamed reply into the assistant placeholder.
//!
//! Every registry change is written through to the store and announced on the event channel.
//! Stream patches address the message by session and message id under the registry lock, so
//! other commands (switching or deleting sessions) can run while a reply is in flight.

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::events::{ChatEvent, Notice};
use crate::export::{self, ExportError};
use crate::llm::{decode_frame, ApiError, FrameDecoder, PredictionClient};
use crate::registry::{Exchange, SessionPolicy, SessionRegistry, SessionTarget};
use crate::session::{Message, Session, SessionId};
use crate::status::ConnectivityStatus;
use crate::store::{self, KeyValueStore};
use crate::stream::{Completion, Patch, StreamAccumulator, ToolRecovery};

/// Content of an assistant message whose send failed.
pub const APOLOGY: &str = "Sorry, there was an error processing your request. Please try again.";

/// Content of an assistant message cancelled before any token arrived.
pub const CANCELLED_REPLY: &str = "Response cancelled.";

const SEND_FAILED_NOTICE: &str = "Failed to get a response. Please try again.";
const EXPORTED_NOTICE: &str = "Chat session exported successfully";
const EVENT_CAPACITY: usize = 256;
/// Minimum spacing between writes of an in-flight reply. Finalization always writes.
const STREAM_PERSIST_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Delay before a still-loading reply is reported as slow.
    pub slow_response_after: Duration,
    pub tool_recovery: ToolRecovery,
    /// Applied by `send_message` when no session is active.
    pub session_policy: SessionPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            slow_response_after: Duration::from_secs(10),
            tool_recovery: ToolRecovery::default(),
            session_policy: SessionPolicy::AutoCreate,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            slow_response_after: config.ui.slow_response_after(),
            tool_recovery: config.api.tool_recovery,
            session_policy: SessionPolicy::AutoCreate,
        }
    }
}

/// How a send ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub exchange: Exchange,
    pub outcome: SendOutcome,
}

#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("reading response stream failed: {0}")]
    Body(String),
}

enum StreamOutcome {
    Completed(Completion),
    Failed(SendError),
    Cancelled(Completion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persist {
    Always,
    Coalesced,
}

struct InFlight {
    seq: u64,
    token: CancellationToken,
    started_at: DateTime<Utc>,
}

pub struct ChatEngine {
    registry: RwLock<SessionRegistry>,
    store: Arc<dyn KeyValueStore>,
    client: PredictionClient,
    options: EngineOptions,
    status: watch::Sender<ConnectivityStatus>,
    in_flight: Mutex<Option<InFlight>>,
    next_seq: AtomicU64,
    events: broadcast::Sender<ChatEvent>,
    persist_lock: Mutex<()>,
    last_stream_persist: Mutex<Option<Instant>>,
}

impl ChatEngine {
    /// Load persisted sessions and build the engine.
    ///
    /// A stale current id is repaired, and replies left loading by an interrupted run are
    /// finalized with their partial content. Either repair is written back.
    pub async fn load(
        store: Arc<dyn KeyValueStore>,
        client: PredictionClient,
        options: EngineOptions,
    ) -> Self {
        let (sessions, current) = store::load_sessions(store.as_ref()).await;
        let mut registry = SessionRegistry::from_parts(sessions, current.clone());
        let settled = registry.settle_interrupted_replies(CANCELLED_REPLY);
        if settled > 0 {
            log::warn!("finalized {} replies interrupted by a previous run", settled);
        }
        let repaired = settled > 0 || registry.current_session_id() != current.as_deref();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine = Self {
            registry: RwLock::new(registry),
            store,
            client,
            options,
            status: watch::Sender::new(ConnectivityStatus::Idle),
            in_flight: Mutex::new(None),
            next_seq: AtomicU64::new(0),
            events,
            persist_lock: Mutex::new(()),
            last_stream_persist: Mutex::new(None),
        };
        if repaired {
            engine.persist().await;
        }
        engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectivityStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ConnectivityStatus {
        *self.status.borrow()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.registry.read().await.sessions().to_vec()
    }

    pub async fn session(&self, id: &str) -> Option<Session> {
        self.registry.read().await.get(id).cloned()
    }

    pub async fn current_session_id(&self) -> Option<SessionId> {
        self.registry
            .read()
            .await
            .current_session_id()
            .map(str::to_string)
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.registry.read().await.current_session().cloned()
    }

    pub async fn message(&self, session_id: &str, message_id: &str) -> Option<Message> {
        self.registry
            .read()
            .await
            .message(session_id, message_id)
            .cloned()
    }

    /// When the latest send started, while it is still running.
    pub async fn loading_started_at(&self) -> Option<DateTime<Utc>> {
        self.in_flight.lock().await.as_ref().map(|f| f.started_at)
    }

    pub async fn is_loading(&self) -> bool {
        self.in_flight.lock().await.is_some()
    }

    pub async fn create_session(&self) -> SessionId {
        self.commit(|r| r.create_session(Utc::now())).await
    }

    pub async fn select_session(&self, id: &str) {
        log::debug!("selecting session {}", id);
        self.commit(|r| r.select_session(id)).await
    }

    pub async fn rename_session(&self, id: &str, title: &str) -> bool {
        self.commit(|r| r.rename_session(id, title)).await
    }

    pub async fn delete_session(&self, id: &str) -> bool {
        self.commit(|r| r.delete_session(id)).await
    }

    /// Resolve the target session for a send, creating one under `AutoCreate`.
    pub async fn ensure_session(&self, policy: SessionPolicy) -> SessionTarget {
        if let Some(id) = self.current_session_id().await {
            if self.session(&id).await.is_some() {
                return SessionTarget::Active(id);
            }
        }
        match policy {
            SessionPolicy::RequireExisting => SessionTarget::NoActiveSession,
            SessionPolicy::AutoCreate => self.commit(|r| r.ensure_session(policy, Utc::now())).await,
        }
    }

    /// Write the session as a JSON artifact into `dir`. Unknown ids are a no-op.
    pub async fn export_session(&self, id: &str, dir: &Path) -> Result<Option<PathBuf>, ExportError> {
        let Some(session) = self.session(id).await else {
            return Ok(None);
        };
        match export::write_export(&session, dir, Utc::now().date_naive()).await {
            Ok(path) => {
                self.emit(ChatEvent::Notice(Notice::success(EXPORTED_NOTICE)));
                Ok(Some(path))
            }
            Err(e) => {
                log::warn!("exporting session {} failed: {}", id, e);
                self.emit(ChatEvent::Notice(Notice::error(format!("Export failed: {}", e))));
                Err(e)
            }
        }
    }

    /// Out-of-band probe against the prediction endpoint.
    pub async fn test_api_connection(&self) -> bool {
        self.set_status(ConnectivityStatus::Connecting);
        log::info!("testing api connection");
        let (ok, notice) = match self.client.probe().await {
            Ok(reply) if reply.has_text() => (true, Notice::success("API connection successful")),
            Ok(_) => (false, Notice::error("API response format is unexpected")),
            Err(ApiError::Status { status, .. }) => {
                (false, Notice::error(format!("API connection failed: {}", status)))
            }
            Err(e) => (false, Notice::error(format!("API connection error: {}", e))),
        };
        if ok {
            self.set_status(ConnectivityStatus::Connected);
        } else {
            log::warn!("api probe failed: {}", notice.text);
            self.set_status(ConnectivityStatus::Error);
        }
        self.emit(ChatEvent::Notice(notice));
        ok
    }

    /// Cancel the send currently streaming, if any.
    pub async fn cancel_in_flight(&self) -> bool {
        match self.in_flight.lock().await.as_ref() {
            Some(flight) => {
                flight.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Send `text` to the active session (created when missing) and stream the reply into it.
    ///
    /// Blank text is ignored. Transport failures are folded into the assistant message, so the
    /// receipt's outcome is the only error signal.
    pub async fn send_message(&self, text: &str) -> Option<SendReceipt> {
        if text.trim().is_empty() {
            return None;
        }
        let policy = self.options.session_policy;
        let Some(exchange) = self
            .commit(|r| r.begin_exchange(text, policy, Utc::now()))
            .await
        else {
            log::debug!("no active session, message not sent");
            return None;
        };

        let (seq, token) = self.begin_flight().await;
        let status_before = self.status();
        self.set_status(ConnectivityStatus::Connecting);
        log::info!(
            "sending message to session {} (reply {})",
            exchange.session_id,
            exchange.assistant_message_id
        );

        let outcome = self.stream_with_watchdog(&exchange, text, &token).await;
        let outcome = self.finalize(&exchange, outcome).await;
        if outcome == SendOutcome::Cancelled {
            self.settle_cancelled_status(seq, status_before).await;
        }
        self.end_flight(seq).await;
        Some(SendReceipt { exchange, outcome })
    }

    async fn begin_flight(&self) -> (u64, CancellationToken) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let started_at = Utc::now();
        let previous = self.in_flight.lock().await.replace(InFlight {
            seq,
            token: token.clone(),
            started_at,
        });
        if let Some(previous) = previous {
            log::info!("new send started, cancelling the previous stream");
            previous.token.cancel();
        }
        self.emit(ChatEvent::LoadingChanged {
            started_at: Some(started_at),
        });
        (seq, token)
    }

    /// A send cancelled before the server answered leaves `connecting` behind. Put back what
    /// was there before, unless a newer send owns the status now.
    async fn settle_cancelled_status(&self, seq: u64, before: ConnectivityStatus) {
        let latest = self
            .in_flight
            .lock()
            .await
            .as_ref()
            .is_some_and(|f| f.seq == seq);
        if latest && self.status() == ConnectivityStatus::Connecting {
            let restored = match before {
                ConnectivityStatus::Connecting => ConnectivityStatus::Idle,
                other => other,
            };
            self.set_status(restored);
        }
    }

    async fn end_flight(&self, seq: u64) {
        let mut guard = self.in_flight.lock().await;
        if guard.as_ref().is_some_and(|f| f.seq == seq) {
            guard.take();
            drop(guard);
            self.emit(ChatEvent::LoadingChanged { started_at: None });
        }
    }

    async fn stream_with_watchdog(
        &self,
        exchange: &Exchange,
        text: &str,
        token: &CancellationToken,
    ) -> StreamOutcome {
        let reply = self.stream_reply(exchange, text, token);
        tokio::pin!(reply);
        let slow = tokio::time::sleep(self.options.slow_response_after);
        tokio::pin!(slow);
        let mut slow_reported = false;
        loop {
            tokio::select! {
                outcome = &mut reply => return outcome,
                _ = &mut slow, if !slow_reported => {
                    slow_reported = true;
                    let loading = self
                        .message(&exchange.session_id, &exchange.assistant_message_id)
                        .await
                        .is_some_and(|m| m.is_loading);
                    if loading {
                        log::info!("reply {} is taking longer than usual", exchange.assistant_message_id);
                        self.emit(ChatEvent::SlowResponse {
                            session_id: exchange.session_id.clone(),
                            message_id: exchange.assistant_message_id.clone(),
                        });
                    }
                }
            }
        }
    }

    async fn stream_reply(
        &self,
        exchange: &Exchange,
        text: &str,
        token: &CancellationToken,
    ) -> StreamOutcome {
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return StreamOutcome::Cancelled(StreamAccumulator::new().finish(ToolRecovery::MetadataOnly));
            }
            res = self.client.open_stream(text) => res,
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => return StreamOutcome::Failed(e.into()),
        };
        self.set_status(ConnectivityStatus::Connected);
        self.pump(exchange, response.bytes_stream(), token).await
    }

    /// Read chunks until end of body, error, or cancellation.
    async fn pump<S, B, E>(
        &self,
        exchange: &Exchange,
        stream: S,
        token: &CancellationToken,
    ) -> StreamOutcome
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let mut stream = std::pin::pin!(stream);
        let mut decoder = FrameDecoder::new();
        let mut acc = StreamAccumulator::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    log::info!("stream for reply {} cancelled", exchange.assistant_message_id);
                    return StreamOutcome::Cancelled(acc.finish(ToolRecovery::MetadataOnly));
                }
                chunk = stream.next() => chunk,
            };
            let lines = match chunk {
                Some(Ok(bytes)) => decoder.push(bytes.as_ref()),
                Some(Err(e)) => return StreamOutcome::Failed(SendError::Body(e.to_string())),
                None => break,
            };
            for line in lines {
                self.ingest(exchange, &mut acc, &line).await;
            }
        }
        if let Some(line) = decoder.finish() {
            self.ingest(exchange, &mut acc, &line).await;
        }
        StreamOutcome::Completed(acc.finish(self.options.tool_recovery))
    }

    async fn ingest(&self, exchange: &Exchange, acc: &mut StreamAccumulator, line: &str) {
        log::debug!("stream frame: {}", line);
        let Some(event) = decode_frame(line) else {
            return;
        };
        if let Some(patch) = acc.apply(event) {
            self.patch_message(exchange, Persist::Coalesced, move |msg| match patch {
                Patch::Content(content) => msg.content = content,
                Patch::Tools(tools) => msg.used_tools = Some(tools),
            })
            .await;
        }
    }

    async fn finalize(&self, exchange: &Exchange, outcome: StreamOutcome) -> SendOutcome {
        match outcome {
            StreamOutcome::Completed(done) => {
                self.patch_message(exchange, Persist::Always, move |msg| {
                    msg.content = done.content;
                    msg.used_tools = done.used_tools;
                    msg.is_loading = false;
                })
                .await;
                self.set_status(ConnectivityStatus::Connected);
                SendOutcome::Completed
            }
            StreamOutcome::Failed(err) => {
                log::error!("sending message failed: {}", err);
                self.set_status(ConnectivityStatus::Error);
                self.patch_message(exchange, Persist::Always, |msg| {
                    msg.content = APOLOGY.to_string();
                    msg.is_loading = false;
                })
                .await;
                self.emit(ChatEvent::Notice(Notice::error(SEND_FAILED_NOTICE)));
                SendOutcome::Failed
            }
            StreamOutcome::Cancelled(partial) => {
                self.patch_message(exchange, Persist::Always, move |msg| {
                    msg.content = if partial.content.is_empty() {
                        CANCELLED_REPLY.to_string()
                    } else {
                        partial.content
                    };
                    msg.used_tools = partial.used_tools;
                    msg.is_loading = false;
                })
                .await;
                SendOutcome::Cancelled
            }
        }
    }

    /// Apply a registry command atomically, then notify and persist.
    async fn commit<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut SessionRegistry) -> R,
    {
        let (result, current_changed) = {
            let mut registry = self.registry.write().await;
            let before = registry.current_session_id().map(str::to_string);
            let result = f(&mut registry);
            registry.repair();
            let after = registry.current_session_id().map(str::to_string);
            let changed = (before != after).then_some(after);
            (result, changed)
        };
        self.emit(ChatEvent::SessionsChanged);
        if let Some(current) = current_changed {
            self.emit(ChatEvent::CurrentSessionChanged(current));
        }
        self.persist().await;
        result
    }

    /// Patch the exchange's assistant message while it is still loading.
    async fn patch_message<F>(&self, exchange: &Exchange, persist: Persist, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let applied = self.registry.write().await.patch_loading_message(
            &exchange.session_id,
            &exchange.assistant_message_id,
            f,
        );
        if applied {
            self.emit(ChatEvent::MessageUpdated {
                session_id: exchange.session_id.clone(),
                message_id: exchange.assistant_message_id.clone(),
            });
            if persist == Persist::Always || self.stream_persist_due().await {
                self.persist().await;
            }
        } else {
            log::debug!(
                "reply {} is gone or already final, patch dropped",
                exchange.assistant_message_id
            );
        }
        applied
    }

    async fn stream_persist_due(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last_stream_persist.lock().await;
        match *last {
            Some(at) if now.duration_since(at) < STREAM_PERSIST_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let (sessions, current) = self.registry.read().await.snapshot();
        if let Err(e) = store::save_sessions(self.store.as_ref(), &sessions, current.as_deref()).await {
            log::warn!("persisting sessions failed, keeping in-memory state: {}", e);
        }
    }

    fn set_status(&self, status: ConnectivityStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            log::debug!("connectivity status: {}", status);
            self.emit(ChatEvent::StatusChanged(status));
        }
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
