// Chat sessions over the active bot: send/stop/retry, staged attachments, history browsing.
//
// Concurrency model:
//   All session state lives behind ONE std Mutex and is never held across an await.
//   A send snapshots what it needs, releases the lock, and patches the target message
//   by id as the bot reports progress. A message that is no longer streaming is frozen:
//   late patches (after stop, after finalization) are ignored.

pub mod attachments;
pub mod cache;
pub mod throttle;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::bots::util::epoch_to_ms;
use crate::bots::{
    Attachment, BotError, BotManager, BotMessageHandler, BotPlatform, BotResult,
    ConversationQuery, HistoryConversation, Message, Reference, Role, UploadFile,
};
use crate::config::ChatSettings;
use attachments::{detect_attachments, merge_attachments};
use cache::{Clock, HistoryCache, MessageCache, SystemClock};
use throttle::{wait_hint_secs, SendThrottle};

pub const DEFAULT_SESSION_TITLE: &str = "New chat";
pub const STOPPED_MARKER: &str = "\n\n[Generation stopped]";
const TITLE_CHARS: usize = 20;
/// 2020-01-01T00:00:00Z. Anything earlier is treated as a bogus timestamp.
const MIN_VALID_TS_MS: i64 = 1_577_836_800_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub last_update: i64,
    /// Backend conversation; assigned by the first successful send.
    pub conversation_id: Option<String>,
    /// Materialized from the history list rather than started locally.
    pub is_history: bool,
}

impl ChatSession {
    fn new(now: i64, greeting: Option<&str>) -> Self {
        let messages = greeting
            .map(|g| {
                let mut m = Message::assistant(g);
                m.timestamp = now;
                vec![m]
            })
            .unwrap_or_default();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: DEFAULT_SESSION_TITLE.to_string(),
            messages,
            last_update: now,
            conversation_id: None,
            is_history: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.messages.iter().any(|m| m.is_streaming)
    }

    fn has_user_messages(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::User)
    }
}

/// Why a send never reached the bot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendRejected {
    #[error("Nothing to send")]
    Empty,
    #[error("No active session")]
    NoSession,
    #[error("A reply is still in progress")]
    Busy,
    #[error("Please wait {wait_secs}s before sending again")]
    TooSoon { wait_ms: i64, wait_secs: u64 },
    #[error("{0}")]
    NotReady(String),
    #[error("Nothing to retry")]
    NothingToRetry,
}

/// Failures of history and rename operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Bot(#[from] BotError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    Completed,
    /// Message text of the underlying error; the chat shows the user-facing version.
    Failed(String),
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub session_id: String,
    pub user_message_id: String,
    pub assistant_message_id: String,
    pub status: SendStatus,
}

/// Change notifications for a UI layer.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    MessageUpdated { session_id: String, message: Message },
    SessionsChanged,
    HistoryChanged,
}

struct InFlight {
    session_id: String,
    /// Per-send stop signal, registered before the send leaves the lock.
    stop: watch::Sender<bool>,
}

impl InFlight {
    fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// What a send resubmits: fresh text, or the user turn behind a failed reply.
enum Submission<'a> {
    Text(&'a str),
    Retry { assistant_message_id: &'a str },
}

struct ChatState {
    sessions: Vec<ChatSession>,
    current: Option<String>,
    staged: Vec<Attachment>,
    throttle: SendThrottle,
    history: HistoryCache,
    messages: MessageCache,
    history_error: Option<String>,
    in_flight: Option<InFlight>,
}

impl ChatState {
    fn session(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn session_mut(&mut self, id: &str) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    fn message_mut(&mut self, session_id: &str, message_id: &str) -> Option<&mut Message> {
        self.session_mut(session_id)?
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
    }

    fn session_for_conversation(&self, conversation_id: &str) -> Option<&ChatSession> {
        self.sessions
            .iter()
            .find(|s| s.conversation_id.as_deref() == Some(conversation_id))
    }
}

fn lock(state: &Mutex<ChatState>) -> MutexGuard<'_, ChatState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drop `removed` sessions, stopping a send that targets one of them and moving `current`
/// to a local session when it was removed. Returns (needs a new session, send stopped).
fn remove_sessions(state: &mut ChatState, removed: &[String]) -> (bool, bool) {
    state.sessions.retain(|s| !removed.contains(&s.id));
    let stopped = match state.in_flight.as_ref() {
        Some(flight) if removed.contains(&flight.session_id) => {
            flight.stop();
            true
        }
        _ => false,
    };
    let mut needs_new_session = false;
    if state.current.as_ref().map(|c| removed.contains(c)).unwrap_or(false) {
        state.current = state
            .sessions
            .iter()
            .find(|s| !s.is_history)
            .map(|s| s.id.clone());
        needs_new_session = state.current.is_none();
    }
    (needs_new_session, stopped)
}

/// Title derived from the first user message.
pub fn session_title(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > TITLE_CHARS {
        let head: String = text.chars().take(TITLE_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Normalize a backend timestamp (seconds or ms) to ms; missing or pre-2020 values become `now`.
fn sane_timestamp(ts: Option<i64>, now: i64) -> i64 {
    match ts.map(epoch_to_ms) {
        Some(ms) if ms >= MIN_VALID_TS_MS => ms,
        _ => now,
    }
}

/// Text shown in place of a failed assistant reply.
pub fn user_facing_error(error: &BotError) -> String {
    match error {
        BotError::Timeout(_) => {
            "⏱️ The request timed out. Please check your network and try again.".to_string()
        }
        BotError::Network(_) => {
            "🌐 Network error. Please check your connection and try again.".to_string()
        }
        BotError::Http { status, .. } if *status == 401 || *status == 403 => format!(
            "🔑 Authentication failed ({}). Please check the agent's API key.",
            status
        ),
        BotError::Http { status: 429, .. } => {
            "⏳ Too many requests (429). Please wait a moment and try again.".to_string()
        }
        BotError::Http { status, .. } if *status >= 500 => format!(
            "🛠️ The agent service is unavailable ({}). Please try again later.",
            status
        ),
        BotError::Backend(msg) => format!(
            "❌ Error while processing: {}\n\n💡 Please resend your message or start a new conversation.",
            msg
        ),
        other => format!("❌ {}", other),
    }
}

async fn with_timeout<T>(
    secs: u64,
    what: &str,
    fut: impl Future<Output = BotResult<T>>,
) -> BotResult<T> {
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(BotError::Timeout(format!("{} timed out after {}s", what, secs))),
    }
}

/// Applies bot progress to one message of one session.
struct StreamPatcher<'a> {
    state: &'a Mutex<ChatState>,
    events: &'a broadcast::Sender<ChatEvent>,
    session_id: String,
    message_id: String,
}

impl BotMessageHandler for StreamPatcher<'_> {
    fn on_message(&mut self, message: &Message) {
        let updated = {
            let mut state = lock(self.state);
            let Some(target) = state.message_mut(&self.session_id, &self.message_id) else {
                return;
            };
            if !target.is_streaming {
                return;
            }
            target.content = message.content.clone();
            target.thinking = message.thinking.clone();
            if message.reference.is_some() {
                target.reference = message.reference.clone();
            }
            target.attachments =
                merge_attachments(&message.attachments, detect_attachments(&message.content));
            target.clone()
        };
        let _ = self.events.send(ChatEvent::MessageUpdated {
            session_id: self.session_id.clone(),
            message: updated,
        });
    }

    fn on_error(&mut self, error: &BotError) {
        log::warn!("[chat] Reply {} failed: {}", self.message_id, error);
    }

    fn on_complete(&mut self) {
        log::debug!("[chat] Reply {} complete", self.message_id);
    }

    fn on_thinking(&mut self, text: &str) {
        log::debug!("[chat] Reply {} thinking ({} chars)", self.message_id, text.len());
    }

    fn on_reference(&mut self, reference: &Reference) {
        log::debug!(
            "[chat] Reply {} cites {} chunks",
            self.message_id,
            reference.chunks.len()
        );
    }
}

/// Session state machine on top of a [`BotManager`].
pub struct ChatController {
    bots: Arc<BotManager>,
    clock: Arc<dyn Clock>,
    settings: ChatSettings,
    state: Mutex<ChatState>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatController {
    pub fn new(bots: Arc<BotManager>, settings: ChatSettings) -> Self {
        Self::with_clock(bots, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(bots: Arc<BotManager>, settings: ChatSettings, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(256);
        let state = ChatState {
            sessions: Vec::new(),
            current: None,
            staged: Vec::new(),
            throttle: SendThrottle::new(settings.min_send_interval_ms as i64),
            history: HistoryCache::new(settings.history_cache_ttl_secs as i64 * 1000),
            messages: MessageCache::new(settings.message_cache_ttl_secs as i64 * 1000),
            history_error: None,
            in_flight: None,
        };
        Self {
            bots,
            clock,
            settings,
            state: Mutex::new(state),
            events,
        }
    }

    pub fn bots(&self) -> &Arc<BotManager> {
        &self.bots
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ChatEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Start an empty session, make it current, and detach the bot from any conversation.
    pub fn create_session(&self) -> String {
        let session = ChatSession::new(self.now(), self.settings.greeting.as_deref());
        let id = session.id.clone();
        {
            let mut state = lock(&self.state);
            state.sessions.insert(0, session);
            state.current = Some(id.clone());
        }
        self.bots.set_conversation_id(None);
        self.emit(ChatEvent::SessionsChanged);
        id
    }

    pub fn switch_session(&self, session_id: &str) -> bool {
        let conversation_id = {
            let mut state = lock(&self.state);
            let Some(session) = state.session(session_id) else {
                return false;
            };
            let conversation_id = session.conversation_id.clone();
            state.current = Some(session_id.to_string());
            conversation_id
        };
        self.bots.set_conversation_id(conversation_id.as_deref());
        self.emit(ChatEvent::SessionsChanged);
        true
    }

    pub fn rename_session(&self, session_id: &str, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        let renamed = {
            let mut state = lock(&self.state);
            match state.session_mut(session_id) {
                Some(session) => {
                    session.title = title.to_string();
                    true
                }
                None => false,
            }
        };
        if renamed {
            self.emit(ChatEvent::SessionsChanged);
        }
        renamed
    }

    /// Close a session locally. The backend conversation and its cached messages are kept,
    /// so reopening it from history needs no refetch.
    pub fn close_session(&self, session_id: &str) -> bool {
        let (needs_new_session, stopped) = {
            let mut state = lock(&self.state);
            if state.session(session_id).is_none() {
                return false;
            }
            remove_sessions(&mut state, &[session_id.to_string()])
        };
        self.after_sessions_removed(needs_new_session, stopped);
        log::info!("[chat] Closed session {}", session_id);
        self.emit(ChatEvent::SessionsChanged);
        true
    }

    fn after_sessions_removed(&self, needs_new_session: bool, stopped: bool) {
        if stopped {
            self.bots.cancel();
        }
        if needs_new_session {
            self.create_session();
        } else {
            let conversation_id = self.current_session().and_then(|s| s.conversation_id);
            self.bots.set_conversation_id(conversation_id.as_deref());
        }
    }

    pub fn sessions(&self) -> Vec<ChatSession> {
        lock(&self.state).sessions.clone()
    }

    pub fn session(&self, session_id: &str) -> Option<ChatSession> {
        lock(&self.state).session(session_id).cloned()
    }

    pub fn current_session(&self) -> Option<ChatSession> {
        let state = lock(&self.state);
        state.current.as_deref().and_then(|id| state.session(id)).cloned()
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.state).in_flight.is_some()
    }

    // ── Attachments ─────────────────────────────────────────────────

    pub fn stage_attachment(&self, attachment: Attachment) {
        lock(&self.state).staged.push(attachment);
    }

    pub fn remove_staged_attachment(&self, attachment_id: &str) -> bool {
        let mut state = lock(&self.state);
        let before = state.staged.len();
        state.staged.retain(|a| a.id != attachment_id);
        state.staged.len() != before
    }

    pub fn staged_attachments(&self) -> Vec<Attachment> {
        lock(&self.state).staged.clone()
    }

    /// Upload through the active bot and stage every file that made it.
    pub async fn upload_files(&self, files: Vec<UploadFile>) -> BotResult<Vec<BotResult<Attachment>>> {
        let results = self.bots.upload_files(files).await?;
        {
            let mut state = lock(&self.state);
            for attachment in results.iter().flatten() {
                state.staged.push(attachment.clone());
            }
        }
        Ok(results)
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Send `text` plus the staged attachments in the current session.
    ///
    /// Rejections never reach the bot. Once accepted, the reply streams into a pending
    /// assistant message that always ends with `is_streaming == false`.
    pub async fn send_message(&self, text: &str) -> Result<SendReport, SendRejected> {
        self.submit(Submission::Text(text)).await
    }

    /// Re-send the user message behind a failed assistant reply in the current session.
    ///
    /// The failed pair is replaced only once the resubmission is admitted; a rejected
    /// retry leaves the session untouched.
    pub async fn retry(&self, assistant_message_id: &str) -> Result<SendReport, SendRejected> {
        self.submit(Submission::Retry {
            assistant_message_id,
        })
        .await
    }

    /// Rejections checked before a send may change anything. Returns the target session.
    fn admit(&self, state: &mut ChatState, has_payload: bool, now: i64) -> Result<String, SendRejected> {
        if !has_payload {
            return Err(SendRejected::Empty);
        }
        let session_id = state
            .current
            .clone()
            .filter(|id| state.session(id).is_some())
            .ok_or(SendRejected::NoSession)?;
        if state.in_flight.is_some() {
            return Err(SendRejected::Busy);
        }
        if let Err(e) = self.bots.ready_bot() {
            return Err(SendRejected::NotReady(e.to_string()));
        }
        if let Err(wait_ms) = state.throttle.check(now) {
            return Err(SendRejected::TooSoon {
                wait_ms,
                wait_secs: wait_hint_secs(wait_ms),
            });
        }
        Ok(session_id)
    }

    async fn submit(&self, submission: Submission<'_>) -> Result<SendReport, SendRejected> {
        let now = self.now();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (text, session_id, user_message_id, pending, attachments, conversation_id) = {
            let mut state = lock(&self.state);
            let (text, retried) = match submission {
                Submission::Text(text) => (text.trim().to_string(), None),
                Submission::Retry {
                    assistant_message_id,
                } => {
                    let current = state.current.clone().ok_or(SendRejected::NoSession)?;
                    let session = state.session(&current).ok_or(SendRejected::NoSession)?;
                    let failed = session
                        .messages
                        .iter()
                        .position(|m| m.id == assistant_message_id && m.has_error)
                        .ok_or(SendRejected::NothingToRetry)?;
                    let user = session.messages[..failed]
                        .iter()
                        .rposition(|m| m.role == Role::User)
                        .ok_or(SendRejected::NothingToRetry)?;
                    let text = session.messages[user].content.trim().to_string();
                    let has_files = !session.messages[user].attachments.is_empty();
                    (text, Some((user, failed, has_files)))
                }
            };
            let has_payload = !text.is_empty()
                || !state.staged.is_empty()
                || retried.map(|(_, _, has_files)| has_files).unwrap_or(false);
            let session_id = self.admit(&mut state, has_payload, now)?;

            if let Some((user, failed, _)) = retried {
                let session = state
                    .session_mut(&session_id)
                    .ok_or(SendRejected::NoSession)?;
                session.messages.remove(failed);
                let user = session.messages.remove(user);
                let mut staged = user.attachments;
                staged.append(&mut state.staged);
                state.staged = staged;
                log::info!("[chat] Retrying failed reply in session {}", session_id);
            }

            let attachments = std::mem::take(&mut state.staged);
            let mut user = Message::user(text.as_str(), attachments.clone());
            user.timestamp = now;
            let mut pending = Message::pending_assistant();
            pending.timestamp = now + 1;
            let user_message_id = user.id.clone();

            state.in_flight = Some(InFlight {
                session_id: session_id.clone(),
                stop: stop_tx,
            });
            let session = state
                .session_mut(&session_id)
                .ok_or(SendRejected::NoSession)?;
            if !session.has_user_messages() && !text.is_empty() {
                session.title = session_title(&text);
            }
            session.messages.push(user);
            session.messages.push(pending.clone());
            session.last_update = now;
            let conversation_id = session.conversation_id.clone();
            (text, session_id, user_message_id, pending, attachments, conversation_id)
        };
        self.emit(ChatEvent::SessionsChanged);

        log::info!(
            "[chat] Sending in session {} ({} attachments, conversation {:?})",
            session_id,
            attachments.len(),
            conversation_id
        );
        self.bots.set_conversation_id(conversation_id.as_deref());
        let mut patcher = StreamPatcher {
            state: &self.state,
            events: &self.events,
            session_id: session_id.clone(),
            message_id: pending.id.clone(),
        };
        let send = self.bots.send_message(
            &text,
            &pending,
            &attachments,
            conversation_id.as_deref(),
            &mut patcher,
        );
        // A stop may land before the bot has registered its own handle
        let result = tokio::select! {
            biased;
            _ = stop_rx.changed() => Err(BotError::Cancelled),
            result = send => result,
        };

        let now = self.now();
        let (status, finished) = {
            let mut state = lock(&self.state);
            state.in_flight = None;
            if let (Ok(outcome), Some(session)) = (&result, state.session_mut(&session_id)) {
                if outcome.conversation_id.is_some() {
                    session.conversation_id = outcome.conversation_id.clone();
                }
                session.last_update = now;
            }
            match state.message_mut(&session_id, &pending.id) {
                Some(message) if message.is_streaming => {
                    let status = match &result {
                        Ok(outcome) => {
                            message.content = outcome.full_content.clone();
                            message.attachments = merge_attachments(
                                &outcome.attachments,
                                detect_attachments(&outcome.full_content),
                            );
                            if outcome.reference.is_some() {
                                message.reference = outcome.reference.clone();
                            }
                            SendStatus::Completed
                        }
                        Err(BotError::Cancelled) => {
                            message.content.push_str(STOPPED_MARKER);
                            SendStatus::Stopped
                        }
                        Err(e) => {
                            message.content = user_facing_error(e);
                            message.thinking = None;
                            message.has_error = true;
                            SendStatus::Failed(e.to_string())
                        }
                    };
                    message.is_streaming = false;
                    (status, Some(message.clone()))
                }
                // already frozen by stop_generation, or the session is gone
                _ => (SendStatus::Stopped, None),
            }
        };
        if let Some(message) = finished {
            self.emit(ChatEvent::MessageUpdated {
                session_id: session_id.clone(),
                message,
            });
        }
        match &status {
            SendStatus::Failed(e) => log::warn!("[chat] Send failed: {}", e),
            other => log::info!("[chat] Send finished: {:?}", other),
        }
        Ok(SendReport {
            session_id,
            user_message_id,
            assistant_message_id: pending.id,
            status,
        })
    }

    /// Stop the reply in progress. Returns false when nothing was streaming.
    pub fn stop_generation(&self) -> bool {
        let stopped = {
            let mut state = lock(&self.state);
            let Some(flight) = state.in_flight.as_ref() else {
                return false;
            };
            flight.stop();
            let session_id = flight.session_id.clone();
            state.session_mut(&session_id).map(|session| {
                let mut stopped = Vec::new();
                for message in session.messages.iter_mut().filter(|m| m.is_streaming) {
                    message.content.push_str(STOPPED_MARKER);
                    message.is_streaming = false;
                    stopped.push(message.clone());
                }
                (session_id, stopped)
            })
        };
        self.bots.cancel();
        log::info!("[chat] Generation stopped");
        if let Some((session_id, messages)) = stopped {
            for message in messages {
                self.emit(ChatEvent::MessageUpdated {
                    session_id: session_id.clone(),
                    message,
                });
            }
        }
        true
    }

    // ── History ─────────────────────────────────────────────────────

    pub fn history_conversations(&self) -> Vec<HistoryConversation> {
        lock(&self.state).history.conversations().to_vec()
    }

    pub fn has_more_history(&self) -> bool {
        lock(&self.state).history.has_more()
    }

    /// Whether messages of `conversation_id` are held in the message cache (fresh or not).
    pub fn has_cached_messages(&self, conversation_id: &str) -> bool {
        lock(&self.state).messages.contains(conversation_id)
    }

    pub fn history_error(&self) -> Option<String> {
        lock(&self.state).history_error.clone()
    }

    /// Fetch the remote conversation list, served from cache while fresh.
    ///
    /// `load_more` appends the next page (Dify: `last_id` cursor, RAGFlow: page number).
    pub async fn fetch_history_conversations(
        &self,
        force_refresh: bool,
        load_more: bool,
    ) -> ChatResult<Vec<HistoryConversation>> {
        let page_size = self.settings.history_page_size.max(1);
        let query = {
            let state = lock(&self.state);
            if !force_refresh && !load_more {
                if let Some(cached) = state.history.get(self.now()) {
                    log::debug!("[chat] History list served from cache");
                    return Ok(cached.to_vec());
                }
            }
            if load_more && !state.history.has_more() {
                return Ok(state.history.conversations().to_vec());
            }
            let mut query = ConversationQuery {
                page_size,
                ..ConversationQuery::default()
            };
            if load_more {
                match self.bots.current_platform() {
                    Some(BotPlatform::Ragflow) => {
                        let loaded = state.history.conversations().len() as u32;
                        query.page = loaded.div_ceil(page_size) + 1;
                    }
                    _ => query.last_id = state.history.last_id().map(str::to_string),
                }
            }
            query
        };

        let secs = self.settings.history_list_timeout_secs;
        let result = with_timeout(secs, "History list", self.bots.list_conversations(&query)).await;

        let now = self.now();
        let outcome = {
            let mut state = lock(&self.state);
            match result {
                Ok(page) => {
                    let page_conversations: Vec<HistoryConversation> = page
                        .conversations
                        .into_iter()
                        .map(|mut c| {
                            c.created_at = Some(sane_timestamp(c.created_at, now));
                            c
                        })
                        .collect();
                    if load_more {
                        state.history.append(page_conversations, page.has_more, now);
                    } else {
                        state.history.set(page_conversations, page.has_more, now);
                    }
                    state.history_error = None;
                    Ok(state.history.conversations().to_vec())
                }
                Err(e) => {
                    log::error!("[chat] History list failed: {}", e);
                    if !load_more {
                        state.history.clear();
                    }
                    state.history_error = Some(e.to_string());
                    Err(ChatError::Bot(e))
                }
            }
        };
        self.emit(ChatEvent::HistoryChanged);
        outcome
    }

    /// Open a remote conversation as a session. A conversation already open is reused.
    pub async fn load_history_conversation(&self, conversation: &HistoryConversation) -> ChatResult<String> {
        if let Some(id) = self.switch_to_conversation(&conversation.id) {
            return Ok(id);
        }
        let cached = lock(&self.state)
            .messages
            .get(&conversation.id, self.now())
            .map(<[Message]>::to_vec);

        let messages = match cached {
            Some(messages) => {
                log::debug!("[chat] Messages for {} served from cache", conversation.id);
                messages
            }
            None => {
                let secs = self.settings.history_messages_timeout_secs;
                let fetched = with_timeout(
                    secs,
                    "History messages",
                    self.bots.get_conversation_history(&conversation.id),
                )
                .await?;
                let now = self.now();
                fetched
                    .into_iter()
                    .map(|mut m| {
                        m.timestamp = sane_timestamp(Some(m.timestamp), now);
                        m.is_streaming = false;
                        m
                    })
                    .collect()
            }
        };

        let now = self.now();
        let session_id = {
            let mut state = lock(&self.state);
            // a concurrent load may have materialized it meanwhile
            if let Some(existing) = state.session_for_conversation(&conversation.id) {
                let id = existing.id.clone();
                state.current = Some(id.clone());
                id
            } else {
                let complete = messages.len() < self.settings.history_message_limit as usize;
                state
                    .messages
                    .set(&conversation.id, messages.clone(), complete, now);
                let session = ChatSession {
                    id: conversation.id.clone(),
                    title: conversation.name.clone(),
                    last_update: messages
                        .last()
                        .map(|m| m.timestamp)
                        .unwrap_or_else(|| sane_timestamp(conversation.created_at, now)),
                    messages,
                    conversation_id: Some(conversation.id.clone()),
                    is_history: true,
                };
                let id = session.id.clone();
                state.sessions.insert(0, session);
                state.current = Some(id.clone());
                id
            }
        };
        self.bots.set_conversation_id(Some(&conversation.id));
        self.emit(ChatEvent::SessionsChanged);
        log::info!("[chat] Loaded conversation {} as session {}", conversation.id, session_id);
        Ok(session_id)
    }

    fn switch_to_conversation(&self, conversation_id: &str) -> Option<String> {
        let id = lock(&self.state)
            .session_for_conversation(conversation_id)?
            .id
            .clone();
        self.switch_session(&id);
        Some(id)
    }

    /// Delete remotely, then drop it from the list, the message cache and open sessions.
    pub async fn delete_history_conversation(&self, conversation_id: &str) -> ChatResult<()> {
        self.bots.delete_conversation(conversation_id).await?;

        let (needs_new_session, stopped) = {
            let mut state = lock(&self.state);
            state.history.remove(conversation_id);
            state.messages.invalidate(conversation_id);
            let removed: Vec<String> = state
                .sessions
                .iter()
                .filter(|s| s.conversation_id.as_deref() == Some(conversation_id))
                .map(|s| s.id.clone())
                .collect();
            remove_sessions(&mut state, &removed)
        };
        self.after_sessions_removed(needs_new_session, stopped);
        log::info!("[chat] Deleted conversation {}", conversation_id);
        self.emit(ChatEvent::SessionsChanged);
        self.emit(ChatEvent::HistoryChanged);
        Ok(())
    }

    /// Rename remotely, then mirror the name into the list and any open session.
    pub async fn rename_history_conversation(&self, conversation_id: &str, name: &str) -> ChatResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("conversation name is empty".into()));
        }
        let name = self.bots.rename_conversation(conversation_id, name).await?;
        {
            let mut state = lock(&self.state);
            state.history.rename(conversation_id, &name);
            for session in state
                .sessions
                .iter_mut()
                .filter(|s| s.conversation_id.as_deref() == Some(conversation_id))
            {
                session.title = name.clone();
            }
        }
        self.emit(ChatEvent::SessionsChanged);
        self.emit(ChatEvent::HistoryChanged);
        Ok(name)
    }
}
