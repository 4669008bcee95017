// RAGFlow platform client + bot adapter
// Blocking completions with a synthesized thinking event, retrieval references, and
// history either through the local backend proxy or the RAGFlow API directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use serde_json::{json, Value};

use super::adapter::{Bot, BotMessageHandler};
use super::error::{BotError, BotResult};
use super::types::{
    Attachment, BotConfig, BotPlatform, ConnectionStatus, ConversationPage, ConversationQuery,
    HistoryConversation, Message, RagflowConfig, Reference, Role, SendOutcome, UploadFile,
};
use super::util;
use crate::config::HttpClients;
use crate::{ulog_debug, ulog_error, ulog_info, ulog_warn};

/// Text of the optimistic thinking event sent before the blocking call.
pub const THINKING_PLACEHOLDER: &str = "Thinking...";

/// Object keys tried in order when the answer is nested.
const CONTENT_CANDIDATES: &[&str] = &[
    "answer",
    "content",
    "final_answer",
    "text",
    "message",
    "outputs.content",
    "outputs.answer",
    "data.content",
    "data.answer",
    "data.text",
    "data.outputs.content",
    "data.outputs.answer",
    "result",
    "response",
];

/// Keys never treated as answer text in the string-field fallback.
const METADATA_KEYS: &[&str] = &[
    "id",
    "session_id",
    "conversation_id",
    "user_id",
    "agent_id",
    "type",
    "status",
    "code",
];

const MAX_STRING_FIELD_CHARS: usize = 100_000;
const MAX_JSON_FALLBACK_CHARS: usize = 50_000;
const TRUNCATED_PREVIEW_CHARS: usize = 1_000;

/// API suffixes users paste into the base URL by mistake. Longest first.
const BASE_URL_SUFFIXES: &[&str] = &[
    "/api/v1/agents",
    "/api/v1/chats",
    "/api/v1/datasets",
    "/api/v1",
    "/v1",
];

/// Strip trailing slashes and one mistaken API suffix from a RAGFlow base URL.
pub fn clean_base_url(url: &str) -> String {
    let trimmed = util::trim_base(url);
    let lower = trimmed.to_ascii_lowercase();
    for suffix in BASE_URL_SUFFIXES {
        if lower.ends_with(suffix) {
            return util::trim_base(&trimmed[..trimmed.len() - suffix.len()]).to_string();
        }
    }
    trimmed.to_string()
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |v, key| v.get(key))
}

/// Reduce whatever RAGFlow returned as "the answer" to plain text.
///
/// Never yields `"[object Object]"` for structured input, and is idempotent:
/// a string passes through unchanged.
pub fn normalize_ragflow_content(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(normalize_ragflow_content)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(""),
        Value::Object(map) => {
            for path in CONTENT_CANDIDATES {
                if let Some(candidate) = lookup(value, path) {
                    let text = normalize_ragflow_content(candidate);
                    if !text.trim().is_empty() && text != "[object Object]" {
                        return text;
                    }
                }
            }

            let plain_field = map.iter().find_map(|(key, v)| {
                let s = v.as_str()?;
                let len = s.chars().count();
                let metadata = METADATA_KEYS.contains(&key.as_str())
                    || key.ends_with("_id")
                    || key.ends_with("Id");
                (!metadata && len > 0 && len < MAX_STRING_FIELD_CHARS && s != "[object Object]")
                    .then(|| s.to_string())
            });
            if let Some(text) = plain_field {
                return text;
            }

            let pretty = serde_json::to_string_pretty(value).unwrap_or_default();
            let chars = pretty.chars().count();
            if chars < 5 {
                String::new()
            } else if chars > MAX_JSON_FALLBACK_CHARS {
                let preview: String = pretty.chars().take(TRUNCATED_PREVIEW_CHARS).collect();
                format!("{}\n...(content truncated)", preview)
            } else {
                pretty
            }
        }
    }
}

/// Optional reference payload; empty or malformed references are dropped.
fn parse_reference(value: &Value) -> Option<Reference> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value::<Reference>(value.clone()) {
        Ok(r) if !r.is_empty() => Some(r),
        Ok(_) => None,
        Err(e) => {
            ulog_warn!("[ragflow] Ignoring malformed reference: {}", e);
            None
        }
    }
}

/// Raw protocol event from one RAGFlow send.
#[derive(Debug, Clone, PartialEq)]
pub enum RagflowEvent {
    Thinking(String),
    Complete {
        content: String,
        reference: Option<Reference>,
        session_id: String,
    },
}

fn check_code(v: &Value) -> BotResult<()> {
    match v["code"].as_i64() {
        Some(0) | None => Ok(()),
        Some(code) => Err(BotError::Backend(
            v["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("RAGFlow error code {}", code)),
        )),
    }
}

fn parse_completion(v: &Value, session_id: &str) -> BotResult<RagflowEvent> {
    check_code(v)?;
    let data = &v["data"];
    let content = if data.get("answer").is_some() {
        normalize_ragflow_content(&data["answer"])
    } else {
        normalize_ragflow_content(data)
    };
    if content.trim().is_empty() {
        return Err(BotError::Decode("RAGFlow returned an empty answer".to_string()));
    }
    Ok(RagflowEvent::Complete {
        content,
        reference: parse_reference(&data["reference"]),
        session_id: data["session_id"]
            .as_str()
            .filter(|s| !s.is_empty())
            .unwrap_or(session_id)
            .to_string(),
    })
}

fn history_role(msg: &Value) -> Role {
    match msg["role"].as_str().map(str::to_ascii_lowercase).as_deref() {
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        _ if msg["type"].as_str() == Some("human") => Role::User,
        _ => Role::Assistant,
    }
}

fn history_message(msg: &Value, index: usize) -> Message {
    let content_value = ["content", "data.content", "answer", "outputs.content", "output.content"]
        .iter()
        .find_map(|p| lookup(msg, p).filter(|v| !v.is_null()))
        .cloned()
        .unwrap_or(Value::Null);
    let id = msg["id"]
        .as_str()
        .or_else(|| msg["message_id"].as_str())
        .map(String::from)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let timestamp = ["created_at", "create_time", "timestamp"]
        .iter()
        .find_map(|k| util::parse_timestamp_ms(&msg[*k]))
        .unwrap_or(0);
    let reference = parse_reference(&msg["reference"])
        .or_else(|| parse_reference(&msg["data"]["reference"]));

    let mut message = match history_role(msg) {
        Role::User => Message::user(normalize_ragflow_content(&content_value), Vec::new()),
        Role::Assistant => Message::assistant(normalize_ragflow_content(&content_value)),
    };
    message.id = id;
    // Keep order stable when the backend omits timestamps
    message.timestamp = if timestamp > 0 { timestamp } else { index as i64 };
    message.reference = reference;
    message
}

pub struct RagflowClient {
    config: RwLock<RagflowConfig>,
    http: HttpClients,
    session_id: Mutex<Option<String>>,
    cancel: util::CancelSlot,
}

impl RagflowClient {
    pub fn new(mut config: RagflowConfig, http: HttpClients) -> Self {
        config.base_url = clean_base_url(&config.base_url);
        Self {
            config: RwLock::new(config),
            http,
            session_id: Mutex::new(None),
            cancel: util::CancelSlot::default(),
        }
    }

    fn config(&self) -> RagflowConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update_config(&self, mut config: RagflowConfig) {
        config.base_url = clean_base_url(&config.base_url);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn base_url(&self) -> String {
        self.config().base_url
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_session_id(&self, id: Option<String>) {
        *self.session_id.lock().unwrap_or_else(|e| e.into_inner()) = id;
    }

    fn chats_url(cfg: &RagflowConfig, tail: &str) -> String {
        format!("{}/api/v1/chats/{}{}", cfg.base_url, cfg.agent_id, tail)
    }

    async fn create_session(&self, cfg: &RagflowConfig, question: &str) -> BotResult<String> {
        let name: String = question.chars().take(30).collect();
        let response = self
            .http
            .api
            .post(Self::chats_url(cfg, "/sessions"))
            .bearer_auth(&cfg.api_key)
            .json(&json!({ "name": name, "user_id": cfg.user_id }))
            .send()
            .await?;
        let v: Value = util::ensure_success(response).await?.json().await?;
        check_code(&v)?;
        let id = v["data"]["id"]
            .as_str()
            .or_else(|| v["data"]["session_id"].as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BotError::Decode("session response carried no id".to_string()))?;
        ulog_info!("[ragflow] Created session {}", id);
        Ok(id.to_string())
    }

    async fn complete(&self, question: &str) -> BotResult<RagflowEvent> {
        let cfg = self.config();
        let session_id = match self.session_id() {
            Some(id) => id,
            None => self.create_session(&cfg, question).await?,
        };
        let url = Self::chats_url(&cfg, "/completions");
        ulog_info!("[ragflow] POST {} (session {})", url, session_id);
        let response = self
            .http
            .api
            .post(url)
            .bearer_auth(&cfg.api_key)
            .json(&json!({
                "question": question,
                "stream": false,
                "session_id": session_id,
                "user_id": cfg.user_id,
            }))
            .send()
            .await?;
        let v: Value = util::ensure_success(response).await?.json().await?;
        let event = parse_completion(&v, &session_id)?;
        if let RagflowEvent::Complete { session_id, .. } = &event {
            self.set_session_id(Some(session_id.clone()));
        }
        Ok(event)
    }

    /// One blocking exchange. Emits a thinking event right away, then exactly one `Complete`.
    pub async fn send_message(
        &self,
        question: &str,
        on_event: &mut (dyn FnMut(RagflowEvent) + Send),
    ) -> BotResult<()> {
        let (_cancel_guard, mut cancel_rx) = self.cancel.register();

        on_event(RagflowEvent::Thinking(THINKING_PLACEHOLDER.to_string()));

        let event = tokio::select! {
            biased;
            _ = cancel_rx.changed() => return Err(BotError::Cancelled),
            result = self.complete(question) => result?,
        };
        on_event(event);
        Ok(())
    }

    /// Abort the pending request, if any.
    pub fn cancel(&self) {
        if self.cancel.cancel() {
            ulog_info!("[ragflow] Pending request cancelled");
        }
    }

    /// Backend-side agent id for the proxy routes.
    fn backend_agent_id(cfg: &RagflowConfig) -> &str {
        cfg.local_agent_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&cfg.agent_id)
    }

    fn backend(cfg: &RagflowConfig) -> Option<&str> {
        cfg.backend_url
            .as_deref()
            .map(util::trim_base)
            .filter(|s| !s.is_empty())
    }

    fn url_with_params(base: &str, params: &[(&str, &str)]) -> BotResult<reqwest::Url> {
        reqwest::Url::parse_with_params(base, params)
            .map_err(|e| BotError::ConfigIncomplete(format!("invalid RAGFlow URL: {}", e)))
    }

    pub async fn list_conversations(&self, page: u32, page_size: u32) -> BotResult<ConversationPage> {
        let cfg = self.config();
        let (page_s, size_s) = (page.to_string(), page_size.to_string());
        let request = match Self::backend(&cfg) {
            Some(backend) => self.http.api.get(Self::url_with_params(
                &format!("{}/api/ragflow/conversations", backend),
                &[
                    ("agent_id", Self::backend_agent_id(&cfg)),
                    ("page", page_s.as_str()),
                    ("page_size", size_s.as_str()),
                    ("user_id", cfg.user_id.as_str()),
                ],
            )?),
            None => self
                .http
                .api
                .get(Self::url_with_params(
                    &Self::chats_url(&cfg, "/sessions"),
                    &[
                        ("page", page_s.as_str()),
                        ("page_size", size_s.as_str()),
                        ("user_id", cfg.user_id.as_str()),
                    ],
                )?)
                .bearer_auth(&cfg.api_key),
        };
        let v: Value = util::ensure_success(request.send().await?).await?.json().await?;
        check_code(&v)?;

        let sessions = v["data"].as_array().cloned().unwrap_or_default();
        let conversations: Vec<HistoryConversation> = sessions
            .iter()
            .filter_map(|s| {
                let id = s["id"].as_str().filter(|id| !id.is_empty())?;
                Some(HistoryConversation {
                    id: id.to_string(),
                    name: s["name"]
                        .as_str()
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or("Untitled")
                        .to_string(),
                    created_at: ["create_date", "create_time", "created_at"]
                        .iter()
                        .find_map(|k| util::parse_timestamp_ms(&s[*k])),
                })
            })
            .collect();
        let has_more = v["has_more"]
            .as_bool()
            .unwrap_or(sessions.len() as u32 >= page_size);
        Ok(ConversationPage {
            conversations,
            has_more,
        })
    }

    pub async fn get_messages(&self, conversation_id: &str) -> BotResult<Vec<Message>> {
        let cfg = self.config();
        let raw: Vec<Value> = match Self::backend(&cfg) {
            Some(backend) => {
                let url = Self::url_with_params(
                    &format!("{}/api/ragflow/history", backend),
                    &[
                        ("agent_id", Self::backend_agent_id(&cfg)),
                        ("conversation_id", conversation_id),
                        ("user_id", cfg.user_id.as_str()),
                    ],
                )?;
                let v: Value = util::ensure_success(self.http.api.get(url).send().await?)
                    .await?
                    .json()
                    .await?;
                v["messages"].as_array().cloned().unwrap_or_default()
            }
            None => {
                let url = Self::url_with_params(
                    &Self::chats_url(&cfg, "/sessions"),
                    &[("id", conversation_id), ("user_id", cfg.user_id.as_str())],
                )?;
                let response = self.http.api.get(url).bearer_auth(&cfg.api_key).send().await?;
                let v: Value = util::ensure_success(response).await?.json().await?;
                check_code(&v)?;
                v["data"][0]["messages"].as_array().cloned().unwrap_or_default()
            }
        };
        ulog_debug!("[ragflow] Loaded {} history messages for {}", raw.len(), conversation_id);
        Ok(raw
            .iter()
            .enumerate()
            .map(|(i, m)| history_message(m, i))
            .collect())
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> BotResult<()> {
        let cfg = self.config();
        let request = match Self::backend(&cfg) {
            Some(backend) => self
                .http
                .api
                .delete(format!("{}/api/ragflow/conversations/{}", backend, conversation_id)),
            None => self
                .http
                .api
                .delete(Self::chats_url(&cfg, "/sessions"))
                .json(&json!({ "ids": [conversation_id] })),
        };
        let response = request.bearer_auth(&cfg.api_key).send().await?;
        let body = util::ensure_success(response).await?.text().await?;
        if let Ok(v) = serde_json::from_str::<Value>(&body) {
            check_code(&v)?;
        }
        if self.session_id().as_deref() == Some(conversation_id) {
            self.set_session_id(None);
        }
        ulog_info!("[ragflow] Deleted conversation {}", conversation_id);
        Ok(())
    }

    pub async fn rename_conversation(&self, conversation_id: &str, name: &str) -> BotResult<String> {
        let cfg = self.config();
        let url = match Self::backend(&cfg) {
            Some(backend) => format!("{}/api/ragflow/conversations/{}", backend, conversation_id),
            None => Self::chats_url(&cfg, &format!("/sessions/{}", conversation_id)),
        };
        let response = self
            .http
            .api
            .put(url)
            .bearer_auth(&cfg.api_key)
            .json(&json!({ "name": name }))
            .send()
            .await?;
        let body = util::ensure_success(response).await?.text().await?;
        let v: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        check_code(&v)?;
        Ok(v["name"]
            .as_str()
            .or_else(|| v["data"]["name"].as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(name)
            .to_string())
    }

    /// List chats and check the configured agent is among them.
    pub async fn test_connection(&self) -> BotResult<()> {
        let cfg = self.config();
        let response = self
            .http
            .api
            .get(format!("{}/api/v1/chats", cfg.base_url))
            .bearer_auth(&cfg.api_key)
            .send()
            .await?;
        let v: Value = util::ensure_success(response).await?.json().await?;
        check_code(&v)?;
        let found = v["data"]
            .as_array()
            .map(|chats| chats.iter().any(|c| c["id"].as_str() == Some(cfg.agent_id.as_str())))
            .unwrap_or(false);
        if found {
            Ok(())
        } else {
            Err(BotError::Backend(format!("agent {} not found", cfg.agent_id)))
        }
    }
}

// ===== Bot adapter =====

pub struct RagflowBot {
    client: RagflowClient,
    destroyed: AtomicBool,
}

impl RagflowBot {
    pub fn new(config: RagflowConfig, http: HttpClients) -> BotResult<Self> {
        BotConfig::Ragflow(config.clone()).validate()?;
        Ok(Self {
            client: RagflowClient::new(config, http),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn client(&self) -> &RagflowClient {
        &self.client
    }
}

impl Bot for RagflowBot {
    fn platform(&self) -> BotPlatform {
        BotPlatform::Ragflow
    }

    fn is_ready(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst)
    }

    fn set_conversation_id(&self, conversation_id: Option<&str>) {
        self.client
            .set_session_id(conversation_id.filter(|s| !s.is_empty()).map(String::from));
    }

    fn conversation_id(&self) -> Option<String> {
        self.client.session_id()
    }

    async fn send_message(
        &self,
        text: &str,
        pending: &Message,
        attachments: &[Attachment],
        conversation_id: Option<&str>,
        handler: &mut dyn BotMessageHandler,
    ) -> BotResult<SendOutcome> {
        if !self.is_ready() {
            return Err(BotError::NotReady);
        }
        if let Some(id) = conversation_id {
            self.set_conversation_id(Some(id));
        }
        if !attachments.is_empty() {
            ulog_warn!(
                "[ragflow] {} attachment(s) ignored: RAGFlow chats take text only",
                attachments.len()
            );
        }

        let mut message = pending.clone();
        let mut outcome: Option<SendOutcome> = None;
        let result = {
            let mut on_event = |event: RagflowEvent| match event {
                RagflowEvent::Thinking(text) => {
                    handler.on_thinking(&text);
                    message.thinking = Some(text);
                    handler.on_message(&message);
                }
                RagflowEvent::Complete {
                    content,
                    reference,
                    session_id,
                } => {
                    // Full text per update: replace, never append
                    message.content = content;
                    message.thinking = None;
                    message.reference = reference.clone();
                    message.is_streaming = false;
                    if let Some(r) = &reference {
                        handler.on_reference(r);
                    }
                    handler.on_message(&message);
                    outcome = Some(SendOutcome {
                        conversation_id: Some(session_id),
                        full_content: message.content.clone(),
                        reference,
                        attachments: Vec::new(),
                    });
                }
            };
            self.client.send_message(text, &mut on_event).await
        };

        match result.and_then(|()| {
            outcome.ok_or_else(|| BotError::Decode("RAGFlow send ended without an answer".into()))
        }) {
            Ok(outcome) => {
                handler.on_complete();
                Ok(outcome)
            }
            Err(BotError::Cancelled) => {
                ulog_info!("[ragflow] Send cancelled");
                Err(BotError::Cancelled)
            }
            Err(e) => {
                ulog_error!("[ragflow] Send failed: {}", e);
                handler.on_error(&e);
                Err(e)
            }
        }
    }

    fn cancel(&self) {
        self.client.cancel();
    }

    async fn get_conversation_history(&self, conversation_id: &str) -> BotResult<Vec<Message>> {
        self.client.get_messages(conversation_id).await
    }

    async fn list_conversations(&self, query: &ConversationQuery) -> BotResult<ConversationPage> {
        self.client
            .list_conversations(query.page.max(1), query.page_size)
            .await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> BotResult<()> {
        self.client.delete_conversation(conversation_id).await
    }

    async fn rename_conversation(&self, conversation_id: &str, name: &str) -> BotResult<String> {
        self.client.rename_conversation(conversation_id, name).await
    }

    async fn upload_files(&self, files: Vec<UploadFile>) -> Vec<BotResult<Attachment>> {
        files
            .into_iter()
            .map(|f| {
                Err(BotError::Upload {
                    file: f.name,
                    reason: "RAGFlow chats do not accept file uploads".to_string(),
                })
            })
            .collect()
    }

    async fn test_connection(&self) -> ConnectionStatus {
        match self.client.test_connection().await {
            Ok(()) => ConnectionStatus::ok(),
            Err(e) => ConnectionStatus::failed(e.to_string()),
        }
    }

    fn update_config(&self, config: BotConfig) -> BotResult<()> {
        config.validate()?;
        match config {
            BotConfig::Ragflow(cfg) => {
                self.client.update_config(cfg);
                Ok(())
            }
            other => Err(BotError::UnsupportedPlatform(format!(
                "RAGFLOW bot cannot take {} config",
                other.platform()
            ))),
        }
    }

    fn destroy(&self) {
        self.client.cancel();
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_base_url() {
        assert_eq!(clean_base_url("http://rag:9380/"), "http://rag:9380");
        assert_eq!(clean_base_url("http://rag:9380/api/v1/chats/"), "http://rag:9380");
        assert_eq!(clean_base_url("http://rag:9380/API/V1"), "http://rag:9380");
        assert_eq!(clean_base_url("http://rag:9380/v1"), "http://rag:9380");
        assert_eq!(clean_base_url("http://rag:9380/api/v1/agents"), "http://rag:9380");
        assert_eq!(clean_base_url("http://rag/ragflow"), "http://rag/ragflow");
    }

    #[test]
    fn test_normalize_scalars_and_arrays() {
        assert_eq!(normalize_ragflow_content(&Value::Null), "");
        assert_eq!(normalize_ragflow_content(&json!("plain")), "plain");
        assert_eq!(normalize_ragflow_content(&json!(42)), "42");
        assert_eq!(normalize_ragflow_content(&json!(true)), "true");
        assert_eq!(
            normalize_ragflow_content(&json!(["a", null, {"answer": "b"}, ""])),
            "ab"
        );
    }

    #[test]
    fn test_normalize_candidate_priority() {
        assert_eq!(
            normalize_ragflow_content(&json!({"content": "second", "answer": "first"})),
            "first"
        );
        assert_eq!(
            normalize_ragflow_content(&json!({"answer": "", "outputs": {"content": "nested"}})),
            "nested"
        );
        assert_eq!(
            normalize_ragflow_content(&json!({"data": {"outputs": {"answer": "deep"}}})),
            "deep"
        );
        assert_eq!(
            normalize_ragflow_content(&json!({"answer": {"text": "inner"}})),
            "inner"
        );
    }

    #[test]
    fn test_normalize_string_field_fallback_skips_ids() {
        let v = json!({"session_id": "s-1", "doc_id": "d", "agentId": "a", "summary": "the text"});
        assert_eq!(normalize_ragflow_content(&v), "the text");
    }

    #[test]
    fn test_normalize_json_fallback() {
        assert_eq!(normalize_ragflow_content(&json!({})), "");
        let out = normalize_ragflow_content(&json!({"id": "x", "score": 0.5}));
        assert!(out.contains("\"score\": 0.5"));
        let huge: Vec<u32> = (0..20_000).collect();
        let out = normalize_ragflow_content(&json!({"id": "x", "values": huge}));
        assert!(out.ends_with("\n...(content truncated)"));
        assert_eq!(out.chars().count(), 1000 + "\n...(content truncated)".chars().count());
    }

    #[test]
    fn test_normalize_never_object_object_and_idempotent() {
        let inputs = vec![
            json!({"answer": "[object Object]", "content": {"text": "real"}}),
            json!({"answer": {"nested": {"deeper": 1}}}),
            json!([{"a": 1}, {"b": {"c": 2}}]),
            json!({"message": {"role": "assistant"}}),
            json!({"status": "ok", "code": "0"}),
        ];
        for input in inputs {
            let once = normalize_ragflow_content(&input);
            assert_ne!(once, "[object Object]", "input: {}", input);
            assert_eq!(normalize_ragflow_content(&Value::String(once.clone())), once);
        }
        assert_eq!(
            normalize_ragflow_content(&json!({"answer": "[object Object]", "content": {"text": "real"}})),
            "real"
        );
    }

    #[test]
    fn test_parse_completion() {
        let ok = json!({
            "code": 0,
            "data": {
                "answer": "The answer",
                "session_id": "s-2",
                "reference": {"total": 1, "chunks": [{"id": "c", "content": "x", "image_id": "i"}], "doc_aggs": []}
            }
        });
        match parse_completion(&ok, "s-1").unwrap() {
            RagflowEvent::Complete {
                content,
                reference,
                session_id,
            } => {
                assert_eq!(content, "The answer");
                assert_eq!(session_id, "s-2");
                assert_eq!(reference.unwrap().chunks["c"].img_id.as_deref(), Some("i"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = parse_completion(&json!({"code": 102, "message": "no chat"}), "s").unwrap_err();
        assert!(matches!(err, BotError::Backend(ref m) if m == "no chat"));

        let empty = parse_completion(&json!({"code": 0, "data": {"answer": ""}}), "s").unwrap_err();
        assert!(matches!(empty, BotError::Decode(_)));
    }

    #[test]
    fn test_history_message_roles_and_timestamps() {
        let user = history_message(
            &json!({"id": "m1", "type": "human", "content": "q", "created_at": 1_700_000_000}),
            0,
        );
        assert_eq!(user.role, Role::User);
        assert_eq!(user.timestamp, 1_700_000_000_000);

        let bot = history_message(
            &json!({"message_id": "m2", "role": "ASSISTANT", "data": {"content": {"answer": "a"}}}),
            3,
        );
        assert_eq!(bot.role, Role::Assistant);
        assert_eq!(bot.id, "m2");
        assert_eq!(bot.content, "a");
        assert_eq!(bot.timestamp, 3);
    }
}
