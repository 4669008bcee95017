// Dify platform client + bot adapter
// Speaks Dify's chat-messages SSE protocol, file upload, and conversation history APIs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;

use super::adapter::{Bot, BotMessageHandler};
use super::error::{BotError, BotResult};
use super::sse::SseDecoder;
use super::types::{
    Attachment, AttachmentSource, BotConfig, BotPlatform, ConnectionStatus, ConversationPage,
    ConversationQuery, DifyConfig, HistoryConversation, Message, SendOutcome, UploadFile,
};
use super::util;
use crate::config::HttpClients;
use crate::{ulog_debug, ulog_error, ulog_info, ulog_warn};

/// Normalized event decoded from one Dify SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DifyEvent {
    /// Incremental answer token(s).
    Content(String),
    /// Moderation or post-processing replaced the whole answer.
    Replace(String),
    /// Agent reasoning (side channel).
    Thinking(String),
    /// Agent-produced file.
    File { url: String, file_type: String },
    /// Terminal event. `content` is the authoritative answer.
    Complete { content: String },
}

/// What a single frame means before stream state is applied.
#[derive(Debug, PartialEq)]
enum Frame {
    Event(DifyEvent),
    WorkflowAnswer(String),
    MessageEnd(Option<String>),
    Error(String),
    Ignore,
}

fn non_empty_str(v: &Value) -> Option<String> {
    v.as_str().filter(|s| !s.is_empty()).map(String::from)
}

fn parse_frame(v: &Value) -> Frame {
    match v["event"].as_str().unwrap_or("") {
        "message" | "agent_message" => match v["answer"].as_str() {
            Some(delta) if !delta.is_empty() => Frame::Event(DifyEvent::Content(delta.to_string())),
            _ => Frame::Ignore,
        },
        "message_replace" => Frame::Event(DifyEvent::Replace(
            v["answer"].as_str().unwrap_or_default().to_string(),
        )),
        "agent_thought" => match non_empty_str(&v["thought"]) {
            Some(thought) => Frame::Event(DifyEvent::Thinking(thought)),
            None => Frame::Ignore,
        },
        "message_file" => match non_empty_str(&v["url"]) {
            Some(url) => Frame::Event(DifyEvent::File {
                url,
                file_type: v["type"].as_str().unwrap_or("file").to_string(),
            }),
            None => Frame::Ignore,
        },
        "workflow_finished" => {
            let outputs = &v["data"]["outputs"];
            match non_empty_str(&outputs["answer"]).or_else(|| non_empty_str(&outputs["text"])) {
                Some(answer) => Frame::WorkflowAnswer(answer),
                None => Frame::Ignore,
            }
        }
        "message_end" => Frame::MessageEnd(non_empty_str(&v["answer"])),
        "error" => Frame::Error(
            non_empty_str(&v["message"]).unwrap_or_else(|| "Unknown error".to_string()),
        ),
        // ping, workflow_started, node_*, tts_message, ...
        _ => Frame::Ignore,
    }
}

/// Dify `files[]` entries for a send. Uploaded files go by id, hosted files by URL.
pub fn to_dify_files(attachments: &[Attachment]) -> Vec<Value> {
    attachments
        .iter()
        .filter_map(|a| {
            let file_type = util::dify_file_type(&a.mime_type);
            if let Some(id) = &a.upload_file_id {
                Some(json!({
                    "type": file_type,
                    "transfer_method": "local_file",
                    "upload_file_id": id,
                }))
            } else {
                a.url.as_ref().filter(|u| u.starts_with("http")).map(|url| {
                    json!({
                        "type": file_type,
                        "transfer_method": "remote_url",
                        "url": url,
                    })
                })
            }
        })
        .collect()
}

pub struct DifyClient {
    config: RwLock<DifyConfig>,
    http: HttpClients,
    conversation_id: Mutex<Option<String>>,
    cancel: util::CancelSlot,
}

/// An open chat-messages stream. Pull events with [`DifyStream::next_event`].
pub struct DifyStream<'a> {
    client: &'a DifyClient,
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    cancel_rx: watch::Receiver<bool>,
    _cancel_guard: util::CancelGuard<'a>,
    accumulated: String,
    workflow_answer: Option<String>,
    conversation_id: Option<String>,
    eof: bool,
    done: bool,
}

impl DifyStream<'_> {
    /// Conversation id as last reported by this stream's frames.
    pub fn conversation_id(&self) -> Option<String> {
        self.conversation_id.clone()
    }

    /// Next normalized event. `Ok(None)` after the terminal `Complete`.
    /// Frames still buffered when the request is stopped are discarded.
    pub async fn next_event(&mut self) -> BotResult<Option<DifyEvent>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if *self.cancel_rx.borrow() {
                self.done = true;
                return Err(BotError::Cancelled);
            }
            if let Some(data) = self.pending.pop_front() {
                if let Some(event) = self.apply(&data)? {
                    return Ok(Some(event));
                }
                continue;
            }
            if self.eof {
                // Stream closed without message_end: complete with what we have
                ulog_warn!("[dify] Stream ended without message_end, completing with accumulated content");
                return Ok(Some(self.finish(None)));
            }

            let chunk = tokio::select! {
                biased;
                _ = self.cancel_rx.changed() => {
                    self.done = true;
                    return Err(BotError::Cancelled);
                }
                chunk = self.body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    let events = self.decoder.push(&bytes);
                    self.pending.extend(events);
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Err(match BotError::from(e) {
                        BotError::Network(msg) => BotError::Network(format!("SSE stream error: {}", msg)),
                        other => other,
                    });
                }
                None => {
                    self.eof = true;
                    if let Some(tail) = self.decoder.finish() {
                        self.pending.push_back(tail);
                    }
                }
            }
        }
    }

    fn finish(&mut self, end_answer: Option<String>) -> DifyEvent {
        self.done = true;
        let content = end_answer
            .or_else(|| self.workflow_answer.take())
            .unwrap_or_else(|| self.accumulated.clone());
        DifyEvent::Complete { content }
    }

    fn apply(&mut self, data: &str) -> BotResult<Option<DifyEvent>> {
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                ulog_debug!("[dify] Skipping non-JSON SSE frame: {}", e);
                return Ok(None);
            }
        };

        if let Some(id) = non_empty_str(&v["conversation_id"]) {
            self.client.store_conversation_id(Some(id.clone()));
            self.conversation_id = Some(id);
        }

        match parse_frame(&v) {
            Frame::Event(event) => {
                match &event {
                    DifyEvent::Content(delta) => self.accumulated.push_str(delta),
                    DifyEvent::Replace(full) => self.accumulated = full.clone(),
                    DifyEvent::File { url, file_type } => {
                        return Ok(Some(DifyEvent::File {
                            url: self.client.absolute_url(url),
                            file_type: file_type.clone(),
                        }));
                    }
                    _ => {}
                }
                Ok(Some(event))
            }
            Frame::WorkflowAnswer(answer) => {
                self.workflow_answer = Some(answer);
                Ok(None)
            }
            Frame::MessageEnd(answer) => Ok(Some(self.finish(answer))),
            Frame::Error(message) => {
                self.done = true;
                ulog_error!("[dify] Error frame: {}", message);
                Err(BotError::Backend(message))
            }
            Frame::Ignore => Ok(None),
        }
    }
}

#[derive(Deserialize)]
struct DifyConversationList {
    #[serde(default)]
    data: Vec<DifyConversation>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Deserialize)]
struct DifyConversation {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    created_at: Option<Value>,
}

#[derive(Deserialize)]
struct DifyMessageList {
    #[serde(default)]
    data: Vec<DifyHistoryMessage>,
}

#[derive(Deserialize)]
struct DifyHistoryMessage {
    id: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    message_files: Vec<DifyMessageFile>,
}

#[derive(Deserialize)]
struct DifyMessageFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    file_type: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    belongs_to: Option<String>,
}

impl DifyClient {
    pub fn new(config: DifyConfig, http: HttpClients) -> Self {
        Self {
            config: RwLock::new(config),
            http,
            conversation_id: Mutex::new(None),
            cancel: util::CancelSlot::default(),
        }
    }

    fn config(&self) -> DifyConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update_config(&self, config: DifyConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.conversation_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn store_conversation_id(&self, id: Option<String>) {
        *self.conversation_id.lock().unwrap_or_else(|e| e.into_inner()) = id;
    }

    fn base(&self) -> String {
        util::trim_base(&self.config().dify_url).to_string()
    }

    /// Resolve server-relative file URLs (`/files/...`) against the API host.
    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        match reqwest::Url::parse(&self.base()).and_then(|b| b.join(url)) {
            Ok(u) => u.to_string(),
            Err(_) => url.to_string(),
        }
    }

    fn url_with_params(&self, path: &str, params: &[(&str, &str)]) -> BotResult<reqwest::Url> {
        reqwest::Url::parse_with_params(&format!("{}{}", self.base(), path), params)
            .map_err(|e| BotError::ConfigIncomplete(format!("invalid difyUrl: {}", e)))
    }

    /// Open a streaming chat request. Supersedes (and stops) any previous in-flight request.
    /// The stop handle lives until the returned stream is dropped.
    pub async fn send_message(&self, query: &str, files: Vec<Value>) -> BotResult<DifyStream<'_>> {
        let cfg = self.config();
        let (cancel_guard, mut cancel_rx) = self.cancel.register();

        let conversation_id = self.conversation_id();
        let body = json!({
            "inputs": {},
            "query": query,
            "response_mode": "streaming",
            "conversation_id": conversation_id.clone().unwrap_or_default(),
            "user": cfg.user_id,
            "files": files,
            "auto_generate_name": true,
        });
        let url = format!("{}/chat-messages", util::trim_base(&cfg.dify_url));
        ulog_info!("[dify] POST {} (SSE)", url);

        let request = self
            .http
            .stream
            .post(&url)
            .bearer_auth(&cfg.dify_key)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();
        let response = tokio::select! {
            biased;
            _ = cancel_rx.changed() => return Err(BotError::Cancelled),
            r = request => r?,
        };
        let response = util::ensure_success(response).await?;

        Ok(DifyStream {
            client: self,
            body: response.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            cancel_rx,
            _cancel_guard: cancel_guard,
            accumulated: String::new(),
            workflow_answer: None,
            conversation_id,
            eof: false,
            done: false,
        })
    }

    /// Abort the in-flight stream, if any.
    pub fn stop_current_request(&self) {
        if self.cancel.cancel() {
            ulog_info!("[dify] Current request stopped");
        }
    }

    /// Whether a chat stream is open and stoppable.
    pub fn has_request_in_flight(&self) -> bool {
        self.cancel.is_armed()
    }

    /// Upload files one by one. Each file fails or succeeds on its own.
    pub async fn upload_files(&self, files: Vec<UploadFile>) -> Vec<BotResult<Attachment>> {
        let mut results = Vec::with_capacity(files.len());
        for file in files {
            let result = self.upload_file(file).await;
            if let Err(e) = &result {
                ulog_warn!("[dify] {}", e);
            }
            results.push(result);
        }
        results
    }

    async fn upload_file(&self, file: UploadFile) -> BotResult<Attachment> {
        let mut name = util::sanitize_filename(&file.name);
        if !name.contains('.') {
            name = format!("{}.{}", name, util::mime_to_ext(&file.mime_type));
        }
        let size = file.data.len() as u64;
        util::check_upload(&name, &file.mime_type, size).map_err(|reason| BotError::Upload {
            file: name.clone(),
            reason,
        })?;

        let cfg = self.config();
        let upload_error = |reason: String| BotError::Upload {
            file: name.clone(),
            reason,
        };
        let part = reqwest::multipart::Part::bytes(file.data.clone())
            .file_name(name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| upload_error(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("user", cfg.user_id.clone());

        let request = match cfg.upload_proxy_url.as_deref() {
            Some(proxy_url) => self.http.api.post(proxy_url).multipart(
                form.text("difyUrl", cfg.dify_url.clone())
                    .text("difyKey", cfg.dify_key.clone()),
            ),
            None => self
                .http
                .api
                .post(format!("{}/files/upload", util::trim_base(&cfg.dify_url)))
                .bearer_auth(&cfg.dify_key)
                .multipart(form),
        };
        ulog_info!("[dify] Uploading {} ({} bytes)", name, size);

        let response = util::ensure_success(request.send().await?).await?;
        let v: Value = response.json().await?;
        // The local proxy wraps the Dify payload in `data`
        let payload = if v["data"]["id"].is_string() { &v["data"] } else { &v };
        let id = non_empty_str(&payload["id"])
            .ok_or_else(|| upload_error("response carried no file id".to_string()))?;

        let mut attachment = Attachment {
            id: uuid::Uuid::new_v4().to_string(),
            name: non_empty_str(&payload["name"]).unwrap_or(name.clone()),
            mime_type: non_empty_str(&payload["mime_type"]).unwrap_or(file.mime_type.clone()),
            size: payload["size"].as_u64().unwrap_or(size),
            url: None,
            base64_data: None,
            upload_file_id: Some(id),
            source: AttachmentSource::User,
        };
        if attachment.is_image() {
            attachment.backfill_base64(&file.data);
        }
        Ok(attachment)
    }

    pub async fn list_conversations(
        &self,
        last_id: Option<&str>,
        limit: u32,
    ) -> BotResult<ConversationPage> {
        let cfg = self.config();
        let limit = limit.to_string();
        let mut params = vec![("user", cfg.user_id.as_str()), ("limit", limit.as_str())];
        if let Some(last) = last_id {
            params.push(("last_id", last));
        }
        let url = self.url_with_params("/conversations", &params)?;
        let response = self.http.api.get(url).bearer_auth(&cfg.dify_key).send().await?;
        let list: DifyConversationList = util::ensure_success(response).await?.json().await?;

        Ok(ConversationPage {
            conversations: list
                .data
                .into_iter()
                .map(|c| HistoryConversation {
                    name: c.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| "Untitled".to_string()),
                    created_at: c.created_at.as_ref().and_then(util::parse_timestamp_ms),
                    id: c.id,
                })
                .collect(),
            has_more: list.has_more,
        })
    }

    /// Conversation messages, oldest first, each Dify record split into user + assistant.
    pub async fn get_messages(&self, conversation_id: &str, limit: u32) -> BotResult<Vec<Message>> {
        let cfg = self.config();
        let limit = limit.to_string();
        let url = self.url_with_params(
            "/messages",
            &[
                ("conversation_id", conversation_id),
                ("user", cfg.user_id.as_str()),
                ("limit", limit.as_str()),
            ],
        )?;
        let response = self.http.api.get(url).bearer_auth(&cfg.dify_key).send().await?;
        let list: DifyMessageList = util::ensure_success(response).await?.json().await?;

        let mut messages = Vec::with_capacity(list.data.len() * 2);
        for record in list.data {
            let ts = record
                .created_at
                .as_ref()
                .and_then(util::parse_timestamp_ms)
                .unwrap_or(0);
            let (user_files, agent_files): (Vec<_>, Vec<_>) = record
                .message_files
                .iter()
                .filter(|f| f.url.is_some())
                .partition(|f| f.belongs_to.as_deref() == Some("user"));
            let to_attachments = |files: Vec<&DifyMessageFile>, source: AttachmentSource| {
                files
                    .into_iter()
                    .filter_map(|f| {
                        let url = self.absolute_url(f.url.as_deref()?);
                        let mut a = Attachment::from_agent_url(
                            &url,
                            util::agent_file_mime(f.file_type.as_deref().unwrap_or("")),
                        );
                        if let Some(id) = &f.id {
                            a.id = id.clone();
                        }
                        a.source = source;
                        Some(a)
                    })
                    .collect::<Vec<_>>()
            };

            if let Some(query) = record.query.filter(|q| !q.is_empty()) {
                messages.push(Message {
                    id: format!("{}_user", record.id),
                    timestamp: ts,
                    attachments: to_attachments(user_files, AttachmentSource::User),
                    ..Message::user(query, Vec::new())
                });
            }
            let agent_attachments = to_attachments(agent_files, AttachmentSource::Agent);
            if let Some(answer) = record.answer.filter(|a| !a.is_empty() || !agent_attachments.is_empty()) {
                messages.push(Message {
                    id: format!("{}_assistant", record.id),
                    timestamp: ts + 1,
                    attachments: agent_attachments,
                    ..Message::assistant(answer)
                });
            }
        }
        Ok(messages)
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> BotResult<()> {
        let cfg = self.config();
        let url = format!("{}/conversations/{}", util::trim_base(&cfg.dify_url), conversation_id);
        let response = self
            .http
            .api
            .delete(url)
            .bearer_auth(&cfg.dify_key)
            .json(&json!({ "user": cfg.user_id }))
            .send()
            .await?;
        util::ensure_success(response).await?;
        ulog_info!("[dify] Deleted conversation {}", conversation_id);
        Ok(())
    }

    pub async fn rename_conversation(&self, conversation_id: &str, name: &str) -> BotResult<String> {
        let cfg = self.config();
        let url = format!(
            "{}/conversations/{}/name",
            util::trim_base(&cfg.dify_url),
            conversation_id
        );
        let response = self
            .http
            .api
            .post(url)
            .bearer_auth(&cfg.dify_key)
            .json(&json!({ "name": name, "auto_generate": false, "user": cfg.user_id }))
            .send()
            .await?;
        let v: Value = util::ensure_success(response).await?.json().await?;
        Ok(non_empty_str(&v["name"]).unwrap_or_else(|| name.to_string()))
    }

    /// Check the app parameters endpoint; needs a valid key.
    pub async fn test_connection(&self) -> BotResult<()> {
        let cfg = self.config();
        let url = format!("{}/parameters", util::trim_base(&cfg.dify_url));
        let response = self.http.api.get(url).bearer_auth(&cfg.dify_key).send().await?;
        util::ensure_success(response).await?;
        Ok(())
    }
}

// ===== Bot adapter =====

pub struct DifyBot {
    client: DifyClient,
    destroyed: AtomicBool,
}

impl DifyBot {
    pub fn new(config: DifyConfig, http: HttpClients) -> BotResult<Self> {
        BotConfig::Dify(config.clone()).validate()?;
        Ok(Self {
            client: DifyClient::new(config, http),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn client(&self) -> &DifyClient {
        &self.client
    }

    async fn drive(
        &self,
        text: &str,
        attachments: &[Attachment],
        message: &mut Message,
        handler: &mut dyn BotMessageHandler,
    ) -> BotResult<SendOutcome> {
        let mut stream = self.client.send_message(text, to_dify_files(attachments)).await?;
        let mut agent_files: Vec<Attachment> = Vec::new();

        while let Some(event) = stream.next_event().await? {
            match event {
                DifyEvent::Content(delta) => {
                    message.content.push_str(&delta);
                    handler.on_message(message);
                }
                DifyEvent::Replace(full) => {
                    message.content = full;
                    handler.on_message(message);
                }
                DifyEvent::Thinking(thought) => {
                    handler.on_thinking(&thought);
                    message.thinking = Some(thought);
                    handler.on_message(message);
                }
                DifyEvent::File { url, file_type } => {
                    if agent_files.iter().any(|a| a.url.as_deref() == Some(url.as_str())) {
                        continue;
                    }
                    agent_files.push(Attachment::from_agent_url(
                        &url,
                        util::agent_file_mime(&file_type),
                    ));
                    message.attachments = agent_files.clone();
                    handler.on_message(message);
                }
                DifyEvent::Complete { content } => {
                    if content.chars().count() > message.content.chars().count() {
                        message.content = content;
                    }
                    message.is_streaming = false;
                    handler.on_message(message);
                }
            }
        }

        Ok(SendOutcome {
            conversation_id: stream.conversation_id(),
            full_content: message.content.clone(),
            reference: None,
            attachments: agent_files,
        })
    }
}

impl Bot for DifyBot {
    fn platform(&self) -> BotPlatform {
        BotPlatform::Dify
    }

    fn is_ready(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst)
    }

    fn set_conversation_id(&self, conversation_id: Option<&str>) {
        self.client
            .store_conversation_id(conversation_id.filter(|s| !s.is_empty()).map(String::from));
    }

    fn conversation_id(&self) -> Option<String> {
        self.client.conversation_id()
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
        let mut message = pending.clone();
        match self.drive(text, attachments, &mut message, handler).await {
            Ok(outcome) => {
                handler.on_complete();
                Ok(outcome)
            }
            Err(BotError::Cancelled) => {
                ulog_info!("[dify] Send cancelled");
                Err(BotError::Cancelled)
            }
            Err(e) => {
                ulog_error!("[dify] Send failed: {}", e);
                handler.on_error(&e);
                Err(e)
            }
        }
    }

    fn cancel(&self) {
        self.client.stop_current_request();
    }

    async fn get_conversation_history(&self, conversation_id: &str) -> BotResult<Vec<Message>> {
        self.client.get_messages(conversation_id, 100).await
    }

    async fn list_conversations(&self, query: &ConversationQuery) -> BotResult<ConversationPage> {
        self.client
            .list_conversations(query.last_id.as_deref(), query.page_size)
            .await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> BotResult<()> {
        self.client.delete_conversation(conversation_id).await
    }

    async fn rename_conversation(&self, conversation_id: &str, name: &str) -> BotResult<String> {
        self.client.rename_conversation(conversation_id, name).await
    }

    async fn upload_files(&self, files: Vec<UploadFile>) -> Vec<BotResult<Attachment>> {
        self.client.upload_files(files).await
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
            BotConfig::Dify(cfg) => {
                self.client.update_config(cfg);
                Ok(())
            }
            other => Err(BotError::UnsupportedPlatform(format!(
                "DIFY bot cannot take {} config",
                other.platform()
            ))),
        }
    }

    fn destroy(&self) {
        self.client.stop_current_request();
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_events() {
        assert_eq!(
            parse_frame(&json!({"event": "agent_message", "answer": "Hi"})),
            Frame::Event(DifyEvent::Content("Hi".into()))
        );
        assert_eq!(
            parse_frame(&json!({"event": "message", "answer": ""})),
            Frame::Ignore
        );
        assert_eq!(
            parse_frame(&json!({"event": "agent_thought", "thought": "searching"})),
            Frame::Event(DifyEvent::Thinking("searching".into()))
        );
        assert_eq!(
            parse_frame(&json!({"event": "message_file", "url": "https://f/x.png", "type": "image"})),
            Frame::Event(DifyEvent::File {
                url: "https://f/x.png".into(),
                file_type: "image".into()
            })
        );
        assert_eq!(
            parse_frame(&json!({"event": "workflow_finished", "data": {"outputs": {"answer": "full"}}})),
            Frame::WorkflowAnswer("full".into())
        );
        assert_eq!(
            parse_frame(&json!({"event": "error", "message": "quota exceeded"})),
            Frame::Error("quota exceeded".into())
        );
        assert_eq!(parse_frame(&json!({"event": "ping"})), Frame::Ignore);
        assert_eq!(
            parse_frame(&json!({"event": "message_end"})),
            Frame::MessageEnd(None)
        );
    }

    #[test]
    fn test_to_dify_files_transfer_methods() {
        let mut uploaded = Attachment::from_agent_url("https://x/a.pdf", "application/pdf");
        uploaded.url = None;
        uploaded.upload_file_id = Some("up-1".into());
        let hosted = Attachment::from_agent_url("https://x/b.png", "image/png");
        let mut local_only = Attachment::from_agent_url("https://x/c.txt", "text/plain");
        local_only.url = None;

        let files = to_dify_files(&[uploaded, hosted, local_only]);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["transfer_method"], "local_file");
        assert_eq!(files[0]["upload_file_id"], "up-1");
        assert_eq!(files[0]["type"], "document");
        assert_eq!(files[1]["transfer_method"], "remote_url");
        assert_eq!(files[1]["url"], "https://x/b.png");
        assert_eq!(files[1]["type"], "image");
    }

    fn test_client(url: &str) -> DifyClient {
        DifyClient::new(
            DifyConfig {
                dify_url: url.into(),
                dify_key: "k".into(),
                user_id: "u".into(),
                upload_proxy_url: None,
            },
            HttpClients::new(None).unwrap(),
        )
    }

    #[test]
    fn test_absolute_url_resolves_relative_paths() {
        let c = test_client("https://dify.example.com/v1/");
        assert_eq!(
            c.absolute_url("/files/tools/a.png?sig=1"),
            "https://dify.example.com/files/tools/a.png?sig=1"
        );
        assert_eq!(c.absolute_url("https://cdn/x.pdf"), "https://cdn/x.pdf");
    }

    #[tokio::test]
    async fn test_upload_rejects_before_network() {
        // Port 9 is never contacted: both files fail validation first
        let c = test_client("http://127.0.0.1:9/v1");
        let results = c
            .upload_files(vec![
                UploadFile {
                    name: "tool.exe".into(),
                    mime_type: "application/x-msdownload".into(),
                    data: vec![0; 4],
                },
                UploadFile {
                    name: "big.pdf".into(),
                    mime_type: "application/pdf".into(),
                    data: vec![0; (util::MAX_UPLOAD_BYTES + 1) as usize],
                },
            ])
            .await;
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(BotError::Upload { .. }))));
    }
}
