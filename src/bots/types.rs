// Bot layer types
// Message, attachment, reference, and per-platform config shapes shared by every adapter.

use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};

use super::error::{BotError, BotResult};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One chat message. Mutated in place by id while `is_streaming`, frozen afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_error: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
    /// Side-channel reasoning text; never part of `content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            timestamp: now_ms(),
            is_streaming: false,
            has_error: false,
            attachments,
            reference: None,
            thinking: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            ..Self::user(content, Vec::new())
        }
    }

    /// Empty assistant placeholder shown while the bot works.
    pub fn pending_assistant() -> Self {
        Self {
            is_streaming: true,
            ..Self::assistant("")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentSource {
    User,
    Agent,
}

/// A file attached to a message, uploaded by the user or produced by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_file_id: Option<String>,
    pub source: AttachmentSource,
}

impl Attachment {
    /// Attachment produced by the agent and reachable at `url`.
    pub fn from_agent_url(url: &str, mime_type: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: super::util::file_name_from_url(url),
            mime_type: mime_type.to_string(),
            size: 0,
            url: Some(url.to_string()),
            base64_data: None,
            upload_file_id: None,
            source: AttachmentSource::Agent,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Lazily fill `base64_data` with a data URL. Only the first call has an effect.
    pub fn backfill_base64(&mut self, bytes: &[u8]) -> bool {
        if self.base64_data.is_some() {
            return false;
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.base64_data = Some(format!("data:{};base64,{}", self.mime_type, encoded));
        true
    }
}

/// A local file handed to an upload call.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

// ── RAGFlow reference payload ───────────────────────────────────────

/// Items that carry their own id, used to key array-shaped payloads.
trait Keyed {
    fn key(&self) -> Option<String>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MapOrSeq<T> {
    Map(BTreeMap<String, T>),
    Seq(Vec<T>),
}

/// RAGFlow sends `chunks`/`doc_aggs` as either an object or an array.
fn map_or_seq<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Keyed,
{
    Ok(match Option::<MapOrSeq<T>>::deserialize(deserializer)? {
        None => BTreeMap::new(),
        Some(MapOrSeq::Map(map)) => map,
        Some(MapOrSeq::Seq(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| (item.key().unwrap_or_else(|| i.to_string()), item))
            .collect(),
    })
}

/// Retrieval reference attached to a RAGFlow answer. Read-only once set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default)]
    pub total: u64,
    #[serde(default, deserialize_with = "map_or_seq")]
    pub chunks: BTreeMap<String, Chunk>,
    #[serde(default, deserialize_with = "map_or_seq")]
    pub doc_aggs: BTreeMap<String, DocAgg>,
}

impl Reference {
    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.chunks.is_empty() && self.doc_aggs.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawChunk")]
pub struct Chunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
    pub document_id: String,
    pub document_name: String,
    pub similarity: f64,
    pub vector_similarity: f64,
    pub term_similarity: f64,
    /// Accepts both `img_id` and `image_id` on input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_id: Option<String>,
}

/// Wire shape tolerant of the alternative field names RAGFlow endpoints use.
#[derive(Deserialize, Default)]
#[serde(default)]
struct RawChunk {
    id: Option<String>,
    content: Option<String>,
    content_with_weight: Option<String>,
    document_id: Option<String>,
    doc_id: Option<String>,
    document_name: Option<String>,
    docnm_kwd: Option<String>,
    similarity: Option<f64>,
    vector_similarity: Option<f64>,
    term_similarity: Option<f64>,
    img_id: Option<String>,
    image_id: Option<String>,
}

impl From<RawChunk> for Chunk {
    fn from(raw: RawChunk) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        Self {
            id: raw.id,
            content: raw.content.or(raw.content_with_weight).unwrap_or_default(),
            document_id: raw.document_id.or(raw.doc_id).unwrap_or_default(),
            document_name: raw.document_name.or(raw.docnm_kwd).unwrap_or_default(),
            similarity: raw.similarity.unwrap_or_default(),
            vector_similarity: raw.vector_similarity.unwrap_or_default(),
            term_similarity: raw.term_similarity.unwrap_or_default(),
            img_id: non_empty(raw.img_id).or_else(|| non_empty(raw.image_id)),
        }
    }
}

impl Keyed for Chunk {
    fn key(&self) -> Option<String> {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocAgg {
    pub doc_id: String,
    pub doc_name: String,
    pub count: u64,
}

impl Keyed for DocAgg {
    fn key(&self) -> Option<String> {
        Some(self.doc_id.clone()).filter(|id| !id.is_empty())
    }
}

// ── History listing ─────────────────────────────────────────────────

/// Remote conversation summary shown in the history sidebar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConversation {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

/// Paging cursor. Dify pages by `last_id`, RAGFlow by page number.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationQuery {
    pub last_id: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for ConversationQuery {
    fn default() -> Self {
        Self {
            last_id: None,
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationPage {
    pub conversations: Vec<HistoryConversation>,
    pub has_more: bool,
}

// ── Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BotPlatform {
    Dify,
    Ragflow,
}

impl BotPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dify => "DIFY",
            Self::Ragflow => "RAGFLOW",
        }
    }
}

impl std::fmt::Display for BotPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifyConfig {
    pub dify_url: String,
    pub dify_key: String,
    pub user_id: String,
    /// Local backend upload proxy; keeps the API key off the client when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_proxy_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagflowConfig {
    pub base_url: String,
    pub api_key: String,
    pub agent_id: String,
    pub user_id: String,
    /// Local backend fronting RAGFlow history routes (`/api/ragflow/...`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,
    /// Backend-side agent id used by the history proxy routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_agent_id: Option<String>,
}

/// Platform config, one variant per adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "UPPERCASE")]
pub enum BotConfig {
    Dify(DifyConfig),
    Ragflow(RagflowConfig),
}

fn require(missing: &mut Vec<&'static str>, name: &'static str, value: &str) {
    if value.trim().is_empty() {
        missing.push(name);
    }
}

impl BotConfig {
    pub fn platform(&self) -> BotPlatform {
        match self {
            Self::Dify(_) => BotPlatform::Dify,
            Self::Ragflow(_) => BotPlatform::Ragflow,
        }
    }

    /// Reject blank credentials before any adapter is built.
    pub fn validate(&self) -> BotResult<()> {
        let mut missing = Vec::new();
        match self {
            Self::Dify(c) => {
                require(&mut missing, "difyUrl", &c.dify_url);
                require(&mut missing, "difyKey", &c.dify_key);
                require(&mut missing, "userId", &c.user_id);
            }
            Self::Ragflow(c) => {
                require(&mut missing, "baseUrl", &c.base_url);
                require(&mut missing, "apiKey", &c.api_key);
                require(&mut missing, "agentId", &c.agent_id);
                require(&mut missing, "userId", &c.user_id);
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BotError::ConfigIncomplete(format!(
                "{} config missing: {}",
                self.platform(),
                missing.join(", ")
            )))
        }
    }
}

/// What a finished send hands back to the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOutcome {
    pub conversation_id: Option<String>,
    pub full_content: String,
    pub reference: Option<Reference>,
    pub attachments: Vec<Attachment>,
}

/// Result of a connectivity check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reference_chunks_as_array() {
        let r: Reference = serde_json::from_value(json!({
            "total": 2,
            "chunks": [
                {"id": "c1", "content": "alpha", "document_id": "d1", "document_name": "a.pdf", "similarity": 0.9},
                {"content_with_weight": "beta", "doc_id": "d2", "docnm_kwd": "b.pdf", "image_id": "img-2"}
            ],
            "doc_aggs": [{"doc_id": "d1", "doc_name": "a.pdf", "count": 1}]
        }))
        .unwrap();
        assert_eq!(r.chunks.len(), 2);
        assert_eq!(r.chunks["c1"].content, "alpha");
        assert_eq!(r.chunks["1"].document_name, "b.pdf");
        assert_eq!(r.chunks["1"].img_id.as_deref(), Some("img-2"));
        assert_eq!(r.doc_aggs["d1"].count, 1);
    }

    #[test]
    fn test_reference_chunks_as_map_with_both_image_fields() {
        let r: Reference = serde_json::from_value(json!({
            "total": 1,
            "chunks": {"x": {"content": "c", "img_id": "", "image_id": "img"}},
            "doc_aggs": null
        }))
        .unwrap();
        assert_eq!(r.chunks["x"].img_id.as_deref(), Some("img"));
        assert!(r.doc_aggs.is_empty());
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let cfg = BotConfig::Dify(DifyConfig {
            dify_url: "x".into(),
            dify_key: String::new(),
            user_id: " ".into(),
            upload_proxy_url: None,
        });
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, BotError::ConfigIncomplete(_)));
        let msg = err.to_string();
        assert!(msg.contains("difyKey") && msg.contains("userId"));
    }

    #[test]
    fn test_bot_config_tagged_json() {
        let cfg: BotConfig = serde_json::from_value(json!({
            "platform": "RAGFLOW",
            "baseUrl": "http://rag",
            "apiKey": "k",
            "agentId": "a",
            "userId": "u"
        }))
        .unwrap();
        assert_eq!(cfg.platform(), BotPlatform::Ragflow);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_backfill_base64_once() {
        let mut a = Attachment::from_agent_url("https://x/y/pic.png", "image/png");
        assert_eq!(a.name, "pic.png");
        assert!(a.backfill_base64(b"abc"));
        assert_eq!(a.base64_data.as_deref(), Some("data:image/png;base64,YWJj"));
        assert!(!a.backfill_base64(b"other"));
        assert_eq!(a.base64_data.as_deref(), Some("data:image/png;base64,YWJj"));
    }

    #[test]
    fn test_pending_assistant_is_streaming() {
        let m = Message::pending_assistant();
        assert_eq!(m.role, Role::Assistant);
        assert!(m.is_streaming);
        assert!(m.content.is_empty());
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["isStreaming"], true);
        assert!(v.get("hasError").is_none());
    }
}
