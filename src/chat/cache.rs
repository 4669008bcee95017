// History list and per-conversation message caches, driven by an injectable clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::bots::types::{now_ms, HistoryConversation, Message};

/// Millisecond clock. Swap in [`ManualClock`] to test expiry deterministically.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        now_ms()
    }
}

/// Settable clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Cached first pages of the history sidebar.
#[derive(Debug, Clone, Default)]
pub struct HistoryCache {
    ttl_ms: i64,
    conversations: Vec<HistoryConversation>,
    last_fetch: Option<i64>,
    has_more: bool,
    /// Dify cursor (id of the last conversation fetched)
    last_id: Option<String>,
}

impl HistoryCache {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl_ms,
            ..Self::default()
        }
    }

    pub fn is_fresh(&self, now: i64) -> bool {
        self.last_fetch
            .map(|t| now - t < self.ttl_ms)
            .unwrap_or(false)
    }

    /// Cached list, only while fresh and non-empty.
    pub fn get(&self, now: i64) -> Option<&[HistoryConversation]> {
        (self.is_fresh(now) && !self.conversations.is_empty()).then_some(self.conversations.as_slice())
    }

    pub fn conversations(&self) -> &[HistoryConversation] {
        &self.conversations
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn last_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Replace the cached list with a freshly fetched first page.
    pub fn set(&mut self, conversations: Vec<HistoryConversation>, has_more: bool, now: i64) {
        self.last_id = conversations.last().map(|c| c.id.clone());
        self.conversations = conversations;
        self.has_more = has_more;
        self.last_fetch = Some(now);
    }

    /// Append a further page, skipping ids already listed.
    pub fn append(&mut self, page: Vec<HistoryConversation>, has_more: bool, now: i64) {
        if let Some(last) = page.last() {
            self.last_id = Some(last.id.clone());
        }
        for conv in page {
            if !self.conversations.iter().any(|c| c.id == conv.id) {
                self.conversations.push(conv);
            }
        }
        self.has_more = has_more;
        self.last_fetch = Some(now);
    }

    pub fn invalidate(&mut self) {
        self.last_fetch = None;
    }

    pub fn clear(&mut self) {
        *self = Self::new(self.ttl_ms);
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        self.conversations.len() != before
    }

    pub fn rename(&mut self, id: &str, name: &str) -> bool {
        match self.conversations.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                c.name = name.to_string();
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
struct MessageCacheEntry {
    messages: Vec<Message>,
    last_fetch: i64,
    is_complete: bool,
}

/// Per-conversation history messages.
#[derive(Debug, Clone, Default)]
pub struct MessageCache {
    ttl_ms: i64,
    entries: HashMap<String, MessageCacheEntry>,
}

impl MessageCache {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl_ms,
            entries: HashMap::new(),
        }
    }

    /// Cached messages, only when fresh and the fetch returned the whole conversation.
    pub fn get(&self, conversation_id: &str, now: i64) -> Option<&[Message]> {
        self.entries
            .get(conversation_id)
            .filter(|e| e.is_complete && now - e.last_fetch < self.ttl_ms)
            .map(|e| e.messages.as_slice())
    }

    pub fn set(&mut self, conversation_id: &str, messages: Vec<Message>, is_complete: bool, now: i64) {
        self.entries.insert(
            conversation_id.to_string(),
            MessageCacheEntry {
                messages,
                last_fetch: now,
                is_complete,
            },
        );
    }

    pub fn invalidate(&mut self, conversation_id: &str) -> bool {
        self.entries.remove(conversation_id).is_some()
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.entries.contains_key(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(id: &str) -> HistoryConversation {
        HistoryConversation {
            id: id.into(),
            name: format!("conv {}", id),
            created_at: None,
        }
    }

    #[test]
    fn test_history_cache_expires_after_ttl() {
        let clock = ManualClock::new(1_000);
        let mut cache = HistoryCache::new(5 * 60 * 1000);
        assert!(cache.get(clock.now_ms()).is_none());

        cache.set(vec![conv("a"), conv("b")], true, clock.now_ms());
        assert_eq!(cache.get(clock.now_ms()).unwrap().len(), 2);
        assert_eq!(cache.last_id(), Some("b"));

        clock.advance(5 * 60 * 1000 - 1);
        assert!(cache.get(clock.now_ms()).is_some());
        clock.advance(1);
        assert!(cache.get(clock.now_ms()).is_none());
        // stale data is still there for display
        assert_eq!(cache.conversations().len(), 2);
    }

    #[test]
    fn test_history_cache_empty_list_is_not_served() {
        let mut cache = HistoryCache::new(1000);
        cache.set(Vec::new(), false, 0);
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn test_history_cache_append_remove_rename() {
        let mut cache = HistoryCache::new(1000);
        cache.set(vec![conv("a")], true, 0);
        cache.append(vec![conv("a"), conv("b")], false, 10);
        assert_eq!(cache.conversations().len(), 2);
        assert!(!cache.has_more());
        assert!(cache.rename("b", "renamed"));
        assert_eq!(cache.conversations()[1].name, "renamed");
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        cache.invalidate();
        assert!(cache.get(10).is_none());
    }

    #[test]
    fn test_message_cache_requires_complete_and_fresh() {
        let clock = ManualClock::new(0);
        let mut cache = MessageCache::new(10 * 60 * 1000);
        cache.set("c1", vec![Message::assistant("hi")], true, clock.now_ms());
        cache.set("c2", vec![Message::assistant("partial")], false, clock.now_ms());

        assert_eq!(cache.get("c1", clock.now_ms()).unwrap().len(), 1);
        assert!(cache.get("c2", clock.now_ms()).is_none());

        clock.advance(10 * 60 * 1000);
        assert!(cache.get("c1", clock.now_ms()).is_none());
        assert!(cache.invalidate("c1"));
        assert!(!cache.contains("c1"));
    }
}
