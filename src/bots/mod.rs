// Bot layer: platform clients, adapters, and the manager owning the one active bot.
//
// Concurrency model:
//   The current bot sits behind a short-lived std RwLock and is handed out as Arc<AnyBot>.
//   Sends run WITHOUT the lock, so cancel() from another task reaches the in-flight request.

pub mod adapter;
pub mod dify;
pub mod error;
pub mod ragflow;
pub mod sse;
pub mod types;
pub mod util;

use std::sync::{Arc, RwLock};

pub use adapter::{AnyBot, Bot, BotMessageHandler};
pub use error::{BotError, BotResult, ErrorKind};
pub use types::{
    Attachment, AttachmentSource, BotConfig, BotPlatform, Chunk, ConnectionStatus,
    ConversationPage, ConversationQuery, DifyConfig, DocAgg, HistoryConversation, Message,
    RagflowConfig, Reference, Role, SendOutcome, UploadFile,
};

use crate::config::{AgentConfig, HttpClients, ProxySettings};
use dify::DifyBot;
use ragflow::RagflowBot;

/// Owns at most one active bot and mediates platform switches.
pub struct BotManager {
    current: RwLock<Option<Arc<AnyBot>>>,
    proxy: Option<ProxySettings>,
}

impl Default for BotManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BotManager {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            proxy: None,
        }
    }

    /// Manager whose bots route external traffic through `proxy`.
    pub fn with_proxy(proxy: Option<ProxySettings>) -> Self {
        Self {
            current: RwLock::new(None),
            proxy: proxy.filter(|p| p.enabled),
        }
    }

    /// Platforms with an adapter.
    pub fn supported_platforms() -> &'static [BotPlatform] {
        &[BotPlatform::Dify, BotPlatform::Ragflow]
    }

    fn build(&self, config: BotConfig) -> BotResult<AnyBot> {
        config.validate()?;
        let http = HttpClients::new(self.proxy.as_ref())?;
        Ok(match config {
            BotConfig::Dify(c) => AnyBot::Dify(DifyBot::new(c, http)?),
            BotConfig::Ragflow(c) => AnyBot::Ragflow(RagflowBot::new(c, http)?),
        })
    }

    /// Replace the active bot. A config that fails validation leaves the current bot untouched.
    pub fn initialize_bot(&self, config: BotConfig) -> bool {
        let platform = config.platform();
        let bot = match self.build(config) {
            Ok(bot) => Arc::new(bot),
            Err(e) => {
                log::error!("[bot-manager] Failed to initialize {} bot: {}", platform, e);
                return false;
            }
        };
        let previous = self
            .current
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(bot);
        if let Some(old) = previous {
            old.destroy();
        }
        log::info!("[bot-manager] {} bot initialized", platform);
        true
    }

    /// Initialize from the backend's loose agent record.
    pub fn initialize_from_agent(&self, agent: &AgentConfig) -> bool {
        match BotConfig::try_from(agent) {
            Ok(config) => self.initialize_bot(config),
            Err(e) => {
                log::error!(
                    "[bot-manager] Rejected agent config ({}): {}",
                    agent.platform,
                    e
                );
                false
            }
        }
    }

    /// Same platform: hot-swap credentials. Otherwise: full re-initialize.
    pub fn update_config(&self, config: BotConfig) -> bool {
        match self.current_bot() {
            Some(bot) if bot.platform() == config.platform() => match bot.update_config(config) {
                Ok(()) => {
                    log::info!("[bot-manager] {} bot config updated", bot.platform());
                    true
                }
                Err(e) => {
                    log::error!("[bot-manager] Config update rejected: {}", e);
                    false
                }
            },
            _ => self.initialize_bot(config),
        }
    }

    pub fn current_bot(&self) -> Option<Arc<AnyBot>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn current_platform(&self) -> Option<BotPlatform> {
        self.current_bot().map(|b| b.platform())
    }

    pub fn is_ready(&self) -> bool {
        self.current_bot().map(|b| b.is_ready()).unwrap_or(false)
    }

    /// The active bot, or `NotInitialized` / `NotReady`.
    pub fn ready_bot(&self) -> BotResult<Arc<AnyBot>> {
        let bot = self.current_bot().ok_or(BotError::NotInitialized)?;
        if bot.is_ready() {
            Ok(bot)
        } else {
            Err(BotError::NotReady)
        }
    }

    pub fn set_conversation_id(&self, conversation_id: Option<&str>) {
        if let Some(bot) = self.current_bot() {
            bot.set_conversation_id(conversation_id);
        }
    }

    pub async fn send_message(
        &self,
        text: &str,
        pending: &Message,
        attachments: &[Attachment],
        conversation_id: Option<&str>,
        handler: &mut dyn BotMessageHandler,
    ) -> BotResult<SendOutcome> {
        let bot = self.ready_bot()?;
        bot.send_message(text, pending, attachments, conversation_id, handler)
            .await
    }

    pub fn cancel(&self) {
        if let Some(bot) = self.current_bot() {
            bot.cancel();
        }
    }

    pub async fn get_conversation_history(&self, conversation_id: &str) -> BotResult<Vec<Message>> {
        self.ready_bot()?
            .get_conversation_history(conversation_id)
            .await
    }

    pub async fn list_conversations(&self, query: &ConversationQuery) -> BotResult<ConversationPage> {
        self.ready_bot()?.list_conversations(query).await
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> BotResult<()> {
        self.ready_bot()?.delete_conversation(conversation_id).await
    }

    pub async fn rename_conversation(&self, conversation_id: &str, name: &str) -> BotResult<String> {
        self.ready_bot()?
            .rename_conversation(conversation_id, name)
            .await
    }

    pub async fn upload_files(&self, files: Vec<UploadFile>) -> BotResult<Vec<BotResult<Attachment>>> {
        Ok(self.ready_bot()?.upload_files(files).await)
    }

    pub async fn test_connection(&self) -> ConnectionStatus {
        match self.ready_bot() {
            Ok(bot) => bot.test_connection().await,
            Err(e) => ConnectionStatus::failed(e.to_string()),
        }
    }

    /// Drop the active bot, cancelling anything in flight.
    pub fn destroy(&self) {
        let previous = self.current.write().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(bot) = previous {
            bot.destroy();
            log::info!("[bot-manager] {} bot destroyed", bot.platform());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dify(url: &str) -> BotConfig {
        BotConfig::Dify(DifyConfig {
            dify_url: url.into(),
            dify_key: "key".into(),
            user_id: "user".into(),
            upload_proxy_url: None,
        })
    }

    fn ragflow() -> BotConfig {
        BotConfig::Ragflow(RagflowConfig {
            base_url: "http://rag/api/v1".into(),
            api_key: "k".into(),
            agent_id: "a".into(),
            user_id: "u".into(),
            backend_url: None,
            local_agent_id: None,
        })
    }

    #[test]
    fn test_invalid_config_keeps_current_bot() {
        let manager = BotManager::new();
        assert!(manager.initialize_bot(dify("http://dify/v1")));
        let before = manager.current_bot().unwrap();

        let partial = BotConfig::Dify(DifyConfig {
            dify_url: "x".into(),
            dify_key: String::new(),
            user_id: String::new(),
            upload_proxy_url: None,
        });
        assert!(!manager.initialize_bot(partial));
        let after = manager.current_bot().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.is_ready());
    }

    #[test]
    fn test_no_bot_errors() {
        let manager = BotManager::new();
        assert!(!manager.is_ready());
        assert!(matches!(manager.ready_bot(), Err(BotError::NotInitialized)));
        // no-ops without a bot
        manager.cancel();
        manager.set_conversation_id(Some("c"));
    }

    #[tokio::test]
    async fn test_send_without_bot_is_not_initialized() {
        struct Noop;
        impl BotMessageHandler for Noop {
            fn on_message(&mut self, _: &Message) {}
            fn on_error(&mut self, _: &BotError) {}
            fn on_complete(&mut self) {}
            fn on_thinking(&mut self, _: &str) {}
        }
        let manager = BotManager::new();
        let err = manager
            .send_message("hi", &Message::pending_assistant(), &[], None, &mut Noop)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Bot not initialized");
        let status = manager.test_connection().await;
        assert!(!status.success);
    }

    #[test]
    fn test_update_config_same_platform_hot_swaps() {
        let manager = BotManager::new();
        assert!(manager.initialize_bot(dify("http://one/v1")));
        let before = manager.current_bot().unwrap();
        assert!(manager.update_config(dify("http://two/v1")));
        assert!(Arc::ptr_eq(&before, &manager.current_bot().unwrap()));
    }

    #[test]
    fn test_update_config_platform_switch_reinitializes() {
        let manager = BotManager::new();
        assert!(manager.initialize_bot(dify("http://one/v1")));
        let before = manager.current_bot().unwrap();
        assert!(manager.update_config(ragflow()));
        let after = manager.current_bot().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.platform(), BotPlatform::Ragflow);
        assert!(!before.is_ready(), "replaced bot is destroyed");
    }

    #[test]
    fn test_initialize_from_agent_unsupported_platform() {
        let manager = BotManager::new();
        let agent = AgentConfig {
            platform: "CLAUDE".into(),
            ..Default::default()
        };
        assert!(!manager.initialize_from_agent(&agent));
        assert!(manager.current_bot().is_none());
    }

    #[test]
    fn test_destroy_clears_bot() {
        let manager = BotManager::new();
        assert!(manager.initialize_bot(ragflow()));
        let bot = manager.current_bot().unwrap();
        manager.destroy();
        assert!(manager.current_bot().is_none());
        assert!(!bot.is_ready());
        assert!(matches!(manager.ready_bot(), Err(BotError::NotInitialized)));
    }
}
