// Agent chat client
// Streaming chat against Dify and RAGFlow agents, with session, history and attachment handling.

pub mod bots;
pub mod chat;
pub mod config;
pub mod logger;

pub use bots::{
    AnyBot, Attachment, Bot, BotConfig, BotError, BotManager, BotMessageHandler, BotPlatform,
    BotResult, ErrorKind, HistoryConversation, Message, Reference, Role,
};
pub use chat::{ChatController, ChatError, ChatEvent, ChatSession, SendRejected, SendReport, SendStatus};
pub use config::{AgentConfig, AppConfig, ChatSettings, ProxySettings};
