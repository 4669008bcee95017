/// Platform-neutral bot contract.
///
/// Each conversational backend (Dify, RAGFlow, ...) implements [`Bot`] so the
/// chat session layer never branches on the platform.
use std::future::Future;

use super::dify::DifyBot;
use super::error::{BotError, BotResult};
use super::ragflow::RagflowBot;
use super::types::{
    Attachment, BotConfig, BotPlatform, ConnectionStatus, ConversationPage, ConversationQuery,
    Message, Reference, SendOutcome, UploadFile,
};

/// Receives incremental updates while a send is in flight.
///
/// A send ends with exactly one of `on_complete` or `on_error`. A cancelled
/// send calls neither; the caller already knows it asked to stop.
pub trait BotMessageHandler: Send {
    /// The pending message changed (content growth, thinking entry, file or reference arrival).
    fn on_message(&mut self, message: &Message);
    fn on_error(&mut self, error: &BotError);
    fn on_complete(&mut self);
    fn on_thinking(&mut self, text: &str);
    fn on_reference(&mut self, _reference: &Reference) {}
}

pub trait Bot: Send + Sync + 'static {
    fn platform(&self) -> BotPlatform;

    /// False once destroyed.
    fn is_ready(&self) -> bool;

    /// Backend conversation key used by the next send. `None` starts a new conversation.
    fn set_conversation_id(&self, conversation_id: Option<&str>);

    fn conversation_id(&self) -> Option<String>;

    /// Send `text` and fold the platform's events into a copy of `pending`.
    /// Resolves once with the final content, or fails once.
    fn send_message(
        &self,
        text: &str,
        pending: &Message,
        attachments: &[Attachment],
        conversation_id: Option<&str>,
        handler: &mut dyn BotMessageHandler,
    ) -> impl Future<Output = BotResult<SendOutcome>> + Send;

    /// Abort the in-flight send. Events already delivered stay delivered.
    fn cancel(&self);

    fn get_conversation_history(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = BotResult<Vec<Message>>> + Send;

    fn list_conversations(
        &self,
        query: &ConversationQuery,
    ) -> impl Future<Output = BotResult<ConversationPage>> + Send;

    fn delete_conversation(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = BotResult<()>> + Send;

    /// Returns the name the backend stored.
    fn rename_conversation(
        &self,
        conversation_id: &str,
        name: &str,
    ) -> impl Future<Output = BotResult<String>> + Send;

    /// Upload files ahead of a send. One result per input file, in order.
    fn upload_files(
        &self,
        files: Vec<UploadFile>,
    ) -> impl Future<Output = Vec<BotResult<Attachment>>> + Send;

    fn test_connection(&self) -> impl Future<Output = ConnectionStatus> + Send;

    /// Hot-swap credentials. Fails for a config of another platform.
    fn update_config(&self, config: BotConfig) -> BotResult<()>;

    /// Cancel in-flight work and stop accepting sends.
    fn destroy(&self);
}

/// The closed set of adapters. Adding a platform means adding a variant here.
pub enum AnyBot {
    Dify(DifyBot),
    Ragflow(RagflowBot),
}

macro_rules! dispatch {
    ($self:expr, $bot:ident => $body:expr) => {
        match $self {
            AnyBot::Dify($bot) => $body,
            AnyBot::Ragflow($bot) => $body,
        }
    };
}

impl Bot for AnyBot {
    fn platform(&self) -> BotPlatform {
        dispatch!(self, b => b.platform())
    }

    fn is_ready(&self) -> bool {
        dispatch!(self, b => b.is_ready())
    }

    fn set_conversation_id(&self, conversation_id: Option<&str>) {
        dispatch!(self, b => b.set_conversation_id(conversation_id))
    }

    fn conversation_id(&self) -> Option<String> {
        dispatch!(self, b => b.conversation_id())
    }

    async fn send_message(
        &self,
        text: &str,
        pending: &Message,
        attachments: &[Attachment],
        conversation_id: Option<&str>,
        handler: &mut dyn BotMessageHandler,
    ) -> BotResult<SendOutcome> {
        dispatch!(self, b => b.send_message(text, pending, attachments, conversation_id, handler).await)
    }

    fn cancel(&self) {
        dispatch!(self, b => b.cancel())
    }

    async fn get_conversation_history(&self, conversation_id: &str) -> BotResult<Vec<Message>> {
        dispatch!(self, b => b.get_conversation_history(conversation_id).await)
    }

    async fn list_conversations(&self, query: &ConversationQuery) -> BotResult<ConversationPage> {
        dispatch!(self, b => b.list_conversations(query).await)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> BotResult<()> {
        dispatch!(self, b => b.delete_conversation(conversation_id).await)
    }

    async fn rename_conversation(&self, conversation_id: &str, name: &str) -> BotResult<String> {
        dispatch!(self, b => b.rename_conversation(conversation_id, name).await)
    }

    async fn upload_files(&self, files: Vec<UploadFile>) -> Vec<BotResult<Attachment>> {
        dispatch!(self, b => b.upload_files(files).await)
    }

    async fn test_connection(&self) -> ConnectionStatus {
        dispatch!(self, b => b.test_connection().await)
    }

    fn update_config(&self, config: BotConfig) -> BotResult<()> {
        dispatch!(self, b => b.update_config(config))
    }

    fn destroy(&self) {
        dispatch!(self, b => b.destroy())
    }
}
