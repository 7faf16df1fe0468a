//! Channel trait and the message types that flow through it.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Chat identifier as used by the transport.
pub type ChatId = i64;

/// A message received from a source chat.
///
/// Lives for one handling cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Transport-native message id (needed to forward the original).
    pub id: i64,
    /// Chat the message was posted in.
    pub chat_id: ChatId,
    /// Human-readable chat title, when the transport provides one.
    pub chat_title: Option<String>,
    /// Message text (or media caption). Empty when there is none.
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    pub fn new(id: i64, chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            id,
            chat_id,
            chat_title: None,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    pub fn with_chat_title(mut self, title: impl Into<String>) -> Self {
        self.chat_title = Some(title.into());
        self
    }

    /// Chat title for logs, falling back to the numeric id.
    pub fn chat_label(&self) -> String {
        self.chat_title
            .clone()
            .unwrap_or_else(|| self.chat_id.to_string())
    }
}

/// Options for outbound text messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Suppress link previews in the sent message.
    pub disable_link_preview: bool,
}

impl SendOptions {
    pub fn without_link_preview() -> Self {
        Self {
            disable_link_preview: true,
        }
    }
}

/// Stream of inbound messages from subscribed chats.
pub type MessageStream = Pin<Box<dyn Stream<Item = RawMessage> + Send>>;

/// A messaging transport the relay can listen on and send through.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name for logs.
    fn name(&self) -> &str;

    /// Subscribe to new messages posted in any of `sources`.
    async fn subscribe(&self, sources: &[ChatId]) -> Result<MessageStream, ChannelError>;

    /// Send a new text message to `chat_id`.
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        options: SendOptions,
    ) -> Result<(), ChannelError>;

    /// Forward `message` verbatim to `chat_id`.
    async fn forward(&self, chat_id: ChatId, message: &RawMessage) -> Result<(), ChannelError>;

    /// Check the transport is reachable and authorized.
    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError>;
}
