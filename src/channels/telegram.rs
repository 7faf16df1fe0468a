//! Telegram channel: long-polls the Bot API for updates.
//!
//! The bot must be a member of every source chat and of the destination chat.
//! In groups it only sees ordinary messages when it is an admin or when
//! privacy mode is disabled through BotFather (`/setprivacy`); in channels it
//! must be an admin. Group and channel posts both arrive through
//! `getUpdates`, as `message` and `channel_post` respectively.
//!
//! Parsed updates go through a bounded queue, so a slow consumer pauses
//! polling instead of buffering without limit.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::channels::{Channel, ChatId, MessageStream, RawMessage, SendOptions};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Default Bot API endpoint.
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Parsed messages buffered between the poller and the consumer.
/// Matches the `getUpdates` batch limit.
const UPDATE_BUFFER: usize = 100;

/// Telegram channel. Connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    client: reqwest::Client,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramChannel {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            api_base: TELEGRAM_API_BASE.to_string(),
            client: reqwest::Client::new(),
            poller: Mutex::new(None),
        }
    }

    /// Point the channel at a different Bot API server (local Bot API, test stub).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        bot_api_url(&self.api_base, &self.bot_token, method)
    }

    /// Send a text message, trying Markdown first with plain text fallback.
    /// Splits long messages that exceed Telegram's 4096 char limit.
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        options: SendOptions,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);

        for chunk in &chunks {
            self.send_message_chunk(chat_id, chunk, options).await?;
        }
        Ok(())
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(
        &self,
        chat_id: ChatId,
        text: &str,
        options: SendOptions,
    ) -> Result<(), ChannelError> {
        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&send_message_body(chat_id, text, Some("Markdown"), options))
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&send_message_body(chat_id, text, None, options))
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (markdown: {}, plain: {})",
                    markdown_status, plain_err
                ),
            });
        }

        Ok(())
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn subscribe(&self, sources: &[ChatId]) -> Result<MessageStream, ChannelError> {
        if sources.is_empty() {
            return Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: "no source chats to subscribe to".into(),
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(UPDATE_BUFFER);
        let url = self.api_url("getUpdates");
        let sources: HashSet<ChatId> = sources.iter().copied().collect();
        let client = self.client.clone();

        let handle = tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!(sources = ?sources, "Telegram channel listening for messages...");

            while !tx.is_closed() {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "channel_post"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    tracing::warn!(
                        response = %data,
                        "Telegram getUpdates returned no result"
                    );
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(message) = parse_update(update) else {
                        continue;
                    };

                    if !sources.contains(&message.chat_id) {
                        tracing::debug!(
                            chat_id = message.chat_id,
                            "Telegram: ignoring message from non-source chat"
                        );
                        continue;
                    }

                    if tx.send(message).await.is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        if let Ok(mut poller) = self.poller.lock()
            && let Some(previous) = poller.replace(handle)
        {
            previous.abort();
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        options: SendOptions,
    ) -> Result<(), ChannelError> {
        self.send_message(chat_id, text, options).await
    }

    async fn forward(&self, chat_id: ChatId, message: &RawMessage) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.api_url("forwardMessage"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "from_chat_id": message.chat_id,
                "message_id": message.id,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::ForwardFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::ForwardFailed {
                name: "telegram".into(),
                reason: format!("forwardMessage returned {status}: {err}"),
            });
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        if let Ok(mut poller) = self.poller.lock()
            && let Some(handle) = poller.take()
        {
            handle.abort();
        }
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn bot_api_url(api_base: &str, bot_token: &str, method: &str) -> String {
    format!("{api_base}/bot{bot_token}/{method}")
}

/// Build the JSON body for sendMessage.
fn send_message_body(
    chat_id: ChatId,
    text: &str,
    parse_mode: Option<&str>,
    options: SendOptions,
) -> Value {
    let mut body = serde_json::json!({
        "chat_id": chat_id,
        "text": text,
    });
    if let Some(mode) = parse_mode {
        body["parse_mode"] = Value::String(mode.to_string());
    }
    if options.disable_link_preview {
        body["link_preview_options"] = serde_json::json!({ "is_disabled": true });
    }
    body
}

/// Convert a getUpdates entry into a `RawMessage`.
///
/// Handles group messages and channel posts; other update kinds yield `None`.
fn parse_update(update: &Value) -> Option<RawMessage> {
    let message = update
        .get("message")
        .or_else(|| update.get("channel_post"))?;

    let id = message.get("message_id").and_then(Value::as_i64)?;
    let chat = message.get("chat")?;
    let chat_id = chat.get("id").and_then(Value::as_i64)?;

    let text = message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut raw = RawMessage::new(id, chat_id, text);
    if let Some(title) = chat
        .get("title")
        .or_else(|| chat.get("username"))
        .and_then(Value::as_str)
    {
        raw = raw.with_chat_title(title);
    }
    if let Some(date) = message
        .get("date")
        .and_then(Value::as_i64)
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
    {
        raw.received_at = date;
    }
    Some(raw)
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Never cut inside a UTF-8 sequence.
        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
