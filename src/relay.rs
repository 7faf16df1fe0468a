//! Message relay: routes source-chat messages through the signal
//! normalizer to the destination chat.
//!
//! Per message:
//! 1. Empty text → skipped
//! 2. Normalizer verdict invalid → dropped (log only)
//! 3. Valid with formatted text → sent as a new message, link preview off
//! 4. Valid without formatted text → original forwarded
//! 5. Any failure in 3/4 → original forwarded as a fallback
//!
//! Failures never leave `handle`; the relay keeps running.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::channels::{Channel, ChatId, RawMessage, SendOptions};
use crate::error::{Error, RelayError};
use crate::signal::{SignalNormalizer, ValidationResult};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// No text to validate.
    Skipped,
    /// Not a valid signal; nothing was sent.
    Dropped { reason: String },
    /// Formatted signal sent to the destination.
    SentFormatted,
    /// Valid signal without formatted text; original forwarded.
    ForwardedOriginal,
    /// Primary path failed; original forwarded instead.
    FallbackForwarded { error: String },
    /// Primary path and fallback both failed.
    Failed {
        error: String,
        fallback_error: String,
    },
}

impl RelayOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Dropped { .. } => "dropped",
            Self::SentFormatted => "sent_formatted",
            Self::ForwardedOriginal => "forwarded_original",
            Self::FallbackForwarded { .. } => "fallback_forwarded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Relays validated signals from source chats to a destination chat.
pub struct MessageRelay {
    channel: Arc<dyn Channel>,
    normalizer: Arc<SignalNormalizer>,
    sources: Vec<ChatId>,
    destination: ChatId,
    permits: Arc<Semaphore>,
}

impl MessageRelay {
    pub fn new(
        channel: Arc<dyn Channel>,
        normalizer: Arc<SignalNormalizer>,
        sources: Vec<ChatId>,
        destination: ChatId,
        max_concurrent_handlers: usize,
    ) -> Self {
        Self {
            channel,
            normalizer,
            sources,
            destination,
            permits: Arc::new(Semaphore::new(max_concurrent_handlers.max(1))),
        }
    }

    /// Subscribe to the source chats and handle messages until the stream ends.
    ///
    /// Each message is handled on its own task, at most
    /// `max_concurrent_handlers` at a time. In-flight handlers are awaited
    /// before returning.
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        let mut stream = self.channel.subscribe(&self.sources).await?;
        let mut handlers = JoinSet::new();

        info!(
            channel = self.channel.name(),
            sources = ?self.sources,
            destination = self.destination,
            "Relay started, listening for messages"
        );

        while let Some(message) = stream.next().await {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let relay = Arc::clone(&self);
            handlers.spawn(async move {
                let outcome = relay.handle(&message).await;
                drop(permit);
                outcome
            });

            // Reap finished handlers so the set does not grow unbounded.
            while let Some(joined) = handlers.try_join_next() {
                log_join_result(joined);
            }
        }

        info!("Message stream ended, waiting for in-flight handlers");
        while let Some(joined) = handlers.join_next().await {
            log_join_result(joined);
        }
        Ok(())
    }

    /// Handle one inbound message end to end.
    pub async fn handle(&self, message: &RawMessage) -> RelayOutcome {
        info!(
            chat = %message.chat_label(),
            chat_id = message.chat_id,
            message_id = message.id,
            "Received message from source chat"
        );

        if message.text.trim().is_empty() {
            debug!(message_id = message.id, "Skipping empty message");
            return RelayOutcome::Skipped;
        }

        let verdict = self.normalizer.normalize(&message.text).await;
        let primary = match self.dispatch(message, verdict).await {
            Ok(outcome) => return outcome,
            Err(e) => e,
        };

        error!(
            message_id = message.id,
            error = %primary,
            "Error relaying message, forwarding original as fallback"
        );
        match self.channel.forward(self.destination, message).await {
            Ok(()) => {
                info!(message_id = message.id, "Forwarded original message as fallback");
                RelayOutcome::FallbackForwarded {
                    error: primary.to_string(),
                }
            }
            Err(fallback) => {
                error!(
                    message_id = message.id,
                    error = %fallback,
                    "Failed to forward original message"
                );
                RelayOutcome::Failed {
                    error: primary.to_string(),
                    fallback_error: fallback.to_string(),
                }
            }
        }
    }

    /// Act on a verdict; errors select the fallback path in `handle`.
    async fn dispatch(
        &self,
        message: &RawMessage,
        verdict: ValidationResult,
    ) -> Result<RelayOutcome, RelayError> {
        match verdict {
            ValidationResult::Invalid { reason } => {
                debug!(
                    message_id = message.id,
                    reason = %reason,
                    "Skipping invalid trading message"
                );
                Ok(RelayOutcome::Dropped { reason })
            }
            ValidationResult::Valid {
                formatted: Some(formatted),
            } => {
                self.channel
                    .send_text(
                        self.destination,
                        &formatted,
                        SendOptions::without_link_preview(),
                    )
                    .await
                    .map_err(RelayError::Send)?;
                info!(
                    message_id = message.id,
                    original = %message.text,
                    formatted = %formatted,
                    "Processed and relayed trading signal"
                );
                Ok(RelayOutcome::SentFormatted)
            }
            ValidationResult::Valid { formatted: None } => {
                warn!(
                    message_id = message.id,
                    "Signal formatting missing, forwarding original message"
                );
                self.channel
                    .forward(self.destination, message)
                    .await
                    .map_err(RelayError::Forward)?;
                Ok(RelayOutcome::ForwardedOriginal)
            }
        }
    }
}

fn log_join_result(joined: Result<RelayOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => debug!(outcome = outcome.label(), "Message handled"),
        Err(e) => {
            let err = RelayError::Task(e.to_string());
            error!(error = %err, "Message handler did not complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::channels::MessageStream;
    use crate::error::{ChannelError, LlmError};
    use crate::llm::provider::{
        CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    };

    const DEST: ChatId = -2001;
    const SOURCE: ChatId = -1001;

    struct CannedLlm(&'static str);

    #[async_trait]
    impl LlmProvider for CannedLlm {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.0.to_string(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Text {
            chat_id: ChatId,
            text: String,
            options: SendOptions,
        },
        Forward {
            chat_id: ChatId,
            message_id: i64,
        },
    }

    /// Records outbound calls; can be told to fail sends and/or forwards.
    #[derive(Default)]
    struct RecordingChannel {
        fail_send: bool,
        fail_forward: bool,
        sent: Mutex<Vec<Sent>>,
        inbound: Mutex<Vec<RawMessage>>,
    }

    impl RecordingChannel {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn subscribe(&self, _sources: &[ChatId]) -> Result<MessageStream, ChannelError> {
            let inbound = std::mem::take(&mut *self.inbound.lock().unwrap());
            Ok(Box::pin(futures::stream::iter(inbound)))
        }

        async fn send_text(
            &self,
            chat_id: ChatId,
            text: &str,
            options: SendOptions,
        ) -> Result<(), ChannelError> {
            if self.fail_send {
                return Err(ChannelError::SendFailed {
                    name: "recording".into(),
                    reason: "chat not found".into(),
                });
            }
            self.sent.lock().unwrap().push(Sent::Text {
                chat_id,
                text: text.to_string(),
                options,
            });
            Ok(())
        }

        async fn forward(
            &self,
            chat_id: ChatId,
            message: &RawMessage,
        ) -> Result<(), ChannelError> {
            if self.fail_forward {
                return Err(ChannelError::ForwardFailed {
                    name: "recording".into(),
                    reason: "forbidden".into(),
                });
            }
            self.sent.lock().unwrap().push(Sent::Forward {
                chat_id,
                message_id: message.id,
            });
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    const VALID_REPLY: &str = "VALID: true\nREASON: Valid trading signal\nFORMAT:\nAsset: GOLD\nType: SELL\nEntry: 2934.88 - 2930.88\nStop Loss: 2940";

    fn build_relay(channel: Arc<RecordingChannel>, reply: &'static str) -> MessageRelay {
        let normalizer = Arc::new(SignalNormalizer::new(Arc::new(CannedLlm(reply))));
        MessageRelay::new(channel, normalizer, vec![SOURCE], DEST, 4)
    }

    fn message(text: &str) -> RawMessage {
        RawMessage::new(42, SOURCE, text).with_chat_title("Gold VIP")
    }

    #[tokio::test]
    async fn valid_signal_is_sent_formatted_without_preview() {
        let channel = Arc::new(RecordingChannel::default());
        let outcome = build_relay(Arc::clone(&channel), VALID_REPLY)
            .handle(&message("gold sell 2934.88-2930.88 sl 2940"))
            .await;

        assert_eq!(outcome, RelayOutcome::SentFormatted);
        assert_eq!(
            channel.sent(),
            vec![Sent::Text {
                chat_id: DEST,
                text: "Asset: GOLD\nType: SELL\nEntry: 2930.88 - 2934.88\nStop Loss: 2940".into(),
                options: SendOptions::without_link_preview(),
            }]
        );
    }

    #[tokio::test]
    async fn invalid_signal_is_dropped() {
        let channel = Arc::new(RecordingChannel::default());
        let outcome = build_relay(
            Arc::clone(&channel),
            "VALID: false\nREASON: Missing stop loss level\nFORMAT: None",
        )
        .handle(&message("gold to the moon"))
        .await;

        assert_eq!(
            outcome,
            RelayOutcome::Dropped {
                reason: "Missing stop loss level".into()
            }
        );
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_skipped() {
        let channel = Arc::new(RecordingChannel::default());
        let outcome = build_relay(Arc::clone(&channel), VALID_REPLY)
            .handle(&message("   "))
            .await;
        assert_eq!(outcome, RelayOutcome::Skipped);
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn send_failure_falls_back_to_forward() {
        let channel = Arc::new(RecordingChannel {
            fail_send: true,
            ..Default::default()
        });
        let outcome = build_relay(Arc::clone(&channel), VALID_REPLY)
            .handle(&message("gold sell"))
            .await;

        assert!(matches!(outcome, RelayOutcome::FallbackForwarded { ref error } if error.contains("chat not found")));
        assert_eq!(
            channel.sent(),
            vec![Sent::Forward {
                chat_id: DEST,
                message_id: 42
            }]
        );
    }

    #[tokio::test]
    async fn fallback_failure_is_reported_not_propagated() {
        let channel = Arc::new(RecordingChannel {
            fail_send: true,
            fail_forward: true,
            ..Default::default()
        });
        let outcome = build_relay(Arc::clone(&channel), VALID_REPLY)
            .handle(&message("gold sell"))
            .await;

        match outcome {
            RelayOutcome::Failed {
                error,
                fallback_error,
            } => {
                assert!(error.contains("chat not found"));
                assert!(fallback_error.contains("forbidden"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn valid_without_format_forwards_original() {
        let channel = Arc::new(RecordingChannel::default());
        let relay = build_relay(Arc::clone(&channel), VALID_REPLY);
        let outcome = relay
            .dispatch(&message("gold sell"), ValidationResult::Valid { formatted: None })
            .await
            .unwrap();

        assert_eq!(outcome, RelayOutcome::ForwardedOriginal);
        assert_eq!(
            channel.sent(),
            vec![Sent::Forward {
                chat_id: DEST,
                message_id: 42
            }]
        );
    }

    #[tokio::test]
    async fn forward_error_surfaces_from_dispatch() {
        let channel = Arc::new(RecordingChannel {
            fail_forward: true,
            ..Default::default()
        });
        let relay = build_relay(Arc::clone(&channel), VALID_REPLY);
        let err = relay
            .dispatch(&message("gold sell"), ValidationResult::Valid { formatted: None })
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Forward(_)));
    }

    #[tokio::test]
    async fn run_handles_every_message_then_returns() {
        let channel = Arc::new(RecordingChannel::default());
        *channel.inbound.lock().unwrap() = vec![
            RawMessage::new(1, SOURCE, "gold sell"),
            RawMessage::new(2, SOURCE, ""),
            RawMessage::new(3, SOURCE, "gold sell again"),
        ];

        let relay = Arc::new(build_relay(Arc::clone(&channel), VALID_REPLY));
        relay.run().await.unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|s| matches!(s, Sent::Text { chat_id, .. } if *chat_id == DEST)));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(RelayOutcome::Skipped.label(), "skipped");
        assert_eq!(
            RelayOutcome::Dropped { reason: "x".into() }.label(),
            "dropped"
        );
        assert_eq!(RelayOutcome::SentFormatted.label(), "sent_formatted");
        assert_eq!(RelayOutcome::ForwardedOriginal.label(), "forwarded_original");
    }
}
