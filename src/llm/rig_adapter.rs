//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionModel, Message};

use crate::error::LlmError;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

/// Wraps a rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M> RigAdapter<M>
where
    M: CompletionModel,
{
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (preamble, mut history) = split_messages(&request);

        // rig takes the newest user turn as the prompt and the rest as history.
        let prompt = history.pop().ok_or_else(|| LlmError::RequestFailed {
            provider: self.model_name.clone(),
            reason: "completion request has no user message".to_string(),
        })?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if !preamble.is_empty() {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.model_name.clone(),
            reason: e.to_string(),
        })?;

        let content = response
            .choice
            .iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        tracing::debug!(
            model = %self.model_name,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "LLM completion finished"
        );

        // rig does not surface a provider stop reason.
        let output_tokens = saturating_u32(response.usage.output_tokens);
        Ok(CompletionResponse {
            content,
            input_tokens: saturating_u32(response.usage.input_tokens),
            output_tokens,
            finish_reason: FinishReason::from_usage(output_tokens, request.max_tokens),
        })
    }
}

/// Split our messages into a system preamble and rig chat history.
fn split_messages(request: &CompletionRequest) -> (String, Vec<Message>) {
    let mut preamble = Vec::new();
    let mut history = Vec::new();

    for message in &request.messages {
        match message.role {
            Role::System => preamble.push(message.content.as_str()),
            Role::User => history.push(Message::user(message.content.clone())),
            Role::Assistant => history.push(Message::assistant(message.content.clone())),
        }
    }

    (preamble.join("\n\n"), history)
}

fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::ChatMessage;

    #[test]
    fn split_messages_collects_system_into_preamble() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("first rule"),
            ChatMessage::system("second rule"),
            ChatMessage::user("signal text"),
        ]);

        let (preamble, history) = split_messages(&request);
        assert_eq!(preamble, "first rule\n\nsecond rule");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn split_messages_without_system() {
        let request = CompletionRequest::new(vec![ChatMessage::user("hi")]);
        let (preamble, history) = split_messages(&request);
        assert!(preamble.is_empty());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn saturating_u32_clamps() {
        assert_eq!(saturating_u32(42), 42);
        assert_eq!(saturating_u32(u64::MAX), u32::MAX);
    }
}
