//! Signal normalizer: validates free text as a trading signal and
//! rewrites it into the canonical layout.
//!
//! Flow:
//! 1. One LLM call validates and formats the message
//! 2. The `VALID:` / `REASON:` / `FORMAT:` response is parsed
//! 3. Entry price ranges are re-sorted deterministically
//!
//! Every failure degrades to `ValidationResult::Invalid`; nothing is retried.

pub mod parse;
pub mod prompt;
pub mod range;
pub mod types;

pub use parse::parse_signal_response;
pub use range::{PriceRange, normalize_entry_lines};
pub use types::{FORMAT_FAILED_REASON, ValidationResult};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, FinishReason, LlmProvider};

/// Temperature for validation (deterministic-ish).
const SIGNAL_TEMPERATURE: f32 = 0.1;

/// Max tokens for the validation call. The canonical layout is short.
const SIGNAL_MAX_TOKENS: u32 = 512;

/// Validates and formats trading signals.
///
/// Stateless apart from the injected provider, so one instance is shared
/// across concurrent handlers.
pub struct SignalNormalizer {
    llm: Arc<dyn LlmProvider>,
}

impl SignalNormalizer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Validate `text` and return the formatted signal when it is one.
    pub async fn normalize(&self, text: &str) -> ValidationResult {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompt::build_signal_system_prompt()),
            ChatMessage::user(prompt::build_signal_user_prompt(text)),
        ])
        .with_temperature(SIGNAL_TEMPERATURE)
        .with_max_tokens(SIGNAL_MAX_TOKENS);

        let response = match self.llm.complete(request).await {
            Ok(response) if response.finish_reason == FinishReason::Length => {
                let e = LlmError::InvalidResponse {
                    provider: self.llm.model_name().to_string(),
                    reason: format!("response truncated at {SIGNAL_MAX_TOKENS} tokens"),
                };
                warn!(output_tokens = response.output_tokens, error = %e, "Signal validation output truncated");
                return ValidationResult::invalid(format!("Error processing message: {e}"));
            }
            Ok(response) => response,
            Err(e) => {
                warn!(model = self.llm.model_name(), error = %e, "Signal validation call failed");
                return ValidationResult::invalid(format!("Error processing message: {e}"));
            }
        };

        if response.content.trim().is_empty() {
            return ValidationResult::invalid("Empty response from LLM");
        }

        let result = parse_signal_response(&response.content);
        debug!(
            verdict = result.label(),
            output_tokens = response.output_tokens,
            "Signal validated"
        );
        result
    }
}
