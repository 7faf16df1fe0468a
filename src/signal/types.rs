//! Shared types for signal validation.

use serde::{Deserialize, Serialize};

/// Reason used when the model accepts a signal but returns no usable format block.
pub const FORMAT_FAILED_REASON: &str = "Failed to format message";

/// Outcome of validating one message.
///
/// Produced once per message and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationResult {
    /// A trading signal. `formatted` holds the canonical layout when one was produced.
    Valid { formatted: Option<String> },
    /// Not a signal, or processing failed.
    Invalid { reason: String },
}

impl ValidationResult {
    pub fn valid(formatted: impl Into<String>) -> Self {
        Self::Valid {
            formatted: Some(formatted.into()),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// Rejection reason; `None` for valid signals.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Valid { .. } => None,
            Self::Invalid { reason } => Some(reason),
        }
    }

    /// Canonically formatted signal text, if any.
    pub fn formatted_text(&self) -> Option<&str> {
        match self {
            Self::Valid { formatted } => formatted.as_deref(),
            Self::Invalid { .. } => None,
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Valid { formatted: Some(_) } => "valid",
            Self::Valid { formatted: None } => "valid_unformatted",
            Self::Invalid { .. } => "invalid",
        }
    }
}
