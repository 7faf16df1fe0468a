//! Configuration types.
//!
//! Everything is read from the environment once at startup. A `.env` file in
//! the working directory is loaded first when present.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::channels::ChatId;
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Default ceiling on concurrently handled messages.
const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Default log file, next to the working directory.
const DEFAULT_LOG_FILE: &str = "bot.log";

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Telegram Bot API token.
    pub bot_token: SecretString,
    /// Chats whose new messages are relayed.
    pub source_chats: Vec<ChatId>,
    /// Chat that receives formatted or forwarded signals.
    pub destination_chat: ChatId,
    /// LLM used for validation and formatting.
    pub llm: LlmConfig,
    /// Maximum number of messages handled at the same time.
    pub max_concurrent_handlers: usize,
    /// Log file written alongside stdout.
    pub log_file: PathBuf,
}

impl RelayConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let bot_token = SecretString::from(required("TELEGRAM_BOT_TOKEN")?);

        let source_chats = parse_chat_ids("SOURCE_GROUPS", &required("SOURCE_GROUPS")?)?;
        if source_chats.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "SOURCE_GROUPS".into(),
                message: "at least one chat id is required".into(),
            });
        }

        let destination_chat =
            parse_chat_id("DESTINATION_GROUP", required("DESTINATION_GROUP")?.trim())?;

        let backend = match lookup("SIGNAL_RELAY_LLM_BACKEND") {
            Some(raw) => raw.parse::<LlmBackend>().map_err(|message| ConfigError::InvalidValue {
                key: "SIGNAL_RELAY_LLM_BACKEND".into(),
                message,
            })?,
            None => LlmBackend::Gemini,
        };

        let api_key = SecretString::from(required(backend.api_key_var())?);
        let model = lookup("SIGNAL_RELAY_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| backend.default_model().to_string());

        let max_concurrent_handlers = match lookup("SIGNAL_RELAY_MAX_CONCURRENT") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "SIGNAL_RELAY_MAX_CONCURRENT".into(),
                        message: format!("expected a positive integer, got '{raw}'"),
                    });
                }
            },
            None => DEFAULT_MAX_CONCURRENT,
        };

        let log_file = lookup("SIGNAL_RELAY_LOG_FILE")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));

        Ok(Self {
            bot_token,
            source_chats,
            destination_chat,
            llm: LlmConfig {
                backend,
                api_key,
                model,
            },
            max_concurrent_handlers,
            log_file,
        })
    }
}

/// Parse a comma-separated list of chat ids, skipping blank entries.
pub fn parse_chat_ids(key: &str, raw: &str) -> Result<Vec<ChatId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_chat_id(key, s))
        .collect()
}

fn parse_chat_id(key: &str, raw: &str) -> Result<ChatId, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}' is not a numeric chat id"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn base_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("TELEGRAM_BOT_TOKEN", "123:ABC"),
            ("SOURCE_GROUPS", "-1001, -1002"),
            ("DESTINATION_GROUP", "-2001"),
            ("GEMINI_API_KEY", "g-key"),
        ]
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let config = RelayConfig::from_lookup(lookup(&base_vars())).unwrap();
        assert_eq!(config.bot_token.expose_secret(), "123:ABC");
        assert_eq!(config.source_chats, vec![-1001, -1002]);
        assert_eq!(config.destination_chat, -2001);
        assert_eq!(config.llm.backend, LlmBackend::Gemini);
        assert_eq!(config.llm.model, "gemini-2.0-flash");
        assert_eq!(config.llm.api_key.expose_secret(), "g-key");
        assert_eq!(config.max_concurrent_handlers, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.log_file, PathBuf::from("bot.log"));
    }

    #[test]
    fn missing_token_is_reported() {
        let vars: Vec<_> = base_vars()
            .into_iter()
            .filter(|(k, _)| *k != "TELEGRAM_BOT_TOKEN")
            .collect();
        let err = RelayConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn backend_selects_api_key_var() {
        let mut vars = base_vars();
        vars.push(("SIGNAL_RELAY_LLM_BACKEND", "openai"));
        let err = RelayConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OPENAI_API_KEY"));

        vars.push(("OPENAI_API_KEY", "sk-test"));
        vars.push(("SIGNAL_RELAY_MODEL", "gpt-4o"));
        let config = RelayConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.llm.backend, LlmBackend::OpenAi);
        assert_eq!(config.llm.model, "gpt-4o");
    }

    #[test]
    fn unknown_backend_is_invalid() {
        let mut vars = base_vars();
        vars.push(("SIGNAL_RELAY_LLM_BACKEND", "mistral"));
        let err = RelayConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SIGNAL_RELAY_LLM_BACKEND"));
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let mut vars = base_vars();
        vars.push(("SIGNAL_RELAY_MAX_CONCURRENT", "0"));
        assert!(RelayConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn non_numeric_destination_is_invalid() {
        let mut vars = base_vars();
        vars.retain(|(k, _)| *k != "DESTINATION_GROUP");
        vars.push(("DESTINATION_GROUP", "@signals"));
        let err = RelayConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("DESTINATION_GROUP"));
    }

    #[test]
    fn parse_chat_ids_skips_blanks() {
        assert_eq!(
            parse_chat_ids("SOURCE_GROUPS", " -1, ,-2,").unwrap(),
            vec![-1, -2]
        );
    }

    #[test]
    fn parse_chat_ids_rejects_garbage() {
        assert!(parse_chat_ids("SOURCE_GROUPS", "-1,abc").is_err());
    }

    #[test]
    fn only_commas_means_no_sources() {
        let mut vars = base_vars();
        vars.retain(|(k, _)| *k != "SOURCE_GROUPS");
        vars.push(("SOURCE_GROUPS", " , "));
        let err = RelayConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SOURCE_GROUPS"));
    }
}
