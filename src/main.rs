use std::sync::Arc;

use anyhow::Context;
use secrecy::ExposeSecret;

use signal_relay::channels::{Channel, TelegramChannel};
use signal_relay::config::RelayConfig;
use signal_relay::llm::create_provider;
use signal_relay::logging;
use signal_relay::relay::MessageRelay;
use signal_relay::signal::SignalNormalizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = RelayConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  required: TELEGRAM_BOT_TOKEN, SOURCE_GROUPS, DESTINATION_GROUP, GEMINI_API_KEY");
        std::process::exit(1);
    });

    let _log_guard = logging::init(&config.log_file)
        .with_context(|| format!("opening log file {}", config.log_file.display()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        model = %config.llm.model,
        log_file = %config.log_file.display(),
        "Signal relay starting"
    );

    // ── LLM ─────────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let normalizer = Arc::new(SignalNormalizer::new(llm));
    tracing::info!(model = normalizer.model_name(), "Signal normalizer ready");

    // ── Telegram ────────────────────────────────────────────────────────
    let telegram = Arc::new(TelegramChannel::new(
        config.bot_token.expose_secret().to_string(),
    ));
    telegram
        .health_check()
        .await
        .context("Telegram bot token rejected or API unreachable")?;

    tracing::info!(
        sources = ?config.source_chats,
        destination = config.destination_chat,
        "Monitoring source chats"
    );

    // ── Relay ───────────────────────────────────────────────────────────
    let channel: Arc<dyn Channel> = telegram.clone();
    let relay = Arc::new(MessageRelay::new(
        channel,
        normalizer,
        config.source_chats.clone(),
        config.destination_chat,
        config.max_concurrent_handlers,
    ));

    tokio::select! {
        result = relay.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Relay stopped with an error");
                telegram.shutdown().await.ok();
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, shutting down");
        }
    }

    telegram.shutdown().await?;
    tracing::info!("Signal relay stopped");
    Ok(())
}
