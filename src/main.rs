//! t2d - Twitch-Discord chat bridge
//!
//! Relays chat between a Twitch channel and a Discord channel, propagates
//! deletes to the mirrored message and mirrors Twitch emotes as Discord
//! emojis.

mod bridge;
mod common;
mod config;
mod discord;
mod emotes;
mod twitch;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serenity::http::Http;
use serenity::model::id::{ChannelId, WebhookId};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use bridge::strategy::DiscordStrategy;
use bridge::{ChannelBundle, PlatformHandles, RelayController};
use common::error::{PlatformError, Result as AppResult};
use common::BridgeEvent;
use config::types::Config;
use config::{env::get_config_path, load_and_validate};
use discord::channel::parse_id;
use discord::{ApplicationEmojiRegistry, DiscordBot, DiscordChannel, DiscordSettings};
use emotes::{EmoteTranslator, SqliteEmoteStore};
use twitch::api::build_http_client;
use twitch::{EmoteCdn, HelixClient, TwitchChat};

/// Everything started by `bootstrap`.
struct Bridge {
    controller: RelayController,
    discord_bot: DiscordBot,
    twitch_chat: TwitchChat,
    event_rx: mpsc::UnboundedReceiver<BridgeEvent>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("t2d v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Discord channel: {}", config.discord.channel_id);
    info!("  Twitch channel: #{}", config.twitch.channel_login());
    info!("  Twitch bot: {}", config.twitch.username);
    info!("  Database: {}", config.bridge.database_path);

    let Bridge {
        mut controller,
        discord_bot,
        twitch_chat,
        mut event_rx,
        shutdown_tx,
    } = bootstrap(&config).await?;

    let discord_task = tokio::spawn(discord_bot.run());
    let twitch_task = tokio::spawn(twitch_chat.run());

    // ============================================================
    // Relay loop
    // ============================================================
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            event = event_rx.recv() => match event {
                Some(event) => controller.handle_event(event).await,
                None => {
                    warn!("All platform adapters stopped");
                    break;
                }
            },
        }
    }

    if let Err(e) = shutdown_tx.send(true) {
        debug!("Shutdown channel closed (adapters already exited): {}", e);
    }

    let timeout = Duration::from_secs(10);
    if tokio::time::timeout(timeout, controller.shutdown()).await.is_err() {
        warn!("Pending emote uploads did not finish in time");
    }
    for (name, task) in [("Discord", discord_task), ("Twitch", twitch_task)] {
        match tokio::time::timeout(Duration::from_secs(5), task).await {
            Ok(Ok(())) => debug!("{} task stopped", name),
            Ok(Err(e)) => warn!("{} task panicked: {}", name, e),
            Err(_) => warn!("{} task did not stop in time", name),
        }
    }

    info!("Exiting...");
    Ok(())
}

/// Open the store, build the platform adapters and the relay controller.
async fn bootstrap(config: &Config) -> AppResult<Bridge> {
    let channels = ChannelBundle::new();
    let strategy = DiscordStrategy::from_config(&config.discord)?;

    let store = SqliteEmoteStore::open(&config.bridge.database_path)?;
    let http = build_http_client()?;
    let discord_http = Arc::new(Http::new(&config.discord.bot_token));

    let channel_id = ChannelId::new(parse_id(&config.discord.channel_id)?);
    let webhook_id = match &strategy {
        DiscordStrategy::Webhook { webhook_id, .. } => Some(WebhookId::new(parse_id(webhook_id)?)),
        _ => None,
    };

    let discord_channel = DiscordChannel::new(discord_http.clone(), channel_id, &strategy)?;
    let helix = Arc::new(HelixClient::new(http.clone(), &config.twitch));
    let (twitch_chat, twitch_channel) =
        twitch::client::create(config.twitch.clone(), channels.adapters.clone(), helix.clone());

    let registry =
        ApplicationEmojiRegistry::new(http.clone(), discord_http, &config.discord.bot_token);
    let translator = EmoteTranslator::new(
        Arc::new(store),
        Arc::new(EmoteCdn::new(http)),
        Arc::new(registry),
    )?;

    let controller = RelayController::new(
        config,
        strategy,
        PlatformHandles {
            discord: Arc::new(discord_channel),
            twitch: Arc::new(twitch_channel),
            users: helix,
        },
        translator,
    );

    let discord_bot = DiscordBot::build(
        DiscordSettings {
            token: config.discord.bot_token.clone(),
            channel_id,
            webhook_id,
        },
        channels.adapters,
    )
    .await
    .map_err(PlatformError::from)?;

    Ok(Bridge {
        controller,
        discord_bot,
        twitch_chat,
        event_rx: channels.event_rx,
        shutdown_tx: channels.control.shutdown_tx,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
