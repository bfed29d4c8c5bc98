//! Discord gateway client.
//!
//! Gateway callbacks are forwarded into a channel and processed in order by
//! `process_events`, which turns messages of the bridged channel into
//! bridge events.

use std::time::Duration;

use serenity::async_trait;
use serenity::model::channel::{Message, MessageType};
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId, WebhookId};
use serenity::prelude::*;
use serenity::Client;

use backon::BackoffBuilder;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bridge::channels::AdapterChannels;
use crate::common::{BridgeEvent, ChatMessage, Platform};
use crate::discord::resolver::MessageResolver;

#[derive(Debug, Clone)]
pub enum DiscordBotEvent {
    /// Bot connected and ready.
    Ready(Ready),
    /// Message received.
    Message {
        context: Context,
        message: Message,
    },
    /// Messages deleted.
    Deleted {
        channel_id: ChannelId,
        message_ids: Vec<MessageId>,
    },
    Disconnected,
}

struct DiscordBotEvents {
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
}

impl DiscordBotEvents {
    fn new(discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>) -> Self {
        Self { discord_events_tx }
    }

    fn forward(&self, event: DiscordBotEvent) {
        if let Err(error) = self.discord_events_tx.send(event) {
            warn!("Failed to process discord event: {}", error);
        }
    }
}

#[async_trait]
impl EventHandler for DiscordBotEvents {
    async fn ready(&self, _context: Context, ready: Ready) {
        self.forward(DiscordBotEvent::Ready(ready));
    }

    async fn message(&self, context: Context, message: Message) {
        self.forward(DiscordBotEvent::Message { context, message });
    }

    async fn message_delete(
        &self,
        _context: Context,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        _guild_id: Option<GuildId>,
    ) {
        self.forward(DiscordBotEvent::Deleted {
            channel_id,
            message_ids: vec![deleted_message_id],
        });
    }

    async fn message_delete_bulk(
        &self,
        _context: Context,
        channel_id: ChannelId,
        multiple_deleted_messages_ids: Vec<MessageId>,
        _guild_id: Option<GuildId>,
    ) {
        self.forward(DiscordBotEvent::Deleted {
            channel_id,
            message_ids: multiple_deleted_messages_ids,
        });
    }
}

/// Settings of the Discord side of the bridge.
#[derive(Debug, Clone)]
pub struct DiscordSettings {
    pub token: String,
    pub channel_id: ChannelId,
    /// Webhook relayed messages are posted through, if any.
    pub webhook_id: Option<WebhookId>,
}

async fn build_client(
    token: &str,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
) -> serenity::Result<Client> {
    let intents =
        GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT | GatewayIntents::GUILDS;

    let events = DiscordBotEvents::new(discord_events_tx);
    Client::builder(token, intents).event_handler(events).await
}

pub struct DiscordBot {
    client: Option<Client>,
    settings: DiscordSettings,
    resolver: MessageResolver,
    discord_events_rx: mpsc::UnboundedReceiver<DiscordBotEvent>,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
    channels: AdapterChannels,
}

impl DiscordBot {
    /// Build the gateway client.
    pub async fn build(
        settings: DiscordSettings,
        channels: AdapterChannels,
    ) -> serenity::Result<Self> {
        let (discord_events_tx, discord_events_rx) = mpsc::unbounded_channel::<DiscordBotEvent>();
        let client = build_client(&settings.token, discord_events_tx.clone()).await?;

        Ok(Self {
            client: Some(client),
            settings,
            resolver: MessageResolver::new(),
            discord_events_rx,
            discord_events_tx,
            channels,
        })
    }

    pub async fn run(mut self) {
        let shard_manager = self.client.as_ref().map(|c| c.shard_manager.clone());
        let client = &mut self.client;
        let discord_events_rx = &mut self.discord_events_rx;
        let mut shutdown_rx = self.channels.shutdown_rx.clone();
        let processor = EventProcessor {
            settings: &self.settings,
            resolver: &self.resolver,
            event_tx: &self.channels.event_tx,
        };

        tokio::select! {
            _ = Self::run_connection(client, &self.settings.token, &self.discord_events_tx) => {},
            _ = processor.process_events(discord_events_rx) => {},
            _ = async {
                loop {
                    if shutdown_rx.changed().await.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                if let Some(ref manager) = shard_manager {
                    info!("Initiating graceful Discord shutdown...");
                    manager.shutdown_all().await;
                    info!("Discord shutdown complete");
                }
            } => {}
        }
        info!("Discord task ended");
    }

    async fn run_connection(
        client: &mut Option<Client>,
        token: &str,
        discord_events_tx: &mpsc::UnboundedSender<DiscordBotEvent>,
    ) {
        /// Create an exponential backoff iterator for Discord reconnection.
        /// 5s initial, 5min max, factor 1.1, with jitter, unlimited retries.
        fn discord_backoff() -> impl Iterator<Item = Duration> {
            backon::ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(5))
                .with_max_delay(Duration::from_secs(300))
                .with_factor(1.1)
                .with_jitter()
                .without_max_times()
                .build()
        }

        let mut backoff = discord_backoff();

        loop {
            info!("Connecting to Discord...");

            let mut client = match client.take() {
                Some(client) => client,
                None => {
                    // serenity mostly handles reconnections itself.
                    match build_client(token, discord_events_tx.clone()).await {
                        Ok(client) => {
                            backoff = discord_backoff();
                            client
                        }
                        Err(e) => {
                            error!("Failed to rebuild Discord client: {}", e);
                            let delay = backoff.next().unwrap_or(Duration::from_secs(300));
                            warn!("Retrying in {:.1}s...", delay.as_secs_f64());
                            sleep(delay).await;
                            continue;
                        }
                    }
                }
            };

            match client.start().await {
                Ok(()) => {
                    info!("Discord client disconnected normally");
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    break;
                }
                Err(e) => {
                    error!("Discord client error: {}", e);
                    let delay = backoff.next().unwrap_or(Duration::from_secs(300));
                    warn!(
                        "Discord disconnected. Reconnecting in {:.1}s...",
                        delay.as_secs_f64(),
                    );
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Turns gateway events of the bridged channel into bridge events.
struct EventProcessor<'a> {
    settings: &'a DiscordSettings,
    resolver: &'a MessageResolver,
    event_tx: &'a mpsc::UnboundedSender<BridgeEvent>,
}

impl EventProcessor<'_> {
    async fn process_events(&self, discord_events_rx: &mut mpsc::UnboundedReceiver<DiscordBotEvent>) {
        let mut bot_user_id = None;

        while let Some(event) = discord_events_rx.recv().await {
            match event {
                DiscordBotEvent::Ready(ready) => {
                    info!("Discord bot connected as {}", ready.user.name);
                    bot_user_id = Some(ready.user.id);
                }
                DiscordBotEvent::Message { context, message } => {
                    if message.channel_id != self.settings.channel_id {
                        continue;
                    }
                    if !matches!(message.kind, MessageType::Regular | MessageType::InlineReply) {
                        debug!(kind = ?message.kind, "Ignoring non-chat Discord message");
                        continue;
                    }
                    let chat_message = self.to_chat_message(&context, &message, bot_user_id);
                    self.send(BridgeEvent::MessageCreate {
                        message: chat_message,
                        emotes: Vec::new(),
                    });
                }
                DiscordBotEvent::Deleted {
                    channel_id,
                    message_ids,
                } => {
                    if channel_id != self.settings.channel_id {
                        continue;
                    }
                    for id in message_ids {
                        self.send(BridgeEvent::MessageDelete {
                            platform: Platform::Discord,
                            id: id.to_string(),
                        });
                    }
                }
                DiscordBotEvent::Disconnected => {
                    bot_user_id = None;
                }
            }
        }
        debug!("Discord events channel closed.");
    }

    fn send(&self, event: BridgeEvent) {
        if let Err(e) = self.event_tx.send(event) {
            warn!("Failed to forward Discord event: {}", e);
        }
    }

    fn to_chat_message(
        &self,
        context: &Context,
        message: &Message,
        bot_user_id: Option<UserId>,
    ) -> ChatMessage {
        let self_originated = is_self_originated(
            message.author.id,
            message.webhook_id,
            bot_user_id,
            self.settings.webhook_id,
        );

        // Echoes keep their raw content so they can be parsed back.
        let text = if self_originated {
            message.content.clone()
        } else {
            self.resolver.process_discord_to_twitch(message, &context.cache)
        };

        ChatMessage {
            id: message.id.to_string(),
            platform: Platform::Discord,
            channel_id: message.channel_id.to_string(),
            author_id: message.author.id.to_string(),
            author_login: message.author.name.clone(),
            username: author_name(message),
            text,
            timestamp: DateTime::<Utc>::from_timestamp(message.timestamp.unix_timestamp(), 0)
                .unwrap_or_else(Utc::now),
            self_originated,
        }
    }
}

/// Whether a message was posted by the bridge itself.
fn is_self_originated(
    author_id: UserId,
    webhook_id: Option<WebhookId>,
    bot_user_id: Option<UserId>,
    bridge_webhook_id: Option<WebhookId>,
) -> bool {
    let by_bot = bot_user_id == Some(author_id);
    let by_webhook = webhook_id.is_some() && webhook_id == bridge_webhook_id;
    by_bot || by_webhook
}

/// Server nickname, then global display name, then username.
///
/// Webhook posts carry the overridden name in `author.name`.
fn author_name(message: &Message) -> String {
    if message.webhook_id.is_some() {
        return message.author.name.clone();
    }
    message
        .member
        .as_ref()
        .and_then(|member| member.nick.clone())
        .or_else(|| message.author.global_name.clone())
        .unwrap_or_else(|| message.author.name.clone())
}
