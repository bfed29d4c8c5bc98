//! Twitch chat client.
//!
//! Runs two IRC sessions against the bridged channel: an anonymous reader
//! that observes every message (the bot's own included) and an authenticated
//! writer that posts relayed messages. Both reconnect with backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bridge::channels::AdapterChannels;
use crate::bridge::platform::PlatformChannel;
use crate::common::error::{PlatformError, PlatformResult};
use crate::common::{BridgeEvent, ChatMessage, OutboundMessage, Platform};
use crate::config::types::TwitchConfig;

use super::api::{bare_token, HelixClient};
use super::irc::{new_irc_connection, parse_emotes_tag, IrcConnection, IrcMessage};

const TWITCH_IRC_ADDR: &str = "irc.chat.twitch.tv:6667";

type TwitchConnection = IrcConnection<TcpStream>;

/// How a session logs in.
#[derive(Debug, Clone)]
enum Credentials {
    /// Read-only `justinfan` login.
    Anonymous,
    Authenticated { username: String, token: String },
}

impl Credentials {
    fn nick(&self) -> String {
        match self {
            Credentials::Anonymous => {
                format!("justinfan{}", rand::thread_rng().gen_range(1000..100_000))
            }
            Credentials::Authenticated { username, .. } => username.to_lowercase(),
        }
    }
}

/// Why a session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Reconnect,
}

/// Inbound side of a reader session.
struct InboundSink {
    event_tx: mpsc::UnboundedSender<BridgeEvent>,
    bot_login: String,
}

/// The Twitch side of the bridge.
pub struct TwitchChat {
    config: TwitchConfig,
    channels: AdapterChannels,
    outgoing_rx: mpsc::UnboundedReceiver<String>,
}

/// Create the chat client and the channel handle used to post and delete.
pub fn create(
    config: TwitchConfig,
    channels: AdapterChannels,
    api: Arc<HelixClient>,
) -> (TwitchChat, TwitchChannel) {
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let chat = TwitchChat {
        config,
        channels,
        outgoing_rx,
    };
    (chat, TwitchChannel { outgoing_tx, api })
}

fn twitch_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(120))
        .with_factor(2.0)
        .with_jitter()
        .without_max_times()
        .build()
}

impl TwitchChat {
    /// Run both sessions until shutdown.
    pub async fn run(self) {
        let channel = self.config.channel_login();
        let reader = InboundSink {
            event_tx: self.channels.event_tx.clone(),
            bot_login: self.config.username.to_lowercase(),
        };
        let writer = Credentials::Authenticated {
            username: self.config.username.clone(),
            token: bare_token(&self.config.access_token).to_string(),
        };
        let mut outgoing_rx = self.outgoing_rx;

        tokio::join!(
            run_with_reconnect(
                "reader",
                Credentials::Anonymous,
                &channel,
                Some(&reader),
                None,
                self.channels.shutdown_rx.clone(),
            ),
            run_with_reconnect(
                "writer",
                writer,
                &channel,
                None,
                Some(&mut outgoing_rx),
                self.channels.shutdown_rx.clone(),
            ),
        );
        info!("Twitch task ended");
    }
}

async fn run_with_reconnect(
    name: &str,
    credentials: Credentials,
    channel: &str,
    inbound: Option<&InboundSink>,
    mut outgoing: Option<&mut mpsc::UnboundedReceiver<String>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = twitch_backoff();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        info!("Connecting Twitch {} to #{}...", name, channel);
        match connect(&credentials, channel).await {
            Ok(mut connection) => {
                backoff = twitch_backoff();
                let result = run_session(
                    &mut connection,
                    channel,
                    inbound,
                    outgoing.as_deref_mut(),
                    &mut shutdown_rx,
                )
                .await;
                match result {
                    Ok(SessionEnd::Shutdown) => {
                        let part = IrcMessage::new("PART", &[format!("#{}", channel)]);
                        if let Err(e) = connection.send(part).await {
                            debug!("Failed to leave #{}: {}", channel, e);
                        }
                        break;
                    }
                    Ok(SessionEnd::Reconnect) => info!("Twitch {} disconnected", name),
                    Err(e) => error!("Twitch {} error: {}", name, e),
                }
            }
            Err(e) => error!("Failed to connect Twitch {}: {}", name, e),
        }

        let delay = backoff.next().unwrap_or(Duration::from_secs(120));
        warn!("Reconnecting Twitch {} in {:.1}s...", name, delay.as_secs_f64());
        tokio::select! {
            _ = sleep(delay) => {},
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn connect(credentials: &Credentials, channel: &str) -> PlatformResult<TwitchConnection> {
    let stream = TcpStream::connect(TWITCH_IRC_ADDR).await?;
    let mut connection = new_irc_connection(stream);

    connection
        .send(IrcMessage::new("CAP", &["REQ", "twitch.tv/tags twitch.tv/commands"]))
        .await?;
    if let Credentials::Authenticated { token, .. } = credentials {
        connection
            .send(IrcMessage::new("PASS", &[&format!("oauth:{}", token)]))
            .await?;
    }
    connection
        .send(IrcMessage::new("NICK", &[&credentials.nick()]))
        .await?;
    connection
        .send(IrcMessage::new("JOIN", &[&format!("#{}", channel)]))
        .await?;

    Ok(connection)
}

async fn next_outgoing(outgoing: &mut Option<&mut mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match outgoing {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_session(
    connection: &mut TwitchConnection,
    channel: &str,
    inbound: Option<&InboundSink>,
    mut outgoing: Option<&mut mpsc::UnboundedReceiver<String>>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> PlatformResult<SessionEnd> {
    loop {
        tokio::select! {
            line = connection.next() => {
                let message = match line {
                    Some(message) => message?,
                    None => return Ok(SessionEnd::Reconnect),
                };
                match message.command.as_str() {
                    "PING" => {
                        let server = message.trailing().unwrap_or("tmi.twitch.tv");
                        connection.send(IrcMessage::new("PONG", &[server])).await?;
                    }
                    "RECONNECT" => {
                        info!("Twitch requested a reconnect");
                        return Ok(SessionEnd::Reconnect);
                    }
                    "NOTICE" => {
                        let text = message.trailing().unwrap_or_default();
                        if text.contains("authentication failed") || text.contains("Improperly formatted auth") {
                            return Err(PlatformError::Irc { message: text.to_string() });
                        }
                        info!("Twitch notice: {}", text);
                    }
                    "JOIN" => debug!("Joined #{} as {}", channel, message.nick().unwrap_or("?")),
                    _ => {
                        if let Some(sink) = inbound {
                            if let Some(event) = to_bridge_event(&message, &sink.bot_login) {
                                if let Err(e) = sink.event_tx.send(event) {
                                    warn!("Failed to forward Twitch event: {}", e);
                                    return Ok(SessionEnd::Shutdown);
                                }
                            }
                        }
                    }
                }
            }

            text = next_outgoing(&mut outgoing) => {
                match text {
                    Some(text) => connection.send(IrcMessage::privmsg(channel, &text)).await?,
                    None => return Ok(SessionEnd::Shutdown),
                }
            }

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }
}

/// Translate a chat line into a bridge event.
fn to_bridge_event(message: &IrcMessage, bot_login: &str) -> Option<BridgeEvent> {
    match message.command.as_str() {
        "PRIVMSG" => {
            let login = message.nick()?;
            let id = message.tag("id")?;
            let raw = message.trailing()?;
            let text = strip_action(raw);
            // Emote positions refer to the text without the ACTION wrapper.
            let emotes = message.tag("emotes").map(parse_emotes_tag).unwrap_or_default();

            Some(BridgeEvent::MessageCreate {
                message: ChatMessage {
                    id: id.to_string(),
                    platform: Platform::Twitch,
                    channel_id: message.tag("room-id").unwrap_or_default().to_string(),
                    author_id: message.tag("user-id").unwrap_or_default().to_string(),
                    author_login: login.to_lowercase(),
                    username: message.tag("display-name").unwrap_or(login).to_string(),
                    text: text.to_string(),
                    timestamp: sent_at(message),
                    self_originated: login.eq_ignore_ascii_case(bot_login),
                },
                emotes,
            })
        }
        "CLEARMSG" => Some(BridgeEvent::MessageDelete {
            platform: Platform::Twitch,
            id: message.tag("target-msg-id")?.to_string(),
        }),
        _ => None,
    }
}

/// `/me` messages arrive wrapped in a CTCP ACTION.
fn strip_action(text: &str) -> &str {
    text.strip_prefix("\u{1}ACTION ")
        .and_then(|inner| inner.strip_suffix('\u{1}'))
        .unwrap_or(text)
}

fn sent_at(message: &IrcMessage) -> DateTime<Utc> {
    message
        .tag("tmi-sent-ts")
        .and_then(|ts| ts.parse().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

/// Posting and deleting in the bridged Twitch channel.
pub struct TwitchChannel {
    outgoing_tx: mpsc::UnboundedSender<String>,
    api: Arc<HelixClient>,
}

#[async_trait]
impl PlatformChannel for TwitchChannel {
    /// Queue the message on the writer session. IRC does not report the ID
    /// of a sent message, so this always returns `None`.
    async fn send(&self, message: &OutboundMessage) -> PlatformResult<Option<String>> {
        self.outgoing_tx
            .send(message.content.clone())
            .map_err(|_| PlatformError::NotConnected {
                what: "Twitch writer".to_string(),
            })?;
        Ok(None)
    }

    async fn delete_message(&self, id: &str) -> PlatformResult<()> {
        self.api.delete_chat_message(id).await
    }
}
