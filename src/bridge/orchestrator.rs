//! Relay controller tying Twitch and Discord together.
//!
//! Processes one inbound event at a time: relays new messages to the other
//! platform, links each message with its mirror and propagates deletes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::common::{BridgeEvent, ChatMessage, EmoteRange, OutboundMessage, Platform, UserProfile};
use crate::config::types::Config;
use crate::emotes::{extract_emotes, EmoteTranslator};

use super::cache::RecentMessageCache;
use super::correlation::MessageCorrelationCache;
use super::platform::{PlatformChannel, UserDirectory};
use super::strategy::{parse_twitch_echo, render_for_twitch, truncate_chars, DiscordStrategy};

/// Outbound side of the platform adapters.
pub struct PlatformHandles {
    pub discord: Arc<dyn PlatformChannel>,
    pub twitch: Arc<dyn PlatformChannel>,
    /// Twitch user profiles, used for webhook avatars.
    pub users: Arc<dyn UserDirectory>,
}

/// The relay engine of one bridge instance.
pub struct RelayController {
    strategy: DiscordStrategy,
    char_limit: Option<usize>,
    handles: PlatformHandles,
    emotes: EmoteTranslator,
    discord_messages: RecentMessageCache,
    twitch_messages: RecentMessageCache,
    correlation: MessageCorrelationCache,
    /// Twitch login -> profile. Entries never expire.
    profiles: HashMap<String, UserProfile>,
}

impl RelayController {
    /// Create a controller from configuration and the selected strategy.
    pub fn new(
        config: &Config,
        strategy: DiscordStrategy,
        handles: PlatformHandles,
        emotes: EmoteTranslator,
    ) -> Self {
        info!("Relaying to Discord with the {} strategy", strategy.name());
        let discord_messages = RecentMessageCache::new(config.bridge.message_cache_size);
        debug!(
            "Remembering the last {} messages per platform",
            discord_messages.capacity()
        );

        Self {
            strategy,
            char_limit: config.discord.char_limit,
            handles,
            emotes,
            discord_messages,
            twitch_messages: RecentMessageCache::new(config.bridge.message_cache_size),
            correlation: MessageCorrelationCache::new(config.bridge.correlation_cache_size),
            profiles: HashMap::new(),
        }
    }

    /// Handle one inbound event. Failures are logged, never returned.
    pub async fn handle_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::MessageCreate { message, emotes } => {
                self.handle_message_create(message, &emotes).await
            }
            BridgeEvent::MessageDelete { platform, id } => {
                self.handle_message_delete(platform, &id).await
            }
        }
    }

    async fn handle_message_create(&mut self, message: ChatMessage, emotes: &[EmoteRange]) {
        if message.text.trim().is_empty() {
            debug!(platform = %message.platform, id = %message.id, "Ignoring empty message");
            return;
        }

        let source = message.platform;
        self.messages_mut(source).append(message.clone());
        self.correlation.open_half(source, &message.id);
        debug!(
            platform = %source,
            id = %message.id,
            cached = self.messages(source).len(),
            correlated = self.correlation.len(),
            "Observed message"
        );

        if message.self_originated {
            self.link_echo(&message);
            return;
        }

        let outbound = match source {
            Platform::Twitch => self.render_for_discord(&message, emotes).await,
            Platform::Discord => render_for_twitch(&message.username, &message.text),
        };

        let target = source.other();
        info!("{} -> {}: {}", source, target, outbound.content);

        match self.channel(target).send(&outbound).await {
            Ok(Some(mirror_id)) => {
                self.correlation.complete(&message.id, source, &mirror_id);
            }
            Ok(None) => self.link_observed_echo(&message),
            Err(e) => warn!("Failed to relay message {} to {}: {}", message.id, target, e),
        }
    }

    async fn handle_message_delete(&mut self, platform: Platform, id: &str) {
        let Some(mirror_id) = self.correlation.resolve(platform, id).map(str::to_string) else {
            debug!(%platform, id, "No mirror known for deleted message");
            return;
        };

        let target = platform.other();
        info!("Deleting mirror {} on {} of message {}", mirror_id, target, id);
        if let Err(e) = self.channel(target).delete_message(&mirror_id).await {
            warn!("Failed to delete message {} on {}: {}", mirror_id, target, e);
        }

        self.correlation.discard(platform, id);
    }

    /// Wait for background emote uploads to finish.
    pub async fn shutdown(&mut self) {
        self.emotes.wait_for_uploads().await;
    }

    async fn render_for_discord(
        &mut self,
        message: &ChatMessage,
        emotes: &[EmoteRange],
    ) -> OutboundMessage {
        let extracted = extract_emotes(&message.text, emotes);
        let started = self.emotes.provision(&extracted);
        if started > 0 {
            debug!("Started {} emote uploads", started);
        }
        let text = self.emotes.substitute(&message.text);

        let avatar_url = if self.strategy.uses_avatar() {
            self.profile(&message.author_login)
                .await
                .and_then(|profile| profile.avatar_url)
        } else {
            None
        };

        let mut outbound = self
            .strategy
            .render(&message.username, &text, avatar_url.as_deref());
        if let Some(limit) = self.char_limit {
            outbound.content = truncate_chars(&outbound.content, limit).to_string();
        }
        outbound
    }

    async fn profile(&mut self, login: &str) -> Option<UserProfile> {
        let login = login.to_lowercase();
        if let Some(profile) = self.profiles.get(&login) {
            return Some(profile.clone());
        }

        match self.handles.users.lookup(&login).await {
            Ok(Some(profile)) => {
                self.profiles.insert(login, profile.clone());
                Some(profile)
            }
            Ok(None) => {
                debug!("No Twitch profile found for {}", login);
                None
            }
            Err(e) => {
                warn!("Failed to look up Twitch profile of {}: {}", login, e);
                None
            }
        }
    }

    /// Link a freshly observed echo of the bridge to the message it mirrors.
    fn link_echo(&mut self, echo: &ChatMessage) {
        let origin = echo.platform.other();
        let candidate = self
            .messages(origin)
            .find(|m| {
                !m.self_originated
                    && self.correlation.is_open(origin, &m.id)
                    && self.is_echo_of(echo, m)
            })
            .map(|m| m.id.clone());

        match candidate {
            Some(origin_id) => {
                self.correlation.complete(&origin_id, origin, &echo.id);
                debug!("Linked {} message {} to echo {}", origin, origin_id, echo.id);
            }
            None => debug!(platform = %echo.platform, id = %echo.id, "Echo matched no relayed message"),
        }
    }

    /// Link a just relayed message to an echo observed before the send returned.
    fn link_observed_echo(&mut self, message: &ChatMessage) {
        let target = message.platform.other();
        let echo_id = self
            .messages(target)
            .find(|m| {
                m.self_originated
                    && self.correlation.is_open(target, &m.id)
                    && self.is_echo_of(m, message)
            })
            .map(|m| m.id.clone());

        if let Some(echo_id) = echo_id {
            self.correlation.complete(&message.id, message.platform, &echo_id);
        }
    }

    fn is_echo_of(&self, echo: &ChatMessage, origin: &ChatMessage) -> bool {
        match echo.platform {
            Platform::Twitch => {
                parse_twitch_echo(&echo.text).is_some()
                    && render_for_twitch(&origin.username, &origin.text).content == echo.text
            }
            Platform::Discord => self
                .strategy
                .parse_echo(&echo.username, &echo.text)
                .is_some_and(|(username, text)| {
                    username == origin.username && text == origin.text
                }),
        }
    }

    fn channel(&self, platform: Platform) -> &Arc<dyn PlatformChannel> {
        match platform {
            Platform::Discord => &self.handles.discord,
            Platform::Twitch => &self.handles.twitch,
        }
    }

    fn messages(&self, platform: Platform) -> &RecentMessageCache {
        match platform {
            Platform::Discord => &self.discord_messages,
            Platform::Twitch => &self.twitch_messages,
        }
    }

    fn messages_mut(&mut self, platform: Platform) -> &mut RecentMessageCache {
        match platform {
            Platform::Discord => &mut self.discord_messages,
            Platform::Twitch => &mut self.twitch_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::platform::{EmojiRegistry, EmoteAssetProvider, UploadedEmoji};
    use crate::common::error::{PlatformError, PlatformResult};
    use crate::common::Identity;
    use crate::config::types::{BridgeConfig, DiscordConfig, TwitchConfig};
    use crate::emotes::store::SqliteEmoteStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records sends and deletes; returns sequential IDs when `returns_ids`.
    #[derive(Default)]
    struct FakeChannel {
        returns_ids: bool,
        fail_sends: bool,
        sent: Mutex<Vec<OutboundMessage>>,
        deleted: Mutex<Vec<String>>,
    }

    impl FakeChannel {
        fn with_ids() -> Self {
            Self {
                returns_ids: true,
                ..Default::default()
            }
        }

        fn sent(&self) -> Vec<OutboundMessage> {
            self.sent.lock().unwrap().clone()
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlatformChannel for FakeChannel {
        async fn send(&self, message: &OutboundMessage) -> PlatformResult<Option<String>> {
            if self.fail_sends {
                return Err(PlatformError::NotConnected {
                    what: "fake".to_string(),
                });
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.clone());
            Ok(self.returns_ids.then(|| format!("mirror-{}", sent.len())))
        }

        async fn delete_message(&self, id: &str) -> PlatformResult<()> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeUsers {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl UserDirectory for FakeUsers {
        async fn lookup(&self, username: &str) -> PlatformResult<Option<UserProfile>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Some(UserProfile {
                username: username.to_string(),
                display_name: username.to_string(),
                avatar_url: Some(format!("https://cdn/{}.png", username)),
            }))
        }
    }

    struct FakeProvider;

    #[async_trait]
    impl EmoteAssetProvider for FakeProvider {
        async fn fetch_image(&self, _emote_id: &str) -> PlatformResult<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }
    }

    #[derive(Default)]
    struct FakeRegistry {
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl EmojiRegistry for FakeRegistry {
        async fn upload(&self, name: &str, _image_data_uri: &str) -> PlatformResult<UploadedEmoji> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(UploadedEmoji {
                id: "900".to_string(),
                name: name.to_string(),
            })
        }
    }

    struct Harness {
        controller: RelayController,
        discord: Arc<FakeChannel>,
        twitch: Arc<FakeChannel>,
        users: Arc<FakeUsers>,
        registry: Arc<FakeRegistry>,
    }

    fn config(discord: DiscordConfig) -> Config {
        Config {
            discord: DiscordConfig {
                channel_id: "1".to_string(),
                bot_token: "token".to_string(),
                ..discord
            },
            twitch: TwitchConfig {
                username: "t2dbot".to_string(),
                channel: "streamer".to_string(),
                client_id: "client".to_string(),
                access_token: "access".to_string(),
            },
            bridge: BridgeConfig::default(),
        }
    }

    fn harness_with(config: Config, discord: FakeChannel) -> Harness {
        let discord = Arc::new(discord);
        let twitch = Arc::new(FakeChannel::default());
        let users = Arc::new(FakeUsers::default());
        let registry = Arc::new(FakeRegistry::default());
        let store = Arc::new(SqliteEmoteStore::open_in_memory().unwrap());
        let emotes =
            EmoteTranslator::new(store, Arc::new(FakeProvider), registry.clone()).unwrap();

        let strategy = DiscordStrategy::from_config(&config.discord).unwrap();
        let controller = RelayController::new(
            &config,
            strategy,
            PlatformHandles {
                discord: discord.clone(),
                twitch: twitch.clone(),
                users: users.clone(),
            },
            emotes,
        );

        Harness {
            controller,
            discord,
            twitch,
            users,
            registry,
        }
    }

    fn harness() -> Harness {
        harness_with(config(DiscordConfig::default()), FakeChannel::with_ids())
    }

    fn message(platform: Platform, id: &str, username: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            platform,
            channel_id: "1".to_string(),
            author_id: format!("{}-id", username),
            author_login: username.to_lowercase(),
            username: username.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
            self_originated: false,
        }
    }

    fn create(message: ChatMessage) -> BridgeEvent {
        BridgeEvent::MessageCreate {
            message,
            emotes: Vec::new(),
        }
    }

    fn delete(platform: Platform, id: &str) -> BridgeEvent {
        BridgeEvent::MessageDelete {
            platform,
            id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_twitch_message_relayed_and_delete_propagated() {
        let mut h = harness();

        h.controller
            .handle_event(create(message(Platform::Twitch, "t1", "alice", "hello")))
            .await;

        assert_eq!(h.discord.sent(), vec![OutboundMessage::as_bot("**alice**: hello")]);
        assert_eq!(
            h.controller.correlation.resolve(Platform::Twitch, "t1"),
            Some("mirror-1")
        );

        h.controller.handle_event(delete(Platform::Twitch, "t1")).await;

        assert_eq!(h.discord.deleted(), vec!["mirror-1".to_string()]);
        assert!(h.twitch.deleted().is_empty());
        assert_eq!(h.controller.correlation.resolve(Platform::Twitch, "t1"), None);
        assert_eq!(h.controller.correlation.resolve(Platform::Discord, "mirror-1"), None);
    }

    #[tokio::test]
    async fn test_delete_without_mirror_is_noop() {
        let mut h = harness();

        h.controller.handle_event(delete(Platform::Twitch, "unknown")).await;
        h.controller.handle_event(delete(Platform::Discord, "unknown")).await;

        assert!(h.discord.deleted().is_empty());
        assert!(h.twitch.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_discord_message_linked_through_twitch_echo() {
        let mut h = harness();

        h.controller
            .handle_event(create(message(Platform::Discord, "d1", "bob", "hey there")))
            .await;
        assert_eq!(h.twitch.sent(), vec![OutboundMessage::as_bot("[D] bob: hey there")]);
        assert!(h.controller.correlation.is_open(Platform::Discord, "d1"));

        let mut echo = message(Platform::Twitch, "t-echo", "t2dbot", "[D] bob: hey there");
        echo.self_originated = true;
        h.controller.handle_event(create(echo)).await;

        // The echo itself is never relayed back.
        assert!(h.discord.sent().is_empty());
        assert_eq!(
            h.controller.correlation.resolve(Platform::Discord, "d1"),
            Some("t-echo")
        );

        h.controller.handle_event(delete(Platform::Discord, "d1")).await;
        assert_eq!(h.twitch.deleted(), vec!["t-echo".to_string()]);
        assert!(h.controller.correlation.is_empty());
    }

    #[tokio::test]
    async fn test_echo_binds_first_open_match() {
        let mut h = harness();

        h.controller
            .handle_event(create(message(Platform::Discord, "d1", "bob", "gg")))
            .await;
        h.controller
            .handle_event(create(message(Platform::Discord, "d2", "bob", "gg")))
            .await;

        for id in ["t1", "t2"] {
            let mut echo = message(Platform::Twitch, id, "t2dbot", "[D] bob: gg");
            echo.self_originated = true;
            h.controller.handle_event(create(echo)).await;
        }

        assert_eq!(h.controller.correlation.resolve(Platform::Discord, "d1"), Some("t1"));
        assert_eq!(h.controller.correlation.resolve(Platform::Discord, "d2"), Some("t2"));
    }

    #[tokio::test]
    async fn test_unmatched_echo_stays_unlinked() {
        let mut h = harness();

        let mut echo = message(Platform::Twitch, "t1", "t2dbot", "[D] carol: hi");
        echo.self_originated = true;
        h.controller.handle_event(create(echo)).await;

        assert!(h.controller.correlation.is_open(Platform::Twitch, "t1"));
        h.controller.handle_event(delete(Platform::Twitch, "t1")).await;
        assert!(h.discord.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_self_originated_discord_message_not_relayed() {
        let mut h = harness();

        let mut own = message(Platform::Discord, "d1", "t2dbot", "**alice**: hello");
        own.self_originated = true;
        h.controller.handle_event(create(own)).await;

        assert!(h.twitch.sent().is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_ignored() {
        let mut h = harness();

        h.controller
            .handle_event(create(message(Platform::Discord, "d1", "bob", "   ")))
            .await;

        assert!(h.twitch.sent().is_empty());
        assert!(h.controller.correlation.is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_leaves_entry_open() {
        let discord = FakeChannel {
            fail_sends: true,
            ..Default::default()
        };
        let mut h = harness_with(config(DiscordConfig::default()), discord);

        h.controller
            .handle_event(create(message(Platform::Twitch, "t1", "alice", "hello")))
            .await;

        assert!(h.controller.correlation.is_open(Platform::Twitch, "t1"));
    }

    #[tokio::test]
    async fn test_emote_substituted_after_upload() {
        let mut h = harness();
        let with_kappa = |id: &str| BridgeEvent::MessageCreate {
            message: message(Platform::Twitch, id, "alice", "Kappa hi"),
            emotes: vec![EmoteRange {
                emote_id: "25".to_string(),
                start: 0,
                end: 4,
            }],
        };

        h.controller.handle_event(with_kappa("t1")).await;
        h.controller.shutdown().await;
        h.controller.handle_event(with_kappa("t2")).await;

        assert_eq!(
            h.discord.sent(),
            vec![
                OutboundMessage::as_bot("**alice**: Kappa hi"),
                OutboundMessage::as_bot("**alice**: <:Kappa:900> hi"),
            ]
        );
        assert_eq!(h.registry.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_webhook_uses_cached_profile() {
        let config = config(DiscordConfig {
            use_webhook: Some(true),
            webhook_id: Some("10".to_string()),
            webhook_token: Some("secret".to_string()),
            ..Default::default()
        });
        let mut h = harness_with(config, FakeChannel::with_ids());

        h.controller
            .handle_event(create(message(Platform::Twitch, "t1", "Alice", "one")))
            .await;
        h.controller
            .handle_event(create(message(Platform::Twitch, "t2", "Alice", "two")))
            .await;

        let sent = h.discord.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].content, "two");
        assert_eq!(
            sent[1].identity,
            Identity::Impersonated {
                username: "Alice".to_string(),
                avatar_url: Some("https://cdn/alice.png".to_string()),
            }
        );
        assert_eq!(h.users.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_webhook_profile_looked_up_by_login() {
        let config = config(DiscordConfig {
            use_webhook: Some(true),
            webhook_id: Some("10".to_string()),
            webhook_token: Some("secret".to_string()),
            ..Default::default()
        });
        let mut h = harness_with(config, FakeChannel::with_ids());

        let mut localized = message(Platform::Twitch, "t1", "日本語", "こんにちは");
        localized.author_login = "nihongo".to_string();
        h.controller.handle_event(create(localized)).await;

        assert_eq!(
            h.discord.sent()[0].identity,
            Identity::Impersonated {
                username: "日本語".to_string(),
                avatar_url: Some("https://cdn/nihongo.png".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_echo_observed_before_send_is_linked() {
        let mut h = harness();

        // The Twitch reader delivered the echo ahead of the Discord event.
        let mut echo = message(Platform::Twitch, "t-echo", "t2dbot", "[D] bob: early");
        echo.self_originated = true;
        h.controller.handle_event(create(echo)).await;
        assert!(h.controller.correlation.is_open(Platform::Twitch, "t-echo"));

        h.controller
            .handle_event(create(message(Platform::Discord, "d1", "bob", "early")))
            .await;

        assert_eq!(
            h.controller.correlation.resolve(Platform::Discord, "d1"),
            Some("t-echo")
        );
        assert_eq!(
            h.controller.correlation.resolve(Platform::Twitch, "t-echo"),
            Some("d1")
        );
    }

    #[tokio::test]
    async fn test_multiline_discord_message_relayed_as_one_line() {
        let mut h = harness();

        h.controller
            .handle_event(create(message(Platform::Discord, "d1", "bob", "first line\nsecond line")))
            .await;
        assert_eq!(
            h.twitch.sent(),
            vec![OutboundMessage::as_bot("[D] bob: first line second line")]
        );

        let mut echo = message(Platform::Twitch, "t1", "t2dbot", "[D] bob: first line second line");
        echo.self_originated = true;
        h.controller.handle_event(create(echo)).await;

        assert_eq!(h.controller.correlation.resolve(Platform::Discord, "d1"), Some("t1"));
    }

    #[tokio::test]
    async fn test_regular_strategy_skips_profile_lookup() {
        let mut h = harness();
        h.controller
            .handle_event(create(message(Platform::Twitch, "t1", "alice", "hello")))
            .await;
        assert_eq!(h.users.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_char_limit_truncates_discord_content() {
        let config = config(DiscordConfig {
            char_limit: Some(12),
            ..Default::default()
        });
        let mut h = harness_with(config, FakeChannel::with_ids());

        h.controller
            .handle_event(create(message(Platform::Twitch, "t1", "alice", "hello world")))
            .await;

        assert_eq!(h.discord.sent()[0].content, "**alice**: h");
    }
}
