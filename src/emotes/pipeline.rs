//! Twitch emote extraction, provisioning and substitution.
//!
//! Emotes found in a Twitch message are mirrored as Discord application
//! emojis. Provisioning runs in background tasks and is never awaited by the
//! relay: the first message carrying a new emote goes out with the plain
//! emote text, later ones get the Discord emoji once the upload finished.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bridge::platform::{EmojiRegistry, EmoteAssetProvider};
use crate::common::error::{AppError, StoreResult};
use crate::common::EmoteRange;
use crate::emotes::store::{EmoteAssetStore, EmoteCache, EmoteMapping, SharedEmoteCache};

/// An emote occurrence taken from a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEmote {
    pub emote_id: String,
    pub name: String,
}

/// Collect the distinct emotes of a message from its Twitch-supplied ranges.
///
/// Range bounds are character indices with an inclusive end. Ranges falling
/// outside the text are ignored.
pub fn extract_emotes(text: &str, ranges: &[EmoteRange]) -> Vec<ExtractedEmote> {
    let chars: Vec<char> = text.chars().collect();
    let mut seen = HashSet::new();
    let mut emotes = Vec::new();

    for range in ranges {
        if range.start > range.end || range.end >= chars.len() {
            debug!(
                emote_id = %range.emote_id,
                start = range.start,
                end = range.end,
                "Ignoring out-of-bounds emote range"
            );
            continue;
        }
        if !seen.insert(range.emote_id.clone()) {
            continue;
        }
        emotes.push(ExtractedEmote {
            emote_id: range.emote_id.clone(),
            name: chars[range.start..=range.end].iter().collect(),
        });
    }

    emotes
}

/// Replace whole whitespace-separated tokens naming a cached emoji with the
/// Discord inline syntax. Whitespace is preserved as-is.
pub fn substitute_emotes(text: &str, cache: &EmoteCache) -> String {
    let mut result = String::with_capacity(text.len());

    for piece in text.split_inclusive(char::is_whitespace) {
        let token = piece.trim_end_matches(char::is_whitespace);
        let separator = &piece[token.len()..];

        match cache.get(token) {
            Some(mapping) if !token.is_empty() => result.push_str(&mapping.discord_syntax()),
            _ => result.push_str(token),
        }
        result.push_str(separator);
    }

    result
}

/// Discord emoji names are 2-32 characters of `[A-Za-z0-9_]`.
pub fn is_valid_emoji_name(name: &str) -> bool {
    let len = name.chars().count();
    (2..=32).contains(&len) && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Build the emote image URL on the Twitch CDN.
pub fn emote_image_url(emote_id: &str) -> String {
    format!(
        "https://static-cdn.jtvnw.net/emoticons/v2/{}/static/light/3.0",
        emote_id
    )
}

/// Everything an upload task needs, cloned out of the translator.
#[derive(Clone)]
struct ProvisionContext {
    cache: SharedEmoteCache,
    store: Arc<dyn EmoteAssetStore>,
    provider: Arc<dyn EmoteAssetProvider>,
    registry: Arc<dyn EmojiRegistry>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Emote translation pipeline owned by the relay controller.
pub struct EmoteTranslator {
    ctx: ProvisionContext,
    uploads: JoinSet<()>,
}

impl EmoteTranslator {
    /// Create the pipeline, warming the cache from the store.
    pub fn new(
        store: Arc<dyn EmoteAssetStore>,
        provider: Arc<dyn EmoteAssetProvider>,
        registry: Arc<dyn EmojiRegistry>,
    ) -> StoreResult<Self> {
        let cache = EmoteCache::from_mappings(store.load_all()?);
        info!("Loaded {} provisioned emojis", cache.len());

        Ok(Self {
            ctx: ProvisionContext {
                cache: Arc::new(RwLock::new(cache)),
                store,
                provider,
                registry,
                in_flight: Arc::new(Mutex::new(HashSet::new())),
            },
            uploads: JoinSet::new(),
        })
    }

    /// Start uploads for every emote not yet mirrored.
    ///
    /// Returns the number of uploads started. Emotes already cached, already
    /// being uploaded, or with names Discord would reject are skipped.
    pub fn provision(&mut self, emotes: &[ExtractedEmote]) -> usize {
        self.reap_finished();

        let mut started = 0;
        for emote in emotes {
            if !is_valid_emoji_name(&emote.name) {
                debug!(emote = %emote.name, "Emote name is not a valid Discord emoji name, skipping");
                continue;
            }

            let cached = {
                let cache = self.ctx.cache.read().unwrap_or_else(PoisonError::into_inner);
                // A cached name substitutes already, whichever emote it came from.
                cache.contains_source(&emote.emote_id) || cache.has_cached(&emote.name)
            };
            if cached {
                continue;
            }

            let claimed = self
                .ctx
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(emote.emote_id.clone());
            if !claimed {
                debug!(emote = %emote.name, "Emote upload already in progress");
                continue;
            }

            let ctx = self.ctx.clone();
            let emote = emote.clone();
            self.uploads.spawn(async move { provision_emote(ctx, emote).await });
            started += 1;
        }

        started
    }

    /// Replace cached emote names in `text` with Discord emoji syntax.
    pub fn substitute(&self, text: &str) -> String {
        let cache = self.ctx.cache.read().unwrap_or_else(PoisonError::into_inner);
        substitute_emotes(text, &cache)
    }

    /// Wait until every pending upload has finished.
    pub async fn wait_for_uploads(&mut self) {
        while let Some(result) = self.uploads.join_next().await {
            if let Err(e) = result {
                warn!("Emote upload task failed: {}", e);
            }
        }
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.uploads.try_join_next() {
            if let Err(e) = result {
                warn!("Emote upload task failed: {}", e);
            }
        }
    }
}

async fn provision_emote(ctx: ProvisionContext, emote: ExtractedEmote) {
    match upload_emote(&ctx, &emote).await {
        Ok(mapping) => {
            info!(
                emote = %emote.name,
                emote_id = %emote.emote_id,
                emoji_id = %mapping.target_emoji_id,
                "Emote mirrored as Discord emoji"
            );
            ctx.cache
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(mapping);
        }
        Err(e) => {
            warn!(
                emote = %emote.name,
                emote_id = %emote.emote_id,
                "Failed to mirror emote, will retry on next occurrence: {}",
                e
            );
        }
    }

    ctx.in_flight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&emote.emote_id);
}

/// Run a store call on the blocking pool.
async fn with_store<T, F>(store: &Arc<dyn EmoteAssetStore>, f: F) -> StoreResult<T>
where
    F: FnOnce(&dyn EmoteAssetStore) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(&*store)).await?
}

async fn upload_emote(
    ctx: &ProvisionContext,
    emote: &ExtractedEmote,
) -> Result<EmoteMapping, AppError> {
    // Another bridge instance sharing the store may have mirrored it already.
    let emote_id = emote.emote_id.clone();
    if let Some(existing) = with_store(&ctx.store, move |s| s.query_source(&emote_id)).await? {
        return Ok(existing);
    }

    // Application emoji names are unique; reuse an emoji uploaded under this name.
    let name = emote.name.clone();
    if let Some(existing) = with_store(&ctx.store, move |s| s.query(&name)).await? {
        let mapping = EmoteMapping {
            source_emote_id: emote.emote_id.clone(),
            target_emoji_id: existing.target_emoji_id,
            target_emoji_name: existing.target_emoji_name,
        };
        let stored = mapping.clone();
        with_store(&ctx.store, move |s| s.insert(&stored)).await?;
        return Ok(mapping);
    }

    let image = ctx.provider.fetch_image(&emote.emote_id).await?;
    let data_uri = format!("data:image/png;base64,{}", STANDARD.encode(&image));
    let uploaded = ctx.registry.upload(&emote.name, &data_uri).await?;

    let mapping = EmoteMapping {
        source_emote_id: emote.emote_id.clone(),
        target_emoji_id: uploaded.id,
        target_emoji_name: uploaded.name,
    };

    let stored = mapping.clone();
    if with_store(&ctx.store, move |s| s.insert(&stored)).await? {
        return Ok(mapping);
    }

    warn!(
        emote = %emote.name,
        "Emote was mirrored concurrently by another instance, using the stored emoji"
    );
    let emote_id = emote.emote_id.clone();
    let winner = with_store(&ctx.store, move |s| s.query_source(&emote_id)).await?;
    Ok(winner.unwrap_or(mapping))
}
