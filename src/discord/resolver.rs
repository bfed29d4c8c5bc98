//! Discord message text cleanup for Twitch chat.
//!
//! Twitch chat is plain text: custom emoji markup, mentions and attachments
//! are turned into something readable there.

use std::collections::HashMap;

use fancy_regex::Regex;
use serenity::cache::Cache;
use serenity::model::channel::Message;

/// Message resolver for Discord -> Twitch translation.
#[derive(Debug, Clone)]
pub struct MessageResolver {
    /// Pattern for Discord user mentions (<@123> or <@!123>).
    mention_pattern: Regex,
    /// Pattern for Discord channel mentions (<#123>).
    channel_pattern: Regex,
    /// Pattern for Discord role mentions (<@&123>).
    role_pattern: Regex,
    /// Pattern for Discord custom emojis (<:name:id> or <a:name:id>).
    emoji_pattern: Regex,
}

impl Default for MessageResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageResolver {
    pub fn new() -> Self {
        Self {
            mention_pattern: Regex::new(r"<@!?(\d+)>").unwrap(),
            channel_pattern: Regex::new(r"<#(\d+)>").unwrap(),
            role_pattern: Regex::new(r"<@&(\d+)>").unwrap(),
            emoji_pattern: Regex::new(r"<a?:([a-zA-Z0-9_]+):\d+>").unwrap(),
        }
    }

    /// Convert Discord custom emojis to their bare name.
    ///
    /// Emojis mirrored from Twitch carry the emote name, so they show up as
    /// the original emote in Twitch chat.
    pub fn resolve_custom_emojis_to_text(&self, message: &str) -> String {
        self.emoji_pattern.replace_all(message, "$1").to_string()
    }

    /// Convert <@123456789> to @username using the users mentioned by the message.
    pub fn resolve_mentions_to_text(&self, message: &str, users: &HashMap<u64, String>) -> String {
        self.mention_pattern
            .replace_all(message, |caps: &fancy_regex::Captures| -> String {
                caps[1]
                    .parse::<u64>()
                    .ok()
                    .and_then(|id| users.get(&id))
                    .map(|name| format!("@{}", name))
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .to_string()
    }

    /// Convert Discord channel mentions to plain text.
    pub fn resolve_channel_mentions(&self, message: &str, cache: &Cache) -> String {
        self.channel_pattern
            .replace_all(message, |caps: &fancy_regex::Captures| -> String {
                if let Ok(channel_id) = caps[1].parse::<u64>() {
                    let channel_id = serenity::model::id::ChannelId::new(channel_id);
                    for guild_id in cache.guilds() {
                        if let Some(guild) = cache.guild(guild_id) {
                            if let Some(channel) = guild.channels.get(&channel_id) {
                                return format!("#{}", channel.name);
                            }
                        }
                    }
                }
                caps[0].to_string()
            })
            .to_string()
    }

    /// Convert Discord role mentions to plain text.
    pub fn resolve_role_mentions(&self, message: &str, cache: &Cache) -> String {
        self.role_pattern
            .replace_all(message, |caps: &fancy_regex::Captures| -> String {
                if let Ok(role_id) = caps[1].parse::<u64>() {
                    for guild_id in cache.guilds() {
                        if let Some(guild) = cache.guild(guild_id) {
                            if let Some(role) =
                                guild.roles.get(&serenity::model::id::RoleId::new(role_id))
                            {
                                return format!("@{}", role.name);
                            }
                        }
                    }
                }
                caps[0].to_string()
            })
            .to_string()
    }

    /// Text-only cleanup: user mentions and custom emojis.
    pub fn clean_text(&self, content: &str, users: &HashMap<u64, String>) -> String {
        let step1 = self.resolve_mentions_to_text(content, users);
        self.resolve_custom_emojis_to_text(&step1)
    }

    /// Process a Discord message for Twitch.
    pub fn process_discord_to_twitch(&self, message: &Message, cache: &Cache) -> String {
        let users: HashMap<u64, String> = message
            .mentions
            .iter()
            .map(|user| (user.id.get(), user.name.clone()))
            .collect();

        let step1 = self.clean_text(&message.content, &users);
        let step2 = self.resolve_channel_mentions(&step1, cache);
        let step3 = self.resolve_role_mentions(&step2, cache);

        append_attachments(&step3, message.attachments.iter().map(|a| a.url.as_str()))
    }
}

/// Append attachment URLs, space separated.
pub fn append_attachments<'a>(text: &'a str, urls: impl IntoIterator<Item = &'a str>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let text = text.trim();
    if !text.is_empty() {
        parts.push(text);
    }
    parts.extend(urls);
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_custom_emojis_to_text() {
        let resolver = MessageResolver::new();
        assert_eq!(
            resolver.resolve_custom_emojis_to_text("hi <:Kappa:900> and <a:party_cat:123>!"),
            "hi Kappa and party_cat!"
        );
        assert_eq!(resolver.resolve_custom_emojis_to_text("<:bad name:1>"), "<:bad name:1>");
    }

    #[test]
    fn test_resolve_mentions() {
        let resolver = MessageResolver::new();
        let users = HashMap::from([(42u64, "alice".to_string())]);
        assert_eq!(
            resolver.resolve_mentions_to_text("hey <@42> and <@!42>, not <@7>", &users),
            "hey @alice and @alice, not <@7>"
        );
    }

    #[test]
    fn test_role_mention_not_treated_as_user() {
        let resolver = MessageResolver::new();
        let users = HashMap::from([(42u64, "alice".to_string())]);
        assert_eq!(resolver.clean_text("<@&42>", &users), "<@&42>");
    }

    #[test]
    fn test_clean_text() {
        let resolver = MessageResolver::new();
        let users = HashMap::from([(1u64, "bob".to_string())]);
        assert_eq!(
            resolver.clean_text("<@1> <:PogChamp:88> gg", &users),
            "@bob PogChamp gg"
        );
    }

    #[test]
    fn test_append_attachments() {
        assert_eq!(append_attachments("look", ["https://cdn/a.png"]), "look https://cdn/a.png");
        assert_eq!(
            append_attachments("  ", ["https://cdn/a.png", "https://cdn/b.png"]),
            "https://cdn/a.png https://cdn/b.png"
        );
        assert_eq!(append_attachments("text", []), "text");
    }
}
