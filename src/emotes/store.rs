//! Persistent and in-memory storage of provisioned emojis.
//!
//! The SQLite table keeps the schema of earlier releases
//! (`emojis(twitchId, emojiName, emojiId)`) so existing databases keep working.
//! Several bridge instances may share one database; `insert` is an atomic
//! insert-if-absent keyed by the Twitch emote ID.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use rusqlite::{Connection, OptionalExtension};

use crate::common::error::{StoreError, StoreResult};

/// A Twitch emote mirrored as a Discord application emoji.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmoteMapping {
    pub source_emote_id: String,
    pub target_emoji_id: String,
    pub target_emoji_name: String,
}

impl EmoteMapping {
    /// Inline Discord syntax for the emoji.
    pub fn discord_syntax(&self) -> String {
        format!("<:{}:{}>", self.target_emoji_name, self.target_emoji_id)
    }
}

/// Append-only store of emote mappings.
pub trait EmoteAssetStore: Send + Sync {
    /// Persist a mapping unless one exists for the same source emote.
    ///
    /// Returns `false` when another writer got there first.
    fn insert(&self, mapping: &EmoteMapping) -> StoreResult<bool>;

    /// Mapping by target emoji name.
    fn query(&self, emoji_name: &str) -> StoreResult<Option<EmoteMapping>>;

    /// Mapping by source emote ID.
    fn query_source(&self, emote_id: &str) -> StoreResult<Option<EmoteMapping>>;

    /// Every persisted mapping.
    fn load_all(&self) -> StoreResult<Vec<EmoteMapping>>;
}

/// SQLite-backed emote store.
#[derive(Clone)]
pub struct SqliteEmoteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEmoteStore {
    /// Open or create the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Create an in-memory database (for testing).
    #[allow(dead_code)]
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn with_conn<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&Connection) -> StoreResult<R>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    fn migrate(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "PRAGMA busy_timeout=5000;
                 CREATE TABLE IF NOT EXISTS emojis (
                     twitchId TEXT PRIMARY KEY,
                     emojiName TEXT,
                     emojiId TEXT
                 );",
            )?;
            Ok(())
        })
    }

    fn query_one(&self, sql: &str, key: &str) -> StoreResult<Option<EmoteMapping>> {
        self.with_conn(|conn| {
            let mapping = conn
                .query_row(sql, [key], |row| {
                    Ok(EmoteMapping {
                        source_emote_id: row.get(0)?,
                        target_emoji_name: row.get(1)?,
                        target_emoji_id: row.get(2)?,
                    })
                })
                .optional()?;
            Ok(mapping)
        })
    }
}

impl EmoteAssetStore for SqliteEmoteStore {
    fn insert(&self, mapping: &EmoteMapping) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO emojis (twitchId, emojiName, emojiId) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    mapping.source_emote_id,
                    mapping.target_emoji_name,
                    mapping.target_emoji_id,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    fn query(&self, emoji_name: &str) -> StoreResult<Option<EmoteMapping>> {
        self.query_one(
            "SELECT twitchId, emojiName, emojiId FROM emojis WHERE emojiName = ?1",
            emoji_name,
        )
    }

    fn query_source(&self, emote_id: &str) -> StoreResult<Option<EmoteMapping>> {
        self.query_one(
            "SELECT twitchId, emojiName, emojiId FROM emojis WHERE twitchId = ?1",
            emote_id,
        )
    }

    fn load_all(&self) -> StoreResult<Vec<EmoteMapping>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT twitchId, emojiName, emojiId FROM emojis")?;
            let rows = stmt.query_map([], |row| {
                Ok(EmoteMapping {
                    source_emote_id: row.get(0)?,
                    target_emoji_name: row.get(1)?,
                    target_emoji_id: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }
}

/// In-memory mirror of the store, keyed by emoji name for substitution.
#[derive(Debug, Default)]
pub struct EmoteCache {
    by_name: HashMap<String, EmoteMapping>,
    /// Source emote ID -> emoji name.
    by_source: HashMap<String, String>,
}

/// Emote cache shared with the background upload tasks.
pub type SharedEmoteCache = Arc<RwLock<EmoteCache>>;

impl EmoteCache {
    pub fn from_mappings(mappings: impl IntoIterator<Item = EmoteMapping>) -> Self {
        let mut cache = Self::default();
        for mapping in mappings {
            cache.insert(mapping);
        }
        cache
    }

    pub fn insert(&mut self, mapping: EmoteMapping) {
        self.by_source
            .insert(mapping.source_emote_id.clone(), mapping.target_emoji_name.clone());
        self.by_name.insert(mapping.target_emoji_name.clone(), mapping);
    }

    pub fn get(&self, emoji_name: &str) -> Option<&EmoteMapping> {
        self.by_name.get(emoji_name)
    }

    pub fn has_cached(&self, emoji_name: &str) -> bool {
        self.by_name.contains_key(emoji_name)
    }

    pub fn contains_source(&self, emote_id: &str) -> bool {
        self.by_source.contains_key(emote_id)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(source: &str, id: &str, name: &str) -> EmoteMapping {
        EmoteMapping {
            source_emote_id: source.to_string(),
            target_emoji_id: id.to_string(),
            target_emoji_name: name.to_string(),
        }
    }

    #[test]
    fn test_insert_and_query() {
        let store = SqliteEmoteStore::open_in_memory().unwrap();
        assert!(store.insert(&mapping("25", "900", "Kappa")).unwrap());

        let by_name = store.query("Kappa").unwrap().unwrap();
        assert_eq!(by_name.target_emoji_id, "900");
        let by_source = store.query_source("25").unwrap().unwrap();
        assert_eq!(by_source, by_name);
        assert!(store.query("PogChamp").unwrap().is_none());
    }

    #[test]
    fn test_insert_if_absent() {
        let store = SqliteEmoteStore::open_in_memory().unwrap();
        assert!(store.insert(&mapping("25", "900", "Kappa")).unwrap());
        assert!(!store.insert(&mapping("25", "901", "Kappa")).unwrap());

        let stored = store.query_source("25").unwrap().unwrap();
        assert_eq!(stored.target_emoji_id, "900");
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_cache_from_store() {
        let store = SqliteEmoteStore::open_in_memory().unwrap();
        store.insert(&mapping("25", "900", "Kappa")).unwrap();
        store.insert(&mapping("88", "901", "PogChamp")).unwrap();

        let cache = EmoteCache::from_mappings(store.load_all().unwrap());
        assert_eq!(cache.len(), 2);
        assert!(cache.has_cached("Kappa"));
        assert!(cache.contains_source("88"));
        assert!(!cache.has_cached("LUL"));
        assert_eq!(cache.get("Kappa").unwrap().discord_syntax(), "<:Kappa:900>");
    }
}
