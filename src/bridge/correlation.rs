//! Bidirectional message correlation.
//!
//! Links the ID of a message on one platform to the ID of its mirror on the
//! other platform, so a delete on either side can be propagated.
//!
//! Entries are created half-open when a message is observed and become linked
//! once the mirror is known. The cache is bounded: when full, the oldest
//! entries are dropped whether linked or not. An entry dropped before it was
//! linked can never be completed.

use std::collections::{HashMap, VecDeque};

use crate::common::Platform;

/// A pair of message IDs, one per platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationEntry {
    pub discord_message_id: Option<String>,
    pub twitch_message_id: Option<String>,
}

impl CorrelationEntry {
    fn with_side(platform: Platform, id: &str) -> Self {
        let mut entry = Self::default();
        entry.set_side(platform, id);
        entry
    }

    /// The message ID on the given platform.
    pub fn side(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::Discord => self.discord_message_id.as_deref(),
            Platform::Twitch => self.twitch_message_id.as_deref(),
        }
    }

    fn set_side(&mut self, platform: Platform, id: &str) {
        let slot = match platform {
            Platform::Discord => &mut self.discord_message_id,
            Platform::Twitch => &mut self.twitch_message_id,
        };
        *slot = Some(id.to_string());
    }

    /// Both sides are known.
    pub fn is_linked(&self) -> bool {
        self.discord_message_id.is_some() && self.twitch_message_id.is_some()
    }
}

/// Bounded store of correlation entries with per-platform ID indexes.
#[derive(Debug)]
pub struct MessageCorrelationCache {
    entries: HashMap<u64, CorrelationEntry>,
    discord_index: HashMap<String, u64>,
    twitch_index: HashMap<String, u64>,
    /// Entry keys in creation order. May contain keys of discarded entries.
    order: VecDeque<u64>,
    next_key: u64,
    capacity: usize,
}

impl MessageCorrelationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            discord_index: HashMap::new(),
            twitch_index: HashMap::new(),
            order: VecDeque::new(),
            next_key: 0,
            capacity: capacity.max(1),
        }
    }

    fn index(&self, platform: Platform) -> &HashMap<String, u64> {
        match platform {
            Platform::Discord => &self.discord_index,
            Platform::Twitch => &self.twitch_index,
        }
    }

    fn index_mut(&mut self, platform: Platform) -> &mut HashMap<String, u64> {
        match platform {
            Platform::Discord => &mut self.discord_index,
            Platform::Twitch => &mut self.twitch_index,
        }
    }

    fn entry(&self, platform: Platform, id: &str) -> Option<(u64, &CorrelationEntry)> {
        let key = *self.index(platform).get(id)?;
        self.entries.get(&key).map(|entry| (key, entry))
    }

    /// Register a newly observed message as an open half.
    ///
    /// Does nothing if the ID is already referenced by an entry. Returns
    /// whether a new entry was created.
    pub fn open_half(&mut self, platform: Platform, id: &str) -> bool {
        if self.index(platform).contains_key(id) {
            return false;
        }

        let key = self.next_key;
        self.next_key += 1;
        self.entries.insert(key, CorrelationEntry::with_side(platform, id));
        self.index_mut(platform).insert(id.to_string(), key);
        self.order.push_back(key);
        self.evict_overflow();
        true
    }

    /// Fill in the missing side of the open entry for `open_id`.
    ///
    /// If `other_id` is only referenced by its own open half, that half is
    /// folded into the completed entry. Returns `false` without changes when
    /// there is no open entry for `open_id` or `other_id` is already linked
    /// elsewhere.
    pub fn complete(&mut self, open_id: &str, open_platform: Platform, other_id: &str) -> bool {
        let other_platform = open_platform.other();

        let key = match self.entry(open_platform, open_id) {
            Some((key, entry)) if entry.side(other_platform).is_none() => key,
            _ => return false,
        };

        if let Some((other_key, other_entry)) = self.entry(other_platform, other_id) {
            if other_entry.is_linked() {
                return false;
            }
            self.entries.remove(&other_key);
        }

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.set_side(other_platform, other_id);
        }
        self.index_mut(other_platform).insert(other_id.to_string(), key);
        true
    }

    /// The linked counterpart of a message, whichever side it is on.
    pub fn resolve(&self, platform: Platform, id: &str) -> Option<&str> {
        self.entry(platform, id)
            .and_then(|(_, entry)| entry.side(platform.other()))
    }

    /// The message has an entry that is still waiting for its mirror.
    pub fn is_open(&self, platform: Platform, id: &str) -> bool {
        self.entry(platform, id)
            .map(|(_, entry)| entry.side(platform.other()).is_none())
            .unwrap_or(false)
    }

    /// Remove the entry referencing the message, both halves included.
    pub fn discard(&mut self, platform: Platform, id: &str) -> Option<CorrelationEntry> {
        let key = self.index_mut(platform).remove(id)?;
        let entry = self.entries.remove(&key)?;
        if let Some(other_id) = entry.side(platform.other()) {
            let other_index = self.index_mut(platform.other());
            if other_index.get(other_id) == Some(&key) {
                other_index.remove(other_id);
            }
        }
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.capacity {
            let Some(key) = self.order.pop_front() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                self.unindex(key, &entry);
            }
        }

        // Keys of discarded or folded entries linger in `order`.
        if self.order.len() > self.capacity * 2 {
            let entries = &self.entries;
            self.order.retain(|key| entries.contains_key(key));
        }
    }

    fn unindex(&mut self, key: u64, entry: &CorrelationEntry) {
        for platform in [Platform::Discord, Platform::Twitch] {
            if let Some(id) = entry.side(platform) {
                let index = self.index_mut(platform);
                if index.get(id) == Some(&key) {
                    index.remove(id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_half_is_unlinked() {
        let mut cache = MessageCorrelationCache::new(10);
        assert!(cache.open_half(Platform::Twitch, "t1"));
        assert!(cache.is_open(Platform::Twitch, "t1"));
        assert_eq!(cache.resolve(Platform::Twitch, "t1"), None);
    }

    #[test]
    fn test_open_half_twice_is_noop() {
        let mut cache = MessageCorrelationCache::new(10);
        assert!(cache.open_half(Platform::Discord, "d1"));
        assert!(!cache.open_half(Platform::Discord, "d1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_complete_is_symmetric() {
        let mut cache = MessageCorrelationCache::new(10);
        cache.open_half(Platform::Twitch, "t1");

        assert!(cache.complete("t1", Platform::Twitch, "d1"));
        assert_eq!(cache.resolve(Platform::Twitch, "t1"), Some("d1"));
        assert_eq!(cache.resolve(Platform::Discord, "d1"), Some("t1"));
        assert!(!cache.is_open(Platform::Twitch, "t1"));
    }

    #[test]
    fn test_complete_without_open_entry_is_noop() {
        let mut cache = MessageCorrelationCache::new(10);
        assert!(!cache.complete("t1", Platform::Twitch, "d1"));
        assert_eq!(cache.resolve(Platform::Discord, "d1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_complete_linked_entry_is_noop() {
        let mut cache = MessageCorrelationCache::new(10);
        cache.open_half(Platform::Twitch, "t1");
        cache.complete("t1", Platform::Twitch, "d1");

        assert!(!cache.complete("t1", Platform::Twitch, "d2"));
        assert_eq!(cache.resolve(Platform::Twitch, "t1"), Some("d1"));
    }

    #[test]
    fn test_complete_folds_echo_half() {
        let mut cache = MessageCorrelationCache::new(10);
        cache.open_half(Platform::Discord, "d1");
        cache.open_half(Platform::Twitch, "t-echo");

        assert!(cache.complete("d1", Platform::Discord, "t-echo"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.resolve(Platform::Twitch, "t-echo"), Some("d1"));
    }

    #[test]
    fn test_complete_refuses_already_linked_other() {
        let mut cache = MessageCorrelationCache::new(10);
        cache.open_half(Platform::Twitch, "t1");
        cache.complete("t1", Platform::Twitch, "d1");
        cache.open_half(Platform::Twitch, "t2");

        assert!(!cache.complete("t2", Platform::Twitch, "d1"));
        assert_eq!(cache.resolve(Platform::Discord, "d1"), Some("t1"));
        assert!(cache.is_open(Platform::Twitch, "t2"));
    }

    #[test]
    fn test_discard_removes_both_halves() {
        let mut cache = MessageCorrelationCache::new(10);
        cache.open_half(Platform::Twitch, "t1");
        cache.complete("t1", Platform::Twitch, "d1");

        let entry = cache.discard(Platform::Discord, "d1").unwrap();
        assert_eq!(entry.twitch_message_id.as_deref(), Some("t1"));
        assert_eq!(cache.resolve(Platform::Twitch, "t1"), None);
        assert_eq!(cache.resolve(Platform::Discord, "d1"), None);
        assert!(cache.discard(Platform::Twitch, "t1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest_entries() {
        let mut cache = MessageCorrelationCache::new(2);
        cache.open_half(Platform::Twitch, "t1");
        cache.complete("t1", Platform::Twitch, "d1");
        cache.open_half(Platform::Twitch, "t2");
        cache.open_half(Platform::Twitch, "t3");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.resolve(Platform::Discord, "d1"), None);
        assert!(!cache.is_open(Platform::Twitch, "t1"));
        assert!(cache.is_open(Platform::Twitch, "t3"));
    }

    #[test]
    fn test_stale_order_keys_are_compacted() {
        let mut cache = MessageCorrelationCache::new(2);
        for i in 0..20 {
            let id = format!("t{}", i);
            cache.open_half(Platform::Twitch, &id);
            cache.discard(Platform::Twitch, &id);
        }
        assert!(cache.order.len() <= 4);
        assert!(cache.is_empty());
    }
}
