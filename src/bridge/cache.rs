//! Bounded FIFO cache of recently observed messages.
//!
//! One cache exists per platform. Messages are evicted strictly in insertion
//! order; looking a message up does not refresh it.

use crate::common::ChatMessage;

/// Fixed-capacity ring buffer of chat messages.
#[derive(Debug)]
pub struct RecentMessageCache {
    /// Storage slots, indexed by insertion position modulo capacity.
    slots: Vec<Option<ChatMessage>>,
    /// Slot holding the oldest message.
    head: usize,
    /// Number of occupied slots.
    len: usize,
}

impl RecentMessageCache {
    /// Create an empty cache holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    /// Insert a message, evicting the oldest one when full.
    ///
    /// Returns the evicted message, if any.
    pub fn append(&mut self, message: ChatMessage) -> Option<ChatMessage> {
        let capacity = self.slots.len();
        if self.len < capacity {
            let slot = (self.head + self.len) % capacity;
            self.slots[slot] = Some(message);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(message);
            self.head = (self.head + 1) % capacity;
            evicted
        }
    }

    /// First message, oldest to newest, matching `predicate`.
    pub fn find<P>(&self, mut predicate: P) -> Option<&ChatMessage>
    where
        P: FnMut(&ChatMessage) -> bool,
    {
        self.iter().find(|message| predicate(message))
    }

    /// Look a message up by its platform ID.
    #[allow(dead_code)]
    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.find(|message| message.id == id)
    }

    /// Iterate over cached messages from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> + '_ {
        let capacity = self.slots.len();
        (0..self.len).filter_map(move |offset| self.slots[(self.head + offset) % capacity].as_ref())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Platform;
    use chrono::Utc;

    fn message(id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            platform: Platform::Twitch,
            channel_id: "chan".to_string(),
            author_id: "1".to_string(),
            author_login: "alice".to_string(),
            username: "alice".to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
            self_originated: false,
        }
    }

    #[test]
    fn test_append_within_capacity() {
        let mut cache = RecentMessageCache::new(3);
        assert!(cache.is_empty());
        assert!(cache.append(message("1", "a")).is_none());
        assert!(cache.append(message("2", "b")).is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.capacity(), 3);
    }

    #[test]
    fn test_eviction_keeps_most_recent_in_order() {
        let mut cache = RecentMessageCache::new(3);
        for i in 1..=3 {
            cache.append(message(&i.to_string(), "x"));
        }
        let evicted = cache.append(message("4", "x"));

        assert_eq!(evicted.map(|m| m.id), Some("1".to_string()));
        assert_eq!(cache.len(), 3);
        assert!(cache.get("1").is_none());
        let ids: Vec<&str> = cache.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_eviction_wraps_repeatedly() {
        let mut cache = RecentMessageCache::new(2);
        for i in 1..=7 {
            cache.append(message(&i.to_string(), "x"));
        }
        let ids: Vec<&str> = cache.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["6", "7"]);
    }

    #[test]
    fn test_find_returns_first_in_insertion_order() {
        let mut cache = RecentMessageCache::new(5);
        cache.append(message("1", "hello"));
        cache.append(message("2", "hello"));
        cache.append(message("3", "bye"));

        let found = cache.find(|m| m.text == "hello").unwrap();
        assert_eq!(found.id, "1");
        assert!(cache.find(|m| m.text == "missing").is_none());
    }

    #[test]
    fn test_lookup_does_not_refresh() {
        let mut cache = RecentMessageCache::new(2);
        cache.append(message("1", "a"));
        cache.append(message("2", "b"));
        assert!(cache.get("1").is_some());
        cache.append(message("3", "c"));
        assert!(cache.get("1").is_none());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache = RecentMessageCache::new(0);
        cache.append(message("1", "a"));
        cache.append(message("2", "b"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("2").map(|m| m.text.as_str()), Some("b"));
    }
}
